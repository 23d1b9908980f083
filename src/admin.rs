use axum::{extract::Extension, http::StatusCode, Json};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::billing::reconciliation::{ReconciliationHandle, ReconciliationJob};
use crate::billing::usage::{ReconcileOutcome, UsageService};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::organizations::resolve_tenant;

fn require_admin(user: &AuthUser) -> AppResult<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin role required".into()))
    }
}

/// Repairs the caller's own usage counters synchronously.
pub async fn reconcile_own(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<ReconcileOutcome>> {
    require_admin(&user)?;
    let tenant = resolve_tenant(&pool, &user).await?;
    let outcome = UsageService::new(pool)
        .reconcile(tenant.id(), Utc::now())
        .await?;
    Ok(Json(outcome))
}

/// Queues a sweep over every tenant; outcomes are logged by the worker.
pub async fn reconcile_all(
    Extension(reconciliation): Extension<ReconciliationHandle>,
    user: AuthUser,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_admin(&user)?;
    reconciliation
        .dispatch(ReconciliationJob::RepairAll)
        .await
        .map_err(AppError::Internal)?;
    tracing::info!(actor = %user.user_id, "usage reconciliation sweep queued");
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": true }))))
}
