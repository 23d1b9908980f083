use axum::{extract::Extension, Json};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::enrichment::SequenceVariant;
use crate::entitlements::{require_plan, Plan};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::leads::LeadPipeline;
use crate::organizations::resolve_tenant;

const MAX_VARIANTS: u32 = 10;

fn default_count() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
pub struct VariantRequest {
    pub subject: String,
    pub body: String,
    #[serde(default = "default_count")]
    pub count: u32,
}

#[derive(Debug, Serialize)]
pub struct VariantResponse {
    pub variants: Vec<SequenceVariant>,
}

/// Pro-tier rewrite of an outreach email into alternative angles.
pub async fn generate_variants(
    Extension(pool): Extension<PgPool>,
    Extension(pipeline): Extension<LeadPipeline>,
    user: AuthUser,
    Json(payload): Json<VariantRequest>,
) -> AppResult<Json<VariantResponse>> {
    if payload.subject.trim().is_empty() || payload.body.trim().is_empty() {
        return Err(AppError::BadRequest("Subject and body are required".into()));
    }
    let tenant = resolve_tenant(&pool, &user).await?;
    require_plan(tenant.plan(), Plan::ProMonthly)?;

    let count = payload.count.clamp(1, MAX_VARIANTS);
    let variants = pipeline
        .assistant()
        .generate_sequence_variants(&payload.subject, &payload.body, count)
        .await;
    Ok(Json(VariantResponse { variants }))
}
