use std::sync::Arc;

use axum::{extract::Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{error, info};

use super::gateway::{verify_payment_signature, BillingGateway, BillingSettings, CheckoutRequest};
use super::models::{PlanLimitsView, PlanSummary, SubscriptionStatus};
use super::service::BillingService;
use super::usage::UsageService;
use crate::entitlements::{self, Plan};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::organizations::resolve_tenant;

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub plan: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub subscription_id: String,
    pub plan: Plan,
    pub status: SubscriptionStatus,
}

#[derive(Debug, Deserialize)]
pub struct VerifyBody {
    pub razorpay_payment_id: String,
    pub razorpay_subscription_id: String,
    pub razorpay_signature: String,
}

/// Yearly checkouts bill twelve cycles up front; monthly checkouts renew one at a time.
fn total_cycles(plan: Plan) -> u32 {
    match plan {
        Plan::ProYearly => 12,
        _ => 1,
    }
}

/// key: billing-api -> rest endpoints
pub async fn create_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn BillingGateway>>,
    Extension(settings): Extension<BillingSettings>,
    user: AuthUser,
    Json(body): Json<CheckoutBody>,
) -> AppResult<Json<CheckoutResponse>> {
    let plan = match body.plan.as_str() {
        "PRO_MONTHLY" => Plan::ProMonthly,
        "PRO_YEARLY" => Plan::ProYearly,
        _ => return Err(AppError::BadRequest("Invalid plan type".into())),
    };
    let tenant = resolve_tenant(&pool, &user).await?;
    let plan_id = settings
        .plans
        .gateway_id(plan)
        .map_err(|e| AppError::Internal(e.into()))?
        .to_string();

    let created = gateway
        .create_subscription(CheckoutRequest {
            plan_id,
            total_count: total_cycles(plan),
            customer_notify: 1,
            notes: json!({
                "org_id": user.org_id,
                "user_id": user.user_id,
                "plan": plan.as_str(),
            }),
        })
        .await
        .map_err(|e| {
            error!(?e, organization_id = %tenant.id(), "gateway checkout failed");
            AppError::BadGateway("Failed to create subscription".into())
        })?;

    let subscription = BillingService::new(pool)
        .begin_checkout(tenant.id(), plan, &created.id)
        .await?;
    info!(
        organization_id = %tenant.id(),
        plan = %plan,
        gateway_subscription_id = %created.id,
        "checkout created"
    );

    Ok(Json(CheckoutResponse {
        subscription_id: created.id,
        plan,
        status: subscription.status(),
    }))
}

pub async fn verify_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(settings): Extension<BillingSettings>,
    user: AuthUser,
    Json(body): Json<VerifyBody>,
) -> AppResult<Json<Value>> {
    if !verify_payment_signature(
        &settings.key_secret,
        &body.razorpay_payment_id,
        &body.razorpay_subscription_id,
        &body.razorpay_signature,
    ) {
        tracing::warn!(
            org_id = %user.org_id,
            gateway_subscription_id = %body.razorpay_subscription_id,
            "checkout verification rejected: signature mismatch"
        );
        return Err(AppError::InvalidSignature);
    }

    let tenant = resolve_tenant(&pool, &user).await?;
    let subscription = BillingService::new(pool)
        .activate_checkout(
            tenant.id(),
            &body.razorpay_subscription_id,
            &body.razorpay_payment_id,
            &user.user_id,
            Utc::now(),
        )
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(json!({
        "success": true,
        "plan": subscription.plan(),
        "status": subscription.status(),
        "current_period_end": subscription.current_period_end,
    })))
}

pub async fn plan_summary(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<PlanSummary>> {
    let tenant = resolve_tenant(&pool, &user).await?;
    let record = UsageService::new(pool)
        .current(tenant.id(), Utc::now())
        .await?;
    let plan = tenant.plan();
    let usage = record.counters();

    Ok(Json(PlanSummary {
        plan,
        plan_name: plan.display_name(),
        status: tenant.subscription.status(),
        limits: PlanLimitsView::from(plan),
        usage,
        remaining_leads: entitlements::remaining(plan, usage),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yearly_checkout_bills_twelve_cycles() {
        assert_eq!(total_cycles(Plan::ProYearly), 12);
        assert_eq!(total_cycles(Plan::ProMonthly), 1);
    }
}
