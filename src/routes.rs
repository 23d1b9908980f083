use axum::{
    routing::{get, post},
    Router,
};

use crate::{admin, billing, leads, profiles, sequences};

pub async fn root() -> &'static str {
    "LeadPilot API"
}

pub fn api_routes() -> Router {
    Router::new()
        .route(
            "/api/icps",
            get(profiles::list_icps).post(profiles::create_icp),
        )
        .route("/api/leads", get(leads::list_leads))
        .route("/api/leads/generate", post(leads::generate_leads))
        .route("/api/leads/export", post(leads::export_leads))
        .route("/api/sequences/variants", post(sequences::generate_variants))
        .route("/api/user/plan", get(billing::plan_summary))
        .route(
            "/api/billing/subscriptions",
            post(billing::create_subscription),
        )
        .route("/api/billing/verify", post(billing::verify_subscription))
        .route("/api/webhooks/razorpay", post(billing::razorpay_webhook))
        .route("/api/admin/usage/reconcile", post(admin::reconcile_own))
        .route(
            "/api/admin/usage/reconcile-all",
            post(admin::reconcile_all),
        )
}
