pub mod api;
pub mod events;
pub mod gateway;
pub mod models;
pub mod reconciliation;
pub mod service;
pub mod usage;
pub mod webhooks;

pub use api::{create_subscription, plan_summary, verify_subscription};
pub use gateway::{BillingGateway, BillingSettings, GatewayPlans, RazorpayGateway};
pub use models::{PlanSummary, Subscription, SubscriptionStatus, UsageRecord};
pub use reconciliation::{start_reconciliation_worker, ReconciliationHandle, ReconciliationJob};
pub use service::BillingService;
pub use usage::UsageService;
pub use webhooks::razorpay_webhook;
