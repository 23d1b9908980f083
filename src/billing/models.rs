use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::entitlements::{Plan, UsageCounters};

/// key: billing-subscription-model -> organization
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan: String,
    pub status: String,
    pub gateway_customer_id: String,
    pub gateway_subscription_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn plan(&self) -> Plan {
        Plan::parse(&self.plan)
    }

    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::parse(&self.status)
    }

    /// The plan entitlements are evaluated against. A checkout that has not been paid
    /// yet, or a canceled subscription, grants only the free allowance.
    pub fn effective_plan(&self) -> Plan {
        match self.status() {
            SubscriptionStatus::Active | SubscriptionStatus::PastDue => self.plan(),
            SubscriptionStatus::Pending | SubscriptionStatus::Canceled => Plan::Free,
        }
    }
}

/// Mirrors the gateway's view of a subscription. Transitions are driven by inbound
/// events, never computed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Pending,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "ACTIVE" => SubscriptionStatus::Active,
            "PAST_DUE" => SubscriptionStatus::PastDue,
            "CANCELED" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Pending,
        }
    }

    /// Maps a gateway subscription status onto the local states. A missing status is
    /// treated as active, matching what the gateway sends on charge events.
    pub fn from_gateway(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return SubscriptionStatus::Active;
        };
        match value.to_ascii_lowercase().as_str() {
            "active" => SubscriptionStatus::Active,
            "halted" | "past_due" => SubscriptionStatus::PastDue,
            "cancelled" | "canceled" | "completed" | "expired" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Pending => "PENDING",
            SubscriptionStatus::PastDue => "PAST_DUE",
            SubscriptionStatus::Canceled => "CANCELED",
        }
    }
}

/// key: billing-usage-model -> per-month lead credit counters
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub month: String,
    pub monthly_used: i64,
    pub lifetime_used: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn counters(&self) -> UsageCounters {
        UsageCounters {
            monthly_used: self.monthly_used,
            lifetime_used: self.lifetime_used,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub plan: Plan,
    pub plan_name: &'static str,
    pub status: SubscriptionStatus,
    pub limits: PlanLimitsView,
    pub usage: UsageCounters,
    pub remaining_leads: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanLimitsView {
    pub leads_per_month: Option<i64>,
    pub leads_lifetime: Option<i64>,
}

impl From<Plan> for PlanLimitsView {
    fn from(plan: Plan) -> Self {
        let limits = plan.limits();
        Self {
            leads_per_month: limits.monthly.as_option(),
            leads_lifetime: limits.lifetime.as_option(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_statuses_map_onto_local_states() {
        assert_eq!(SubscriptionStatus::from_gateway(None), SubscriptionStatus::Active);
        assert_eq!(
            SubscriptionStatus::from_gateway(Some("active")),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_gateway(Some("halted")),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_gateway(Some("cancelled")),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            SubscriptionStatus::from_gateway(Some("authenticated")),
            SubscriptionStatus::Pending
        );
    }

    fn subscription(plan: &str, status: &str) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            plan: plan.into(),
            status: status.into(),
            gateway_customer_id: "temp_org".into(),
            gateway_subscription_id: None,
            gateway_payment_id: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unpaid_checkout_keeps_free_allowance() {
        assert_eq!(subscription("PRO_MONTHLY", "PENDING").effective_plan(), Plan::Free);
        assert_eq!(
            subscription("PRO_MONTHLY", "ACTIVE").effective_plan(),
            Plan::ProMonthly
        );
        assert_eq!(
            subscription("PRO_YEARLY", "PAST_DUE").effective_plan(),
            Plan::ProYearly
        );
        assert_eq!(subscription("ENTERPRISE", "CANCELED").effective_plan(), Plan::Free);
    }

    #[test]
    fn stored_statuses_round_trip() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Pending,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), status);
        }
    }
}
