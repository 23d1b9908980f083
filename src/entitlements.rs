use serde::{Deserialize, Serialize};
use thiserror::Error;

// key: plan-entitlements -> lead credit rules

pub const LIFETIME_LIMIT_REASON: &str =
    "Lifetime lead limit reached. Upgrade to generate more leads.";
pub const MONTHLY_LIMIT_REASON: &str =
    "Monthly lead limit reached. Your limit will reset at the start of your next billing period.";
pub const NO_REMAINING_REASON: &str = "No remaining lead credits available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    Free,
    ProMonthly,
    ProYearly,
    Enterprise,
}

impl Plan {
    pub const ALL: [Plan; 4] = [
        Plan::Free,
        Plan::ProMonthly,
        Plan::ProYearly,
        Plan::Enterprise,
    ];

    /// Parses a stored plan code. Anything unrecognized falls back to `Free` so an unknown
    /// value can never unlock a larger quota.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PRO_MONTHLY" => Plan::ProMonthly,
            "PRO_YEARLY" => Plan::ProYearly,
            "ENTERPRISE" => Plan::Enterprise,
            _ => Plan::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "FREE",
            Plan::ProMonthly => "PRO_MONTHLY",
            Plan::ProYearly => "PRO_YEARLY",
            Plan::Enterprise => "ENTERPRISE",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::ProMonthly => "Pro Monthly",
            Plan::ProYearly => "Pro Yearly",
            Plan::Enterprise => "Enterprise",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                monthly: Limit::Unlimited,
                lifetime: Limit::Finite(5),
            },
            Plan::ProMonthly | Plan::ProYearly => PlanLimits {
                monthly: Limit::Finite(1000),
                lifetime: Limit::Unlimited,
            },
            Plan::Enterprise => PlanLimits {
                monthly: Limit::Unlimited,
                lifetime: Limit::Unlimited,
            },
        }
    }

    fn tier(&self) -> u8 {
        match self {
            Plan::Free => 0,
            Plan::ProMonthly | Plan::ProYearly => 1,
            Plan::Enterprise => 2,
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Finite(i64),
    Unlimited,
}

impl Limit {
    /// Units left under this limit, `None` when unlimited. May be negative when usage
    /// already overshot the limit.
    pub fn headroom(&self, used: i64) -> Option<i64> {
        match self {
            Limit::Finite(limit) => Some(limit - used.max(0)),
            Limit::Unlimited => None,
        }
    }

    pub fn exhausted_by(&self, used: i64) -> bool {
        matches!(self, Limit::Finite(limit) if used.max(0) >= *limit)
    }

    pub fn as_option(&self) -> Option<i64> {
        match self {
            Limit::Finite(limit) => Some(*limit),
            Limit::Unlimited => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub monthly: Limit,
    pub lifetime: Limit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageCounters {
    pub monthly_used: i64,
    pub lifetime_used: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitWindow {
    Lifetime,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntitlementDenial {
    #[error("{reason}")]
    PlanLimit {
        window: LimitWindow,
        reason: &'static str,
    },
    #[error("{}", NO_REMAINING_REASON)]
    NoRemainingCredits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementCheck {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("This feature requires {required} plan or higher. Please upgrade.")]
pub struct PlanTierError {
    pub required: Plan,
    pub current: Plan,
}

fn check_limits(plan: Plan, usage: UsageCounters) -> Result<(), EntitlementDenial> {
    let limits = plan.limits();
    if limits.lifetime.exhausted_by(usage.lifetime_used) {
        return Err(EntitlementDenial::PlanLimit {
            window: LimitWindow::Lifetime,
            reason: LIFETIME_LIMIT_REASON,
        });
    }
    if limits.monthly.exhausted_by(usage.monthly_used) {
        return Err(EntitlementDenial::PlanLimit {
            window: LimitWindow::Monthly,
            reason: MONTHLY_LIMIT_REASON,
        });
    }
    Ok(())
}

/// Decides whether the tenant may start another generation at all. Lifetime limits are
/// checked before monthly ones.
pub fn can_generate(plan: Plan, monthly_used: i64, lifetime_used: i64) -> EntitlementCheck {
    let usage = UsageCounters {
        monthly_used,
        lifetime_used,
    };
    match check_limits(plan, usage) {
        Ok(()) => EntitlementCheck {
            allowed: true,
            reason: None,
        },
        Err(denial) => EntitlementCheck {
            allowed: false,
            reason: Some(denial.to_string()),
        },
    }
}

/// Number of units that fit in the remaining headroom of both windows, never negative.
pub fn grantable_count(plan: Plan, requested: u32, monthly_used: i64, lifetime_used: i64) -> u32 {
    let limits = plan.limits();
    let mut grant = i64::from(requested);
    if let Some(headroom) = limits.monthly.headroom(monthly_used) {
        grant = grant.min(headroom);
    }
    if let Some(headroom) = limits.lifetime.headroom(lifetime_used) {
        grant = grant.min(headroom);
    }
    grant.max(0) as u32
}

/// Plan check followed by the batch clamp. A zero grant is reported as
/// `NoRemainingCredits` even when the plan check alone would pass.
pub fn evaluate(
    plan: Plan,
    requested: u32,
    usage: UsageCounters,
) -> Result<u32, EntitlementDenial> {
    check_limits(plan, usage)?;
    match grantable_count(plan, requested, usage.monthly_used, usage.lifetime_used) {
        0 => Err(EntitlementDenial::NoRemainingCredits),
        grant => Ok(grant),
    }
}

/// Remaining credits across both windows; `None` when the plan is unlimited in both.
pub fn remaining(plan: Plan, usage: UsageCounters) -> Option<i64> {
    let limits = plan.limits();
    let monthly = limits.monthly.headroom(usage.monthly_used);
    let lifetime = limits.lifetime.headroom(usage.lifetime_used);
    match (monthly, lifetime) {
        (None, None) => None,
        (Some(left), None) | (None, Some(left)) => Some(left.max(0)),
        (Some(a), Some(b)) => Some(a.min(b).max(0)),
    }
}

pub fn require_plan(current: Plan, minimum: Plan) -> Result<(), PlanTierError> {
    if current.tier() < minimum.tier() {
        return Err(PlanTierError {
            required: minimum,
            current,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(monthly_used: i64, lifetime_used: i64) -> UsageCounters {
        UsageCounters {
            monthly_used,
            lifetime_used,
        }
    }

    #[test]
    fn free_plan_gated_only_by_lifetime() {
        for m in [0, 1, 4, 5, 999, 1000, 50_000] {
            for l in 0..=12 {
                let check = can_generate(Plan::Free, m, l);
                assert_eq!(check.allowed, l < 5, "free m={m} l={l}");
            }
        }
    }

    #[test]
    fn pro_plans_gated_only_by_monthly() {
        for plan in [Plan::ProMonthly, Plan::ProYearly] {
            for m in [0, 1, 500, 998, 999, 1000, 1001, 4000] {
                for l in [0, 5, 1000, 250_000] {
                    let check = can_generate(plan, m, l);
                    assert_eq!(check.allowed, m < 1000, "{plan} m={m} l={l}");
                }
            }
        }
    }

    #[test]
    fn enterprise_is_never_gated() {
        assert!(can_generate(Plan::Enterprise, i64::MAX, i64::MAX).allowed);
        assert_eq!(
            grantable_count(Plan::Enterprise, 1000, 1_000_000, 1_000_000),
            1000
        );
        assert_eq!(remaining(Plan::Enterprise, usage(10, 10)), None);
    }

    #[test]
    fn lifetime_denial_carries_lifetime_reason() {
        let check = can_generate(Plan::Free, 0, 5);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("Lifetime"));

        let denial = evaluate(Plan::Free, 1, usage(0, 5)).unwrap_err();
        assert_eq!(
            denial,
            EntitlementDenial::PlanLimit {
                window: LimitWindow::Lifetime,
                reason: LIFETIME_LIMIT_REASON,
            }
        );
    }

    #[test]
    fn monthly_denial_mentions_reset() {
        let check = can_generate(Plan::ProMonthly, 1000, 0);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("next billing period"));
    }

    #[test]
    fn batch_is_clamped_to_headroom() {
        assert_eq!(grantable_count(Plan::ProMonthly, 5, 998, 0), 2);
        assert_eq!(evaluate(Plan::ProMonthly, 5, usage(998, 40_000)), Ok(2));
        assert_eq!(grantable_count(Plan::Free, 10, 0, 3), 2);
        assert_eq!(grantable_count(Plan::Free, 1, 0, 0), 1);
    }

    #[test]
    fn exhausted_headroom_is_a_distinct_denial() {
        assert_eq!(grantable_count(Plan::Free, 3, 0, 9), 0);
        assert_eq!(grantable_count(Plan::ProYearly, 3, 1200, 0), 0);
        assert_eq!(
            evaluate(Plan::Free, 0, usage(0, 1)),
            Err(EntitlementDenial::NoRemainingCredits)
        );
        assert_ne!(
            evaluate(Plan::Free, 0, usage(0, 1)).unwrap_err().to_string(),
            LIFETIME_LIMIT_REASON
        );
    }

    #[test]
    fn unknown_plan_codes_fail_closed() {
        assert_eq!(Plan::parse("GOLD"), Plan::Free);
        assert_eq!(Plan::parse(""), Plan::Free);
        assert_eq!(Plan::parse("pro_yearly"), Plan::ProYearly);
        for plan in Plan::ALL {
            assert_eq!(Plan::parse(plan.as_str()), plan);
        }
    }

    #[test]
    fn decisions_are_deterministic() {
        for plan in Plan::ALL {
            let first = evaluate(plan, 7, usage(996, 3));
            for _ in 0..10 {
                assert_eq!(evaluate(plan, 7, usage(996, 3)), first);
            }
        }
    }

    #[test]
    fn remaining_uses_tightest_window() {
        assert_eq!(remaining(Plan::Free, usage(40, 2)), Some(3));
        assert_eq!(remaining(Plan::Free, usage(0, 8)), Some(0));
        assert_eq!(remaining(Plan::ProMonthly, usage(250, 9_000)), Some(750));
    }

    #[test]
    fn plan_tiers_gate_features() {
        assert!(require_plan(Plan::ProYearly, Plan::ProMonthly).is_ok());
        assert!(require_plan(Plan::Enterprise, Plan::ProMonthly).is_ok());
        let err = require_plan(Plan::Free, Plan::ProMonthly).unwrap_err();
        assert_eq!(err.required, Plan::ProMonthly);
        assert!(err.to_string().contains("PRO_MONTHLY"));
    }
}
