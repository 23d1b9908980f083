use anyhow::Result;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::UsageRecord;
use crate::audit::{self, AuditEntry};
use crate::entitlements::{EntitlementDenial, Plan};
use crate::error::AppError;

pub const RECONCILER_ACTOR: &str = "system:usage-reconciler";

/// Usage rows are keyed by calendar month in `YYYY-MM` form.
pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Start of the window monthly usage is counted in: the later of the calendar-month
/// start and the current billing period start.
pub fn usage_window_start(
    now: DateTime<Utc>,
    period_start: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    match period_start {
        Some(start) if start > month_start && start <= now => start,
        _ => month_start,
    }
}

#[derive(Debug, Error)]
pub enum ReserveError {
    #[error(transparent)]
    Denied(#[from] EntitlementDenial),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<ReserveError> for AppError {
    fn from(err: ReserveError) -> Self {
        match err {
            ReserveError::Denied(denial) => AppError::Entitlement(denial),
            ReserveError::Db(err) => AppError::Db(err),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub before: UsageRecord,
    pub after: UsageRecord,
    pub lead_count: i64,
    pub drifted: bool,
}

/// Creates the row for `(organization, month)` if it does not exist. Monthly usage starts
/// at zero; lifetime usage carries forward from the latest earlier month.
pub async fn ensure_record(
    conn: &mut PgConnection,
    organization_id: Uuid,
    month: &str,
) -> sqlx::Result<UsageRecord> {
    sqlx::query(
        r#"
        INSERT INTO lead_credit_usage (id, organization_id, month, monthly_used, lifetime_used)
        VALUES (
            $1,
            $2,
            $3,
            0,
            COALESCE(
                (
                    SELECT lifetime_used FROM lead_credit_usage
                    WHERE organization_id = $2 AND month < $3
                    ORDER BY month DESC
                    LIMIT 1
                ),
                0
            )
        )
        ON CONFLICT (organization_id, month) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(month)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, UsageRecord>(
        "SELECT * FROM lead_credit_usage WHERE organization_id = $1 AND month = $2",
    )
    .bind(organization_id)
    .bind(month)
    .fetch_one(&mut *conn)
    .await
}

/// Increments both counters by `count` only while the result stays within the plan's
/// finite limits. The check and the write are one statement, so two concurrent
/// reservations serialize on the row and neither can overshoot or be lost.
pub async fn reserve(
    conn: &mut PgConnection,
    organization_id: Uuid,
    month: &str,
    plan: Plan,
    count: i64,
) -> Result<UsageRecord, ReserveError> {
    if count <= 0 {
        return Err(EntitlementDenial::NoRemainingCredits.into());
    }
    ensure_record(&mut *conn, organization_id, month).await?;
    let limits = plan.limits();
    let updated = sqlx::query_as::<_, UsageRecord>(
        r#"
        UPDATE lead_credit_usage
        SET monthly_used = monthly_used + $3,
            lifetime_used = lifetime_used + $3,
            updated_at = NOW()
        WHERE organization_id = $1
          AND month = $2
          AND ($4::BIGINT IS NULL OR monthly_used + $3 <= $4)
          AND ($5::BIGINT IS NULL OR lifetime_used + $3 <= $5)
        RETURNING *
        "#,
    )
    .bind(organization_id)
    .bind(month)
    .bind(count)
    .bind(limits.monthly.as_option())
    .bind(limits.lifetime.as_option())
    .fetch_optional(&mut *conn)
    .await?;

    updated.ok_or(ReserveError::Denied(EntitlementDenial::NoRemainingCredits))
}

/// key: usage-service -> counters, renewal reset, repair
#[derive(Clone)]
pub struct UsageService {
    pool: PgPool,
}

impl UsageService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn current(&self, organization_id: Uuid, now: DateTime<Utc>) -> Result<UsageRecord> {
        let mut conn = self.pool.acquire().await?;
        let record = ensure_record(&mut conn, organization_id, &month_key(now)).await?;
        Ok(record)
    }

    /// Opens a new billing period: monthly usage drops to zero, lifetime is untouched.
    pub async fn reset_monthly(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord> {
        let mut conn = self.pool.acquire().await?;
        reset_monthly(&mut conn, organization_id, now).await
    }

    /// Forces the current month's counters to match the leads actually stored. Lifetime is
    /// the all-time lead count; monthly is the count inside the current usage window.
    /// Running it again without new leads leaves the row untouched.
    pub async fn reconcile(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = reconcile(&mut tx, organization_id, now).await?;
        tx.commit().await?;
        Ok(outcome)
    }
}

/// Repairs one tenant's counters on a caller-owned connection. Reads the subscription's
/// period start through the same connection, so a period opened earlier in the caller's
/// transaction already narrows the monthly window.
pub async fn reconcile(
    conn: &mut PgConnection,
    organization_id: Uuid,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome> {
    let month = month_key(now);

    ensure_record(&mut *conn, organization_id, &month).await?;
    let before = sqlx::query_as::<_, UsageRecord>(
        "SELECT * FROM lead_credit_usage WHERE organization_id = $1 AND month = $2 FOR UPDATE",
    )
    .bind(organization_id)
    .bind(&month)
    .fetch_one(&mut *conn)
    .await?;

    let period_start = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT current_period_start FROM subscriptions WHERE organization_id = $1",
    )
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await?
    .flatten();
    let window_start = usage_window_start(now, period_start);

    let lifetime: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads WHERE organization_id = $1")
        .bind(organization_id)
        .fetch_one(&mut *conn)
        .await?;
    let monthly: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM leads WHERE organization_id = $1 AND created_at >= $2",
    )
    .bind(organization_id)
    .bind(window_start)
    .fetch_one(&mut *conn)
    .await?;

    let drifted = before.monthly_used != monthly || before.lifetime_used != lifetime;
    let after = if drifted {
        let after = sqlx::query_as::<_, UsageRecord>(
            r#"
            UPDATE lead_credit_usage
            SET monthly_used = $3, lifetime_used = $4, updated_at = NOW()
            WHERE organization_id = $1 AND month = $2
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(&month)
        .bind(monthly)
        .bind(lifetime)
        .fetch_one(&mut *conn)
        .await?;

        warn!(
            %organization_id,
            month = %month,
            stored_monthly = before.monthly_used,
            stored_lifetime = before.lifetime_used,
            actual_monthly = monthly,
            actual_lifetime = lifetime,
            "usage counters drifted from lead records; repaired"
        );
        audit::record(
            &mut *conn,
            AuditEntry {
                organization_id,
                actor_id: RECONCILER_ACTOR.to_string(),
                action: "usage_reconciled",
                entity: "lead_credit_usage",
                entity_id: Some(after.id.to_string()),
                meta: json!({
                    "month": month,
                    "before": { "monthly": before.monthly_used, "lifetime": before.lifetime_used },
                    "after": { "monthly": monthly, "lifetime": lifetime },
                }),
            },
        )
        .await?;
        after
    } else {
        debug!(%organization_id, month = %month, "usage counters already consistent");
        before.clone()
    };

    Ok(ReconcileOutcome {
        before,
        after,
        lead_count: lifetime,
        drifted,
    })
}

pub async fn reset_monthly(
    conn: &mut PgConnection,
    organization_id: Uuid,
    now: DateTime<Utc>,
) -> Result<UsageRecord> {
    let month = month_key(now);
    ensure_record(&mut *conn, organization_id, &month).await?;
    let record = sqlx::query_as::<_, UsageRecord>(
        r#"
        UPDATE lead_credit_usage
        SET monthly_used = 0, updated_at = NOW()
        WHERE organization_id = $1 AND month = $2
        RETURNING *
        "#,
    )
    .bind(organization_id)
    .bind(&month)
    .fetch_one(&mut *conn)
    .await?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn month_key_is_zero_padded() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(month_key(now), "2026-03");
    }

    #[test]
    fn window_starts_at_month_boundary_without_period() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let start = usage_window_start(now, None);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn renewal_inside_month_moves_window_start() {
        let now = Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap();
        let renewed = now - Duration::days(5);
        assert_eq!(usage_window_start(now, Some(renewed)), renewed);

        let last_month = now - Duration::days(40);
        assert_eq!(
            usage_window_start(now, Some(last_month)),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
        );
    }
}
