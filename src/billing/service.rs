use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use super::events::{BillingEvent, SubscriptionChange, SubscriptionTarget};
use super::models::{Subscription, SubscriptionStatus};
use super::usage;
use crate::audit::{self, AuditEntry};
use crate::entitlements::Plan;

pub const WEBHOOK_ACTOR: &str = "gateway:webhook";

/// Length of the period opened by a verified checkout, until the gateway reports the real
/// period end.
pub const CHECKOUT_PERIOD_DAYS: i64 = 30;

#[derive(Debug)]
pub enum EventOutcome {
    Applied {
        subscription: Subscription,
        usage_reset: bool,
    },
    Unmatched,
    Ignored,
}

/// key: billing-service -> subscription lifecycle
#[derive(Clone)]
pub struct BillingService {
    pool: PgPool,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a freshly created gateway checkout. The plan is stored right away but stays
    /// inert until the subscription turns active.
    pub async fn begin_checkout(
        &self,
        organization_id: Uuid,
        plan: Plan,
        gateway_subscription_id: &str,
    ) -> Result<Subscription> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET plan = $2,
                status = 'PENDING',
                gateway_subscription_id = $3,
                updated_at = NOW()
            WHERE organization_id = $1
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(plan.as_str())
        .bind(gateway_subscription_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(subscription)
    }

    /// Marks a checkout as paid after its payment signature was verified. Returns `None`
    /// when the gateway subscription id does not belong to the organization.
    pub async fn activate_checkout(
        &self,
        organization_id: Uuid,
        gateway_subscription_id: &str,
        payment_id: &str,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let mut tx = self.pool.begin().await?;
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'ACTIVE',
                gateway_payment_id = $3,
                current_period_start = $4,
                current_period_end = $5,
                updated_at = NOW()
            WHERE organization_id = $1 AND gateway_subscription_id = $2
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(gateway_subscription_id)
        .bind(payment_id)
        .bind(now)
        .bind(now + Duration::days(CHECKOUT_PERIOD_DAYS))
        .fetch_optional(&mut tx)
        .await?;

        let Some(subscription) = subscription else {
            return Ok(None);
        };

        usage::reset_monthly(&mut tx, organization_id, now).await?;
        audit::record(
            &mut tx,
            AuditEntry {
                organization_id,
                actor_id: actor_id.to_string(),
                action: "subscription_activated",
                entity: "subscription",
                entity_id: Some(subscription.id.to_string()),
                meta: json!({
                    "plan": subscription.plan,
                    "gateway_subscription_id": gateway_subscription_id,
                    "gateway_payment_id": payment_id,
                }),
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            %organization_id,
            plan = %subscription.plan,
            "subscription activated from verified checkout"
        );
        Ok(Some(subscription))
    }

    /// Applies one gateway event in a single transaction. Events that name no known
    /// subscription are reported as unmatched and change nothing.
    pub async fn apply_event(&self, event: &BillingEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        let target = match event {
            BillingEvent::Ignored { .. } => return Ok(EventOutcome::Ignored),
            BillingEvent::SubscriptionChanged { change, .. } => &change.target,
            BillingEvent::SubscriptionCancelled { target }
            | BillingEvent::PaymentCaptured { target, .. }
            | BillingEvent::PaymentFailed { target } => target,
        };

        let mut tx = self.pool.begin().await?;
        let Some(existing) = find_target(&mut tx, target).await? else {
            warn!(
                event = event.action(),
                subscription_id = ?target.subscription_id,
                customer_id = ?target.customer_id,
                org_id = ?target.organization_external_id,
                "billing event matched no subscription"
            );
            return Ok(EventOutcome::Unmatched);
        };

        let mut usage_reset = false;
        let subscription = match event {
            BillingEvent::SubscriptionChanged { kind, change } => {
                let opens_period =
                    kind.opens_period() && change.status == SubscriptionStatus::Active;
                let period_start = opens_period.then_some(now);
                let updated = apply_change(&mut tx, existing.id, change, period_start).await?;
                if opens_period {
                    // New period: monthly restarts at zero and lifetime is recounted from the
                    // stored leads.
                    usage::reset_monthly(&mut tx, updated.organization_id, now).await?;
                    usage::reconcile(&mut tx, updated.organization_id, now).await?;
                    usage_reset = true;
                }
                updated
            }
            BillingEvent::SubscriptionCancelled { .. } => {
                sqlx::query_as::<_, Subscription>(
                    r#"
                    UPDATE subscriptions
                    SET status = 'CANCELED', plan = 'FREE', updated_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(existing.id)
                .fetch_one(&mut tx)
                .await?
            }
            BillingEvent::PaymentCaptured { payment_id, .. } => {
                sqlx::query_as::<_, Subscription>(
                    r#"
                    UPDATE subscriptions
                    SET status = 'ACTIVE',
                        gateway_payment_id = COALESCE($2, gateway_payment_id),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(existing.id)
                .bind(payment_id)
                .fetch_one(&mut tx)
                .await?
            }
            BillingEvent::PaymentFailed { .. } => {
                // Only a paid subscription can fall past due; a failed first charge leaves a
                // pending checkout pending.
                let updated = sqlx::query_as::<_, Subscription>(
                    "UPDATE subscriptions SET status = 'PAST_DUE', updated_at = NOW() \
                     WHERE id = $1 AND status = 'ACTIVE' RETURNING *",
                )
                .bind(existing.id)
                .fetch_optional(&mut tx)
                .await?;
                let Some(updated) = updated else {
                    info!(
                        organization_id = %existing.organization_id,
                        status = %existing.status,
                        "payment failure on an inactive subscription ignored"
                    );
                    return Ok(EventOutcome::Ignored);
                };
                updated
            }
            BillingEvent::Ignored { .. } => return Ok(EventOutcome::Ignored),
        };

        audit::record(
            &mut tx,
            AuditEntry {
                organization_id: subscription.organization_id,
                actor_id: WEBHOOK_ACTOR.to_string(),
                action: event.action(),
                entity: "subscription",
                entity_id: Some(subscription.id.to_string()),
                meta: json!({
                    "before": { "plan": existing.plan, "status": existing.status },
                    "after": { "plan": subscription.plan, "status": subscription.status },
                    "usage_reset": usage_reset,
                }),
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            organization_id = %subscription.organization_id,
            event = event.action(),
            plan = %subscription.plan,
            status = %subscription.status,
            usage_reset,
            "billing event applied"
        );
        Ok(EventOutcome::Applied {
            subscription,
            usage_reset,
        })
    }
}

async fn apply_change(
    conn: &mut PgConnection,
    subscription_id: Uuid,
    change: &SubscriptionChange,
    period_start: Option<DateTime<Utc>>,
) -> sqlx::Result<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET plan = $2,
            status = $3,
            gateway_subscription_id = COALESCE($4, gateway_subscription_id),
            gateway_customer_id = COALESCE($5, gateway_customer_id),
            current_period_start = COALESCE($6, current_period_start),
            current_period_end = COALESCE($7, current_period_end),
            cancel_at_period_end = $8,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(subscription_id)
    .bind(change.plan.as_str())
    .bind(change.status.as_str())
    .bind(&change.target.subscription_id)
    .bind(&change.target.customer_id)
    .bind(period_start)
    .bind(change.current_period_end)
    .bind(change.cancel_at_period_end)
    .fetch_one(conn)
    .await
}

/// Locks and returns the subscription an event refers to.
async fn find_target(
    conn: &mut PgConnection,
    target: &SubscriptionTarget,
) -> sqlx::Result<Option<Subscription>> {
    if let Some(id) = &target.subscription_id {
        let found = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE gateway_subscription_id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        if found.is_some() {
            return Ok(found);
        }
    }
    if let Some(id) = &target.customer_id {
        let found = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE gateway_customer_id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        if found.is_some() {
            return Ok(found);
        }
    }
    if let Some(external_id) = &target.organization_external_id {
        return sqlx::query_as::<_, Subscription>(
            r#"
            SELECT s.* FROM subscriptions s
            JOIN organizations o ON o.id = s.organization_id
            WHERE o.external_id = $1
            FOR UPDATE OF s
            "#,
        )
        .bind(external_id)
        .fetch_optional(&mut *conn)
        .await;
    }
    Ok(None)
}
