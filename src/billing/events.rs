use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::gateway::GatewayPlans;
use super::models::SubscriptionStatus;
use crate::entitlements::Plan;

/// Raw webhook body as delivered by the gateway.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub subscription: Option<Wrapped<SubscriptionEntity>>,
    #[serde(default)]
    pub payment: Option<Wrapped<PaymentEntity>>,
}

#[derive(Debug, Deserialize)]
pub struct Wrapped<T> {
    pub entity: T,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionEntity {
    pub id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub current_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    // The gateway sends `[]` instead of `{}` when no notes were attached.
    #[serde(default)]
    pub notes: Value,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub notes: Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("{event} payload is missing the {entity} entity")]
    MissingEntity {
        event: String,
        entity: &'static str,
    },
}

/// Identifies the local subscription an event refers to. Lookups try the gateway
/// subscription id, then the gateway customer id, then the organization named in the
/// checkout notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionTarget {
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub organization_external_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEventKind {
    Activated,
    Charged,
    Updated,
}

impl SubscriptionEventKind {
    /// Activation and each successful charge start a fresh billing period.
    pub fn opens_period(&self) -> bool {
        matches!(
            self,
            SubscriptionEventKind::Activated | SubscriptionEventKind::Charged
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionChange {
    pub target: SubscriptionTarget,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    SubscriptionChanged {
        kind: SubscriptionEventKind,
        change: SubscriptionChange,
    },
    SubscriptionCancelled {
        target: SubscriptionTarget,
    },
    PaymentCaptured {
        target: SubscriptionTarget,
        payment_id: Option<String>,
    },
    PaymentFailed {
        target: SubscriptionTarget,
    },
    Ignored {
        event: String,
    },
}

impl BillingEvent {
    pub fn from_envelope(
        envelope: WebhookEnvelope,
        plans: &GatewayPlans,
    ) -> Result<Self, EventError> {
        let WebhookEnvelope { event, payload } = envelope;
        let kind = match event.as_str() {
            "subscription.activated" => Some(SubscriptionEventKind::Activated),
            "subscription.charged" => Some(SubscriptionEventKind::Charged),
            "subscription.updated" => Some(SubscriptionEventKind::Updated),
            _ => None,
        };

        if let Some(kind) = kind {
            let entity = subscription_entity(&event, payload.subscription)?;
            let change = SubscriptionChange {
                plan: plans.plan_for(entity.plan_id.as_deref()),
                status: SubscriptionStatus::from_gateway(entity.status.as_deref()),
                current_period_end: entity.current_end.and_then(from_unix),
                cancel_at_period_end: entity.cancel_at_period_end,
                target: subscription_target(&entity),
            };
            return Ok(BillingEvent::SubscriptionChanged { kind, change });
        }

        match event.as_str() {
            "subscription.cancelled" => {
                let entity = subscription_entity(&event, payload.subscription)?;
                Ok(BillingEvent::SubscriptionCancelled {
                    target: subscription_target(&entity),
                })
            }
            "payment.captured" => {
                let entity = payment_entity(&event, payload.payment)?;
                Ok(BillingEvent::PaymentCaptured {
                    target: payment_target(&entity),
                    payment_id: entity.id,
                })
            }
            "payment.failed" => {
                let entity = payment_entity(&event, payload.payment)?;
                Ok(BillingEvent::PaymentFailed {
                    target: payment_target(&entity),
                })
            }
            _ => Ok(BillingEvent::Ignored { event }),
        }
    }

    /// Audit action recorded when the event changes a subscription.
    pub fn action(&self) -> &'static str {
        match self {
            BillingEvent::SubscriptionChanged {
                kind: SubscriptionEventKind::Activated,
                ..
            } => "subscription.activated",
            BillingEvent::SubscriptionChanged {
                kind: SubscriptionEventKind::Charged,
                ..
            } => "subscription.charged",
            BillingEvent::SubscriptionChanged {
                kind: SubscriptionEventKind::Updated,
                ..
            } => "subscription.updated",
            BillingEvent::SubscriptionCancelled { .. } => "subscription.cancelled",
            BillingEvent::PaymentCaptured { .. } => "payment.captured",
            BillingEvent::PaymentFailed { .. } => "payment.failed",
            BillingEvent::Ignored { .. } => "ignored",
        }
    }
}

fn subscription_entity(
    event: &str,
    wrapped: Option<Wrapped<SubscriptionEntity>>,
) -> Result<SubscriptionEntity, EventError> {
    wrapped
        .map(|wrapped| wrapped.entity)
        .ok_or_else(|| EventError::MissingEntity {
            event: event.to_string(),
            entity: "subscription",
        })
}

fn payment_entity(
    event: &str,
    wrapped: Option<Wrapped<PaymentEntity>>,
) -> Result<PaymentEntity, EventError> {
    wrapped
        .map(|wrapped| wrapped.entity)
        .ok_or_else(|| EventError::MissingEntity {
            event: event.to_string(),
            entity: "payment",
        })
}

fn subscription_target(entity: &SubscriptionEntity) -> SubscriptionTarget {
    SubscriptionTarget {
        subscription_id: Some(entity.id.clone()),
        customer_id: entity.customer_id.clone(),
        organization_external_id: note_org_id(&entity.notes),
    }
}

fn payment_target(entity: &PaymentEntity) -> SubscriptionTarget {
    SubscriptionTarget {
        subscription_id: entity.subscription_id.clone(),
        customer_id: entity.customer_id.clone(),
        organization_external_id: note_org_id(&entity.notes),
    }
}

fn note_org_id(notes: &Value) -> Option<String> {
    notes
        .get("org_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plans() -> GatewayPlans {
        GatewayPlans {
            pro_monthly: Some("plan_m".into()),
            pro_yearly: Some("plan_y".into()),
        }
    }

    fn parse(body: Value) -> Result<BillingEvent, EventError> {
        let envelope: WebhookEnvelope = serde_json::from_value(body).unwrap();
        BillingEvent::from_envelope(envelope, &plans())
    }

    #[test]
    fn charged_event_carries_plan_status_and_period() {
        let event = parse(json!({
            "event": "subscription.charged",
            "payload": {
                "subscription": {
                    "entity": {
                        "id": "sub_1",
                        "plan_id": "plan_y",
                        "customer_id": "cust_1",
                        "status": "active",
                        "current_end": 1_790_000_000,
                        "notes": { "org_id": "org_1" }
                    }
                }
            }
        }))
        .unwrap();

        let BillingEvent::SubscriptionChanged { kind, change } = event else {
            panic!("expected subscription change");
        };
        assert!(kind.opens_period());
        assert_eq!(change.plan, Plan::ProYearly);
        assert_eq!(change.status, SubscriptionStatus::Active);
        assert_eq!(change.current_period_end, from_unix(1_790_000_000));
        assert_eq!(change.target.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(change.target.customer_id.as_deref(), Some("cust_1"));
        assert_eq!(change.target.organization_external_id.as_deref(), Some("org_1"));
    }

    #[test]
    fn updated_event_does_not_open_period_and_maps_unknown_plan_to_free() {
        let event = parse(json!({
            "event": "subscription.updated",
            "payload": {
                "subscription": {
                    "entity": { "id": "sub_1", "plan_id": "plan_legacy", "status": "halted", "notes": [] }
                }
            }
        }))
        .unwrap();

        let BillingEvent::SubscriptionChanged { kind, change } = event else {
            panic!("expected subscription change");
        };
        assert!(!kind.opens_period());
        assert_eq!(change.plan, Plan::Free);
        assert_eq!(change.status, SubscriptionStatus::PastDue);
        assert_eq!(change.target.organization_external_id, None);
    }

    #[test]
    fn payment_events_target_customer() {
        let event = parse(json!({
            "event": "payment.failed",
            "payload": { "payment": { "entity": { "id": "pay_1", "customer_id": "cust_9" } } }
        }))
        .unwrap();
        assert_eq!(
            event,
            BillingEvent::PaymentFailed {
                target: SubscriptionTarget {
                    customer_id: Some("cust_9".into()),
                    ..Default::default()
                }
            }
        );
        assert_eq!(event.action(), "payment.failed");
    }

    #[test]
    fn unknown_events_are_ignored() {
        let event = parse(json!({ "event": "invoice.paid", "payload": {} })).unwrap();
        assert_eq!(
            event,
            BillingEvent::Ignored {
                event: "invoice.paid".into()
            }
        );
    }

    #[test]
    fn known_event_without_entity_is_rejected() {
        let err = parse(json!({ "event": "subscription.cancelled", "payload": {} })).unwrap_err();
        assert_eq!(
            err,
            EventError::MissingEntity {
                event: "subscription.cancelled".into(),
                entity: "subscription"
            }
        );
    }
}
