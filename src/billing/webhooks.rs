use axum::{body::Bytes, extract::Extension, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{error, info, warn};

use super::events::{BillingEvent, WebhookEnvelope};
use super::gateway::{verify_webhook_signature, BillingSettings};
use super::reconciliation::{ReconciliationHandle, ReconciliationJob};
use super::service::{BillingService, EventOutcome};
use crate::error::{AppError, AppResult};

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// key: webhooks-billing -> gateway event entrypoint
///
/// The signature is checked against the raw body before anything is parsed. A missing or
/// mismatched signature is rejected with nothing processed.
pub async fn razorpay_webhook(
    Extension(pool): Extension<PgPool>,
    Extension(settings): Extension<BillingSettings>,
    Extension(reconciliation): Extension<ReconciliationHandle>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("billing webhook rejected: missing signature header");
        return Err(AppError::InvalidSignature);
    };
    if !verify_webhook_signature(&settings.webhook_secret, &body, signature) {
        warn!(bytes = body.len(), "billing webhook rejected: signature mismatch");
        return Err(AppError::InvalidSignature);
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|e| {
        warn!(?e, "billing webhook body is not a gateway event");
        AppError::BadRequest("Malformed webhook payload".into())
    })?;
    let event = BillingEvent::from_envelope(envelope, &settings.plans)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let service = BillingService::new(pool);
    match service.apply_event(&event, Utc::now()).await {
        Ok(EventOutcome::Ignored) => {
            info!(?event, "billing webhook event ignored");
        }
        Ok(EventOutcome::Applied {
            subscription,
            usage_reset,
        }) => {
            // Renewals already recounted usage inside their transaction.
            if !usage_reset {
                let organization_id = subscription.organization_id;
                if let Err(err) = reconciliation
                    .dispatch(ReconciliationJob::Repair { organization_id })
                    .await
                {
                    warn!(?err, %organization_id, "could not queue usage repair after billing event");
                }
            }
        }
        Ok(EventOutcome::Unmatched) => {}
        Err(err) => {
            error!(?err, event = event.action(), "failed to apply billing event");
            return Err(AppError::Internal(err));
        }
    }

    Ok(Json(json!({ "received": true })))
}
