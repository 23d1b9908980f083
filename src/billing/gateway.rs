use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::config;
use crate::entitlements::Plan;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("no gateway plan configured for {0}")]
    PlanNotConfigured(Plan),
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub plan_id: String,
    pub total_count: u32,
    pub customer_notify: u8,
    pub notes: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

/// key: billing-gateway -> provider integration
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn create_subscription(
        &self,
        request: CheckoutRequest,
    ) -> Result<GatewaySubscription, GatewayError>;
}

/// key: billing-gateway-razorpay -> REST client
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl RazorpayGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build billing gateway client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }

    pub fn from_config() -> anyhow::Result<Self> {
        Self::new(
            config::RAZORPAY_API_BASE.as_str(),
            config::RAZORPAY_KEY_ID.as_str(),
            config::RAZORPAY_KEY_SECRET.as_str(),
        )
    }
}

#[async_trait]
impl BillingGateway for RazorpayGateway {
    async fn create_subscription(
        &self,
        request: CheckoutRequest,
    ) -> Result<GatewaySubscription, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/subscriptions", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

/// Gateway plan ids for the paid tiers.
#[derive(Clone, Debug, Default)]
pub struct GatewayPlans {
    pub pro_monthly: Option<String>,
    pub pro_yearly: Option<String>,
}

impl GatewayPlans {
    /// Unknown or unconfigured gateway plan ids resolve to `Free`.
    pub fn plan_for(&self, gateway_plan_id: Option<&str>) -> Plan {
        match gateway_plan_id {
            Some(id) if self.pro_monthly.as_deref() == Some(id) => Plan::ProMonthly,
            Some(id) if self.pro_yearly.as_deref() == Some(id) => Plan::ProYearly,
            _ => Plan::Free,
        }
    }

    pub fn gateway_id(&self, plan: Plan) -> Result<&str, GatewayError> {
        let id = match plan {
            Plan::ProMonthly => self.pro_monthly.as_deref(),
            Plan::ProYearly => self.pro_yearly.as_deref(),
            Plan::Free | Plan::Enterprise => None,
        };
        id.ok_or(GatewayError::PlanNotConfigured(plan))
    }
}

/// Secrets and plan mapping shared by the checkout, verification and webhook handlers.
#[derive(Clone, Debug)]
pub struct BillingSettings {
    pub webhook_secret: String,
    pub key_secret: String,
    pub plans: GatewayPlans,
}

impl BillingSettings {
    pub fn from_config() -> Self {
        Self {
            webhook_secret: config::RAZORPAY_WEBHOOK_SECRET.clone(),
            key_secret: config::RAZORPAY_KEY_SECRET.clone(),
            plans: GatewayPlans {
                pro_monthly: config::RAZORPAY_PLAN_PRO_MONTHLY.clone(),
                pro_yearly: config::RAZORPAY_PLAN_PRO_YEARLY.clone(),
            },
        }
    }
}

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex HMAC-SHA256 signature over the raw request body.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Checkout confirmation signature: HMAC over `"{payment_id}|{subscription_id}"`.
pub fn verify_payment_signature(
    key_secret: &str,
    payment_id: &str,
    subscription_id: &str,
    signature: &str,
) -> bool {
    if key_secret.is_empty() {
        return false;
    }
    let message = format!("{payment_id}|{subscription_id}");
    verify_webhook_signature(key_secret, message.as_bytes(), signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn signed_body_verifies() {
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign_payload("whsec", body);
        assert!(verify_webhook_signature("whsec", body, &signature));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign_payload("whsec", br#"{"amount":100}"#);
        assert!(!verify_webhook_signature("whsec", br#"{"amount":900}"#, &signature));
        assert!(!verify_webhook_signature("other", br#"{"amount":100}"#, &signature));
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        assert!(!verify_webhook_signature("whsec", b"{}", ""));
        assert!(!verify_webhook_signature("whsec", b"{}", "not-hex"));
        assert!(!verify_webhook_signature("whsec", b"{}", "abcd"));
    }

    #[test]
    fn payment_signature_covers_both_ids() {
        let signature = sign_payload("key_secret", b"pay_1|sub_1");
        assert!(verify_payment_signature("key_secret", "pay_1", "sub_1", &signature));
        assert!(!verify_payment_signature("key_secret", "pay_1", "sub_2", &signature));
    }

    #[test]
    fn empty_key_secret_never_verifies() {
        let signature = sign_payload("", b"pay_1|sub_1");
        assert!(!verify_payment_signature("", "pay_1", "sub_1", &signature));
    }

    #[test]
    fn gateway_plan_ids_resolve_to_plans() {
        let plans = GatewayPlans {
            pro_monthly: Some("plan_m".into()),
            pro_yearly: Some("plan_y".into()),
        };
        assert_eq!(plans.plan_for(Some("plan_m")), Plan::ProMonthly);
        assert_eq!(plans.plan_for(Some("plan_y")), Plan::ProYearly);
        assert_eq!(plans.plan_for(Some("plan_other")), Plan::Free);
        assert_eq!(plans.plan_for(None), Plan::Free);
        assert_eq!(plans.gateway_id(Plan::ProYearly).unwrap(), "plan_y");
        assert!(matches!(
            plans.gateway_id(Plan::Enterprise),
            Err(GatewayError::PlanNotConfigured(Plan::Enterprise))
        ));
    }

    #[tokio::test]
    async fn razorpay_gateway_creates_subscription() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/subscriptions")
                    .header_exists("authorization")
                    .json_body_partial(r#"{"plan_id":"plan_m","total_count":1}"#);
                then.status(200)
                    .json_body(json!({"id": "sub_123", "status": "created"}));
            })
            .await;

        let gateway = RazorpayGateway::new(server.base_url(), "key", "secret").unwrap();
        let created = gateway
            .create_subscription(CheckoutRequest {
                plan_id: "plan_m".into(),
                total_count: 1,
                customer_notify: 1,
                notes: json!({"org_id": "org_1"}),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(created.id, "sub_123");
        assert_eq!(created.status.as_deref(), Some("created"));
    }

    #[tokio::test]
    async fn razorpay_gateway_surfaces_rejections() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/subscriptions");
                then.status(400).body("bad plan");
            })
            .await;

        let gateway = RazorpayGateway::new(server.base_url(), "key", "secret").unwrap();
        let err = gateway
            .create_subscription(CheckoutRequest {
                plan_id: "plan_x".into(),
                total_count: 1,
                customer_notify: 1,
                notes: json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { status: 400, .. }));
    }
}
