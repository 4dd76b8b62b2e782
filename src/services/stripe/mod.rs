// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper, checkout,
// billing, connect). Touching APIs outside those features requires updating
// Cargo.toml explicitly.
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod signature;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StripeServiceError {
    #[error("stripe api error: {message}")]
    Api {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("other error: {0}")]
    Other(String),
}

impl StripeServiceError {
    pub fn api(message: impl Into<String>) -> Self {
        StripeServiceError::Api {
            message: message.into(),
            code: None,
            status: None,
        }
    }
}

impl From<stripe::StripeError> for StripeServiceError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(request) => {
                let code = request.code.as_ref().map(|code| {
                    serde_json::to_value(code)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_else(|| format!("{code:?}"))
                });
                StripeServiceError::Api {
                    message: request
                        .message
                        .clone()
                        .unwrap_or_else(|| request.to_string()),
                    code,
                    status: Some(request.http_status),
                }
            }
            other => StripeServiceError::api(other.to_string()),
        }
    }
}

impl From<signature::SignatureError> for StripeServiceError {
    fn from(err: signature::SignatureError) -> Self {
        StripeServiceError::Webhook(err.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CreateCheckoutSessionRequest {
    pub success_url: String,
    pub cancel_url: String,
    pub price_id: String,
    pub quantity: u64,
    pub customer: String,
    pub client_reference_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Copied onto the subscription the session creates, so lifecycle events carry it.
    pub subscription_metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PortalSession {
    pub id: String,
    pub url: String,
}

/// A verified webhook event. `payload` is the full event body.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StripeEvent {
    pub id: String,
    pub r#type: String,
    /// Unix seconds at which the provider created the event.
    pub created: i64,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionInfo {
    pub id: String,
    pub status: String,
    /// Unix timestamp (seconds) when the current period ends
    pub current_period_end: i64,
    /// Unix timestamp (seconds) when the subscription will cancel, if set
    pub cancel_at: Option<i64>,
    pub cancel_at_period_end: bool,
}

#[async_trait]
pub trait StripeService: Send + Sync {
    async fn create_customer(
        &self,
        email: Option<&str>,
        tenant_id: Uuid,
    ) -> Result<String, StripeServiceError>;

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeServiceError>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError>;

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<SubscriptionInfo, StripeServiceError>;

    async fn cancel_subscription_immediately(
        &self,
        subscription_id: &str,
    ) -> Result<(), StripeServiceError>;
}

/// Pulls the envelope fields out of a raw event body.
pub(crate) fn event_from_value(
    payload: serde_json::Value,
) -> Result<StripeEvent, StripeServiceError> {
    let id = payload
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| StripeServiceError::Serde("event has no id".into()))?
        .to_string();
    let ty = payload
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| StripeServiceError::Serde("event has no type".into()))?
        .to_string();
    let created = payload
        .get("created")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| StripeServiceError::Serde("event has no created timestamp".into()))?;
    Ok(StripeEvent {
        id,
        r#type: ty,
        created,
        payload,
    })
}

mod live;
mod mock;

pub use live::LiveStripeService;
pub use mock::MockStripeService;
