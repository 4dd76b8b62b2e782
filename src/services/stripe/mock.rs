use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    event_from_value, signature, CheckoutSession, CreateCheckoutSessionRequest, PortalSession,
    StripeEvent, StripeService, StripeServiceError, SubscriptionInfo,
};

#[derive(Clone, Default)]
pub struct MockStripeService {
    pub created_sessions: Arc<Mutex<Vec<CheckoutSession>>>,
    pub last_create_requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    pub created_customers: Arc<Mutex<Vec<(Option<String>, Uuid)>>>,
    pub portal_requests: Arc<Mutex<Vec<(String, String)>>>,
    pub cancel_at_period_end_calls: Arc<Mutex<Vec<(String, bool)>>>,
    pub immediate_cancellations: Arc<Mutex<Vec<String>>>,
    /// When set, every provider call fails with this error.
    pub failure: Arc<Mutex<Option<StripeServiceError>>>,
    /// When set, webhook signatures are checked against this secret.
    pub webhook_secret: Option<String>,
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_with(self, err: StripeServiceError) -> Self {
        *self.failure.lock().unwrap() = Some(err);
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    fn check_failure(&self) -> Result<(), StripeServiceError> {
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn make_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}_{}", prefix, ts)
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn create_customer(
        &self,
        email: Option<&str>,
        tenant_id: Uuid,
    ) -> Result<String, StripeServiceError> {
        self.check_failure()?;
        self.created_customers
            .lock()
            .unwrap()
            .push((email.map(str::to_string), tenant_id));
        Ok(make_id("cus_test"))
    }

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        self.check_failure()?;
        // capture the request
        self.last_create_requests.lock().unwrap().push(req);

        let session = CheckoutSession {
            id: make_id("cs_test"),
            url: Some("https://example.test/checkout".into()),
        };
        self.created_sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeServiceError> {
        self.check_failure()?;
        self.portal_requests
            .lock()
            .unwrap()
            .push((customer_id.to_string(), return_url.to_string()));
        Ok(PortalSession {
            id: make_id("bps_test"),
            url: "https://example.test/portal".into(),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if let Some(secret) = &self.webhook_secret {
            signature::verify_signature(
                payload,
                signature_header,
                secret,
                300,
                OffsetDateTime::now_utc().unix_timestamp(),
            )?;
        }
        let val: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        event_from_value(val)
    }

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        self.check_failure()?;
        self.cancel_at_period_end_calls
            .lock()
            .unwrap()
            .push((subscription_id.to_string(), cancel_at_period_end));
        Ok(SubscriptionInfo {
            id: subscription_id.to_string(),
            status: "active".into(),
            current_period_end: 0,
            cancel_at: None,
            cancel_at_period_end,
        })
    }

    async fn cancel_subscription_immediately(
        &self,
        subscription_id: &str,
    ) -> Result<(), StripeServiceError> {
        self.check_failure()?;
        self.immediate_cancellations
            .lock()
            .unwrap()
            .push(subscription_id.to_string());
        Ok(())
    }
}
