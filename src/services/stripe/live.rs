use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    event_from_value, signature, CheckoutSession, CreateCheckoutSessionRequest, PortalSession,
    StripeEvent, StripeService, StripeServiceError, SubscriptionInfo,
};

pub struct LiveStripeService {
    client: stripe::Client,
    webhook_secret: String,
    webhook_tolerance_seconds: i64,
}

impl LiveStripeService {
    pub fn new(
        secret_key: impl Into<String>,
        webhook_secret: impl Into<String>,
        webhook_tolerance_seconds: i64,
    ) -> Self {
        let client = stripe::Client::new(secret_key);
        Self {
            client,
            webhook_secret: webhook_secret.into(),
            webhook_tolerance_seconds,
        }
    }

    pub fn from_settings(settings: &crate::config::StripeSettings) -> Self {
        Self::new(
            settings.secret_key.clone(),
            settings.webhook_secret.clone(),
            settings.webhook_tolerance_seconds,
        )
    }
}

fn parse_customer_id(customer_id: &str) -> Result<stripe::CustomerId, StripeServiceError> {
    customer_id
        .parse::<stripe::CustomerId>()
        .map_err(|e| StripeServiceError::Other(e.to_string()))
}

fn parse_subscription_id(
    subscription_id: &str,
) -> Result<stripe::SubscriptionId, StripeServiceError> {
    subscription_id
        .parse::<stripe::SubscriptionId>()
        .map_err(|e| StripeServiceError::Other(e.to_string()))
}

fn to_metadata<'a>(
    entries: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> HashMap<String, String> {
    entries
        .into_iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[async_trait]
impl StripeService for LiveStripeService {
    async fn create_customer(
        &self,
        email: Option<&str>,
        tenant_id: Uuid,
    ) -> Result<String, StripeServiceError> {
        let mut params = stripe::CreateCustomer::new();
        params.email = email;
        params.metadata = Some(HashMap::from([(
            "tenant_id".to_string(),
            tenant_id.to_string(),
        )]));
        let customer = stripe::Customer::create(&self.client, params).await?;
        Ok(customer.id.to_string())
    }

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(stripe::CheckoutSessionMode::Subscription);
        params.success_url = Some(&req.success_url);
        params.cancel_url = Some(&req.cancel_url);
        params.customer = Some(parse_customer_id(&req.customer)?);
        if let Some(ref id) = req.client_reference_id {
            params.client_reference_id = Some(id);
        }
        if !req.metadata.is_empty() {
            params.metadata = Some(to_metadata(&req.metadata));
        }
        if !req.subscription_metadata.is_empty() {
            params.subscription_data = Some(stripe::CreateCheckoutSessionSubscriptionData {
                metadata: Some(to_metadata(&req.subscription_metadata)),
                ..Default::default()
            });
        }
        params.line_items = Some(vec![stripe::CreateCheckoutSessionLineItems {
            price: Some(req.price_id.clone()),
            quantity: Some(req.quantity),
            ..Default::default()
        }]);

        let session = stripe::CheckoutSession::create(&self.client, params).await?;
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeServiceError> {
        let mut params = stripe::CreateBillingPortalSession::new(parse_customer_id(customer_id)?);
        params.return_url = Some(return_url);
        let session = stripe::BillingPortalSession::create(&self.client, params).await?;
        Ok(PortalSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        signature::verify_signature(
            payload,
            signature_header,
            &self.webhook_secret,
            self.webhook_tolerance_seconds,
            OffsetDateTime::now_utc().unix_timestamp(),
        )?;
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        event_from_value(value)
    }

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        let sub_id = parse_subscription_id(subscription_id)?;
        let mut params = stripe::UpdateSubscription::new();
        params.cancel_at_period_end = Some(cancel_at_period_end);
        let sub = stripe::Subscription::update(&self.client, &sub_id, params).await?;
        Ok(SubscriptionInfo {
            id: sub.id.to_string(),
            status: sub.status.to_string(),
            current_period_end: sub.current_period_end,
            cancel_at: sub.cancel_at,
            cancel_at_period_end: sub.cancel_at_period_end,
        })
    }

    async fn cancel_subscription_immediately(
        &self,
        subscription_id: &str,
    ) -> Result<(), StripeServiceError> {
        let sub_id = parse_subscription_id(subscription_id)?;
        stripe::Subscription::cancel(&self.client, &sub_id, Default::default()).await?;
        Ok(())
    }
}
