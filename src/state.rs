use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::{
    billing_event_repository::BillingEventRepository, tenant_repository::TenantRepository,
};
use crate::services::{
    checkout::CheckoutService, stripe::StripeService, webhook_processor::WebhookProcessor,
};
use crate::utils::{jwt::JwtKeys, kv_store::KeyValueStore, rate_limit::TenantRateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub tenant_repo: Arc<dyn TenantRepository>,
    pub billing_event_repo: Arc<dyn BillingEventRepository>,
    pub stripe: Arc<dyn StripeService>,
    pub kv_store: Arc<dyn KeyValueStore>,
    pub config: Arc<Config>,
    pub jwt_keys: Arc<JwtKeys>,
}

impl AppState {
    pub fn webhook_processor(&self) -> WebhookProcessor {
        WebhookProcessor::new(
            self.tenant_repo.clone(),
            self.billing_event_repo.clone(),
            self.config.prices.clone(),
        )
    }

    pub fn checkout_service(&self) -> CheckoutService {
        CheckoutService::new(
            self.tenant_repo.clone(),
            self.stripe.clone(),
            self.config.prices.clone(),
        )
    }

    pub fn billing_rate_limiter(&self) -> TenantRateLimiter {
        let limits = &self.config.rate_limits;
        TenantRateLimiter::new(
            self.kv_store.clone(),
            limits.billing_limit,
            Duration::from_secs(limits.billing_window_seconds),
        )
    }
}
