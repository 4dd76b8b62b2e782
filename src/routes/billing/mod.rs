pub mod admin;
pub mod checkout;
pub mod status;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::state::AppState;
use crate::utils::rate_limit::RateDecision;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/create-checkout-session",
            post(checkout::create_checkout_session),
        )
        .route("/customer-portal", post(checkout::customer_portal))
        .route("/cancel-subscription", post(checkout::cancel_subscription))
        .route(
            "/reactivate-subscription",
            post(checkout::reactivate_subscription),
        )
        .route("/subscription-status", get(status::subscription_status))
        .route("/feature-access/{feature}", get(status::feature_access))
        .route("/plans", get(status::list_plans))
        .route("/events", get(status::list_events))
        .route("/webhook", post(webhook::stripe_webhook))
        .route("/set-tester", post(admin::set_tester))
        .route("/admin/events/{tenant_id}", get(admin::tenant_events))
}

/// Per-tenant throttle for calls that create provider-side sessions.
pub(crate) async fn enforce_rate_limit(
    state: &AppState,
    scope: &str,
    tenant_id: Uuid,
) -> Result<(), ApiError> {
    match state.billing_rate_limiter().check(scope, tenant_id).await? {
        RateDecision::Allowed { .. } => Ok(()),
        RateDecision::Limited {
            retry_after_seconds,
        } => Err(ApiError::RateLimited {
            retry_after_seconds,
        }),
    }
}
