use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::enforce_rate_limit;
use crate::errors::ApiError;
use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::services::checkout::CheckoutRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutBody {
    pub price_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBody {
    #[serde(default = "default_cancel_at_period_end")]
    pub cancel_at_period_end: bool,
}

fn default_cancel_at_period_end() -> bool {
    true
}

fn invalid_body(message: impl Into<String>) -> ApiError {
    ApiError::Validation {
        code: "INVALID_REQUEST",
        message: message.into(),
    }
}

// POST /billing/create-checkout-session
pub async fn create_checkout_session(
    State(state): State<AppState>,
    AuthSession(ctx): AuthSession,
    payload: Result<Json<CreateCheckoutBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(|rejection| invalid_body(rejection.body_text()))?;
    enforce_rate_limit(&state, "checkout", ctx.tenant_id).await?;

    let issued = state
        .checkout_service()
        .create_checkout_session(CheckoutRequest {
            tenant_id: ctx.tenant_id,
            email: ctx.email.clone(),
            price_id: body.price_id,
            success_url: state.config.checkout_success_url(),
            cancel_url: state.config.checkout_cancel_url(),
        })
        .await?;

    Ok(JsonResponse::success(issued))
}

// POST /billing/customer-portal
pub async fn customer_portal(
    State(state): State<AppState>,
    AuthSession(ctx): AuthSession,
) -> Result<Response, ApiError> {
    enforce_rate_limit(&state, "portal", ctx.tenant_id).await?;
    let url = state
        .checkout_service()
        .create_customer_portal_session(ctx.tenant_id, &state.config.portal_return_url())
        .await?;
    Ok(JsonResponse::success(json!({ "url": url })))
}

// POST /billing/cancel-subscription
//
// The body is optional; `cancelAtPeriodEnd` defaults to true.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    AuthSession(ctx): AuthSession,
    body: Bytes,
) -> Result<Response, ApiError> {
    let cancel_at_period_end = if body.iter().all(u8::is_ascii_whitespace) {
        default_cancel_at_period_end()
    } else {
        serde_json::from_slice::<CancelBody>(&body)
            .map_err(|e| invalid_body(e.to_string()))?
            .cancel_at_period_end
    };

    let change = state
        .checkout_service()
        .cancel_subscription(ctx.tenant_id, cancel_at_period_end)
        .await?;
    Ok(JsonResponse::success(change))
}

// POST /billing/reactivate-subscription
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    AuthSession(ctx): AuthSession,
) -> Result<Response, ApiError> {
    let change = state
        .checkout_service()
        .reactivate_subscription(ctx.tenant_id)
        .await?;
    Ok(JsonResponse::success(change))
}
