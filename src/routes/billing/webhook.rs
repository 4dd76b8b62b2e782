use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde_json::json;
use tracing::{info, warn};

use crate::errors::ApiError;
use crate::responses::JsonResponse;
use crate::services::stripe::StripeServiceError;
use crate::services::webhook_processor::ProcessOutcome;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// POST /billing/webhook
//
// No bearer auth: the raw body is verified against the signing secret before
// anything is parsed or written.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let sig = match headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => {
            warn!("webhook delivery without signature header");
            return Ok(JsonResponse::error_with_code(
                StatusCode::BAD_REQUEST,
                "Missing Stripe-Signature",
                "MISSING_SIGNATURE",
            ));
        }
    };

    let event = match state.stripe.verify_webhook(&body, sig) {
        Ok(event) => event,
        Err(StripeServiceError::Serde(reason)) => {
            warn!(%reason, "signed webhook body is not a usable event");
            return Ok(JsonResponse::error_with_code(
                StatusCode::BAD_REQUEST,
                "Malformed webhook event",
                "MALFORMED_PAYLOAD",
            ));
        }
        Err(err) => {
            warn!(?err, "stripe webhook verification failed");
            return Ok(JsonResponse::error_with_code(
                StatusCode::BAD_REQUEST,
                "Invalid webhook signature",
                "INVALID_SIGNATURE",
            ));
        }
    };

    let outcome = state
        .webhook_processor()
        .process(&event)
        .await
        .inspect_err(|err| {
            warn!(event_id = %event.id, event_type = %event.r#type, code = err.code(), "webhook processing failed")
        })?;

    info!(event_id = %event.id, event_type = %event.r#type, ?outcome, "webhook handled");
    Ok(JsonResponse::success(json!({
        "received": true,
        "duplicate": outcome == ProcessOutcome::Duplicate,
        "outcome": outcome,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::models::plan::{Plan, SubscriptionStatus};
    use crate::routes::api_router;
    use crate::services::stripe::signature::sign_payload;
    use crate::state::test_support::{send, TestApp, TEST_WEBHOOK_SECRET};
    use axum::{body::Body, http::Request};
    use serde_json::Value;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn signed(payload: &Value) -> Request<Body> {
        let body = payload.to_string();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Request::post("/billing/webhook")
            .header(SIGNATURE_HEADER, sign_payload(body.as_bytes(), TEST_WEBHOOK_SECRET, now))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn subscription_created(event_id: &str, tenant_id: Uuid, created: i64) -> Value {
        json!({
            "id": event_id,
            "type": "customer.subscription.created",
            "created": created,
            "data": { "object": {
                "id": "sub_42",
                "customer": "cus_42",
                "status": "active",
                "cancel_at_period_end": false,
                "current_period_end": created + 2_592_000,
                "metadata": { "tenant_id": tenant_id.to_string() },
                "items": { "data": [ { "price": { "id": "price_pro" } } ] }
            }}
        })
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let app = TestApp::new();
        let req = Request::post("/billing/webhook")
            .body(Body::from("{}"))
            .unwrap();
        let (status, json) = send(api_router(app.state.clone()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "MISSING_SIGNATURE");
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_side_effects() {
        let app = TestApp::new();
        let tenant_id = app.tenant().await;
        let body = subscription_created("evt_bad", tenant_id, 1_700_000_000).to_string();
        let req = Request::post("/billing/webhook")
            .header(SIGNATURE_HEADER, "t=1700000000,v1=deadbeef")
            .body(Body::from(body))
            .unwrap();

        let (status, json) = send(api_router(app.state.clone()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_SIGNATURE");
        assert!(app.db.events().is_empty());
        assert_eq!(app.db.tenant(tenant_id).unwrap().plan, Plan::Basic);
    }

    #[tokio::test]
    async fn signed_subscription_creation_applies_then_dedups() {
        let app = TestApp::new();
        let tenant_id = app.tenant().await;
        let payload = subscription_created("evt_1", tenant_id, 1_700_000_000);

        let (status, json) = send(api_router(app.state.clone()), signed(&payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["received"], true);
        assert_eq!(json["data"]["duplicate"], false);
        assert_eq!(json["data"]["outcome"], "applied");

        let record = app.db.tenant(tenant_id).unwrap();
        assert_eq!(record.plan, Plan::Pro);
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.billing_subscription_id.as_deref(), Some("sub_42"));
        assert_eq!(record.billing_customer_id.as_deref(), Some("cus_42"));

        let (status, json) = send(api_router(app.state.clone()), signed(&payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["duplicate"], true);
        assert_eq!(app.db.events().len(), 1);
    }

    #[tokio::test]
    async fn checkout_without_tenant_is_not_acknowledged() {
        let app = TestApp::new();
        let payload = json!({
            "id": "evt_co",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": { "id": "cs_1", "mode": "subscription", "metadata": {} } }
        });
        let (status, json) = send(api_router(app.state.clone()), signed(&payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "MISSING_USER_ID");
    }

    #[tokio::test]
    async fn unknown_tenant_and_store_failures_are_retried() {
        let app = TestApp::new();
        let payload = subscription_created("evt_404", Uuid::new_v4(), 1_700_000_000);
        let (status, json) = send(api_router(app.state.clone()), signed(&payload)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "TENANT_NOT_FOUND");

        let app = TestApp::with_db(MockDb::failing());
        let (status, _) = send(api_router(app.state.clone()), signed(&payload)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn signed_event_without_created_is_malformed() {
        let app = TestApp::new();
        let payload = json!({ "id": "evt_nots", "type": "customer.subscription.created" });
        let (status, json) = send(api_router(app.state.clone()), signed(&payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "MALFORMED_PAYLOAD");
        assert!(app.db.events().is_empty());
    }

    #[tokio::test]
    async fn unhandled_event_types_are_acknowledged() {
        let app = TestApp::new();
        let payload = json!({
            "id": "evt_misc",
            "type": "customer.created",
            "created": 1_700_000_000,
            "data": { "object": { "id": "cus_1" } }
        });
        let (status, json) = send(api_router(app.state.clone()), signed(&payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["outcome"], "ignored");
    }
}
