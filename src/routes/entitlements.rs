use axum::{extract::Extension, middleware, response::Response, routing::get, Router};
use serde_json::json;

use crate::models::plan::FeatureTier;
use crate::responses::JsonResponse;
use crate::routes::auth::{
    gate::{subscription_gate, GateRequirement, GateState},
    session::TenantContext,
};
use crate::state::AppState;
use crate::utils::plan_limits::resolve_limits;

pub fn router(state: AppState) -> Router<AppState> {
    let active = Router::new()
        .route("/entitlements", get(current_entitlements))
        .route_layer(middleware::from_fn_with_state(
            GateState::new(state.clone(), GateRequirement::ActiveSubscription),
            subscription_gate,
        ));

    let pro = Router::new()
        .route("/entitlements/pro", get(current_entitlements))
        .route_layer(middleware::from_fn_with_state(
            GateState::new(state, GateRequirement::Feature(FeatureTier::Pro)),
            subscription_gate,
        ));

    active.merge(pro)
}

pub async fn current_entitlements(Extension(ctx): Extension<TenantContext>) -> Response {
    JsonResponse::success(json!({
        "tenantId": ctx.tenant_id,
        "plan": ctx.state.effective_plan(),
        "status": ctx.state.effective_status(),
        "isTester": ctx.state.is_tester,
        "limits": resolve_limits(&ctx.state),
    }))
}
