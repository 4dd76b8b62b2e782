use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::info;

use crate::errors::ApiError;
use crate::models::plan::FeatureTier;
use crate::routes::auth::session::{AuthSession, TenantContext};
use crate::state::AppState;
use crate::utils::plan_limits::evaluate_feature_access;

/// What a gated route needs beyond authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRequirement {
    ActiveSubscription,
    Feature(FeatureTier),
}

#[derive(Clone)]
pub struct GateState {
    pub app: AppState,
    pub requirement: GateRequirement,
}

impl GateState {
    pub fn new(app: AppState, requirement: GateRequirement) -> Self {
        Self { app, requirement }
    }
}

/// Decides whether an authenticated tenant may proceed.
pub fn authorize(ctx: &TenantContext, requirement: GateRequirement) -> Result<(), ApiError> {
    if ctx.state.is_tester {
        return Ok(());
    }
    if !ctx.state.status.is_active() {
        info!(tenant_id = %ctx.tenant_id, status = %ctx.state.status, "subscription required");
        return Err(ApiError::subscription_required());
    }
    if let GateRequirement::Feature(tier) = requirement {
        if !evaluate_feature_access(&ctx.state, tier) {
            info!(tenant_id = %ctx.tenant_id, plan = %ctx.state.plan, %tier, "feature access denied");
            return Err(ApiError::feature_access_denied(tier.as_str()));
        }
    }
    Ok(())
}

/// Middleware: authenticate, enforce the route's requirement, then attach
/// the [`TenantContext`] as a request extension.
pub async fn subscription_gate(
    State(gate): State<GateState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    let AuthSession(ctx) = AuthSession::from_request_parts(&mut parts, &gate.app).await?;
    authorize(&ctx, gate.requirement)?;

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
