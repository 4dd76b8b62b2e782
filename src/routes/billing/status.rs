use axum::{
    extract::{Path, Query, State},
    response::Response,
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::ApiError;
use crate::models::plan::{FeatureTier, Plan};
use crate::responses::JsonResponse;
use crate::routes::auth::session::{AuthSession, OptionalAuthSession};
use crate::services::entitlements::has_feature_access;
use crate::state::AppState;
use crate::utils::plan_limits::{resolve_limits, PlanLimits};

pub const DEFAULT_EVENT_LIMIT: i64 = 20;
pub const MAX_EVENT_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<i64>,
}

impl EventsQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_EVENT_LIMIT)
            .clamp(1, MAX_EVENT_LIMIT)
    }
}

// GET /billing/subscription-status
pub async fn subscription_status(AuthSession(ctx): AuthSession) -> Result<Response, ApiError> {
    let record = &ctx.record;
    Ok(JsonResponse::success(json!({
        "plan": record.plan,
        "status": record.status,
        "isTester": record.is_tester,
        "effectivePlan": ctx.state.effective_plan(),
        "effectiveStatus": ctx.state.effective_status(),
        "hasActiveSubscription": ctx.state.has_active_subscription(),
        "cancelAtPeriodEnd": record.cancel_at_period_end,
        "currentPeriodEnd": record.current_period_end.map(|t| t.unix_timestamp()),
        "limits": resolve_limits(&ctx.state),
    })))
}

// GET /billing/feature-access/{feature}
pub async fn feature_access(
    State(state): State<AppState>,
    AuthSession(ctx): AuthSession,
    Path(feature): Path<String>,
) -> Result<Response, ApiError> {
    let tier = feature
        .parse::<FeatureTier>()
        .map_err(|_| ApiError::invalid_feature(&feature))?;

    let has_access =
        has_feature_access(state.tenant_repo.as_ref(), ctx.tenant_id, tier.as_str()).await;
    Ok(JsonResponse::success(json!({
        "hasAccess": has_access,
        "feature": tier,
    })))
}

// GET /billing/plans
pub async fn list_plans(
    State(state): State<AppState>,
    OptionalAuthSession(ctx): OptionalAuthSession,
) -> Result<Response, ApiError> {
    let current = ctx.as_ref().map(|ctx| ctx.record.plan);
    let plans: Vec<_> = [Plan::Basic, Plan::Pro]
        .into_iter()
        .map(|plan| {
            json!({
                "plan": plan,
                "priceId": state.config.prices.price_for_plan(plan),
                "limits": PlanLimits::for_plan(plan),
                "current": current == Some(plan),
            })
        })
        .collect();
    Ok(JsonResponse::success(json!({ "plans": plans })))
}

// GET /billing/events
pub async fn list_events(
    State(state): State<AppState>,
    AuthSession(ctx): AuthSession,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let events = state
        .billing_event_repo
        .list_events_for_tenant(ctx.tenant_id, query.effective_limit())
        .await?;
    Ok(JsonResponse::success(json!({ "events": events })))
}
