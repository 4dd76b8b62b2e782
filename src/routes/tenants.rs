use axum::{extract::State, response::Response};
use serde_json::json;
use tracing::info;

use crate::errors::ApiError;
use crate::responses::JsonResponse;
use crate::routes::auth::session::BearerClaims;
use crate::state::AppState;
use crate::utils::plan_limits::{resolve_limits, SubscriptionState};

/// POST /tenants/bootstrap
///
/// Called after signup. Creates the basic/active record if the caller has none;
/// repeated calls return the stored record unchanged.
pub async fn bootstrap(
    State(state): State<AppState>,
    BearerClaims { tenant_id, claims }: BearerClaims,
) -> Result<Response, ApiError> {
    let record = state
        .tenant_repo
        .ensure_tenant(tenant_id, claims.email.as_deref())
        .await?;
    info!(%tenant_id, plan = %record.plan, status = %record.status, "tenant bootstrapped");

    let limits = resolve_limits(&SubscriptionState::from(&record));
    Ok(JsonResponse::success(json!({
        "tenant": record,
        "limits": limits,
    })))
}
