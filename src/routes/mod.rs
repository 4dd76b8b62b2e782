pub mod auth;
pub mod billing;
pub mod entitlements;
pub mod health;
pub mod tenants;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// All API routes with state applied. Transport layers (CORS, tracing,
/// per-IP throttling) are added by the binary.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/tenants/bootstrap", post(tenants::bootstrap))
        .nest("/billing", billing::router())
        .merge(entitlements::router(state.clone()))
        .with_state(state)
}
