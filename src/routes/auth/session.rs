use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::models::tenant::TenantSubscription;
use crate::routes::auth::claims::Claims;
use crate::state::AppState;
use crate::utils::jwt::{decode_jwt, TokenError};
use crate::utils::plan_limits::SubscriptionState;

/// Authenticated tenant attached to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub record: TenantSubscription,
    pub state: SubscriptionState,
}

impl TenantContext {
    pub fn new(claims: &Claims, record: TenantSubscription) -> Self {
        Self {
            tenant_id: record.tenant_id,
            email: claims.email.clone().or_else(|| record.email.clone()),
            state: SubscriptionState::from(&record),
            record,
        }
    }
}

/// Verified bearer token whose subject may not have a tenant record yet.
#[derive(Debug, Clone, PartialEq)]
pub struct BearerClaims {
    pub tenant_id: Uuid,
    pub claims: Claims,
}

impl FromRequestParts<AppState> for BearerClaims {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|rejection| {
                    if rejection.is_missing() {
                        ApiError::token_required()
                    } else {
                        ApiError::invalid_token()
                    }
                })?;

        let data = decode_jwt(
            bearer.token(),
            &state.jwt_keys,
            &state.config.jwt_audience,
            state.config.jwt_issuer.as_deref(),
        )
        .map_err(|err| match err {
            TokenError::Expired => ApiError::token_expired(),
            TokenError::Invalid => ApiError::invalid_token(),
        })?;

        let tenant_id =
            Uuid::parse_str(&data.claims.sub).map_err(|_| ApiError::invalid_token())?;

        Ok(BearerClaims {
            tenant_id,
            claims: data.claims,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession(pub TenantContext);

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerClaims { tenant_id, claims } =
            BearerClaims::from_request_parts(parts, state).await?;

        let record = match state.tenant_repo.find_tenant(tenant_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(ApiError::user_not_found()),
            Err(err) => {
                error!(?err, %tenant_id, "failed to load tenant for request");
                return Err(ApiError::from(err));
            }
        };

        Ok(AuthSession(TenantContext::new(&claims, record)))
    }
}

/// Like [`AuthSession`] but never rejects; failures become an anonymous request.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionalAuthSession(pub Option<TenantContext>);

impl FromRequestParts<AppState> for OptionalAuthSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match AuthSession::from_request_parts(parts, state).await {
            Ok(AuthSession(ctx)) => Ok(OptionalAuthSession(Some(ctx))),
            Err(err) => {
                debug!(code = err.code(), "continuing without authentication");
                Ok(OptionalAuthSession(None))
            }
        }
    }
}
