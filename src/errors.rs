use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::responses::JsonResponse;
use crate::services::checkout::BillingError;
use crate::services::webhook_processor::WebhookError;
use crate::utils::kv_store::KvStoreError;

/// Error kinds surfaced by the HTTP layer. Every variant renders the
/// standard envelope with a machine-readable `code`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Authentication { code: &'static str, message: String },
    #[error("{message}")]
    Authorization { code: &'static str, message: String },
    #[error("{message}")]
    NotFound { code: &'static str, message: String },
    #[error("{message}")]
    Validation { code: &'static str, message: String },
    #[error("{message}")]
    Conflict { code: &'static str, message: String },
    #[error("billing provider error: {message}")]
    ExternalService {
        message: String,
        provider_code: Option<String>,
        status: Option<u16>,
    },
    #[error("too many requests")]
    RateLimited { retry_after_seconds: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn token_required() -> Self {
        ApiError::Authentication {
            code: "TOKEN_REQUIRED",
            message: "Access token required".into(),
        }
    }

    pub fn invalid_token() -> Self {
        ApiError::Authentication {
            code: "INVALID_TOKEN",
            message: "Invalid access token".into(),
        }
    }

    pub fn token_expired() -> Self {
        ApiError::Authentication {
            code: "TOKEN_EXPIRED",
            message: "Access token expired".into(),
        }
    }

    pub fn user_not_found() -> Self {
        ApiError::Authentication {
            code: "USER_NOT_FOUND",
            message: "User not found".into(),
        }
    }

    pub fn subscription_required() -> Self {
        ApiError::Authorization {
            code: "SUBSCRIPTION_REQUIRED",
            message: "Active subscription required".into(),
        }
    }

    pub fn feature_access_denied(tier: &str) -> Self {
        ApiError::Authorization {
            code: "FEATURE_ACCESS_DENIED",
            message: format!("Your plan does not include {tier} features"),
        }
    }

    pub fn admin_required() -> Self {
        ApiError::Authorization {
            code: "ADMIN_REQUIRED",
            message: "Admin access required".into(),
        }
    }

    pub fn invalid_feature(feature: &str) -> Self {
        ApiError::Validation {
            code: "INVALID_FEATURE",
            message: format!("Unknown feature tier: {feature}"),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Authorization { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Authentication { code, .. }
            | ApiError::Authorization { code, .. }
            | ApiError::NotFound { code, .. }
            | ApiError::Validation { code, .. }
            | ApiError::Conflict { code, .. } => code,
            ApiError::ExternalService { .. } => "BILLING_PROVIDER_ERROR",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::ExternalService { .. } => "Billing provider request failed".into(),
            ApiError::RateLimited { .. } => "Too many requests, try again later".into(),
            ApiError::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        }
    }

    fn diagnostic(&self) -> Option<String> {
        match self {
            ApiError::ExternalService {
                message,
                provider_code,
                status,
            } => Some(format!(
                "{message} (provider code: {}, status: {})",
                provider_code.as_deref().unwrap_or("none"),
                status.map(|s| s.to_string()).unwrap_or_else(|| "none".into())
            )),
            ApiError::Internal(detail) => Some(detail.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "request failed");
        }

        let details = if cfg!(debug_assertions) {
            self.diagnostic()
        } else {
            None
        };
        let body = JsonResponse::failure(&self.public_message(), Some(self.code()), details);
        let mut response = (status, Json(body)).into_response();

        if let ApiError::RateLimited {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let code = err.code();
        match err {
            BillingError::InvalidPriceId => ApiError::Validation {
                code,
                message: err.to_string(),
            },
            BillingError::TenantNotFound
            | BillingError::CustomerNotFound
            | BillingError::NoSubscription => ApiError::NotFound {
                code,
                message: err.to_string(),
            },
            BillingError::NotReactivatable => ApiError::Conflict {
                code,
                message: err.to_string(),
            },
            BillingError::Provider {
                message,
                provider_code,
                status,
            } => ApiError::ExternalService {
                message,
                provider_code,
                status,
            },
            BillingError::Database(db) => ApiError::Internal(db.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let code = err.code();
        match err {
            WebhookError::MissingUserId | WebhookError::MalformedPayload(_) => {
                ApiError::Validation {
                    code,
                    message: err.to_string(),
                }
            }
            WebhookError::TenantNotFound(_) => ApiError::NotFound {
                code,
                message: err.to_string(),
            },
            WebhookError::Database(db) => ApiError::Internal(db.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<KvStoreError> for ApiError {
    fn from(err: KvStoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
