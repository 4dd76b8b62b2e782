use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope every API response uses: `{success, data?, error?, code?, details?}`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Diagnostic text, only filled in debug builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl JsonResponse {
    pub fn failure(msg: &str, code: Option<&str>, details: Option<String>) -> Self {
        JsonResponse {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            code: code.map(str::to_string),
            details,
        }
    }

    pub fn success<T: Serialize>(data: T) -> Response {
        match serde_json::to_value(data) {
            Ok(data) => (
                StatusCode::OK,
                Json(JsonResponse {
                    success: true,
                    data: Some(data),
                    error: None,
                    code: None,
                    details: None,
                }),
            )
                .into_response(),
            Err(err) => {
                tracing::error!(?err, "failed to serialize response payload");
                JsonResponse::server_error("Internal server error")
            }
        }
    }

    pub fn error_with_code(status: StatusCode, msg: &str, code: &str) -> Response {
        (status, Json(JsonResponse::failure(msg, Some(code), None))).into_response()
    }

    pub fn too_many_requests(msg: &str) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(JsonResponse::failure(msg, Some("RATE_LIMITED"), None)),
        )
            .into_response()
    }

    pub fn server_error(msg: &str) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(JsonResponse::failure(msg, None, None)),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{from_slice, json};

    use crate::responses::JsonResponse;

    #[tokio::test]
    async fn test_success_response() {
        let resp = JsonResponse::success(json!({ "hasAccess": true }));
        assert_eq!(resp.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = from_slice(&body).unwrap();
        assert_eq!(json, json!({ "success": true, "data": { "hasAccess": true } }));
    }

    #[tokio::test]
    async fn test_error_response_with_code() {
        let resp = JsonResponse::error_with_code(
            axum::http::StatusCode::FORBIDDEN,
            "Subscription required",
            "SUBSCRIPTION_REQUIRED",
        );
        assert_eq!(resp.status(), axum::http::StatusCode::FORBIDDEN);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: JsonResponse = from_slice(&body).unwrap();
        assert!(!json.success);
        assert_eq!(json.error.as_deref(), Some("Subscription required"));
        assert_eq!(json.code.as_deref(), Some("SUBSCRIPTION_REQUIRED"));
        assert_eq!(json.data, None);
    }

    #[tokio::test]
    async fn test_failure_omits_optional_fields() {
        let resp = JsonResponse::server_error("nope");
        assert_eq!(resp.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = from_slice(&body).unwrap();
        assert_eq!(json, json!({ "success": false, "error": "nope" }));
    }
}
