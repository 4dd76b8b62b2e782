use axum::response::Response;
use serde_json::json;

use crate::responses::JsonResponse;

pub async fn health() -> Response {
    JsonResponse::success(json!({ "status": "ok" }))
}
