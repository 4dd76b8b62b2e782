use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::status::EventsQuery;
use crate::errors::ApiError;
use crate::responses::JsonResponse;
use crate::routes::auth::session::{AuthSession, TenantContext};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTesterBody {
    pub user_id: Uuid,
    pub is_tester: bool,
}

fn require_admin(ctx: &TenantContext) -> Result<(), ApiError> {
    if ctx.record.is_admin() {
        Ok(())
    } else {
        Err(ApiError::admin_required())
    }
}

// POST /billing/set-tester
pub async fn set_tester(
    State(state): State<AppState>,
    AuthSession(ctx): AuthSession,
    payload: Result<Json<SetTesterBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    require_admin(&ctx)?;
    let Json(body) = payload.map_err(|rejection| ApiError::Validation {
        code: "INVALID_REQUEST",
        message: rejection.body_text(),
    })?;

    let updated = state
        .tenant_repo
        .set_tester(body.user_id, body.is_tester)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            code: "TENANT_NOT_FOUND",
            message: format!("Tenant {} not found", body.user_id),
        })?;

    info!(
        admin_id = %ctx.tenant_id,
        tenant_id = %updated.tenant_id,
        is_tester = updated.is_tester,
        "tester flag changed"
    );
    Ok(JsonResponse::success(json!({
        "userId": updated.tenant_id,
        "isTester": updated.is_tester,
    })))
}

// GET /billing/admin/events/{tenant_id}
pub async fn tenant_events(
    State(state): State<AppState>,
    AuthSession(ctx): AuthSession,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    require_admin(&ctx)?;
    let events = state
        .billing_event_repo
        .list_events_for_tenant(tenant_id, query.effective_limit())
        .await?;
    Ok(JsonResponse::success(json!({
        "tenantId": tenant_id,
        "events": events,
    })))
}

#[cfg(test)]
mod tests {
    use crate::models::tenant::TenantRole;
    use crate::routes::api_router;
    use crate::state::test_support::{bearer, send, TestApp};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::json;
    use uuid::Uuid;

    fn set_tester(auth: &str, user_id: Uuid, is_tester: bool) -> Request<Body> {
        Request::post("/billing/set-tester")
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "userId": user_id, "isTester": is_tester }).to_string(),
            ))
            .unwrap()
    }

    async fn admin(app: &TestApp) -> Uuid {
        let admin_id = app.tenant().await;
        app.db.touch_tenant(admin_id, |t| t.role = TenantRole::Admin);
        admin_id
    }

    #[tokio::test]
    async fn testers_cannot_grant_tester_flag() {
        let app = TestApp::new();
        let tester = app.tenant().await;
        app.db.touch_tenant(tester, |t| t.is_tester = true);
        let target = app.tenant().await;

        let (status, json) = send(
            api_router(app.state.clone()),
            set_tester(&bearer(&app.state, tester), target, true),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "ADMIN_REQUIRED");
        assert!(!app.db.tenant(target).unwrap().is_tester);
    }

    #[tokio::test]
    async fn admin_sets_and_clears_tester_flag() {
        let app = TestApp::new();
        let admin_id = admin(&app).await;
        let target = app.tenant().await;
        let auth = bearer(&app.state, admin_id);

        let (status, json) = send(api_router(app.state.clone()), set_tester(&auth, target, true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["isTester"], true);
        assert!(app.db.tenant(target).unwrap().is_tester);

        let (_, json) = send(api_router(app.state.clone()), set_tester(&auth, target, false)).await;
        assert_eq!(json["data"]["isTester"], false);

        let (status, json) = send(
            api_router(app.state.clone()),
            set_tester(&auth, Uuid::new_v4(), true),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "TENANT_NOT_FOUND");
    }

    #[tokio::test]
    async fn admin_events_require_admin_role() {
        let app = TestApp::new();
        let creator = app.tenant().await;
        let uri = format!("/billing/admin/events/{creator}");

        let req = Request::get(&uri)
            .header(header::AUTHORIZATION, bearer(&app.state, creator))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(api_router(app.state.clone()), req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin_id = admin(&app).await;
        let req = Request::get(&uri)
            .header(header::AUTHORIZATION, bearer(&app.state, admin_id))
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(api_router(app.state.clone()), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["tenantId"], creator.to_string());
        assert!(json["data"]["events"].as_array().unwrap().is_empty());
    }
}
