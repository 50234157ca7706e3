//! Role management

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use serde_json::json;
use uuid::Uuid;

use super::{AuditContext, IdPath, Params, Payload, found};
use crate::{
    error::{ApiError, ApiResult},
    identity::Identity,
    models::{NewRole, Page, PageWindow, Role, RoleQuery},
    state::AppState,
    validation::{check, validate_name},
};

const COMPONENT: &str = "roles";

async fn validate(state: &AppState, role: &NewRole, except: Option<Uuid>) -> ApiResult<()> {
    check(validate_name("Role name", &role.name))?;
    let blank_entry = role.permissions.iter().any(|(resource, actions)| {
        resource.trim().is_empty() || actions.iter().any(|action| action.trim().is_empty())
    });
    if blank_entry {
        return Err(ApiError::Validation(
            "Permission resources and actions must not be empty".to_string(),
        ));
    }
    if state.role_repository.name_taken(&role.name, except).await? {
        return Err(ApiError::Conflict("Role name already exists".to_string()));
    }
    Ok(())
}

pub async fn list(
    State(state): State<AppState>,
    WithRejection(query, _): Params<RoleQuery>,
) -> ApiResult<Json<Page<Role>>> {
    let window = PageWindow::new(query.page, query.page_size);
    let (roles, total) = state.role_repository.list(&query, window).await?;
    Ok(Json(Page::new(window, total, roles)))
}

pub async fn get(
    State(state): State<AppState>,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<Role>> {
    let role = found(state.role_repository.find_by_id(*id).await?, "Role")?;
    Ok(Json(role))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): Payload<NewRole>,
) -> ApiResult<impl IntoResponse> {
    let result = match validate(&state, &payload, None).await {
        Ok(()) => state
            .role_repository
            .create(&payload)
            .await
            .map_err(ApiError::from),
        Err(e) => Err(e),
    };

    AuditContext {
        component: COMPONENT,
        action: "create_role",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::CREATED, |role| {
        format!("Created role {}", role.name)
    })
    .await;

    result.map(|role| (StatusCode::CREATED, Json(role)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
    WithRejection(Json(payload), _): Payload<NewRole>,
) -> ApiResult<Json<Role>> {
    let result = match validate(&state, &payload, Some(*id)).await {
        Ok(()) => state
            .role_repository
            .update(*id, &payload)
            .await
            .map_err(ApiError::from),
        Err(e) => Err(e),
    };

    AuditContext {
        component: COMPONENT,
        action: "update_role",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |role| {
        format!("Updated role {}", role.name)
    })
    .await;

    result.map(Json)
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .role_repository
        .soft_delete(*id)
        .await
        .map_err(ApiError::from);

    AuditContext {
        component: COMPONENT,
        action: "delete_role",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Deleted role {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Role deleted" })))
}

pub async fn purge(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .role_repository
        .purge(*id)
        .await
        .map_err(ApiError::from);

    AuditContext {
        component: COMPONENT,
        action: "purge_role",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Purged role {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Role purged" })))
}
