//! Object class management
//!
//! Classes are created in the caller's organization. Non-admins only ever
//! see and change classes of their own organization.

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use serde_json::json;
use uuid::Uuid;

use super::{AuditContext, IdPath, Params, Payload, ensure_tenant, found};
use crate::{
    error::{ApiError, ApiResult},
    identity::Identity,
    models::{
        NewObjectClass, ObjectClass, ObjectClassQuery, Page, PageWindow, UpdateObjectClass,
    },
    state::AppState,
    validation::{check, validate_name},
};

const COMPONENT: &str = "object_classes";

/// Load a live class visible to the caller; other tenants' classes are 404
async fn visible_class(state: &AppState, identity: &Identity, id: Uuid) -> ApiResult<ObjectClass> {
    let class = found(
        state.object_class_repository.find_by_id(id).await?,
        "Object class",
    )?;
    ensure_tenant(identity, class.org_id)
        .map_err(|_| ApiError::NotFound("Object class not found".to_string()))?;
    Ok(class)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    WithRejection(query, _): Params<ObjectClassQuery>,
) -> ApiResult<Json<Page<ObjectClass>>> {
    let mut query = query.0;
    if !identity.is_admin() {
        match identity.org_id {
            Some(org_id) => query.org_id = Some(org_id),
            None => {
                return Ok(Json(Page::new(
                    PageWindow::new(query.page, query.page_size),
                    0,
                    Vec::new(),
                )));
            }
        }
    }

    let window = PageWindow::new(query.page, query.page_size);
    let (classes, total) = state.object_class_repository.list(&query, window).await?;
    Ok(Json(Page::new(window, total, classes)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<ObjectClass>> {
    Ok(Json(visible_class(&state, &identity, *id).await?))
}

async fn create_class(
    state: &AppState,
    identity: &Identity,
    payload: &NewObjectClass,
) -> ApiResult<ObjectClass> {
    check(validate_name("Class name", &payload.name))?;
    let org_id = identity.org_id.ok_or_else(|| {
        ApiError::Validation(
            "You must belong to an organization to create object classes".to_string(),
        )
    })?;

    Ok(state
        .object_class_repository
        .create(org_id, identity.user_id, payload)
        .await?)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): Payload<NewObjectClass>,
) -> ApiResult<impl IntoResponse> {
    let result = create_class(&state, &identity, &payload).await;

    AuditContext {
        component: COMPONENT,
        action: "create_object_class",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::CREATED, |class| {
        format!("Created object class {}", class.name)
    })
    .await;

    result.map(|class| (StatusCode::CREATED, Json(class)))
}

async fn update_class(
    state: &AppState,
    identity: &Identity,
    id: Uuid,
    payload: &UpdateObjectClass,
) -> ApiResult<ObjectClass> {
    if let Some(name) = &payload.name {
        check(validate_name("Class name", name))?;
    }
    visible_class(state, identity, id).await?;
    Ok(state.object_class_repository.update(id, payload).await?)
}

pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
    WithRejection(Json(payload), _): Payload<UpdateObjectClass>,
) -> ApiResult<Json<ObjectClass>> {
    let result = update_class(&state, &identity, *id, &payload).await;

    AuditContext {
        component: COMPONENT,
        action: "update_object_class",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |class| {
        format!("Updated object class {}", class.name)
    })
    .await;

    result.map(Json)
}

async fn delete_class(state: &AppState, identity: &Identity, id: Uuid) -> ApiResult<()> {
    visible_class(state, identity, id).await?;
    Ok(state.object_class_repository.soft_delete(id).await?)
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = delete_class(&state, &identity, *id).await;

    AuditContext {
        component: COMPONENT,
        action: "delete_object_class",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Deleted object class {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Object class deleted" })))
}

pub async fn purge(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .object_class_repository
        .purge(*id)
        .await
        .map_err(ApiError::from);

    AuditContext {
        component: COMPONENT,
        action: "purge_object_class",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Purged object class {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Object class purged" })))
}
