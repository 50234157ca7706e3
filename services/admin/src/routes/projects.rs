//! Project management

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
    models::{NewProject, Page, PageWindow, Project, ProjectQuery},
    state::AppState,
    validation::{check, validate_name},
};

const COMPONENT: &str = "projects";

fn validate(project: &NewProject) -> ApiResult<()> {
    check(validate_name("Project name", &project.name))?;
    check(validate_name("Status", &project.status))?;
    if let Some(end_date) = project.end_date {
        if end_date < project.start_date {
            return Err(ApiError::Validation(
                "end_date must not be before start_date".to_string(),
            ));
        }
    }
    Ok(())
}

/// Load a live project the caller may change
async fn owned_project(state: &AppState, identity: &Identity, id: Uuid) -> ApiResult<Project> {
    let project = found(state.project_repository.find_by_id(id).await?, "Project")?;
    ensure_tenant(identity, project.organization_id)?;
    Ok(project)
}

pub async fn list(
    State(state): State<AppState>,
    WithRejection(query, _): Params<ProjectQuery>,
) -> ApiResult<Json<Page<Project>>> {
    let window = PageWindow::new(query.page, query.page_size);
    let (projects, total) = state.project_repository.list(&query, window).await?;
    Ok(Json(Page::new(window, total, projects)))
}

pub async fn get(
    State(state): State<AppState>,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<Project>> {
    let project = found(state.project_repository.find_by_id(*id).await?, "Project")?;
    Ok(Json(project))
}

async fn create_project(
    state: &AppState,
    identity: &Identity,
    payload: &NewProject,
) -> ApiResult<Project> {
    validate(payload)?;
    ensure_tenant(identity, payload.organization_id)?;
    Ok(state.project_repository.create(payload).await?)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): Payload<NewProject>,
) -> ApiResult<impl IntoResponse> {
    let result = create_project(&state, &identity, &payload).await;

    AuditContext {
        component: COMPONENT,
        action: "create_project",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::CREATED, |project| {
        format!("Created project {}", project.name)
    })
    .await;

    result.map(|project| (StatusCode::CREATED, Json(project)))
}

async fn update_project(
    state: &AppState,
    identity: &Identity,
    id: Uuid,
    payload: &NewProject,
) -> ApiResult<Project> {
    validate(payload)?;
    owned_project(state, identity, id).await?;
    ensure_tenant(identity, payload.organization_id)?;
    Ok(state.project_repository.update(id, payload).await?)
}

pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
    WithRejection(Json(payload), _): Payload<NewProject>,
) -> ApiResult<Json<Project>> {
    let result = update_project(&state, &identity, *id, &payload).await;

    AuditContext {
        component: COMPONENT,
        action: "update_project",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |project| {
        format!("Updated project {}", project.name)
    })
    .await;

    result.map(Json)
}

async fn delete_project(state: &AppState, identity: &Identity, id: Uuid) -> ApiResult<()> {
    owned_project(state, identity, id).await?;
    Ok(state.project_repository.soft_delete(id).await?)
}

/// Soft-delete; refused while live products remain
pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = delete_project(&state, &identity, *id).await;

    AuditContext {
        component: COMPONENT,
        action: "delete_project",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Deleted project {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Project deleted" })))
}

pub async fn purge(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .project_repository
        .purge(*id)
        .await
        .map_err(ApiError::from);

    AuditContext {
        component: COMPONENT,
        action: "purge_project",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Purged project {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Project purged" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn project() -> NewProject {
        NewProject {
            name: "Warehouse".to_string(),
            description: String::new(),
            start_date: Utc::now(),
            end_date: None,
            status: "active".to_string(),
            organization_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_end_date_may_not_precede_start_date() {
        let mut payload = project();
        assert!(validate(&payload).is_ok());

        payload.end_date = Some(payload.start_date + Duration::days(30));
        assert!(validate(&payload).is_ok());

        payload.end_date = Some(payload.start_date - Duration::days(1));
        assert!(matches!(validate(&payload), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_status_is_required() {
        let mut payload = project();
        payload.status = " ".to_string();
        assert!(validate(&payload).is_err());
    }
}
