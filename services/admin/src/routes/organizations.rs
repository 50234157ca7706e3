//! Organization (tenant) management

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::{AuditContext, IdPath, Params, Payload, ensure_tenant, found};
use crate::{
    error::{ApiError, ApiResult},
    identity::Identity,
    models::{
        NewOrganization, NewUser, Organization, OrganizationQuery, OrganizationSummary, Page,
        PageWindow, UpdateOrganization, User, UserRole,
    },
    state::AppState,
    validation::{check, validate_name},
};

const COMPONENT: &str = "organizations";
const INITIAL_PASSWORD_LEN: usize = 16;
const MAX_USERNAME_LEN: usize = 32;

/// Default admin account of a new organization
#[derive(Serialize)]
pub struct InitialAdmin {
    pub user: User,
    /// Shown once; only the digest is stored
    pub password: String,
}

#[derive(Serialize)]
pub struct CreatedOrganization {
    pub organization: Organization,
    pub admin_user: InitialAdmin,
}

/// `admin_<name>` reduced to a valid username
pub fn admin_username(org_name: &str) -> String {
    let mut username = String::from("admin_");
    for c in org_name.trim().chars() {
        if username.len() >= MAX_USERNAME_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() {
            username.push(c.to_ascii_lowercase());
        } else {
            username.push('_');
        }
    }
    username
}

fn initial_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INITIAL_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

pub async fn list(
    State(state): State<AppState>,
    WithRejection(query, _): Params<OrganizationQuery>,
) -> ApiResult<Json<Page<OrganizationSummary>>> {
    let window = PageWindow::new(query.page, query.page_size);
    let (organizations, total) = state.organization_repository.list(&query, window).await?;
    Ok(Json(Page::new(window, total, organizations)))
}

pub async fn get(
    State(state): State<AppState>,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<Organization>> {
    let organization = found(
        state.organization_repository.find_by_id(*id).await?,
        "Organization",
    )?;
    Ok(Json(organization))
}

/// Live members of an organization
pub async fn members(
    State(state): State<AppState>,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<Vec<User>>> {
    if !state.organization_repository.exists(*id).await? {
        return Err(ApiError::NotFound("Organization not found".to_string()));
    }
    Ok(Json(state.user_repository.list_by_org(*id).await?))
}

async fn create_organization(
    state: &AppState,
    identity: &Identity,
    payload: &NewOrganization,
) -> ApiResult<CreatedOrganization> {
    check(validate_name("Organization name", &payload.name))?;
    if state
        .organization_repository
        .name_taken(&payload.name, None)
        .await?
    {
        return Err(ApiError::Conflict(
            "Organization name already exists".to_string(),
        ));
    }

    let username = admin_username(&payload.name);
    if state.user_repository.username_taken(&username, None).await? {
        return Err(ApiError::Conflict(format!(
            "Username {} already exists",
            username
        )));
    }

    let password = initial_password();
    let admin = NewUser {
        username,
        password_hash: state.hasher.hash(&password)?,
        email: String::new(),
        full_name: format!("{} administrator", payload.name),
        phone: String::new(),
        is_active: true,
        role: UserRole::Admin,
        org_id: None,
        created_by: Some(identity.user_id),
    };

    let (organization, user) = state
        .organization_repository
        .create_with_admin(payload, identity.user_id, admin)
        .await?;

    Ok(CreatedOrganization {
        organization,
        admin_user: InitialAdmin { user, password },
    })
}

/// Create an organization and its default admin atomically
pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): Payload<NewOrganization>,
) -> ApiResult<impl IntoResponse> {
    let result = create_organization(&state, &identity, &payload).await;

    let audit = AuditContext {
        component: COMPONENT,
        action: "create_organization",
        identity: &identity,
        headers: &headers,
    };
    match &result {
        Ok(created) => {
            state
                .audit
                .fact(
                    COMPONENT,
                    &format!(
                        "Created organization {} with admin {}",
                        created.organization.name, created.admin_user.user.username
                    ),
                    audit
                        .metadata()
                        .status(StatusCode::CREATED)
                        .extra("organization_id", created.organization.id),
                )
                .await
        }
        Err(e) => {
            state
                .audit
                .error(
                    COMPONENT,
                    &format!("{} failed: {}", audit.action, e),
                    audit.metadata().status(e.status()),
                )
                .await
        }
    }

    result.map(|created| (StatusCode::CREATED, Json(created)))
}

async fn update_organization(
    state: &AppState,
    identity: &Identity,
    id: Uuid,
    payload: &UpdateOrganization,
) -> ApiResult<Organization> {
    ensure_tenant(identity, id)?;
    if let Some(name) = &payload.name {
        check(validate_name("Organization name", name))?;
        if state
            .organization_repository
            .name_taken(name, Some(id))
            .await?
        {
            return Err(ApiError::Conflict(
                "Organization name already exists".to_string(),
            ));
        }
    }
    Ok(state.organization_repository.update(id, payload).await?)
}

pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
    WithRejection(Json(payload), _): Payload<UpdateOrganization>,
) -> ApiResult<Json<Organization>> {
    let result = update_organization(&state, &identity, *id, &payload).await;

    AuditContext {
        component: COMPONENT,
        action: "update_organization",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |organization| {
        format!("Updated organization {}", organization.name)
    })
    .await;

    result.map(Json)
}

/// Soft-delete; refused while children, members, projects or classes remain
pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .organization_repository
        .soft_delete(*id)
        .await
        .map_err(ApiError::from);

    AuditContext {
        component: COMPONENT,
        action: "delete_organization",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Deleted organization {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Organization deleted" })))
}

pub async fn purge(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .organization_repository
        .purge(*id)
        .await
        .map_err(ApiError::from);

    AuditContext {
        component: COMPONENT,
        action: "purge_organization",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Purged organization {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Organization purged" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_username;

    #[test]
    fn test_admin_username_is_a_valid_username() {
        assert_eq!(admin_username("acme"), "admin_acme");
        assert_eq!(admin_username("Acme Corp."), "admin_acme_corp_");

        let long = admin_username(&"x".repeat(80));
        assert_eq!(long.len(), MAX_USERNAME_LEN);
        assert!(validate_username(&long).is_ok());

        // Non-ASCII characters collapse to underscores
        assert!(validate_username(&admin_username("研发部")).is_ok());
    }

    #[test]
    fn test_initial_passwords_are_random() {
        let first = initial_password();
        assert_eq!(first.len(), INITIAL_PASSWORD_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, initial_password());
    }
}
