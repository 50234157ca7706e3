//! User management and self-service profile

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
    models::{
        CreateUserRequest, NewUser, Page, PageWindow, ResetPasswordRequest, UpdateProfileRequest,
        UpdateUserRequest, User, UserChanges, UserDetail, UserQuery,
    },
    state::AppState,
    validation::{
        check, validate_optional_email, validate_password, validate_phone, validate_username,
    },
};

const COMPONENT: &str = "users";

async fn detail(state: &AppState, user: User) -> ApiResult<UserDetail> {
    let roles = state.role_repository.for_user(user.id).await?;
    Ok(UserDetail { user, roles })
}

async fn ensure_email_free(state: &AppState, email: &str, except: Option<Uuid>) -> ApiResult<()> {
    if state.user_repository.email_taken(email, except).await? {
        return Err(ApiError::Conflict("Email already exists".to_string()));
    }
    Ok(())
}

async fn ensure_org_exists(state: &AppState, org_id: Option<Uuid>) -> ApiResult<()> {
    if let Some(org_id) = org_id {
        if !state.organization_repository.exists(org_id).await? {
            return Err(ApiError::Validation(
                "Organization does not exist".to_string(),
            ));
        }
    }
    Ok(())
}

/// Current user's profile and roles
pub async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<UserDetail>> {
    let user = found(
        state.user_repository.find_by_id(identity.user_id).await?,
        "User",
    )?;
    Ok(Json(detail(&state, user).await?))
}

async fn apply_profile(
    state: &AppState,
    identity: &Identity,
    payload: UpdateProfileRequest,
) -> ApiResult<User> {
    let mut changes = UserChanges::default();

    if let Some(username) = payload.username {
        check(validate_username(&username))?;
        if state
            .user_repository
            .username_taken(&username, Some(identity.user_id))
            .await?
        {
            return Err(ApiError::Conflict("Username already exists".to_string()));
        }
        changes.username = Some(username);
    }
    if let Some(password) = payload.password {
        check(validate_password(&password))?;
        changes.password_hash = Some(state.hasher.hash(&password)?);
    }
    if let Some(email) = payload.email {
        check(validate_optional_email(&email))?;
        ensure_email_free(state, &email, Some(identity.user_id)).await?;
        changes.email = Some(email);
    }
    if let Some(phone) = payload.phone {
        check(validate_phone(&phone))?;
        changes.phone = Some(phone);
    }
    changes.full_name = payload.full_name;

    Ok(state
        .user_repository
        .update(identity.user_id, &changes, None)
        .await?)
}

/// Update the current user's own profile
pub async fn update_me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): Payload<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    let result = apply_profile(&state, &identity, payload).await;

    AuditContext {
        component: COMPONENT,
        action: "update_profile",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |user| {
        format!("User {} updated their profile", user.username)
    })
    .await;

    result.map(Json)
}

pub async fn list(
    State(state): State<AppState>,
    WithRejection(query, _): Params<UserQuery>,
) -> ApiResult<Json<Page<User>>> {
    let window = PageWindow::new(query.page, query.page_size);
    let (users, total) = state.user_repository.list(&query, window).await?;
    Ok(Json(Page::new(window, total, users)))
}

async fn create_user(
    state: &AppState,
    identity: &Identity,
    payload: CreateUserRequest,
) -> ApiResult<UserDetail> {
    check(validate_username(&payload.username))?;
    check(validate_password(&payload.password))?;
    check(validate_optional_email(&payload.email))?;
    check(validate_phone(&payload.phone))?;
    ensure_org_exists(state, payload.org_id).await?;

    if state
        .user_repository
        .username_taken(&payload.username, None)
        .await?
    {
        return Err(ApiError::Conflict("Username already exists".to_string()));
    }
    ensure_email_free(state, &payload.email, None).await?;

    let new_user = NewUser {
        password_hash: state.hasher.hash(&payload.password)?,
        username: payload.username,
        email: payload.email,
        full_name: payload.full_name,
        phone: payload.phone,
        is_active: payload.is_active.unwrap_or(true),
        role: payload.role,
        org_id: payload.org_id,
        created_by: Some(identity.user_id),
    };

    let user = state
        .user_repository
        .create_with_roles(&new_user, &payload.role_ids)
        .await?;
    detail(state, user).await
}

/// Admin-initiated user creation
pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): Payload<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = create_user(&state, &identity, payload).await;

    AuditContext {
        component: COMPONENT,
        action: "create_user",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::CREATED, |detail| {
        format!("Created user {}", detail.user.username)
    })
    .await;

    result.map(|detail| (StatusCode::CREATED, Json(detail)))
}

pub async fn get(
    State(state): State<AppState>,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<UserDetail>> {
    let user = found(state.user_repository.find_by_id(*id).await?, "User")?;
    Ok(Json(detail(&state, user).await?))
}

async fn update_user(state: &AppState, id: Uuid, payload: UpdateUserRequest) -> ApiResult<UserDetail> {
    if let Some(email) = &payload.email {
        check(validate_optional_email(email))?;
        ensure_email_free(state, email, Some(id)).await?;
    }
    if let Some(phone) = &payload.phone {
        check(validate_phone(phone))?;
    }
    ensure_org_exists(state, payload.org_id.flatten()).await?;

    let changes = UserChanges {
        email: payload.email,
        full_name: payload.full_name,
        phone: payload.phone,
        is_active: payload.is_active,
        role: payload.role,
        org_id: payload.org_id,
        ..UserChanges::default()
    };

    let user = state
        .user_repository
        .update(id, &changes, payload.role_ids.as_deref())
        .await?;
    detail(state, user).await
}

pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
    WithRejection(Json(payload), _): Payload<UpdateUserRequest>,
) -> ApiResult<Json<UserDetail>> {
    let result = update_user(&state, *id, payload).await;

    AuditContext {
        component: COMPONENT,
        action: "update_user",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |detail| {
        format!("Updated user {}", detail.user.username)
    })
    .await;

    result.map(Json)
}

async fn reset(state: &AppState, id: Uuid, payload: &ResetPasswordRequest) -> ApiResult<()> {
    check(validate_password(&payload.new_password))?;
    found(state.user_repository.find_by_id(id).await?, "User")?;
    let digest = state.hasher.hash(&payload.new_password)?;
    Ok(state.user_repository.set_password_hash(id, &digest).await?)
}

/// Admin password reset
pub async fn reset_password(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
    WithRejection(Json(payload), _): Payload<ResetPasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let result = reset(&state, *id, &payload).await;

    AuditContext {
        component: COMPONENT,
        action: "reset_password",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Reset password of user {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "Password updated" })))
}

fn refuse_self(identity: &Identity, id: Uuid) -> ApiResult<()> {
    if identity.user_id == id {
        return Err(ApiError::Validation(
            "You cannot delete your own account".to_string(),
        ));
    }
    Ok(())
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = match refuse_self(&identity, *id) {
        Ok(()) => state
            .user_repository
            .soft_delete(*id)
            .await
            .map_err(ApiError::from),
        Err(e) => Err(e),
    };

    AuditContext {
        component: COMPONENT,
        action: "delete_user",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Deleted user {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "User deleted" })))
}

/// Irreversibly remove a user
pub async fn purge(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    WithRejection(id, _): IdPath,
) -> ApiResult<Json<serde_json::Value>> {
    let result = match refuse_self(&identity, *id) {
        Ok(()) => state.user_repository.purge(*id).await.map_err(ApiError::from),
        Err(e) => Err(e),
    };

    AuditContext {
        component: COMPONENT,
        action: "purge_user",
        identity: &identity,
        headers: &headers,
    }
    .record(&state, &result, StatusCode::OK, |_| {
        format!("Purged user {}", *id)
    })
    .await;

    result.map(|_| Json(json!({ "message": "User purged" })))
}
