//! Registration, login and logout

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Payload, client_ip};
use crate::{
    audit::LogMetadata,
    error::{ApiError, ApiResult},
    identity::{Identity, LoginCredential},
    models::{LoginRequest, NewUser, RegisterRequest, User, UserRole},
    password::PasswordCheck,
    state::AppState,
    validation::{
        check, validate_email, validate_name, validate_password, validate_phone,
        validate_username,
    },
};

const COMPONENT: &str = "auth";
const BAD_CREDENTIALS: &str = "Invalid username or password";

#[derive(Serialize)]
pub struct LoginResponse {
    /// Bearer token; absent in session mode where a cookie is set instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub user: User,
}

async fn create_account(state: &AppState, payload: &RegisterRequest) -> ApiResult<Uuid> {
    check(validate_username(&payload.username))?;
    check(validate_password(&payload.password))?;
    check(validate_email(&payload.email))?;
    check(validate_name("Full name", &payload.full_name))?;
    let phone = payload.phone.clone().unwrap_or_default();
    check(validate_phone(&phone))?;

    if state
        .user_repository
        .username_taken(&payload.username, None)
        .await?
    {
        return Err(ApiError::Conflict("Username already exists".to_string()));
    }
    if state
        .user_repository
        .email_taken(&payload.email, None)
        .await?
    {
        return Err(ApiError::Conflict("Email already exists".to_string()));
    }

    let new_user = NewUser {
        username: payload.username.clone(),
        password_hash: state.hasher.hash(&payload.password)?,
        email: payload.email.clone(),
        full_name: payload.full_name.clone(),
        phone,
        is_active: true,
        role: UserRole::User,
        org_id: None,
        created_by: None,
    };

    // A racing registration loses on the unique index and gets a 409 here
    let user = state.user_repository.create(&new_user).await?;
    Ok(user.id)
}

/// User registration endpoint
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): Payload<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    info!("Registration attempt for user: {}", payload.username);

    let metadata = LogMetadata::new("register")
        .ip(client_ip(&headers))
        .extra("username", &payload.username);

    match create_account(&state, &payload).await {
        Ok(user_id) => {
            let metadata = metadata.user(user_id).status(StatusCode::CREATED);
            let message = format!("User {} registered", payload.username);
            state.audit.fact(COMPONENT, &message, metadata).await;

            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "message": "Registration successful",
                    "user_id": user_id,
                })),
            ))
        }
        Err(e) => {
            state
                .audit
                .error(
                    COMPONENT,
                    &format!("Registration of {} failed: {}", payload.username, e),
                    metadata.status(e.status()),
                )
                .await;
            Err(e)
        }
    }
}

/// Check the credentials and return the authenticated user
async fn authenticate(state: &AppState, payload: &LoginRequest) -> ApiResult<User> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Username and password are required".to_string(),
        ));
    }

    let Some(user) = state
        .user_repository
        .find_by_username(&payload.username)
        .await?
    else {
        state.hasher.check_missing(&payload.password);
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.to_string()));
    };

    match state.hasher.check(&payload.password, &user.password_hash) {
        PasswordCheck::Valid => {}
        PasswordCheck::ValidLegacy => {
            warn!("Re-hashing legacy plaintext password for user: {}", user.username);
            let digest = state.hasher.hash(&payload.password)?;
            state
                .user_repository
                .set_password_hash(user.id, &digest)
                .await?;
        }
        PasswordCheck::Invalid => {
            return Err(ApiError::Unauthorized(BAD_CREDENTIALS.to_string()));
        }
    }

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is disabled".to_string()));
    }

    state.user_repository.touch_last_login(user.id).await?;
    Ok(user)
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    WithRejection(Json(payload), _): Payload<LoginRequest>,
) -> ApiResult<Response> {
    info!("Login attempt for user: {}", payload.username);

    let metadata = LogMetadata::new("login")
        .ip(client_ip(&headers))
        .extra("username", &payload.username);

    let result = match authenticate(&state, &payload).await {
        Ok(user) => {
            let identity = Identity::from(&user);
            state
                .resolver
                .login(&identity)
                .await
                .map(|credential| (user, credential))
                .map_err(ApiError::from)
        }
        Err(e) => Err(e),
    };

    let (user, credential) = match result {
        Ok(pair) => pair,
        Err(e) => {
            state
                .audit
                .error(
                    COMPONENT,
                    &format!("Login failed for {}: {}", payload.username, e),
                    metadata.status(e.status()),
                )
                .await;
            return Err(e);
        }
    };

    let metadata = metadata.user(user.id).status(StatusCode::OK);
    let message = format!("User {} logged in", user.username);
    state.audit.fact(COMPONENT, &message, metadata).await;

    let response = match credential {
        LoginCredential::Token(token) => Json(LoginResponse {
            token: Some(token),
            user,
        })
        .into_response(),
        LoginCredential::Session(jar) => {
            (jar, Json(LoginResponse { token: None, user })).into_response()
        }
    };
    Ok(response)
}

/// Logout endpoint
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let jar = state.resolver.logout(&headers).await?;

    state
        .audit
        .info(
            COMPONENT,
            &format!("User {} logged out", identity.username),
            LogMetadata::new("logout")
                .user(identity.user_id)
                .ip(client_ip(&headers))
                .status(StatusCode::OK),
        )
        .await;

    let body = Json(json!({ "message": "Logged out" }));
    Ok(match jar {
        Some(jar) => (jar, body).into_response(),
        None => body.into_response(),
    })
}
