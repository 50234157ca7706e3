//! Request gates
//!
//! `auth_middleware` resolves the caller and stores an [`Identity`] in the
//! request extensions. `admin_middleware` runs inside it and additionally
//! requires the admin role.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::{error, info};

use crate::{
    error::ApiError,
    identity::{AuthFailure, AuthMode, Identity},
    state::AppState,
};

/// Resolve the caller or reject the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match state.resolver.resolve(req.headers()).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(AuthFailure::Session(e)) => {
            error!("Session backend failure: {}", e);
            ApiError::Dependency(e.to_string()).into_response()
        }
        Err(failure) => {
            info!("Rejected {} {}: {}", req.method(), req.uri().path(), failure);
            match (&state.login_redirect, state.resolver.mode()) {
                (Some(login), AuthMode::Session) => Redirect::to(login).into_response(),
                _ => ApiError::from(failure).into_response(),
            }
        }
    }
}

/// Require an authenticated admin
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let identity = req
        .extensions()
        .get::<Identity>()
        .ok_or_else(|| ApiError::Unauthorized("missing credentials".to_string()))?;

    if !identity.is_admin() {
        info!(
            "User {} denied admin access to {}",
            identity.username,
            req.uri().path()
        );
        return Err(ApiError::Forbidden("Admin role required".to_string()));
    }

    Ok(next.run(req).await)
}
