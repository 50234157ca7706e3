//! HTTP routes of the admin service

pub mod auth;
pub mod logs;
pub mod object_classes;
pub mod organizations;
pub mod products;
pub mod projects;
pub mod roles;
pub mod users;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use axum_extra::extract::WithRejection;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::LogMetadata,
    error::{ApiError, ApiResult},
    identity::Identity,
    middleware::{admin_middleware, auth_middleware},
    state::AppState,
};

/// JSON body whose rejection is reported as a `400`
pub type Payload<T> = WithRejection<Json<T>, ApiError>;
/// Query string whose rejection is reported as a `400`
pub type Params<T> = WithRejection<Query<T>, ApiError>;
/// `:id` path segment
pub type IdPath = WithRejection<Path<Uuid>, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

/// Create the router for the admin service
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login));

    let admin_only = Router::new()
        .route("/api/users", get(users::list).post(users::create))
        .route(
            "/api/users/:id",
            get(users::get).put(users::update).delete(users::delete),
        )
        .route("/api/users/:id/password", put(users::reset_password))
        .route("/api/users/:id/purge", delete(users::purge))
        .route("/api/roles", post(roles::create))
        .route("/api/roles/:id", put(roles::update).delete(roles::delete))
        .route("/api/roles/:id/purge", delete(roles::purge))
        .route("/api/organizations", post(organizations::create))
        .route("/api/organizations/:id", delete(organizations::delete))
        .route("/api/organizations/:id/purge", delete(organizations::purge))
        .route("/api/projects/:id/purge", delete(projects::purge))
        .route("/api/products/:id/purge", delete(products::purge))
        .route("/api/object-classes/:id/purge", delete(object_classes::purge))
        .route_layer(from_fn(admin_middleware));

    let authenticated = Router::new()
        .route("/api/logout", post(auth::logout))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/users/me", get(users::me).put(users::update_me))
        .route("/api/roles", get(roles::list))
        .route("/api/roles/:id", get(roles::get))
        .route("/api/organizations", get(organizations::list))
        .route(
            "/api/organizations/:id",
            get(organizations::get).put(organizations::update),
        )
        .route("/api/organizations/:id/users", get(organizations::members))
        .route("/api/projects", get(projects::list).post(projects::create))
        .route(
            "/api/projects/:id",
            get(projects::get)
                .put(projects::update)
                .delete(projects::delete),
        )
        .route("/api/products", get(products::list).post(products::create))
        .route(
            "/api/products/:id",
            get(products::get)
                .put(products::update)
                .delete(products::delete),
        )
        .route(
            "/api/object-classes",
            get(object_classes::list).post(object_classes::create),
        )
        .route(
            "/api/object-classes/:id",
            get(object_classes::get)
                .put(object_classes::update)
                .delete(object_classes::delete),
        )
        .route("/api/logs", get(logs::list))
        .route("/api/logs/:id", get(logs::get))
        .merge(admin_only)
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    public.merge(authenticated).with_state(state)
}

/// Liveness plus database reachability
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool)
        .await
        .unwrap_or(false);
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "service": "admin",
            "database": database,
        })),
    )
}

/// Client address as reported by the reverse proxy
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
        })
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// Where and by whom a mutation was requested
pub(crate) struct AuditContext<'a> {
    pub component: &'static str,
    pub action: &'static str,
    pub identity: &'a Identity,
    pub headers: &'a HeaderMap,
}

impl AuditContext<'_> {
    pub fn metadata(&self) -> LogMetadata {
        LogMetadata::new(self.action)
            .user(self.identity.user_id)
            .ip(client_ip(self.headers))
    }

    /// Write the audit entry describing how a mutation ended
    pub async fn record<T>(
        &self,
        state: &AppState,
        result: &ApiResult<T>,
        success: StatusCode,
        describe: impl FnOnce(&T) -> String,
    ) {
        match result {
            Ok(value) => {
                state
                    .audit
                    .info(
                        self.component,
                        &describe(value),
                        self.metadata().status(success),
                    )
                    .await
            }
            Err(e) => {
                state
                    .audit
                    .error(
                        self.component,
                        &format!("{} failed: {}", self.action, e),
                        self.metadata().status(e.status()),
                    )
                    .await
            }
        }
    }
}

/// Non-admins may only change what belongs to their own organization
pub(crate) fn ensure_tenant(identity: &Identity, org_id: Uuid) -> ApiResult<()> {
    if identity.is_admin() || identity.org_id == Some(org_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "Resource belongs to another organization".to_string(),
        ))
    }
}

/// Collapse `Option` lookups into a `404`
pub(crate) fn found<T>(value: Option<T>, what: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::NotFound(format!("{} not found", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.9"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_tenant_scope() {
        use crate::models::UserRole;

        let org = Uuid::new_v4();
        let member = Identity {
            user_id: Uuid::new_v4(),
            username: "bob".to_string(),
            role: UserRole::User,
            org_id: Some(org),
        };
        assert!(ensure_tenant(&member, org).is_ok());
        assert!(matches!(
            ensure_tenant(&member, Uuid::new_v4()),
            Err(ApiError::Forbidden(_))
        ));

        let admin = Identity {
            role: UserRole::Admin,
            org_id: None,
            ..member
        };
        assert!(ensure_tenant(&admin, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_found_maps_none_to_not_found() {
        assert_eq!(found(Some(1), "Thing").unwrap(), 1);
        let err = found::<u8>(None, "Thing").unwrap_err();
        assert_eq!(err.to_string(), "Thing not found");
    }
}
