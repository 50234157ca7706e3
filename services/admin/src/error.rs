//! Error taxonomy of the admin API and its HTTP mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{password::HashingError, repositories::RepositoryError};

/// Every failure a handler can surface to a client
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed or missing input
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate username, email, name or code
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials, or an absent, invalid or expired token/session
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("{0}")]
    Forbidden(String),

    /// Store or backend failure; the detail stays in the server log
    #[error("dependency failure: {0}")]
    Dependency(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Dependency(detail) => {
                error!("Request failed on a dependency: {}", detail);
                "Internal server error".to_string()
            }
            ApiError::Validation(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg) => msg,
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => ApiError::Conflict(msg),
            RepositoryError::NotFound(msg) => ApiError::NotFound(msg),
            RepositoryError::Invalid(msg) => ApiError::Validation(msg),
            RepositoryError::Database(e) => ApiError::Dependency(e.to_string()),
        }
    }
}

impl From<HashingError> for ApiError {
    fn from(err: HashingError) -> Self {
        ApiError::Dependency(err.to_string())
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
