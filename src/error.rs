use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{auth::AuthError, guard::GuardError, repository::RepoError};

/// ApiError
///
/// The tagged error every engine operation and handler returns. Each variant maps onto one
/// HTTP status; the message is sent back as `{ "error": "..." }`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    CrossTenantViolation(String),

    #[error("{0}")]
    ReferenceNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::CrossTenantViolation(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::ReferenceNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs.
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed with internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Signing(detail) => ApiError::Internal(format!("token signing: {detail}")),
            AuthError::Lookup(err) => err.into(),
            AuthError::ExpiredToken => ApiError::Unauthenticated("Token expired".into()),
            AuthError::MissingCredential => {
                ApiError::Unauthenticated("Access token required".into())
            }
            AuthError::InvalidToken(_) | AuthError::IdentityNotFound => {
                ApiError::Unauthenticated("Invalid token".into())
            }
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        let message = err.to_string();
        match err {
            GuardError::TargetNotFound { .. } => ApiError::NotFound(message),
            GuardError::OutOfScope { .. } => ApiError::Forbidden(message),
            GuardError::ReferenceNotFound { .. } => ApiError::ReferenceNotFound(message),
            GuardError::CrossTenant { .. } => ApiError::CrossTenantViolation(message),
            GuardError::Cycle { .. } => ApiError::Validation(message),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Guard(guard) => guard.into(),
            RepoError::Conflict(message) => ApiError::Validation(message),
            RepoError::Database(detail) => ApiError::Internal(detail),
        }
    }
}
