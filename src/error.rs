/// Unified error types for Modguard
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the moderation backend
#[derive(Error, Debug)]
pub enum ModError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Missing or malformed moderator identity
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Role lacks permission for the requested operation
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Bad input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("User already banned: {0}")]
    AlreadyBanned(String),

    #[error("User not banned: {0}")]
    NotBanned(String),

    /// Duplicate keyword or role name
    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModError {
    /// Stable machine-readable code, also used as a metric label
    pub fn code(&self) -> &'static str {
        match self {
            ModError::Database(_) => "DatabaseError",
            ModError::Authentication(_) => "AuthenticationRequired",
            ModError::Authorization(_) => "Forbidden",
            ModError::Validation(_) => "InvalidRequest",
            ModError::AlreadyBanned(_) => "AlreadyBanned",
            ModError::NotBanned(_) => "NotBanned",
            ModError::Duplicate(_) => "Duplicate",
            ModError::NotFound(_) => "NotFound",
            ModError::UnknownRole(_) => "UnknownRole",
            ModError::RateLimitExceeded { .. } => "RateLimitExceeded",
            ModError::Internal(_) => "InternalError",
            ModError::Io(_) => "IoError",
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert ModError to HTTP response
impl IntoResponse for ModError {
    fn into_response(self) -> Response {
        let status = match &self {
            ModError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ModError::Authorization(_) => StatusCode::FORBIDDEN,
            ModError::Validation(_) => StatusCode::BAD_REQUEST,
            ModError::NotFound(_) | ModError::NotBanned(_) | ModError::UnknownRole(_) => {
                StatusCode::NOT_FOUND
            }
            ModError::AlreadyBanned(_) | ModError::Duplicate(_) => StatusCode::CONFLICT,
            ModError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ModError::Database(_) | ModError::Internal(_) | ModError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            // Don't leak storage details
            ModError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "Internal server error".to_string()
            }
            ModError::Internal(_) | ModError::Io(_) => {
                tracing::error!(error = %self, "internal error");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        crate::metrics::record_error(self.code(), "api");

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for moderation operations
pub type ModResult<T> = Result<T, ModError>;
