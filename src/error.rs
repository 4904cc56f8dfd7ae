//! Request-level error taxonomy and its HTTP rendering.
//!
//! Every failure in a handler, service or store funnels into [`AppError`].
//! None of them is retried; the response carries `success: false` and a
//! human-readable message.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Request input was rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// A conditional update lost against a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The database was unreachable or rejected the statement.
    #[error("persistence error: {source}")]
    Persistence {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The uploaded file stream could not be read to completion.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The object store rejected or failed the put.
    #[error("upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn persistence(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        AppError::Persistence {
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::BAD_REQUEST,
            AppError::Upload { .. } => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound { .. } => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::Persistence { .. } => "persistence_error",
            AppError::Io(_) => "io_error",
            AppError::Upload { .. } => "upload_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::persistence(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        } else {
            tracing::warn!(%status, error = %self, "request rejected");
        }

        let body = json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}
