//! API error mapping.
//!
//! Every handler failure serializes as `{"detail": message}` with a status
//! matching the error class. User-code failures never reach this type; they
//! travel in the 200 response's `error` field.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use polyrepl_coordinator::CoordinatorError;
use polyrepl_core::StoreError;
use serde_json::json;

/// Error returned by any HTTP handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) | StoreError::EntryNotFound(_) => Self::NotFound(e.to_string()),
            StoreError::LanguageMismatch { .. } => Self::BadRequest(e.to_string()),
            StoreError::Internal(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::EmptyCode => Self::BadRequest(e.to_string()),
            CoordinatorError::SessionBusy => Self::Conflict(e.to_string()),
            CoordinatorError::Store(inner) => inner.into(),
            CoordinatorError::Backend(_) | CoordinatorError::Codec(_) => {
                Self::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(%status, detail = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
