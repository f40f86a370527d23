//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use facematch_core::PreconditionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request body.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A match precondition was violated; no scan was performed.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Precondition(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Precondition(e) => match e {
                PreconditionError::MissingField(_) => "MISSING_DATA",
                PreconditionError::InvalidGallery(_) => "INVALID_GALLERY",
                PreconditionError::GalleryNotFound(_) | PreconditionError::Scan(_) => {
                    "GALLERY_NOT_FOUND"
                }
                PreconditionError::ProbeStorage(_) => "PROBE_STORAGE",
            },
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to return to clients (no server paths).
    fn client_message(&self) -> String {
        match self {
            Self::Precondition(PreconditionError::Scan(_)) => "gallery is not available".to_string(),
            Self::Precondition(PreconditionError::ProbeStorage(_)) => {
                "cannot store probe image".to_string()
            }
            Self::Internal(_) => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        } else {
            tracing::warn!(error = %self, code = self.error_code(), "request rejected");
        }

        let body = serde_json::json!({
            "error": self.client_message(),
            "code": self.error_code(),
        });
        (status, Json(body)).into_response()
    }
}
