//! Structured errors for the imgd HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::processing::ProcessError;

/// Request failures that end in an error status.
///
/// Upstream and cache failures never show up here: the resolver answers
/// those with the default skin.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Path segment is neither a username nor a UUID.
    #[error("INVALID_PLAYER: {0}")]
    InvalidPlayer(String),

    /// Rendering or encoding the image failed.
    #[error("PROCESSING_FAILED: {0}")]
    Processing(String),
}

impl From<ProcessError> for ServerError {
    fn from(err: ProcessError) -> Self {
        ServerError::Processing(err.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::InvalidPlayer(_) => StatusCode::NOT_FOUND,
            ServerError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
