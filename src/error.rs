//! Error handling for the camera stream server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown camera id (or missing stream file)
    #[error("{0}")]
    NotFound(String),

    /// Missing or malformed camera fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate camera id
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Connect requested while an ActiveConnection exists
    #[error("Camera {0} is already connected")]
    AlreadyConnected(String),

    /// Operation requires an ActiveConnection
    #[error("Camera {0} is not connected")]
    NotConnected(String),

    /// Transcoder process could not be launched (or died during readiness)
    #[error("Failed to start streaming service: {0}")]
    SpawnFailure(String),

    /// A stream source could not be opened or read
    #[error("Probe failed: {0}")]
    ProbeFailure(String),

    /// Per-camera lock wait expired
    #[error("Camera {0} is busy, try again later")]
    Busy(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_)
            | Error::AlreadyConnected(_)
            | Error::NotConnected(_)
            | Error::SpawnFailure(_)
            | Error::ProbeFailure(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Serialization(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Conflict(_) => "CONFLICT",
            Error::AlreadyConnected(_) => "ALREADY_CONNECTED",
            Error::NotConnected(_) => "NOT_CONNECTED",
            Error::SpawnFailure(_) => "SPAWN_FAILURE",
            Error::ProbeFailure(_) => "PROBE_FAILURE",
            Error::Busy(_) => "BUSY",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn camera_not_found(camera_id: &str) -> Self {
        Error::NotFound(format!("Camera {} not found", camera_id))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        } else {
            tracing::debug!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "success": false,
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::camera_not_found("cam-1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::NotConnected("cam-1".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Validation("address is required".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Conflict("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::camera_not_found("cam-1").to_string(),
            "Camera cam-1 not found"
        );
        assert_eq!(
            Error::AlreadyConnected("cam-1".into()).to_string(),
            "Camera cam-1 is already connected"
        );
    }
}
