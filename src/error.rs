use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Unified error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Connection errors
    #[error("could not establish connection")]
    Upgrade(String),

    // Wire format errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RelayError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 500 Internal Server Error
            RelayError::Upgrade(_)
            | RelayError::Serialization(_)
            | RelayError::Io(_)
            | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Plain-text bodies: the only HTTP surface is the upgrade endpoint
impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            RelayError::InvalidConfig("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Upgrade("missing upgrade header".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upgrade_error_hides_details() {
        let err = RelayError::Upgrade("Connection header did not include 'upgrade'".to_string());
        assert_eq!(err.to_string(), "could not establish connection");
    }

    #[tokio::test]
    async fn test_into_response_is_plain_text() {
        let response = RelayError::Upgrade("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"could not establish connection");
    }
}
