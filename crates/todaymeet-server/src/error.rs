//! Server error types and their HTTP mapping.
//!
//! Response bodies carry a stable error code only. Provider messages stay in
//! the logs.

use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use todaymeet_providers::{ProviderError, ProviderErrorCode};

use crate::config::ConfigError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// No authenticated session for this request.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The request parameters are unusable.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The route is disabled by configuration.
    #[error("not found")]
    NotFound,

    /// Token lifecycle or calendar failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO error (listener bind, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// HTTP status and body code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotAuthenticated => (StatusCode::UNAUTHORIZED, "not_authenticated"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::Provider(e) => match e.code() {
                ProviderErrorCode::InvalidGrant
                | ProviderErrorCode::NotAuthenticated
                | ProviderErrorCode::Unauthorized => {
                    (StatusCode::UNAUTHORIZED, "not_authenticated")
                }
                ProviderErrorCode::AccessDenied => (StatusCode::FORBIDDEN, "access_denied"),
                ProviderErrorCode::Transient => {
                    (StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable")
                }
                ProviderErrorCode::Configuration
                | ProviderErrorCode::InvalidResponse
                | ProviderErrorCode::Storage
                | ProviderErrorCode::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
            Self::Config(_) | Self::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(ErrorBody { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(code: ProviderErrorCode) -> (StatusCode, &'static str) {
        ServerError::from(ProviderError::new(code, "provider said no")).status_and_code()
    }

    #[test]
    fn provider_errors_map_to_stable_codes() {
        assert_eq!(
            status_of(ProviderErrorCode::InvalidGrant),
            (StatusCode::UNAUTHORIZED, "not_authenticated")
        );
        assert_eq!(
            status_of(ProviderErrorCode::Unauthorized),
            (StatusCode::UNAUTHORIZED, "not_authenticated")
        );
        assert_eq!(
            status_of(ProviderErrorCode::Transient),
            (StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable")
        );
        assert_eq!(
            status_of(ProviderErrorCode::InvalidResponse),
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        );
    }

    #[tokio::test]
    async fn body_does_not_leak_provider_message() {
        let response = ServerError::from(ProviderError::transient("upstream body: secret-ish"))
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        insta::assert_json_snapshot!(body, @r#"
        {
          "error": "temporarily_unavailable"
        }
        "#);
    }
}
