//! Error types for identity-provider and calendar operations.
//!
//! Every failure in this crate is a [`ProviderError`] carrying a
//! [`ProviderErrorCode`]. The session orchestrator decides state transitions
//! from the code alone; messages are for logs and are never shown to end users.

use std::fmt;
use thiserror::Error;

/// The category of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// An authorization code or refresh token was rejected. Never retried;
    /// forces re-authentication.
    InvalidGrant,
    /// The resource API rejected a bearer token. Triggers one refresh-and-retry.
    Unauthorized,
    /// The resource API refused access for a valid token (missing scope).
    AccessDenied,
    /// Network failure, timeout, throttling or provider 5xx. Retried with backoff.
    Transient,
    /// Missing or rejected client configuration. Fatal at startup.
    Configuration,
    /// No token set is held for this session.
    NotAuthenticated,
    /// The provider answered with something we could not parse.
    InvalidResponse,
    /// The token store failed to read or write.
    Storage,
    /// Unexpected internal state.
    Internal,
}

impl ProviderErrorCode {
    /// Returns true if the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true if the user has to go through the login flow again.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::InvalidGrant | Self::NotAuthenticated)
    }

    /// Returns a stable snake_case name for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidGrant => "invalid_grant",
            Self::Unauthorized => "unauthorized",
            Self::AccessDenied => "access_denied",
            Self::Transient => "transient",
            Self::Configuration => "configuration_error",
            Self::NotAuthenticated => "not_authenticated",
            Self::InvalidResponse => "invalid_response",
            Self::Storage => "storage_error",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error raised by the token lifecycle or the calendar client.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// OAuth `error` field returned by the provider, e.g. `invalid_grant`.
    oauth_error: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            oauth_error: None,
            source: None,
        }
    }

    /// Creates an invalid-grant error.
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidGrant, message)
    }

    /// Creates an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unauthorized, message)
    }

    /// Creates an access-denied error.
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AccessDenied, message)
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Transient, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Configuration, message)
    }

    /// Creates a not-authenticated error.
    pub fn not_authenticated(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NotAuthenticated, message)
    }

    /// Creates an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Storage, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Internal, message)
    }

    /// Maps a transport failure from the HTTP client.
    ///
    /// Timeouts and connection failures are transient; so is anything else the
    /// client raises before a status line was received.
    pub fn from_transport(context: &str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("{}: request timed out", context)
        } else if err.is_connect() {
            format!("{}: connection failed", context)
        } else {
            format!("{}: request failed", context)
        };
        Self::transient(message).with_source(err.without_url())
    }

    /// Sets the OAuth error code reported by the provider.
    pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
        self.oauth_error = Some(error.into());
        self
    }

    /// Sets the source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the OAuth error reported by the provider, if any.
    pub fn oauth_error(&self) -> Option<&str> {
        self.oauth_error.as_deref()
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Returns true if the session must go back through login.
    pub fn requires_login(&self) -> bool {
        self.code.requires_login()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(ref oauth) = self.oauth_error {
            write!(f, " ({})", oauth)?;
        }
        Ok(())
    }
}

/// A specialized Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
