//! OAuth 2.0 authorization-code flow against the Microsoft identity platform.
//!
//! The browser is sent to the authorize endpoint with a random `state`; the
//! provider redirects back with a one-time `code`, which is exchanged here for
//! an access/refresh pair in a single form-encoded POST.
//!
//! # Security
//!
//! - The client secret only ever travels in a POST body, never in a URL
//! - Refresh tokens stay server-side and are never logged
//! - Authorization codes are exchanged once and never retried

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::Rng as _;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{BoxFuture, TokenExchange};
use crate::tokens::{AccessToken, AuthorizationGrant, TokenResponse, TokenSet};

use super::config::ProviderConfig;

/// Random bytes in a CSRF state value, before encoding.
const STATE_LENGTH: usize = 32;

/// Generates an unguessable CSRF state value.
pub fn generate_state() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..STATE_LENGTH).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// A prepared redirect to the authorize endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Full authorize URL, to be used as a redirect target.
    pub url: String,
    /// The state embedded in `url`; must match the callback's `state`.
    pub state: String,
}

impl AuthorizationRequest {
    /// Builds an authorize URL with a fresh random state.
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        Self::with_state(config, generate_state())
    }

    /// Builds an authorize URL with the given state.
    pub fn with_state(config: &ProviderConfig, state: String) -> ProviderResult<Self> {
        let scope = config.scope_param();
        let url = url::Url::parse_with_params(
            &config.authorize_endpoint(),
            &[
                ("client_id", config.credentials.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("response_mode", "query"),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| {
            ProviderError::configuration(format!("invalid authorize endpoint: {}", e))
        })?;

        Ok(Self {
            url: url.into(),
            state,
        })
    }
}

/// Builds the provider sign-out URL.
pub fn logout_url(config: &ProviderConfig) -> ProviderResult<String> {
    let mut url = url::Url::parse(&config.logout_endpoint())
        .map_err(|e| ProviderError::configuration(format!("invalid logout endpoint: {}", e)))?;
    if let Some(ref redirect) = config.post_logout_redirect_uri {
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", redirect);
    }
    Ok(url.into())
}

/// Error body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Maps a non-success token-endpoint response to an error.
///
/// The body is parsed for the standard `error` field; the raw body is never
/// copied into the message.
fn classify_token_error(status: StatusCode, body: &str) -> ProviderError {
    let parsed: Option<OAuthErrorBody> = serde_json::from_str(body).ok();
    let oauth_error = parsed.as_ref().map(|b| b.error.as_str()).unwrap_or("");
    let description = parsed
        .as_ref()
        .and_then(|b| b.error_description.as_deref())
        .and_then(|d| d.lines().next())
        .unwrap_or("no description");

    let message = format!("token endpoint returned {}: {}", status.as_u16(), description);

    let err = if status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || oauth_error == "temporarily_unavailable"
    {
        ProviderError::transient(message)
    } else {
        match oauth_error {
            "invalid_client" | "unauthorized_client" | "unsupported_grant_type"
            | "invalid_scope" => ProviderError::configuration(message),
            "invalid_grant" | "interaction_required" | "consent_required" => {
                ProviderError::invalid_grant(message)
            }
            // A 4xx without a recognized error still means this grant is unusable.
            _ if status.is_client_error() => ProviderError::invalid_grant(message),
            _ => ProviderError::invalid_response(message),
        }
    };

    if oauth_error.is_empty() {
        err
    } else {
        err.with_oauth_error(oauth_error)
    }
}

/// Token-endpoint client backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTokenExchange {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl HttpTokenExchange {
    /// Creates a client for `config`.
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                ProviderError::configuration("failed to build HTTP client").with_source(e)
            })?;
        Ok(Self { config, http })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Posts one form to the token endpoint.
    ///
    /// Returns the parsed response and the local instant the request was
    /// issued, which anchors `expires_at`.
    async fn post_token(
        &self,
        grant_type: &str,
        params: &[(&str, &str)],
    ) -> ProviderResult<(TokenResponse, DateTime<Utc>)> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.expose()),
            ("grant_type", grant_type),
        ];
        form.extend_from_slice(params);

        debug!(grant_type, "posting to token endpoint");
        let issued_at = Utc::now();
        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport("token request", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from_transport("token response", e))?;

        if !status.is_success() {
            let err = classify_token_error(status, &body);
            warn!(grant_type, status = status.as_u16(), code = %err.code(), "token request rejected");
            return Err(err);
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response("token endpoint returned an unparseable body")
                .with_source(e)
        })?;
        Ok((parsed, issued_at))
    }

    async fn exchange_code(&self, grant: AuthorizationGrant) -> ProviderResult<TokenSet> {
        let code = grant.into_code();
        let scope = self.config.scope_param();
        let (response, issued_at) = self
            .post_token(
                "authorization_code",
                &[
                    ("code", code.expose()),
                    ("redirect_uri", self.config.redirect_uri.as_str()),
                    ("scope", scope.as_str()),
                ],
            )
            .await?;

        let tokens = TokenSet::from_code_response(response, issued_at)?;
        info!(expires_at = %tokens.expires_at(), scopes = ?tokens.scopes(), "authorization code exchanged");
        Ok(tokens)
    }

    async fn refresh_once(&self, current: &TokenSet) -> ProviderResult<TokenSet> {
        let scope = self.config.scope_param();
        let (response, issued_at) = self
            .post_token(
                "refresh_token",
                &[
                    ("refresh_token", current.refresh_token().expose()),
                    ("scope", scope.as_str()),
                ],
            )
            .await?;
        let rotated = response.refresh_token.is_some();
        let tokens = current.refreshed(response, issued_at)?;
        info!(expires_at = %tokens.expires_at(), rotated, "access token refreshed");
        Ok(tokens)
    }

    async fn client_credentials_once(&self) -> ProviderResult<AccessToken> {
        let (response, issued_at) = self
            .post_token(
                "client_credentials",
                &[("scope", self.config.app_scope.as_str())],
            )
            .await?;
        let token = AccessToken::from_response(&response, issued_at)?;
        info!(expires_at = %token.expires_at(), "application token obtained");
        Ok(token)
    }
}

impl TokenExchange for HttpTokenExchange {
    fn exchange_authorization_code(
        &self,
        grant: AuthorizationGrant,
    ) -> BoxFuture<'_, ProviderResult<TokenSet>> {
        Box::pin(self.exchange_code(grant))
    }

    fn exchange_refresh_token<'a>(
        &'a self,
        current: &'a TokenSet,
    ) -> BoxFuture<'a, ProviderResult<TokenSet>> {
        Box::pin(async move {
            self.config
                .retry
                .run("refresh_token", || self.refresh_once(current))
                .await
        })
    }

    fn exchange_client_credentials(&self) -> BoxFuture<'_, ProviderResult<AccessToken>> {
        Box::pin(async move {
            self.config
                .retry
                .run("client_credentials", || self.client_credentials_once())
                .await
        })
    }
}
