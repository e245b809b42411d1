//! Microsoft identity platform and Graph configuration.

use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};
use crate::retry::RetryPolicy;
use crate::secret::Secret;

/// Registered application credentials.
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    /// Application (client) ID.
    pub client_id: String,
    /// Client secret. Sent only in token-endpoint request bodies.
    pub client_secret: Secret,
}

impl OAuthCredentials {
    /// Creates credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<Secret>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Checks that both values are present.
    pub fn validate(&self) -> ProviderResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(ProviderError::configuration("client_id is required"));
        }
        if self.client_secret.is_blank() {
            return Err(ProviderError::configuration("client_secret is required"));
        }
        Ok(())
    }
}

/// Settings for the authorization and token endpoints.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Application credentials.
    pub credentials: OAuthCredentials,
    /// Authority host, e.g. `https://login.microsoftonline.com`.
    pub authority: String,
    /// Tenant segment: a tenant ID, a domain, `common` or `organizations`.
    pub tenant: String,
    /// Registered redirect URI of the callback endpoint.
    pub redirect_uri: String,
    /// Delegated scopes requested at login.
    pub scopes: Vec<String>,
    /// Scope requested by the client-credentials grant.
    pub app_scope: String,
    /// Where the provider sends the browser after sign-out.
    pub post_logout_redirect_uri: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User-Agent header.
    pub user_agent: String,
    /// Retry policy for refresh and client-credentials exchanges.
    pub retry: RetryPolicy,
}

impl ProviderConfig {
    /// Default request timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Default authority host.
    pub const DEFAULT_AUTHORITY: &'static str = "https://login.microsoftonline.com";

    /// Scope that makes the provider issue a refresh token.
    pub const OFFLINE_ACCESS_SCOPE: &'static str = "offline_access";

    /// Delegated calendar read scope.
    pub const CALENDAR_READ_SCOPE: &'static str = "Calendars.Read";

    /// Default application scope for the client-credentials grant.
    pub const DEFAULT_APP_SCOPE: &'static str = "https://graph.microsoft.com/.default";

    /// Creates a config with default endpoints and scopes.
    pub fn new(credentials: OAuthCredentials, redirect_uri: impl Into<String>) -> Self {
        Self {
            credentials,
            authority: Self::DEFAULT_AUTHORITY.to_string(),
            tenant: "common".to_string(),
            redirect_uri: redirect_uri.into(),
            scopes: vec![
                Self::OFFLINE_ACCESS_SCOPE.to_string(),
                Self::CALENDAR_READ_SCOPE.to_string(),
            ],
            app_scope: Self::DEFAULT_APP_SCOPE.to_string(),
            post_logout_redirect_uri: None,
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("todaymeet/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryPolicy::default(),
        }
    }

    /// Builder: set the authority host.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Builder: set the tenant.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    /// Builder: set the delegated scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Builder: set the post-logout redirect.
    pub fn with_post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.post_logout_redirect_uri = Some(uri.into());
        self
    }

    /// Builder: set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder: set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{}",
            self.authority.trim_end_matches('/'),
            self.tenant,
            name
        )
    }

    /// Authorization endpoint URL.
    pub fn authorize_endpoint(&self) -> String {
        self.endpoint("authorize")
    }

    /// Token endpoint URL.
    pub fn token_endpoint(&self) -> String {
        self.endpoint("token")
    }

    /// Sign-out endpoint URL.
    pub fn logout_endpoint(&self) -> String {
        self.endpoint("logout")
    }

    /// Space-separated scope parameter.
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Validates the configuration. Failures are fatal at startup.
    pub fn validate(&self) -> ProviderResult<()> {
        self.credentials.validate()?;

        if self.tenant.trim().is_empty() {
            return Err(ProviderError::configuration("tenant is required"));
        }
        url::Url::parse(&self.authority).map_err(|e| {
            ProviderError::configuration(format!("authority is not a valid URL: {}", e))
        })?;
        url::Url::parse(&self.redirect_uri).map_err(|e| {
            ProviderError::configuration(format!("redirect_uri is not a valid URL: {}", e))
        })?;
        if let Some(ref uri) = self.post_logout_redirect_uri {
            url::Url::parse(uri).map_err(|e| {
                ProviderError::configuration(format!(
                    "post_logout_redirect_uri is not a valid URL: {}",
                    e
                ))
            })?;
        }

        let has = |wanted: &str| self.scopes.iter().any(|s| s.eq_ignore_ascii_case(wanted));
        if !has(Self::OFFLINE_ACCESS_SCOPE) {
            return Err(ProviderError::configuration(
                "scopes must include offline_access, otherwise no refresh token is issued",
            ));
        }
        let reads_calendar = self.scopes.iter().any(|s| {
            let s = s.to_ascii_lowercase();
            s.ends_with("calendars.read") || s.ends_with("calendars.readwrite")
        });
        if !reads_calendar {
            return Err(ProviderError::configuration(
                "scopes must include a calendar read scope such as Calendars.Read",
            ));
        }
        if self.timeout.is_zero() {
            return Err(ProviderError::configuration("timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Settings for the Graph calendar client.
#[derive(Debug, Clone)]
pub struct CalendarConfig {
    /// Graph API base, e.g. `https://graph.microsoft.com/v1.0`.
    pub api_base: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Time zone used when a request does not name one.
    pub default_time_zone: String,
    /// `$top` page size.
    pub page_size: u32,
    /// Upper bound on followed `@odata.nextLink` pages.
    pub max_pages: u32,
    /// User-Agent header.
    pub user_agent: String,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            api_base: Self::DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(ProviderConfig::DEFAULT_TIMEOUT_SECS),
            default_time_zone: "UTC".to_string(),
            page_size: 50,
            max_pages: 20,
            user_agent: format!("todaymeet/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryPolicy::default(),
        }
    }
}

impl CalendarConfig {
    /// Default Graph API base.
    pub const DEFAULT_API_BASE: &'static str = "https://graph.microsoft.com/v1.0";

    /// Builder: set the API base.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Builder: set the default time zone.
    pub fn with_default_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.default_time_zone = tz.into();
        self
    }

    /// Builder: set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ProviderResult<()> {
        url::Url::parse(&self.api_base).map_err(|e| {
            ProviderError::configuration(format!("api_base is not a valid URL: {}", e))
        })?;
        if self.page_size == 0 || self.max_pages == 0 {
            return Err(ProviderError::configuration(
                "page_size and max_pages must be greater than zero",
            ));
        }
        Ok(())
    }
}
