//! Server configuration.
//!
//! All settings live in a single `config.toml`, by default at
//! `~/.config/todaymeet/config.toml`:
//!
//! ```toml
//! [provider]
//! client_id = "00000000-0000-0000-0000-000000000000"
//! client_secret = "env::TODAYMEET_CLIENT_SECRET"
//! tenant = "common"
//! redirect_uri = "http://localhost:8080/auth/callback"
//!
//! [session]
//! refresh_interval_secs = 300
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```
//!
//! `client_id` and `client_secret` accept `env::` and `pass::` references
//! (see [`crate::secret`]).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use todaymeet_providers::microsoft::{
    CalendarConfig, OAuthCredentials, ProviderConfig, is_valid_time_zone,
};
use todaymeet_providers::tokens::MAX_TOKEN_LIFETIME_SECS;
use todaymeet_providers::{DEFAULT_BUFFER_SECS, FreshnessPolicy, ProviderError, RefresherConfig};

use crate::registry::SessionLimits;
use crate::secret::{self, SecretRefError};

/// Errors raised while loading or checking the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("[provider] {0} is required")]
    Missing(&'static str),

    #[error("failed to resolve {field}: {source}")]
    SecretRef {
        field: &'static str,
        #[source]
        source: SecretRefError,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identity provider settings.
    pub provider: ProviderSettings,

    /// Graph calendar settings.
    pub calendar: CalendarSettings,

    /// Per-user session settings.
    pub session: SessionSettings,

    /// HTTP listener settings.
    pub server: HttpSettings,

    /// Application-level calendar reads. Disabled when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_access: Option<AppAccessSettings>,
}

/// `[provider]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Application (client) ID, or a secret reference.
    pub client_id: Option<String>,
    /// Client secret, or a secret reference.
    pub client_secret: Option<String>,
    pub authority: String,
    pub tenant: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub post_logout_redirect_uri: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            authority: ProviderConfig::DEFAULT_AUTHORITY.to_string(),
            tenant: "common".to_string(),
            redirect_uri: "http://localhost:8080/auth/callback".to_string(),
            scopes: vec![
                ProviderConfig::OFFLINE_ACCESS_SCOPE.to_string(),
                ProviderConfig::CALENDAR_READ_SCOPE.to_string(),
            ],
            post_logout_redirect_uri: None,
            timeout_secs: ProviderConfig::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// `[calendar]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    pub api_base: String,
    /// Time zone used when `/api/events` is called without `tz`.
    pub default_time_zone: String,
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        let defaults = CalendarConfig::default();
        Self {
            api_base: defaults.api_base,
            default_time_zone: defaults.default_time_zone,
            page_size: defaults.page_size,
            max_pages: defaults.max_pages,
        }
    }
}

/// `[session]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Seconds before expiry at which a token counts as expiring.
    pub buffer_secs: i64,
    /// Base interval of the background refresher.
    pub refresh_interval_secs: u64,
    /// Directory for per-session token files. Tokens stay in memory when unset.
    pub token_dir: Option<PathBuf>,
    pub cookie_name: String,
    /// Mark the session cookie `Secure`. Enable behind HTTPS.
    pub cookie_secure: bool,
    /// Signed-in sessions unused for this long are dropped from memory.
    pub idle_timeout_secs: u64,
    /// Lifetime of a login that was started but never completed.
    pub pending_login_ttl_secs: u64,
    /// Upper bound on logins in flight at once; the oldest is evicted first.
    pub max_pending_logins: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            buffer_secs: DEFAULT_BUFFER_SECS,
            refresh_interval_secs: 300,
            token_dir: None,
            cookie_name: "todaymeet_session".to_string(),
            cookie_secure: false,
            idle_timeout_secs: 24 * 60 * 60,
            pending_login_ttl_secs: 15 * 60,
            max_pending_logins: 1024,
        }
    }
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub bind: String,
    /// Where the callback sends the browser once the login is handled.
    pub post_login_redirect: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            post_login_redirect: "/".to_string(),
        }
    }
}

/// `[app_access]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppAccessSettings {
    /// Scope for the client-credentials grant.
    pub scope: String,
}

impl Default for AppAccessSettings {
    fn default() -> Self {
        Self {
            scope: ProviderConfig::DEFAULT_APP_SCOPE.to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads the default config file, or defaults when it does not exist.
    pub fn load() -> ConfigResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads a specific config file.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("todaymeet")
    }

    /// Builds the provider configuration, resolving credential references.
    pub fn to_provider_config(&self) -> ConfigResult<ProviderConfig> {
        let settings = &self.provider;
        let raw_id = settings
            .client_id
            .as_deref()
            .ok_or(ConfigError::Missing("client_id"))?;
        let raw_secret = settings
            .client_secret
            .as_deref()
            .ok_or(ConfigError::Missing("client_secret"))?;

        let client_id = secret::resolve(raw_id).map_err(|source| ConfigError::SecretRef {
            field: "client_id",
            source,
        })?;
        let client_secret = secret::resolve(raw_secret).map_err(|source| {
            ConfigError::SecretRef {
                field: "client_secret",
                source,
            }
        })?;

        let credentials = OAuthCredentials::new(client_id.expose(), client_secret);
        let mut config = ProviderConfig::new(credentials, &settings.redirect_uri)
            .with_authority(&settings.authority)
            .with_tenant(&settings.tenant)
            .with_scopes(settings.scopes.clone())
            .with_timeout(Duration::from_secs(settings.timeout_secs));
        if let Some(uri) = &settings.post_logout_redirect_uri {
            config = config.with_post_logout_redirect_uri(uri);
        }
        if let Some(app) = &self.app_access {
            config.app_scope = app.scope.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Builds the Graph client configuration.
    pub fn to_calendar_config(&self) -> ConfigResult<CalendarConfig> {
        let settings = &self.calendar;
        if !is_valid_time_zone(&settings.default_time_zone) {
            return Err(ConfigError::Invalid(format!(
                "[calendar] default_time_zone `{}` is not a valid time zone",
                settings.default_time_zone
            )));
        }

        let mut config = CalendarConfig::default()
            .with_api_base(&settings.api_base)
            .with_default_time_zone(&settings.default_time_zone);
        config.page_size = settings.page_size;
        config.max_pages = settings.max_pages;
        config.timeout = Duration::from_secs(self.provider.timeout_secs);

        config.validate()?;
        Ok(config)
    }

    /// Freshness policy for every session.
    pub fn freshness_policy(&self) -> FreshnessPolicy {
        chrono::Duration::try_seconds(self.session.buffer_secs)
            .map(FreshnessPolicy::new)
            .unwrap_or_default()
    }

    /// Eviction limits for the session registry.
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            pending_ttl: Duration::from_secs(self.session.pending_login_ttl_secs),
            max_pending: self.session.max_pending_logins,
        }
    }

    /// Background refresher timing.
    pub fn refresher_config(&self) -> RefresherConfig {
        RefresherConfig::new(Duration::from_secs(self.session.refresh_interval_secs))
    }

    /// Parses the listen address.
    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        self.server.bind.parse().map_err(|e| {
            ConfigError::Invalid(format!("[server] bind `{}`: {}", self.server.bind, e))
        })
    }

    /// Checks everything the server needs at startup.
    ///
    /// Resolves credential references, so `pass::` entries are read.
    pub fn validate(&self) -> ConfigResult<()> {
        self.resolve().map(|_| ())
    }

    /// Validates and builds the provider and calendar configurations.
    pub fn resolve(&self) -> ConfigResult<(ProviderConfig, CalendarConfig)> {
        let provider = self.to_provider_config()?;
        let calendar = self.to_calendar_config()?;
        self.bind_addr()?;

        if !(0..=MAX_TOKEN_LIFETIME_SECS).contains(&self.session.buffer_secs) {
            return Err(ConfigError::Invalid(format!(
                "[session] buffer_secs must be between 0 and {}",
                MAX_TOKEN_LIFETIME_SECS
            )));
        }
        if self.session.idle_timeout_secs == 0 || self.session.pending_login_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "[session] idle_timeout_secs and pending_login_ttl_secs must be greater than zero"
                    .to_string(),
            ));
        }
        if self.session.max_pending_logins == 0 {
            return Err(ConfigError::Invalid(
                "[session] max_pending_logins must be greater than zero".to_string(),
            ));
        }
        if self.session.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "[session] refresh_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "[session] cookie_name must not be empty".to_string(),
            ));
        }
        let redirect = &self.server.post_login_redirect;
        if !redirect.starts_with('/') || redirect.starts_with("//") {
            return Err(ConfigError::Invalid(
                "[server] post_login_redirect must be a local path".to_string(),
            ));
        }
        Ok((provider, calendar))
    }

    /// Renders the configuration as TOML with a literal client secret masked.
    ///
    /// Secret references are shown as written.
    pub fn to_redacted_toml(&self) -> ConfigResult<String> {
        let mut copy = self.clone();
        if let Some(value) = copy.provider.client_secret.as_mut()
            && !secret::is_reference(value)
        {
            *value = "[redacted]".to_string();
        }
        Ok(toml::to_string_pretty(&copy)?)
    }
}
