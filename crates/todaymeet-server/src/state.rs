//! Shared application state handed to every handler.

use std::sync::Arc;

use todaymeet_providers::AppTokenProvider;
use todaymeet_providers::microsoft::{GraphCalendarClient, HttpTokenExchange};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::registry::{SessionFactory, SessionRegistry};

/// Settings the handlers read on every request.
#[derive(Debug, Clone)]
pub struct WebSettings {
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub post_login_redirect: String,
    pub default_time_zone: String,
}

impl WebSettings {
    /// Where the browser lands after a failed login.
    pub fn login_failed_redirect(&self) -> String {
        let sep = if self.post_login_redirect.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}login=failed", self.post_login_redirect, sep)
    }
}

/// State shared by all routes.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    /// Present when `[app_access]` is configured.
    pub app_tokens: Option<Arc<AppTokenProvider>>,
    pub web: Arc<WebSettings>,
}

impl AppState {
    /// Builds the HTTP clients, the registry and the optional app-token cache.
    ///
    /// Configuration problems surface here, before the listener is bound.
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let (provider, calendar) = config.resolve()?;

        let exchange = Arc::new(HttpTokenExchange::new(provider.clone())?);
        let fetcher = Arc::new(GraphCalendarClient::new(calendar.clone())?);

        let app_tokens = config.app_access.as_ref().map(|_| {
            info!("application calendar access enabled");
            Arc::new(AppTokenProvider::new(exchange.clone(), fetcher.clone()))
        });

        let registry = SessionRegistry::new(SessionFactory {
            provider: Arc::new(provider),
            exchange,
            fetcher,
            policy: config.freshness_policy(),
            refresher: config.refresher_config(),
            token_dir: config.session.token_dir.clone(),
            limits: config.session_limits(),
        });

        Ok(Self {
            registry: Arc::new(registry),
            app_tokens,
            web: Arc::new(WebSettings {
                cookie_name: config.session.cookie_name.clone(),
                cookie_secure: config.session.cookie_secure,
                post_login_redirect: config.server.post_login_redirect.clone(),
                default_time_zone: calendar.default_time_zone,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_redirect_appends_marker() {
        let mut web = WebSettings {
            cookie_name: "sid".to_string(),
            cookie_secure: false,
            post_login_redirect: "/".to_string(),
            default_time_zone: "UTC".to_string(),
        };
        assert_eq!(web.login_failed_redirect(), "/?login=failed");

        web.post_login_redirect = "/app?tab=today".to_string();
        assert_eq!(web.login_failed_redirect(), "/app?tab=today&login=failed");
    }
}
