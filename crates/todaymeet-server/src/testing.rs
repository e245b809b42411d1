//! Test doubles and fixtures shared by the server's unit tests.

use chrono::{Duration, Utc};
use todaymeet_core::{Event, TimeRange};
use todaymeet_providers::microsoft::{OAuthCredentials, ProviderConfig};
use todaymeet_providers::{
    AccessToken, AuthorizationGrant, BoxFuture, CalendarFetcher, ProviderError, ProviderResult,
    TokenExchange, TokenSet,
};

use crate::config::ServerConfig;
use crate::state::AppState;

/// Rejects every exchange.
pub struct FailingExchange;

impl TokenExchange for FailingExchange {
    fn exchange_authorization_code(
        &self,
        _grant: AuthorizationGrant,
    ) -> BoxFuture<'_, ProviderResult<TokenSet>> {
        Box::pin(async { Err(ProviderError::invalid_grant("test exchange")) })
    }

    fn exchange_refresh_token<'a>(
        &'a self,
        _current: &'a TokenSet,
    ) -> BoxFuture<'a, ProviderResult<TokenSet>> {
        Box::pin(async { Err(ProviderError::transient("test exchange")) })
    }

    fn exchange_client_credentials(&self) -> BoxFuture<'_, ProviderResult<AccessToken>> {
        Box::pin(async { Err(ProviderError::transient("test exchange")) })
    }
}

/// A calendar with no events.
pub struct EmptyFetcher;

impl CalendarFetcher for EmptyFetcher {
    fn fetch_events_for_range<'a>(
        &'a self,
        _token: &'a AccessToken,
        _range: TimeRange,
        _time_zone: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<Event>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn fetch_user_events_for_range<'a>(
        &'a self,
        _token: &'a AccessToken,
        _user_id: &'a str,
        _range: TimeRange,
        _time_zone: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<Event>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

pub fn provider_config(authority: &str) -> ProviderConfig {
    ProviderConfig::new(
        OAuthCredentials::new("client-1", "client-secret-1"),
        "http://localhost:8080/auth/callback",
    )
    .with_authority(authority)
}

/// A token set valid for an hour from now.
pub fn token_set(access: &str, refresh: &str) -> TokenSet {
    TokenSet::new(
        access,
        refresh,
        Utc::now(),
        Duration::seconds(3600),
        vec!["Calendars.Read".to_string()],
    )
    .unwrap()
}

/// Server config pointing both endpoints at `base` (a wiremock server).
pub fn server_config(base: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.provider.client_id = Some("client-1".to_string());
    config.provider.client_secret = Some("client-secret-1".to_string());
    config.provider.authority = base.to_string();
    config.provider.post_logout_redirect_uri = Some("http://localhost:8080/".to_string());
    config.calendar.api_base = format!("{}/v1.0", base);
    config
}

pub fn app_state(config: &ServerConfig) -> AppState {
    AppState::from_config(config).unwrap()
}
