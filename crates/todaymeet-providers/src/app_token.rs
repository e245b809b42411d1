//! Application (client-credentials) token cache.
//!
//! Used for service-level calendar reads on behalf of the application rather
//! than a signed-in user. The token is cached until it leaves its fresh
//! window; a single async mutex keeps concurrent callers to one exchange.

use std::sync::Arc;

use todaymeet_core::{Event, TimeRange};
use tracing::{debug, warn};

use crate::error::{ProviderErrorCode, ProviderResult};
use crate::freshness::{Freshness, FreshnessPolicy};
use crate::provider::{CalendarFetcher, TokenExchange};
use crate::tokens::AccessToken;
use crate::{Clock, system_clock};

/// Caches and renews the application token.
pub struct AppTokenProvider {
    exchange: Arc<dyn TokenExchange>,
    fetcher: Arc<dyn CalendarFetcher>,
    policy: FreshnessPolicy,
    clock: Clock,
    cached: tokio::sync::Mutex<Option<AccessToken>>,
}

impl AppTokenProvider {
    /// Creates an empty cache.
    pub fn new(exchange: Arc<dyn TokenExchange>, fetcher: Arc<dyn CalendarFetcher>) -> Self {
        Self {
            exchange,
            fetcher,
            policy: FreshnessPolicy::default(),
            clock: system_clock(),
            cached: tokio::sync::Mutex::new(None),
        }
    }

    /// Builder: set the clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns a fresh application token.
    pub async fn token(&self) -> ProviderResult<AccessToken> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.freshness(&self.policy, (self.clock)()) == Freshness::Fresh
        {
            return Ok(token.clone());
        }

        debug!("requesting application token");
        let token = self.exchange.exchange_client_credentials().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drops the cached token.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Reads `user_id`'s events with the application token.
    ///
    /// A rejected token is dropped and the read retried once with a new one.
    pub async fn fetch_user_events(
        &self,
        user_id: &str,
        range: TimeRange,
        time_zone: &str,
    ) -> ProviderResult<Vec<Event>> {
        let token = self.token().await?;
        match self
            .fetcher
            .fetch_user_events_for_range(&token, user_id, range, time_zone)
            .await
        {
            Err(e) if e.code() == ProviderErrorCode::Unauthorized => {
                warn!("application token rejected, requesting a new one");
                self.invalidate().await;
                let token = self.token().await?;
                self.fetcher
                    .fetch_user_events_for_range(&token, user_id, range, time_zone)
                    .await
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for AppTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppTokenProvider")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BoxFuture;
    use crate::session::tests::{FakeFetcher, ManualClock};
    use crate::tokens::{AuthorizationGrant, TokenSet};
    use crate::ProviderError;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExchange {
        clock: ManualClock,
        calls: AtomicUsize,
    }

    impl TokenExchange for CountingExchange {
        fn exchange_authorization_code(
            &self,
            _grant: AuthorizationGrant,
        ) -> BoxFuture<'_, ProviderResult<TokenSet>> {
            Box::pin(async { Err(ProviderError::internal("unused")) })
        }

        fn exchange_refresh_token<'a>(
            &'a self,
            _current: &'a TokenSet,
        ) -> BoxFuture<'a, ProviderResult<TokenSet>> {
            Box::pin(async { Err(ProviderError::internal("unused")) })
        }

        fn exchange_client_credentials(&self) -> BoxFuture<'_, ProviderResult<AccessToken>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(AccessToken::new(
                    format!("app-{}", n),
                    self.clock.now() + Duration::seconds(3600),
                ))
            })
        }
    }

    fn provider(clock: &ManualClock) -> (AppTokenProvider, Arc<CountingExchange>) {
        let exchange = Arc::new(CountingExchange {
            clock: clock.clone(),
            calls: AtomicUsize::new(0),
        });
        let provider = AppTokenProvider::new(exchange.clone(), Arc::new(FakeFetcher::new()))
            .with_clock(clock.clock());
        (provider, exchange)
    }

    #[tokio::test]
    async fn caches_until_expiring() {
        let clock = ManualClock::new();
        let (provider, exchange) = provider(&clock);

        assert_eq!(provider.token().await.unwrap().secret().expose(), "app-1");
        assert_eq!(provider.token().await.unwrap().secret().expose(), "app-1");
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);

        clock.advance(3400);
        assert_eq!(provider.token().await.unwrap().secret().expose(), "app-2");
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_exchange() {
        let clock = ManualClock::new();
        let (provider, exchange) = provider(&clock);

        let (a, b) = tokio::join!(provider.token(), provider.token());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_new_token() {
        let clock = ManualClock::new();
        let (provider, exchange) = provider(&clock);

        provider.token().await.unwrap();
        provider.invalidate().await;
        provider.token().await.unwrap();
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn user_events_use_application_token() {
        let clock = ManualClock::new();
        let (provider, _) = provider(&clock);

        let events = provider
            .fetch_user_events("ada@example.com", TimeRange::day_of(clock.now()), "UTC")
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}
