//! Per-user session orchestration.
//!
//! A [`Session`] owns one token store and drives the login state machine:
//!
//! ```text
//! LoggedOut -> Authenticating -> Authenticated <-> Refreshing
//!                    |                                 |
//!                    +-----------> LoggedOut <---------+
//! ```
//!
//! Every protected call goes through [`Session::access_token`], which
//! classifies the stored token and refreshes it when it is no longer fresh.
//! At most one refresh exchange runs at a time per session: concurrent callers
//! queue on an async gate and, once inside, re-read the store so that only the
//! first of them talks to the provider. A caller whose wait overlapped a
//! finished exchange takes that exchange's outcome, failure included.
//!
//! Token writes run on the blocking pool, serialized per session, and never
//! under the state lock.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use todaymeet_core::{Event, TimeRange};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::freshness::{Freshness, FreshnessPolicy};
use crate::microsoft::{AuthorizationRequest, ProviderConfig, logout_url};
use crate::provider::{CalendarFetcher, TokenExchange};
use crate::secret::Secret;
use crate::store::TokenStore;
use crate::tokens::{AccessToken, AuthorizationGrant, TokenSet};
use crate::{Clock, system_clock};

/// Where a session is in the login lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No usable token set.
    LoggedOut,
    /// An authorization code is being exchanged.
    Authenticating,
    /// A token set is held.
    Authenticated,
    /// A refresh exchange is in flight.
    Refreshing,
}

impl SessionState {
    /// Returns a stable name for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        }
    }
}

/// What the browser may learn about a session.
///
/// Never carries the refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// True if a token set is held.
    pub is_authenticated: bool,
    /// Current access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<Secret>,
    /// Expiry of `access_token`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,
    /// Code of the last failure, cleared by the next success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<&'static str>,
}

/// Result of one background freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do: no token set is held.
    Idle,
    /// The token is still fresh.
    Fresh,
    /// The token was replaced.
    Refreshed,
    /// The refresh failed without ending the session.
    Failed(ProviderErrorCode),
    /// The provider rejected the refresh token; the session is logged out.
    LoggedOut,
}

struct Inner {
    state: SessionState,
    /// Bumped by login and logout; a refresh started under an older
    /// generation has its result discarded.
    generation: u64,
    pending_state: Option<String>,
    last_error: Option<ProviderErrorCode>,
    /// Completed refresh exchanges.
    refresh_attempts: u64,
    /// How the latest of them failed, if it did.
    last_refresh_failure: Option<(ProviderErrorCode, String)>,
}

/// One authenticated user in one browser context.
pub struct Session {
    provider: Arc<ProviderConfig>,
    exchange: Arc<dyn TokenExchange>,
    fetcher: Arc<dyn CalendarFetcher>,
    store: Arc<dyn TokenStore>,
    policy: FreshnessPolicy,
    clock: Clock,
    inner: Mutex<Inner>,
    refresh_gate: tokio::sync::Mutex<()>,
    persist_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session over `store`.
    ///
    /// A store that already holds a token set starts `Authenticated`.
    pub fn new(
        provider: Arc<ProviderConfig>,
        exchange: Arc<dyn TokenExchange>,
        fetcher: Arc<dyn CalendarFetcher>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let state = if store.load().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::LoggedOut
        };
        Self {
            provider,
            exchange,
            fetcher,
            store,
            policy: FreshnessPolicy::default(),
            clock: system_clock(),
            inner: Mutex::new(Inner {
                state,
                generation: 0,
                pending_state: None,
                last_error: None,
                refresh_attempts: 0,
                last_refresh_failure: None,
            }),
            refresh_gate: tokio::sync::Mutex::new(()),
            persist_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Builder: set the freshness policy.
    pub fn with_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder: set the clock used for freshness decisions.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// The freshness policy in force.
    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    /// Starts a login: returns the authorize URL and remembers its state.
    ///
    /// Starting a new login replaces any pending one.
    pub fn begin_login(&self) -> ProviderResult<String> {
        let request = AuthorizationRequest::new(&self.provider)?;
        self.lock().pending_state = Some(request.state);
        debug!("login started");
        Ok(request.url)
    }

    /// Abandons a pending login after the provider reported an error.
    pub fn cancel_login(&self, reason: &str) {
        let mut inner = self.lock();
        inner.pending_state = None;
        inner.last_error = Some(ProviderErrorCode::AccessDenied);
        warn!(reason, "login was not completed");
    }

    /// Completes a login with the code delivered to the callback.
    ///
    /// The grant's state must match the one issued by [`Session::begin_login`];
    /// a pending state is usable once. On any failure the grant is dropped and
    /// a previously held token set is left untouched.
    pub async fn complete_login(&self, grant: AuthorizationGrant) -> ProviderResult<()> {
        let generation = {
            let mut inner = self.lock();
            let expected = inner.pending_state.take();
            let matches = matches!(
                (expected.as_deref(), grant.state()),
                (Some(expected), Some(got)) if expected == got
            );
            if !matches {
                inner.last_error = Some(ProviderErrorCode::InvalidGrant);
                warn!("authorization callback state does not match a pending login");
                return Err(ProviderError::invalid_grant(
                    "authorization state does not match a pending login",
                ));
            }
            inner.state = SessionState::Authenticating;
            inner.generation += 1;
            inner.generation
        };

        let outcome = match self.exchange.exchange_authorization_code(grant).await {
            Ok(tokens) => self.persist(generation, tokens).await,
            Err(e) => Err(e),
        };

        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("login superseded while exchanging code, discarding tokens");
            return Err(ProviderError::not_authenticated(
                "session changed while the login was in progress",
            ));
        }

        match outcome {
            Ok(tokens) => {
                inner.state = SessionState::Authenticated;
                inner.last_error = None;
                info!(expires_at = %tokens.expires_at(), "login completed");
                Ok(())
            }
            Err(e) => {
                inner.state = if self.store.load().is_some() {
                    SessionState::Authenticated
                } else {
                    SessionState::LoggedOut
                };
                inner.last_error = Some(e.code());
                warn!(code = %e.code(), "login failed");
                Err(e)
            }
        }
    }

    /// Returns an access token that is fresh, refreshing first if needed.
    ///
    /// When a refresh fails transiently and the held token is merely
    /// expiring soon, the still-valid token is returned.
    pub async fn access_token(&self) -> ProviderResult<AccessToken> {
        let attempt = self.refresh_attempt();
        let current = self.load_tokens()?;
        let freshness = current.freshness(&self.policy, self.now());
        if freshness == Freshness::Fresh {
            return Ok(current.access());
        }

        debug!(?freshness, "access token needs refresh");
        match self.refresh_from(current.access_token(), false, attempt).await {
            Ok(token) => Ok(token),
            Err(e) if e.is_retryable() => {
                let held = self.load_tokens()?;
                if held.freshness(&self.policy, self.now()).is_valid() {
                    warn!(error = %e, "refresh failed, using still-valid access token");
                    Ok(held.access())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    fn refresh_attempt(&self) -> u64 {
        self.lock().refresh_attempts
    }

    /// Outcome of the latest exchange, if one completed after `attempt`.
    fn overlapping_outcome(&self, attempt: u64) -> Option<ProviderResult<()>> {
        let inner = self.lock();
        if inner.refresh_attempts == attempt {
            return None;
        }
        Some(match &inner.last_refresh_failure {
            Some((code, message)) => Err(ProviderError::new(*code, message.clone())),
            None => Ok(()),
        })
    }

    /// Saves `tokens` if the session is still at `generation`.
    ///
    /// A logout that lands while the file is written is honored by clearing
    /// the store again afterwards.
    async fn persist(&self, generation: u64, tokens: TokenSet) -> ProviderResult<TokenSet> {
        let superseded =
            || ProviderError::not_authenticated("session changed while saving tokens");
        let _persist = self.persist_gate.lock().await;
        if self.lock().generation != generation {
            return Err(superseded());
        }

        let store = self.store.clone();
        let tokens = tokio::task::spawn_blocking(move || store.save(&tokens).map(|()| tokens))
            .await
            .map_err(|e| ProviderError::internal(format!("token store task failed: {}", e)))??;

        if self.lock().generation != generation {
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "failed to clear tokens saved after logout");
            }
            return Err(superseded());
        }
        Ok(tokens)
    }

    fn load_tokens(&self) -> ProviderResult<TokenSet> {
        self.store
            .load()
            .ok_or_else(|| ProviderError::not_authenticated("no tokens held for this session"))
    }

    /// Single-flight refresh.
    ///
    /// `seen` is the access token the caller decided was unusable. If another
    /// caller replaced it while this one waited on the gate, the replacement is
    /// returned without a second exchange; if an exchange failed since
    /// `attempt` was read, its error is returned instead. `force` refreshes
    /// even a token that classifies as fresh (the resource API rejected it).
    async fn refresh_from(
        &self,
        seen: &Secret,
        force: bool,
        attempt: u64,
    ) -> ProviderResult<AccessToken> {
        let _gate = self.refresh_gate.lock().await;

        let current = self.load_tokens()?;
        let freshness = current.freshness(&self.policy, self.now());
        let replaced = current.access_token() != seen;
        if freshness == Freshness::Fresh && (replaced || !force) {
            debug!("access token already refreshed by another caller");
            return Ok(current.access());
        }
        match self.overlapping_outcome(attempt) {
            Some(Err(e)) => {
                debug!(code = %e.code(), "refresh failed while waiting, sharing its error");
                return Err(e);
            }
            Some(Ok(())) if freshness.is_valid() && !force => return Ok(current.access()),
            _ => {}
        }

        let generation = {
            let mut inner = self.lock();
            inner.state = SessionState::Refreshing;
            inner.generation
        };

        let outcome = match self.exchange.exchange_refresh_token(&current).await {
            Ok(tokens) => self.persist(generation, tokens).await,
            Err(e) => Err(e),
        };

        let mut inner = self.lock();
        inner.refresh_attempts += 1;
        inner.last_refresh_failure = outcome
            .as_ref()
            .err()
            .map(|e| (e.code(), e.message().to_string()));
        if inner.generation != generation {
            debug!("session changed during refresh, discarding result");
            return Err(ProviderError::not_authenticated(
                "session ended while refreshing",
            ));
        }

        match outcome {
            Ok(tokens) => {
                inner.state = SessionState::Authenticated;
                inner.last_error = None;
                Ok(tokens.access())
            }
            Err(e) if e.code() == ProviderErrorCode::InvalidGrant => {
                warn!("refresh token rejected, logging out");
                inner.generation += 1;
                inner.state = SessionState::LoggedOut;
                inner.last_error = Some(e.code());
                if let Err(clear_err) = self.store.clear() {
                    warn!(error = %clear_err, "failed to clear rejected tokens");
                }
                Err(e)
            }
            Err(e) => {
                inner.state = SessionState::Authenticated;
                inner.last_error = Some(e.code());
                warn!(code = %e.code(), error = %e, "refresh failed");
                Err(e)
            }
        }
    }

    /// Runs a protected call with a fresh access token.
    ///
    /// If the resource API answers `Unauthorized`, the token is refreshed
    /// once and the call retried once. A second `Unauthorized` is returned to
    /// the caller.
    pub async fn with_access_token<T, F, Fut>(&self, mut op: F) -> ProviderResult<T>
    where
        F: FnMut(AccessToken) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let token = self.access_token().await?;
        let attempt = self.refresh_attempt();
        match op(token.clone()).await {
            Err(e) if e.code() == ProviderErrorCode::Unauthorized => {
                warn!("access token rejected by resource API, refreshing once");
                let retry_token = self.refresh_from(token.secret(), true, attempt).await?;
                op(retry_token).await
            }
            other => other,
        }
    }

    /// Fetches the signed-in user's events for `range`.
    pub async fn fetch_events(&self, range: TimeRange, time_zone: &str) -> ProviderResult<Vec<Event>> {
        let fetcher = &self.fetcher;
        self.with_access_token(move |token| async move {
            fetcher.fetch_events_for_range(&token, range, time_zone).await
        })
        .await
    }

    /// Re-evaluates freshness without a pending user action.
    ///
    /// Transient failures never end the session.
    pub async fn tick(&self) -> TickOutcome {
        let attempt = self.refresh_attempt();
        let Some(current) = self.store.load() else {
            return TickOutcome::Idle;
        };
        if current.freshness(&self.policy, self.now()) == Freshness::Fresh {
            return TickOutcome::Fresh;
        }

        match self.refresh_from(current.access_token(), false, attempt).await {
            Ok(_) => TickOutcome::Refreshed,
            Err(e) if e.code() == ProviderErrorCode::InvalidGrant => TickOutcome::LoggedOut,
            Err(e) if e.code() == ProviderErrorCode::NotAuthenticated => TickOutcome::Idle,
            Err(e) => TickOutcome::Failed(e.code()),
        }
    }

    /// Time until the held token stops being fresh, if a token is held.
    ///
    /// Zero when it already needs a refresh.
    pub fn refresh_due_in(&self) -> Option<std::time::Duration> {
        let tokens = self.store.load()?;
        let due = tokens.expires_at() - self.policy.buffer() - self.now();
        Some(due.to_std().unwrap_or_default())
    }

    /// Ends the session and returns the provider sign-out URL.
    ///
    /// A refresh still in flight completes but its result is discarded.
    pub fn logout(&self) -> ProviderResult<String> {
        let url = logout_url(&self.provider)?;
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state = SessionState::LoggedOut;
        inner.pending_state = None;
        inner.last_error = None;
        self.store.clear()?;
        info!("logged out");
        Ok(url)
    }

    /// Snapshot for the status endpoint.
    pub fn status(&self) -> SessionStatus {
        let inner = self.lock();
        let tokens = self
            .store
            .load()
            .filter(|_| inner.state != SessionState::LoggedOut);
        SessionStatus {
            is_authenticated: tokens.is_some(),
            access_token: tokens.as_ref().map(|t| t.access_token().clone()),
            token_expiry: tokens.as_ref().map(TokenSet::expires_at),
            last_error: inner.last_error.map(|c| c.as_str()),
        }
    }
}
