//! Seams between the session orchestrator and the identity/calendar backends.
//!
//! Both traits are object-safe and return boxed futures so the orchestrator can
//! hold them as `Arc<dyn ...>` and tests can swap in counting fakes.

use std::future::Future;
use std::pin::Pin;

use todaymeet_core::{Event, TimeRange};

use crate::error::ProviderResult;
use crate::tokens::{AccessToken, AuthorizationGrant, TokenSet};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The three OAuth grant exchanges against the token endpoint.
pub trait TokenExchange: Send + Sync {
    /// Trades a one-time authorization code for the first token set.
    ///
    /// Never retried: a code is single-use, so a second attempt would either
    /// be rejected or, worse, race the first.
    fn exchange_authorization_code(
        &self,
        grant: AuthorizationGrant,
    ) -> BoxFuture<'_, ProviderResult<TokenSet>>;

    /// Trades the refresh token in `current` for a replacement set.
    ///
    /// `InvalidGrant` means the refresh token is dead and the user must log
    /// in again.
    fn exchange_refresh_token<'a>(
        &'a self,
        current: &'a TokenSet,
    ) -> BoxFuture<'a, ProviderResult<TokenSet>>;

    /// Obtains an application token with the client-credentials grant.
    fn exchange_client_credentials(&self) -> BoxFuture<'_, ProviderResult<AccessToken>>;
}

/// Reads calendar events with an already-fresh access token.
pub trait CalendarFetcher: Send + Sync {
    /// Returns the signed-in user's events overlapping `range`, with times
    /// rendered in `time_zone`, ordered by start.
    fn fetch_events_for_range<'a>(
        &'a self,
        token: &'a AccessToken,
        range: TimeRange,
        time_zone: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<Event>>>;

    /// Returns another user's events, read with an application token.
    fn fetch_user_events_for_range<'a>(
        &'a self,
        token: &'a AccessToken,
        user_id: &'a str,
        range: TimeRange,
        time_zone: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<Event>>>;
}
