//! OAuth token lifecycle and calendar access for todaymeet.
//!
//! - [`Session`] - per-user login state machine with single-flight refresh
//! - [`TokenStore`] - persistence of the access/refresh pair
//! - [`TokenExchange`] / [`CalendarFetcher`] - seams to the identity provider
//!   and the calendar API, implemented for Microsoft in [`microsoft`]
//! - [`refresher`] - background freshness checks, one task per session
//! - [`AppTokenProvider`] - cached client-credentials token
//!
//! # Architecture
//!
//! ```text
//!  callback / API request          background timer
//!           │                             │
//!           ▼                             ▼
//!     ┌───────────┐   classify   ┌──────────────────┐
//!     │  Session  │─────────────▶│ FreshnessPolicy  │
//!     └─────┬─────┘              └──────────────────┘
//!           │ load/save/clear
//!           ├────────────────▶ TokenStore
//!           │ code / refresh
//!           ├────────────────▶ TokenExchange ──▶ token endpoint
//!           │ bearer
//!           └────────────────▶ CalendarFetcher ──▶ calendarView
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub mod app_token;
pub mod error;
pub mod freshness;
pub mod microsoft;
pub mod provider;
pub mod refresher;
pub mod retry;
pub mod secret;
pub mod session;
pub mod store;
pub mod tokens;

pub use app_token::AppTokenProvider;
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use freshness::{DEFAULT_BUFFER_SECS, Freshness, FreshnessPolicy, classify};
pub use provider::{BoxFuture, CalendarFetcher, TokenExchange};
pub use refresher::{RefresherConfig, RefresherHandle};
pub use retry::RetryPolicy;
pub use secret::Secret;
pub use session::{Session, SessionState, SessionStatus, TickOutcome};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use tokens::{AccessToken, AuthorizationGrant, TokenResponse, TokenSet};

/// Source of the current instant.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The wall clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
