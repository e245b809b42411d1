//! Microsoft identity platform and Microsoft Graph backends.
//!
//! - [`HttpTokenExchange`] talks to `{authority}/{tenant}/oauth2/v2.0/token`
//! - [`GraphCalendarClient`] reads `/me/calendarView` and `/users/{id}/calendarView`
//! - [`AuthorizationRequest`] and [`logout_url`] build browser redirects
//!
//! # Example
//!
//! ```ignore
//! use todaymeet_providers::microsoft::{HttpTokenExchange, OAuthCredentials, ProviderConfig};
//!
//! let config = ProviderConfig::new(
//!     OAuthCredentials::new(client_id, client_secret),
//!     "http://localhost:3000/auth/callback",
//! )
//! .with_tenant("contoso.onmicrosoft.com");
//! config.validate()?;
//!
//! let exchange = HttpTokenExchange::new(config)?;
//! ```

mod client;
mod config;
mod oauth;

pub use client::{GraphCalendarClient, is_valid_time_zone};
pub use config::{CalendarConfig, OAuthCredentials, ProviderConfig};
pub use oauth::{AuthorizationRequest, HttpTokenExchange, generate_state, logout_url};
