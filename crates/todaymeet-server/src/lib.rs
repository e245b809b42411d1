//! Web surface for todaymeet.
//!
//! Hosts the browser login flow, keeps one token session per browser and
//! serves the signed-in user's calendar as JSON. Refresh tokens stay on the
//! server; the browser only ever holds an opaque session cookie.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod registry;
pub mod routes;
pub mod secret;
pub mod signals;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use state::AppState;
