//! HTTP routes.
//!
//! ```text
//! GET  /healthz
//! GET  /auth/login                 303 to the authorize endpoint
//! GET  /auth/callback              303 to the post-login page
//! GET  /auth/status                session status JSON
//! POST /auth/logout                { "logoutUrl": ... }
//! POST /auth/logout?redirect=true  303 to the provider sign-out page
//! GET  /api/events                 signed-in user's events
//! GET  /api/users/{user_id}/events application-token read, if enabled
//! ```

pub mod auth;
pub mod events;
pub mod health;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use todaymeet_providers::Session;

use crate::state::{AppState, WebSettings};

/// Builds the router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .merge(auth_routes())
        .merge(api_routes())
        .with_state(state)
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/status", get(auth::status))
        .route("/auth/logout", post(auth::logout))
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/events", get(events::my_events))
        .route("/api/users/{user_id}/events", get(events::user_events))
}

fn session_id(jar: &CookieJar, web: &WebSettings) -> Option<String> {
    jar.get(&web.cookie_name).map(|c| c.value().to_string())
}

fn current_session(state: &AppState, jar: &CookieJar) -> Option<(String, Arc<Session>)> {
    let id = session_id(jar, &state.web)?;
    let session = state.registry.get(&id)?;
    Some((id, session))
}

/// The session cookie: HttpOnly, SameSite=Lax, `Secure` when configured.
fn session_cookie(web: &WebSettings, id: String) -> Cookie<'static> {
    Cookie::build((web.cookie_name.clone(), id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(web.cookie_secure)
        .build()
}

fn removal_cookie(web: &WebSettings) -> Cookie<'static> {
    Cookie::build((web.cookie_name.clone(), String::new()))
        .path("/")
        .build()
}
