//! Login, callback, status and logout handlers.
//!
//! The callback always answers with a redirect so that neither the
//! authorization code nor any token remains in the browser history.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use todaymeet_providers::microsoft::logout_url;
use todaymeet_providers::{AuthorizationGrant, SessionStatus};
use tracing::{debug, info, warn};

use super::{current_session, removal_cookie, session_cookie, session_id};
use crate::error::ServerResult;
use crate::state::AppState;

/// GET /auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ServerResult<(CookieJar, Redirect)> {
    let existing = session_id(&jar, &state.web);
    let (id, session) = state.registry.get_or_create(existing.as_deref())?;
    let url = session.begin_login()?;
    debug!("redirecting to authorize endpoint");
    Ok((jar.add(session_cookie(&state.web, id)), Redirect::to(&url)))
}

/// Query parameters delivered to the callback.
///
/// No `Debug`: `code` is a credential.
#[derive(Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /auth/callback
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let failed = || Redirect::to(&state.web.login_failed_redirect());

    let Some((_, session)) = current_session(&state, &jar) else {
        warn!("authorization callback without a known session");
        return failed();
    };

    if let Some(error) = params.error {
        debug!(
            description = params.error_description.as_deref().unwrap_or_default(),
            "provider returned an error to the callback"
        );
        session.cancel_login(&error);
        return failed();
    }
    let Some(code) = params.code else {
        session.cancel_login("callback carried neither code nor error");
        return failed();
    };

    match session
        .complete_login(AuthorizationGrant::new(code, params.state))
        .await
    {
        Ok(()) => {
            info!("login completed");
            Redirect::to(&state.web.post_login_redirect)
        }
        Err(e) => {
            warn!(code = %e.code(), "login failed");
            failed()
        }
    }
}

/// GET /auth/status
pub async fn status(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let status = current_session(&state, &jar)
        .map(|(_, session)| session.status())
        .unwrap_or(SessionStatus {
            is_authenticated: false,
            access_token: None,
            token_expiry: None,
            last_error: None,
        });
    ([(header::CACHE_CONTROL, "no-store")], Json(status))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub logout_url: String,
}

/// Query of `POST /auth/logout`.
#[derive(Debug, Default, Deserialize)]
pub struct LogoutParams {
    /// Answer with a 303 to the provider sign-out page instead of JSON.
    #[serde(default)]
    redirect: bool,
}

/// POST /auth/logout
///
/// Only `POST` ends a session; a cross-site navigation never carries the
/// `SameSite=Lax` cookie on a `POST`.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<LogoutParams>,
) -> ServerResult<(CookieJar, Response)> {
    let logout_url = end_session(&state, &jar)?;
    let body = if params.redirect {
        Redirect::to(&logout_url).into_response()
    } else {
        Json(LogoutResponse { logout_url }).into_response()
    };
    Ok((jar.remove(removal_cookie(&state.web)), body))
}

fn end_session(state: &AppState, jar: &CookieJar) -> ServerResult<String> {
    match current_session(state, jar) {
        Some((id, session)) => {
            let url = session.logout()?;
            state.registry.remove(&id);
            Ok(url)
        }
        None => Ok(logout_url(state.registry.provider())?),
    }
}
