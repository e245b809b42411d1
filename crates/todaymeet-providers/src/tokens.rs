//! OAuth token model.
//!
//! A [`TokenSet`] is the unit of persisted auth state: an access/refresh pair
//! and the absolute instant the access token stops being honored. The pair is
//! only ever built, replaced and cleared as a whole.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};
use crate::freshness::{Freshness, FreshnessPolicy};
use crate::secret::Secret;

/// Longest access-token lifetime accepted from the provider (one year).
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

/// Response body of the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The new access token.
    pub access_token: Secret,
    /// Present on the code grant; on refresh only when the provider rotates it.
    #[serde(default)]
    pub refresh_token: Option<Secret>,
    /// Lifetime of the access token, in seconds from issuance.
    pub expires_in: i64,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// Usually `Bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Granted scopes, split on whitespace.
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn lifetime(&self) -> ProviderResult<Duration> {
        if !(1..=MAX_TOKEN_LIFETIME_SECS).contains(&self.expires_in) {
            return Err(ProviderError::invalid_response(format!(
                "token response has out-of-range expires_in ({})",
                self.expires_in
            )));
        }
        Duration::try_seconds(self.expires_in)
            .ok_or_else(|| ProviderError::invalid_response("token lifetime overflows"))
    }
}

fn expiry(issued_at: DateTime<Utc>, lifetime: Duration) -> ProviderResult<DateTime<Utc>> {
    issued_at
        .checked_add_signed(lifetime)
        .ok_or_else(|| ProviderError::invalid_response("token expiry is out of range"))
}

/// An access token handed to downstream API calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: Secret,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Creates an access token.
    pub fn new(token: impl Into<Secret>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Builds an access token from a client-credentials response.
    pub fn from_response(response: &TokenResponse, issued_at: DateTime<Utc>) -> ProviderResult<Self> {
        if response.access_token.is_blank() {
            return Err(ProviderError::invalid_response("token response has an empty access_token"));
        }
        Ok(Self::new(
            response.access_token.clone(),
            expiry(issued_at, response.lifetime()?)?,
        ))
    }

    /// The bearer credential.
    pub fn secret(&self) -> &Secret {
        &self.token
    }

    /// When the provider stops honoring this token.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Classifies this token at `now`.
    pub fn freshness(&self, policy: &FreshnessPolicy, now: DateTime<Utc>) -> Freshness {
        policy.classify(self.expires_at, now)
    }
}

/// The persisted access/refresh pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    access_token: Secret,
    refresh_token: Secret,
    expires_at: DateTime<Utc>,
    issued_at: DateTime<Utc>,
    #[serde(default)]
    scopes: Vec<String>,
}

impl TokenSet {
    /// Creates a token set issued at `issued_at` and valid for `lifetime`.
    ///
    /// Fails if either half is blank.
    pub fn new(
        access_token: impl Into<Secret>,
        refresh_token: impl Into<Secret>,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
        scopes: Vec<String>,
    ) -> ProviderResult<Self> {
        let set = Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: expiry(issued_at, lifetime)?,
            issued_at,
            scopes,
        };
        set.validate()?;
        Ok(set)
    }

    /// Builds the first token set from an authorization-code response.
    ///
    /// The code grant must return a refresh token; without one the session
    /// could never be renewed.
    pub fn from_code_response(
        response: TokenResponse,
        issued_at: DateTime<Utc>,
    ) -> ProviderResult<Self> {
        let lifetime = response.lifetime()?;
        let scopes = response.scopes();
        let refresh_token = response.refresh_token.ok_or_else(|| {
            ProviderError::invalid_response(
                "no refresh token returned; is offline_access among the requested scopes?",
            )
        })?;
        Self::new(response.access_token, refresh_token, issued_at, lifetime, scopes)
            .map_err(|e| ProviderError::invalid_response(e.message().to_string()))
    }

    /// Builds the replacement set after a refresh.
    ///
    /// A response without `refresh_token` keeps the current one; the access
    /// token and expiry are always replaced.
    pub fn refreshed(&self, response: TokenResponse, issued_at: DateTime<Utc>) -> ProviderResult<Self> {
        let lifetime = response.lifetime()?;
        let scopes = match response.scopes() {
            granted if granted.is_empty() => self.scopes.clone(),
            granted => granted,
        };
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_blank())
            .unwrap_or_else(|| self.refresh_token.clone());
        Self::new(response.access_token, refresh_token, issued_at, lifetime, scopes)
            .map_err(|e| ProviderError::invalid_response(e.message().to_string()))
    }

    /// Checks that both halves are present.
    pub fn validate(&self) -> ProviderResult<()> {
        if self.access_token.is_blank() {
            return Err(ProviderError::storage("token set has an empty access token"));
        }
        if self.refresh_token.is_blank() {
            return Err(ProviderError::storage("token set has an empty refresh token"));
        }
        if self.expires_at <= self.issued_at {
            return Err(ProviderError::storage("token set expires before it was issued"));
        }
        Ok(())
    }

    /// The access half, as handed to API calls.
    pub fn access(&self) -> AccessToken {
        AccessToken::new(self.access_token.clone(), self.expires_at)
    }

    /// The bearer credential.
    pub fn access_token(&self) -> &Secret {
        &self.access_token
    }

    /// The refresh credential. Only the exchange client should read this.
    pub fn refresh_token(&self) -> &Secret {
        &self.refresh_token
    }

    /// When the access token stops being honored.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// When this set was obtained.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Granted scopes.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns true if every scope in `required` was granted.
    ///
    /// Scope comparison is case-insensitive; an empty grant list (provider
    /// did not report scopes) is treated as satisfying anything.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        self.scopes.is_empty()
            || required
                .iter()
                .all(|r| self.scopes.iter().any(|s| s.eq_ignore_ascii_case(r)))
    }

    /// Time left until expiry at `now`; negative once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Classifies the access token at `now`.
    pub fn freshness(&self, policy: &FreshnessPolicy, now: DateTime<Utc>) -> Freshness {
        policy.classify(self.expires_at, now)
    }
}

/// A one-time authorization code delivered to the callback endpoint.
///
/// Not `Clone`: the only way to use a grant is to move it into an exchange,
/// so it cannot be replayed by this process.
#[derive(Debug)]
pub struct AuthorizationGrant {
    code: Secret,
    state: Option<String>,
}

impl AuthorizationGrant {
    /// Creates a grant from the callback's `code` and `state` parameters.
    pub fn new(code: impl Into<Secret>, state: Option<String>) -> Self {
        Self {
            code: code.into(),
            state,
        }
    }

    /// The CSRF state echoed by the provider.
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    /// Consumes the grant, yielding the code.
    pub fn into_code(self) -> Secret {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap()
    }

    fn response(json: &str) -> TokenResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn expiry_is_issuance_plus_lifetime() {
        let set = TokenSet::from_code_response(
            response(r#"{"access_token":"a1","refresh_token":"r1","expires_in":3600}"#),
            t0(),
        )
        .unwrap();
        assert_eq!(set.expires_at(), t0() + Duration::seconds(3600));
        assert_eq!(set.issued_at(), t0());
    }

    #[test]
    fn code_response_requires_refresh_token() {
        let err = TokenSet::from_code_response(
            response(r#"{"access_token":"a1","expires_in":3600}"#),
            t0(),
        )
        .unwrap_err();
        assert_eq!(err.code(), crate::ProviderErrorCode::InvalidResponse);
    }

    #[test]
    fn refresh_without_rotation_keeps_refresh_token() {
        let first = TokenSet::new("a1", "r1", t0(), Duration::seconds(3600), vec![]).unwrap();
        let later = t0() + Duration::seconds(3400);
        let next = first
            .refreshed(
                response(r#"{"access_token":"a2","expires_in":3600}"#),
                later,
            )
            .unwrap();

        assert_eq!(next.access_token().expose(), "a2");
        assert_eq!(next.refresh_token().expose(), "r1");
        assert_eq!(next.expires_at(), later + Duration::seconds(3600));
    }

    #[test]
    fn refresh_with_rotation_replaces_refresh_token() {
        let first = TokenSet::new("a1", "r1", t0(), Duration::seconds(3600), vec![]).unwrap();
        let next = first
            .refreshed(
                response(r#"{"access_token":"a2","refresh_token":"r2","expires_in":1800}"#),
                t0(),
            )
            .unwrap();
        assert_eq!(next.refresh_token().expose(), "r2");
    }

    #[test]
    fn partial_sets_are_rejected() {
        assert!(TokenSet::new("", "r1", t0(), Duration::seconds(60), vec![]).is_err());
        assert!(TokenSet::new("a1", " ", t0(), Duration::seconds(60), vec![]).is_err());
        assert!(TokenSet::new("a1", "r1", t0(), Duration::zero(), vec![]).is_err());
    }

    #[test]
    fn non_positive_lifetime_is_invalid_response() {
        let err = TokenSet::from_code_response(
            response(r#"{"access_token":"a1","refresh_token":"r1","expires_in":0}"#),
            t0(),
        )
        .unwrap_err();
        assert_eq!(err.code(), crate::ProviderErrorCode::InvalidResponse);
    }

    #[test]
    fn oversized_lifetime_is_invalid_response() {
        let err = TokenSet::from_code_response(
            response(
                r#"{"access_token":"a","refresh_token":"r","expires_in":100000000000000}"#,
            ),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), crate::ProviderErrorCode::InvalidResponse);

        let app = AccessToken::from_response(
            &response(r#"{"access_token":"a","expires_in":9223372036854775807}"#),
            t0(),
        )
        .unwrap_err();
        assert_eq!(app.code(), crate::ProviderErrorCode::InvalidResponse);

        let year = format!(
            r#"{{"access_token":"a","refresh_token":"r","expires_in":{}}}"#,
            MAX_TOKEN_LIFETIME_SECS
        );
        assert!(TokenSet::from_code_response(response(&year), t0()).is_ok());
    }

    #[test]
    fn expiry_past_the_calendar_end_is_rejected() {
        let err = TokenSet::new("a", "r", DateTime::<Utc>::MAX_UTC, Duration::seconds(60), vec![])
            .unwrap_err();
        assert_eq!(err.code(), crate::ProviderErrorCode::InvalidResponse);
    }

    #[test]
    fn scopes_are_parsed_and_matched() {
        let set = TokenSet::from_code_response(
            response(
                r#"{"access_token":"a","refresh_token":"r","expires_in":60,
                    "scope":"Calendars.Read offline_access"}"#,
            ),
            t0(),
        )
        .unwrap();
        assert_eq!(set.scopes(), &["Calendars.Read".to_string(), "offline_access".to_string()]);
        assert!(set.has_scopes(&["calendars.read".to_string()]));
        assert!(!set.has_scopes(&["Mail.Read".to_string()]));
    }

    #[test]
    fn debug_output_never_contains_tokens() {
        let set = TokenSet::new("access-xyz", "refresh-xyz", t0(), Duration::seconds(60), vec![])
            .unwrap();
        let rendered = format!("{:?}", set);
        assert!(!rendered.contains("access-xyz"));
        assert!(!rendered.contains("refresh-xyz"));
    }

    #[test]
    fn grant_yields_code_once() {
        let grant = AuthorizationGrant::new("code-1", Some("st".to_string()));
        assert_eq!(grant.state(), Some("st"));
        assert_eq!(grant.into_code().expose(), "code-1");
    }
}
