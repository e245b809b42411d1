//! Access-token freshness classification.
//!
//! The buffer makes a token count as stale while it is still technically
//! valid, so a protected call is never issued with a token that can expire
//! while the request is in flight.

use chrono::{DateTime, Duration, Utc};

/// Default refresh buffer, in seconds.
pub const DEFAULT_BUFFER_SECS: i64 = 300;

/// How usable an access token is at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Use the token as-is.
    Fresh,
    /// Still valid, but within the buffer: refresh before the next call.
    ExpiringSoon,
    /// No longer honored by the provider.
    Expired,
}

impl Freshness {
    /// Returns true if the token should be refreshed before use.
    pub fn needs_refresh(&self) -> bool {
        !matches!(self, Self::Fresh)
    }

    /// Returns true if the provider would still accept the token.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Expired)
    }
}

/// Classifies a token expiring at `expires_at`, observed at `now`.
///
/// - `Expired` when `now >= expires_at`
/// - `ExpiringSoon` when `expires_at - now <= buffer`
/// - `Fresh` otherwise
pub fn classify(expires_at: DateTime<Utc>, now: DateTime<Utc>, buffer: Duration) -> Freshness {
    if now >= expires_at {
        Freshness::Expired
    } else if expires_at - now <= buffer {
        Freshness::ExpiringSoon
    } else {
        Freshness::Fresh
    }
}

/// A freshness policy with a fixed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    buffer: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_BUFFER_SECS))
    }
}

impl FreshnessPolicy {
    /// Creates a policy. Negative buffers are clamped to zero.
    pub fn new(buffer: Duration) -> Self {
        Self {
            buffer: buffer.max(Duration::zero()),
        }
    }

    /// Creates a policy from a std duration.
    pub fn from_std(buffer: std::time::Duration) -> Self {
        Self::new(Duration::from_std(buffer).unwrap_or(Duration::seconds(DEFAULT_BUFFER_SECS)))
    }

    /// The configured buffer.
    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    /// Classifies `expires_at` at `now`.
    pub fn classify(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
        classify(expires_at, now, self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn anything_at_or_past_expiry_is_expired() {
        let buffer = Duration::seconds(300);
        let expires_at = t0();
        for offset in [0, 1, 60, 3600, 86_400] {
            assert_eq!(
                classify(expires_at, expires_at + Duration::seconds(offset), buffer),
                Freshness::Expired,
                "offset {offset}"
            );
        }
    }

    #[test]
    fn anything_before_the_buffer_is_fresh() {
        let buffer = Duration::seconds(300);
        let expires_at = t0() + Duration::hours(1);
        let edge = expires_at - buffer;
        for back in [1, 2, 60, 3000] {
            assert_eq!(
                classify(expires_at, edge - Duration::seconds(back), buffer),
                Freshness::Fresh,
                "{back}s before the buffer"
            );
        }
    }

    #[test]
    fn issuance_scenario() {
        // expires_in = 3600 at T
        let issued = t0();
        let expires_at = issued + Duration::seconds(3600);
        let policy = FreshnessPolicy::default();

        assert_eq!(policy.classify(expires_at, issued + Duration::seconds(3299)), Freshness::Fresh);
        assert_eq!(
            policy.classify(expires_at, issued + Duration::seconds(3300)),
            Freshness::ExpiringSoon
        );
        assert_eq!(
            policy.classify(expires_at, issued + Duration::seconds(3301)),
            Freshness::ExpiringSoon
        );
        assert_eq!(
            policy.classify(expires_at, issued + Duration::seconds(3599)),
            Freshness::ExpiringSoon
        );
        assert_eq!(policy.classify(expires_at, issued + Duration::seconds(3600)), Freshness::Expired);
        assert_eq!(policy.classify(expires_at, issued + Duration::seconds(3601)), Freshness::Expired);
    }

    #[test]
    fn zero_buffer_never_expiring_soon() {
        let policy = FreshnessPolicy::new(Duration::zero());
        let expires_at = t0();
        assert_eq!(policy.classify(expires_at, expires_at - Duration::seconds(1)), Freshness::Fresh);
        assert_eq!(policy.classify(expires_at, expires_at), Freshness::Expired);
    }

    #[test]
    fn negative_buffer_is_clamped() {
        let policy = FreshnessPolicy::new(Duration::seconds(-10));
        assert_eq!(policy.buffer(), Duration::zero());
    }

    #[test]
    fn helpers() {
        assert!(!Freshness::Fresh.needs_refresh());
        assert!(Freshness::ExpiringSoon.needs_refresh());
        assert!(Freshness::ExpiringSoon.is_valid());
        assert!(!Freshness::Expired.is_valid());
    }
}
