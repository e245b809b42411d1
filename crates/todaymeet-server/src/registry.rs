//! Session registry: one [`Session`] and one background refresher per
//! browser, keyed by the id carried in the session cookie.
//!
//! With a token directory configured, each session's tokens live in
//! `{token_dir}/{id}.json` and a session is restored from disk the first
//! time its id is seen after a restart.
//!
//! Entries are evicted by [`SessionRegistry::prune`]: pending logins after
//! `pending_ttl`, any session after `idle_timeout` without a request. Evicting
//! a file-backed session leaves its token file in place.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use todaymeet_providers::microsoft::ProviderConfig;
use todaymeet_providers::refresher::{self, RefresherConfig, RefresherHandle};
use todaymeet_providers::{
    CalendarFetcher, FileTokenStore, FreshnessPolicy, MemoryTokenStore, ProviderResult, Session,
    SessionState, TokenExchange, TokenStore,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared pieces every session is built from.
pub struct SessionFactory {
    pub provider: Arc<ProviderConfig>,
    pub exchange: Arc<dyn TokenExchange>,
    pub fetcher: Arc<dyn CalendarFetcher>,
    pub policy: FreshnessPolicy,
    pub refresher: RefresherConfig,
    pub token_dir: Option<PathBuf>,
    pub limits: SessionLimits,
}

/// When sessions leave the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Any session without a request for this long.
    pub idle_timeout: Duration,
    /// Logged-out sessions (logins started but not completed) after this long.
    pub pending_ttl: Duration,
    /// Logged-out sessions kept at once.
    pub max_pending: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(24 * 60 * 60),
            pending_ttl: Duration::from_secs(15 * 60),
            max_pending: 1024,
        }
    }
}

struct Entry {
    session: Arc<Session>,
    _refresher: RefresherHandle,
    created: Instant,
    last_seen: Mutex<Instant>,
}

impl Entry {
    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn is_pending(&self) -> bool {
        self.session.state() == SessionState::LoggedOut
    }
}

/// Live sessions by id.
pub struct SessionRegistry {
    factory: SessionFactory,
    sessions: RwLock<HashMap<String, Entry>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("token_dir", &self.factory.token_dir)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            factory,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Provider settings shared by all sessions.
    pub fn provider(&self) -> &ProviderConfig {
        &self.factory.provider
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no session is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a session, restoring it from the token directory if needed.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        if let Some(entry) = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            entry.touch();
            return Some(entry.session.clone());
        }

        let path = self.token_path(id)?;
        if !path.exists() {
            return None;
        }
        match self.insert(id.to_string()) {
            Ok(session) => {
                info!("restored session from token directory");
                Some(session)
            }
            Err(e) => {
                warn!(code = %e.code(), error = %e, "failed to restore session");
                None
            }
        }
    }

    /// Returns the session for `id`, or a new one under a fresh id.
    pub fn get_or_create(&self, id: Option<&str>) -> ProviderResult<(String, Arc<Session>)> {
        if let Some(id) = id
            && let Some(session) = self.get(id)
        {
            return Ok((id.to_string(), session));
        }
        self.evict_pending_over_cap();
        let id = Uuid::new_v4().to_string();
        let session = self.insert(id.clone())?;
        debug!(sessions = self.len(), "session created");
        Ok((id, session))
    }

    /// Drops a session and stops its refresher.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Drops pending logins older than `pending_ttl` and sessions idle for
    /// longer than `idle_timeout`. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let limits = self.factory.limits;
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, entry| {
            let expired_login = entry.is_pending() && entry.created.elapsed() >= limits.pending_ttl;
            !expired_login && entry.idle_for() < limits.idle_timeout
        });
        let pruned = before - sessions.len();
        if pruned > 0 {
            debug!(pruned, remaining = sessions.len(), "pruned idle sessions");
        }
        pruned
    }

    /// Makes room for one more pending login by dropping the oldest ones.
    fn evict_pending_over_cap(&self) {
        let max = self.factory.limits.max_pending;
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let mut pending: Vec<(Instant, String)> = sessions
            .iter()
            .filter(|(_, entry)| entry.is_pending())
            .map(|(id, entry)| (entry.created, id.clone()))
            .collect();
        if pending.len() < max {
            return;
        }
        pending.sort();
        let excess = pending.len() + 1 - max;
        for (_, id) in pending.into_iter().take(excess) {
            sessions.remove(&id);
        }
        warn!(evicted = excess, max, "too many pending logins, dropped the oldest");
    }

    /// Session ids are UUIDs; anything else never reaches the filesystem.
    fn token_path(&self, id: &str) -> Option<PathBuf> {
        let dir = self.factory.token_dir.as_ref()?;
        let id = Uuid::parse_str(id).ok()?;
        Some(dir.join(format!("{}.json", id.hyphenated())))
    }

    fn insert(&self, id: String) -> ProviderResult<Arc<Session>> {
        let store: Arc<dyn TokenStore> = match self.token_path(&id) {
            Some(path) => Arc::new(FileTokenStore::open(path)?),
            None => Arc::new(MemoryTokenStore::new()),
        };

        let factory = &self.factory;
        let session = Arc::new(
            Session::new(
                factory.provider.clone(),
                factory.exchange.clone(),
                factory.fetcher.clone(),
                store,
            )
            .with_policy(factory.policy),
        );
        let handle = refresher::spawn(session.clone(), factory.refresher.clone());

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        // Another request may have restored the same id meanwhile.
        let now = Instant::now();
        let entry = sessions.entry(id).or_insert(Entry {
            session,
            _refresher: handle,
            created: now,
            last_seen: Mutex::new(now),
        });
        Ok(entry.session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingExchange, EmptyFetcher, provider_config};

    fn registry(token_dir: Option<PathBuf>) -> SessionRegistry {
        registry_with(token_dir, SessionLimits::default())
    }

    fn registry_with(token_dir: Option<PathBuf>, limits: SessionLimits) -> SessionRegistry {
        SessionRegistry::new(SessionFactory {
            provider: Arc::new(provider_config("http://localhost:1")),
            exchange: Arc::new(FailingExchange),
            fetcher: Arc::new(EmptyFetcher),
            policy: FreshnessPolicy::default(),
            refresher: RefresherConfig::default(),
            token_dir,
            limits,
        })
    }

    #[tokio::test]
    async fn creates_and_reuses_sessions() {
        let registry = registry(None);
        let (id, first) = registry.get_or_create(None).unwrap();
        let (same_id, second) = registry.get_or_create(Some(&id)).unwrap();

        assert_eq!(id, same_id);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unknown_id_gets_a_new_session() {
        let registry = registry(None);
        let (id, _) = registry.get_or_create(Some("forged-id")).unwrap();
        assert_ne!(id, "forged-id");
        assert!(registry.get("forged-id").is_none());
    }

    #[tokio::test]
    async fn remove_and_prune_pending() {
        let registry = registry(None);
        let (id, _) = registry.get_or_create(None).unwrap();
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));

        registry.get_or_create(None).unwrap();
        assert_eq!(registry.prune(), 0);

        let registry = registry_with(
            None,
            SessionLimits {
                pending_ttl: Duration::ZERO,
                ..SessionLimits::default()
            },
        );
        registry.get_or_create(None).unwrap();
        assert_eq!(registry.prune(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn idle_authenticated_session_is_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4().to_string();
        let path = dir.path().join(format!("{}.json", id));
        FileTokenStore::open(&path)
            .unwrap()
            .save(&crate::testing::token_set("access-1", "refresh-1"))
            .unwrap();

        let limits = SessionLimits {
            idle_timeout: Duration::from_millis(50),
            ..SessionLimits::default()
        };
        let registry = registry_with(Some(dir.path().to_path_buf()), limits);
        let session = registry.get(&id).unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(registry.prune(), 0);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(registry.prune(), 1);
        assert!(registry.is_empty());
        // The token file survives and the session comes back on its next request.
        assert!(path.exists());
        assert!(registry.get(&id).is_some());
    }

    #[tokio::test]
    async fn requests_keep_a_session_alive() {
        let limits = SessionLimits {
            idle_timeout: Duration::from_millis(100),
            pending_ttl: Duration::from_secs(3600),
            ..SessionLimits::default()
        };
        let registry = registry_with(None, limits);
        let (id, _) = registry.get_or_create(None).unwrap();
        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(40));
            assert!(registry.get(&id).is_some());
            assert_eq!(registry.prune(), 0);
        }
    }

    #[tokio::test]
    async fn pending_logins_are_capped() {
        let limits = SessionLimits {
            max_pending: 3,
            ..SessionLimits::default()
        };
        let registry = registry_with(None, limits);
        let (oldest, _) = registry.get_or_create(None).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        for _ in 0..4 {
            registry.get_or_create(None).unwrap();
        }
        assert_eq!(registry.len(), 3);
        assert!(registry.get(&oldest).is_none());
    }

    #[tokio::test]
    async fn token_paths_only_for_uuids() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(Some(dir.path().to_path_buf()));

        assert!(registry.token_path("../../etc/passwd").is_none());
        let id = Uuid::new_v4().to_string();
        assert_eq!(
            registry.token_path(&id).unwrap(),
            dir.path().join(format!("{}.json", id))
        );
    }

    #[tokio::test]
    async fn restores_session_from_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4().to_string();
        let path = dir.path().join(format!("{}.json", id));
        FileTokenStore::open(&path)
            .unwrap()
            .save(&crate::testing::token_set("access-1", "refresh-1"))
            .unwrap();

        let registry = registry(Some(dir.path().to_path_buf()));
        let session = registry.get(&id).expect("restored");
        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(registry.get(&Uuid::new_v4().to_string()).is_none());
    }
}
