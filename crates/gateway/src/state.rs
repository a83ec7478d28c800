//! Shared application state and the in-memory session store

use clinicheck_common::config::AppConfig;
use clinicheck_common::errors::{AppError, Result};
use clinicheck_common::Reasoner;
use clinicheck_context::{Analyzer, Session};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Default maximum number of live sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Default idle time after which a session expires (1 hour)
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub reasoner: Arc<dyn Reasoner>,
    pub analyzer: Arc<Analyzer>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: AppConfig, reasoner: Arc<dyn Reasoner>) -> Self {
        let analyzer = Analyzer::new(reasoner.clone(), &config);
        let sessions = SessionStore::with_limits(config.server.max_sessions, config.session_ttl());
        Self {
            config: Arc::new(config),
            reasoner,
            analyzer: Arc::new(analyzer),
            sessions: Arc::new(sessions),
        }
    }

    /// Create and register a new session
    pub async fn new_session(&self) -> Arc<SessionEntry> {
        let session = Session::new_session(self.reasoner.clone(), self.config.reasoner_timeout());
        self.sessions.insert(session).await
    }
}

/// A session plus the cancellation handle of its in-flight request.
///
/// Requests are serialized by the async mutex; the token lives outside it so
/// a cancel never waits for the request it cancels.
pub struct SessionEntry {
    pub id: Uuid,
    pub session: Mutex<Session>,
    inflight: StdMutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            id: session.id(),
            session: Mutex::new(session),
            inflight: StdMutex::new(None),
        }
    }

    /// Register a fresh token for the request about to run
    pub fn start_request(&self) -> InflightRequest<'_> {
        let token = CancellationToken::new();
        *self.lock_inflight() = Some(token.clone());
        InflightRequest { entry: self, token }
    }

    /// Cancel the in-flight request. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match self.lock_inflight().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the entry's token when the request ends, however it ends
pub struct InflightRequest<'a> {
    entry: &'a SessionEntry,
    pub token: CancellationToken,
}

impl Drop for InflightRequest<'_> {
    fn drop(&mut self) {
        self.entry.lock_inflight().take();
    }
}

/// In-memory registry of live sessions.
///
/// Least recently used sessions are evicted beyond `max_sessions`; sessions
/// idle for longer than the TTL expire. Evicted and expired sessions have
/// their in-flight request cancelled.
pub struct SessionStore {
    sessions: Mutex<LruCache<Uuid, Slot>>,
    ttl: Option<Duration>,
}

struct Slot {
    entry: Arc<SessionEntry>,
    last_access: Instant,
}

impl Slot {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.last_access.elapsed() >= ttl)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_SESSIONS, Some(DEFAULT_SESSION_TTL))
    }
}

impl SessionStore {
    pub fn with_limits(max_sessions: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub async fn insert(&self, session: Session) -> Arc<SessionEntry> {
        let entry = Arc::new(SessionEntry::new(session));
        let slot = Slot {
            entry: entry.clone(),
            last_access: Instant::now(),
        };

        if let Some((id, evicted)) = self.sessions.lock().await.push(entry.id, slot) {
            if id != entry.id {
                evicted.entry.cancel();
                debug!(session_id = %id, "Session evicted, store at capacity");
            }
        }
        entry
    }

    /// Look up a session, refreshing its idle timer
    pub async fn get(&self, id: Uuid) -> Result<Arc<SessionEntry>> {
        let mut sessions = self.sessions.lock().await;

        if sessions.peek(&id).is_some_and(|slot| slot.is_expired(self.ttl)) {
            if let Some(slot) = sessions.pop(&id) {
                slot.entry.cancel();
            }
            debug!(session_id = %id, "Session expired");
        }

        let slot = sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })?;
        slot.last_access = Instant::now();
        Ok(slot.entry.clone())
    }

    /// Remove a session, cancelling its in-flight request
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let slot = self
            .sessions
            .lock()
            .await
            .pop(&id)
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })?;
        slot.entry.cancel();
        Ok(())
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, slot)| slot.is_expired(self.ttl))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(slot) = sessions.pop(id) {
                slot.entry.cancel();
            }
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
