//! Session Registry
//!
//! Owns the map of session id -> {handler transport, timestamps, expiry
//! timer}. All registry-mutating operations are individually atomic via the
//! concurrent map; downstream awaits never happen under registry
//! bookkeeping. Timer expiry, capacity eviction, and explicit teardown all
//! converge on one routine so the registry entry, the auth context, and the
//! broadcast registration are always removed together.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::transport::SessionTransport;
use crate::auth::AuthContextStore;
use crate::mcp::error::McpError;
use crate::notify::NotificationBroadcaster;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session already exists: {0}")]
    SessionExists(String),
}

impl From<SessionError> for McpError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionExists(id) => {
                McpError::Internal(format!("session id collision: {}", id))
            }
        }
    }
}

/// Serializable per-session summary for the monitoring surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// The single outstanding expiry timer for a session.
///
/// `epoch` guards the cancel-then-rearm race: a firing timer only evicts if
/// its epoch still matches the entry, so canceling a timer that is
/// concurrently firing is a safe no-op.
struct ExpiryTimer {
    epoch: u64,
    handle: JoinHandle<()>,
}

struct SessionEntry {
    transport: SessionTransport,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    timer: ExpiryTimer,
}

struct RegistryInner {
    sessions: DashMap<String, SessionEntry>,
    auth_store: Arc<AuthContextStore>,
    broadcaster: Arc<NotificationBroadcaster>,
    max_sessions: usize,
    session_timeout: Duration,
}

/// Session registry with capacity-bounded LRU eviction and per-session
/// expiry timers
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create a registry with the given capacity and idle timeout
    pub fn new(
        auth_store: Arc<AuthContextStore>,
        broadcaster: Arc<NotificationBroadcaster>,
        max_sessions: usize,
        session_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                auth_store,
                broadcaster,
                max_sessions,
                session_timeout,
            }),
        }
    }

    /// Register a new session.
    ///
    /// Session ids are server-minted UUIDs; a duplicate indicates a bug and
    /// is rejected rather than silently replacing the prior tenant's entry.
    /// Registering at capacity first evicts the single least-recently-used
    /// session.
    pub fn create(&self, session_id: &str, transport: SessionTransport) -> Result<(), SessionError> {
        if self.inner.sessions.contains_key(session_id) {
            return Err(SessionError::SessionExists(session_id.to_string()));
        }

        if self.inner.sessions.len() >= self.inner.max_sessions {
            if let Some(lru_id) = self.least_recently_used() {
                warn!(
                    "Session capacity {} reached, evicting least-recently-used session {}",
                    self.inner.max_sessions, lru_id
                );
                self.evict(&lru_id);
            }
        }

        self.inner
            .broadcaster
            .register(session_id, transport.sender());

        let now = Utc::now();
        let timer = arm_timer(&self.inner, session_id, 0);
        self.inner.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                transport,
                created_at: now,
                last_accessed: now,
                timer: ExpiryTimer { epoch: 0, handle: timer },
            },
        );

        info!("Created session {}", session_id);
        Ok(())
    }

    /// Refresh a session's access time and expiry timer, returning its
    /// transport. A miss is the caller's error to surface, never license to
    /// create a new session.
    pub fn touch(&self, session_id: &str) -> Option<SessionTransport> {
        let mut entry = self.inner.sessions.get_mut(session_id)?;
        entry.last_accessed = Utc::now();

        // Cancel-then-rearm under the entry lock. A timer firing right now
        // will lose the epoch comparison and back off.
        entry.timer.handle.abort();
        entry.timer.epoch += 1;
        entry.timer.handle = arm_timer(&self.inner, session_id, entry.timer.epoch);

        Some(entry.transport.clone())
    }

    /// Tear down a session: timer, broadcast registration, auth context,
    /// and registry entry go together. Idempotent.
    pub fn evict(&self, session_id: &str) {
        if let Some((id, entry)) = self.inner.sessions.remove(session_id) {
            teardown(&self.inner, &id, entry);
        }
    }

    /// Evict every session; used at shutdown
    pub fn sweep_all(&self) {
        let ids: Vec<String> = self.inner.sessions.iter().map(|e| e.key().clone()).collect();
        info!("Sweeping {} session(s)", ids.len());
        for id in ids {
            self.evict(&id);
        }
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// True if the session is registered
    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.sessions.contains_key(session_id)
    }

    /// Per-session summaries for the monitoring surface
    pub fn list(&self) -> Vec<SessionSummary> {
        self.inner
            .sessions
            .iter()
            .map(|e| SessionSummary {
                id: e.key().clone(),
                created_at: e.created_at,
                last_accessed: e.last_accessed,
            })
            .collect()
    }

    fn least_recently_used(&self) -> Option<String> {
        self.inner
            .sessions
            .iter()
            .min_by_key(|e| e.last_accessed)
            .map(|e| e.key().clone())
    }
}

/// Spawn the expiry task for (session, epoch)
fn arm_timer(inner: &Arc<RegistryInner>, session_id: &str, epoch: u64) -> JoinHandle<()> {
    let weak: Weak<RegistryInner> = Arc::downgrade(inner);
    let session_id = session_id.to_string();
    let timeout = inner.session_timeout;

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(inner) = weak.upgrade() {
            expire(&inner, &session_id, epoch);
        }
    })
}

/// Timer-fire path: evict only if the entry's timer epoch still matches.
/// A concurrent `touch` bumps the epoch under the entry lock, turning this
/// into a no-op.
fn expire(inner: &Arc<RegistryInner>, session_id: &str, epoch: u64) {
    let removed = inner
        .sessions
        .remove_if(session_id, |_, entry| entry.timer.epoch == epoch);
    if let Some((id, entry)) = removed {
        debug!("Session {} expired after idle timeout", id);
        teardown(inner, &id, entry);
    }
}

/// The one teardown routine both eviction paths converge on
fn teardown(inner: &Arc<RegistryInner>, session_id: &str, entry: SessionEntry) {
    entry.timer.handle.abort();
    inner.broadcaster.unregister(session_id);
    inner.auth_store.remove(session_id);
    info!("Evicted session {}", session_id);
}
