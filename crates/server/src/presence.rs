//! PresenceCache: volatile user -> session-set mapping plus per-conversation
//! unread counters.
//!
//! Presence is advisory. Every read degrades to "offline" / "unknown" when
//! the backend is unavailable, so nothing on the durable path ever waits on
//! it or fails because of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::ChatResult;

/// Storage behind the cache. Each call is a single atomic operation on the
/// backend; callers never read-modify-write across calls.
#[async_trait]
pub trait PresenceBackend: Send + Sync {
    /// Add a session and return the user's live session count afterwards.
    async fn add_session(&self, user_id: &str, session_id: &str, ttl: Duration)
        -> ChatResult<usize>;
    /// Remove a session and return the user's live session count afterwards.
    async fn remove_session(&self, user_id: &str, session_id: &str) -> ChatResult<usize>;
    /// Extend a live session's expiry. Returns the owning user, or `None` if
    /// the session is unknown or already expired.
    async fn refresh_session(&self, session_id: &str, ttl: Duration)
        -> ChatResult<Option<String>>;
    async fn live_sessions(&self, user_id: &str) -> ChatResult<usize>;
    async fn session_owner(&self, session_id: &str) -> ChatResult<Option<String>>;
    /// Drop expired sessions. Returns users left with no live session.
    async fn purge_expired(&self) -> ChatResult<Vec<String>>;
    async fn incr_unread(&self, user_id: &str, conversation_id: &str) -> ChatResult<i64>;
    async fn set_unread(&self, user_id: &str, conversation_id: &str, count: i64)
        -> ChatResult<()>;
    async fn unread(&self, user_id: &str, conversation_id: &str) -> ChatResult<Option<i64>>;
}

#[derive(Default)]
struct MemoryInner {
    /// user_id -> session_id -> expiry
    sessions: HashMap<String, HashMap<String, Instant>>,
    /// session_id -> user_id
    owners: HashMap<String, String>,
    /// (user_id, conversation_id) -> unread count
    unread: HashMap<(String, String), i64>,
}

impl MemoryInner {
    fn live_count(&self, user_id: &str, now: Instant) -> usize {
        self.sessions
            .get(user_id)
            .map(|set| set.values().filter(|exp| **exp > now).count())
            .unwrap_or(0)
    }
}

/// In-process backend. One lock guards the whole map so each trait call is
/// atomic.
#[derive(Default)]
pub struct MemoryPresence {
    inner: RwLock<MemoryInner>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceBackend for MemoryPresence {
    async fn add_session(
        &self,
        user_id: &str,
        session_id: &str,
        ttl: Duration,
    ) -> ChatResult<usize> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        inner
            .sessions
            .entry(user_id.to_string())
            .or_default()
            .insert(session_id.to_string(), now + ttl);
        inner
            .owners
            .insert(session_id.to_string(), user_id.to_string());
        Ok(inner.live_count(user_id, now))
    }

    async fn remove_session(&self, user_id: &str, session_id: &str) -> ChatResult<usize> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        if let Some(set) = inner.sessions.get_mut(user_id) {
            set.remove(session_id);
            if set.is_empty() {
                inner.sessions.remove(user_id);
            }
        }
        inner.owners.remove(session_id);
        Ok(inner.live_count(user_id, now))
    }

    async fn refresh_session(
        &self,
        session_id: &str,
        ttl: Duration,
    ) -> ChatResult<Option<String>> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let Some(user_id) = inner.owners.get(session_id).cloned() else {
            return Ok(None);
        };
        let Some(expiry) = inner
            .sessions
            .get_mut(&user_id)
            .and_then(|set| set.get_mut(session_id))
        else {
            return Ok(None);
        };
        if *expiry <= now {
            return Ok(None);
        }
        *expiry = now + ttl;
        Ok(Some(user_id))
    }

    async fn live_sessions(&self, user_id: &str) -> ChatResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner.live_count(user_id, Instant::now()))
    }

    async fn session_owner(&self, session_id: &str) -> ChatResult<Option<String>> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        let Some(user_id) = inner.owners.get(session_id) else {
            return Ok(None);
        };
        let live = inner
            .sessions
            .get(user_id)
            .and_then(|set| set.get(session_id))
            .is_some_and(|exp| *exp > now);
        Ok(live.then(|| user_id.clone()))
    }

    async fn purge_expired(&self) -> ChatResult<Vec<String>> {
        let now = Instant::now();
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let mut went_offline = Vec::new();
        let mut expired_sessions = Vec::new();

        inner.sessions.retain(|user_id, set| {
            let before = set.len();
            set.retain(|session_id, exp| {
                let live = *exp > now;
                if !live {
                    expired_sessions.push(session_id.clone());
                }
                live
            });
            if set.is_empty() {
                if before > 0 {
                    went_offline.push(user_id.clone());
                }
                false
            } else {
                true
            }
        });

        for session_id in expired_sessions {
            inner.owners.remove(&session_id);
        }
        Ok(went_offline)
    }

    async fn incr_unread(&self, user_id: &str, conversation_id: &str) -> ChatResult<i64> {
        let mut inner = self.inner.write().await;
        let count = inner
            .unread
            .entry((user_id.to_string(), conversation_id.to_string()))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn set_unread(
        &self,
        user_id: &str,
        conversation_id: &str,
        count: i64,
    ) -> ChatResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .unread
            .insert((user_id.to_string(), conversation_id.to_string()), count.max(0));
        Ok(())
    }

    async fn unread(&self, user_id: &str, conversation_id: &str) -> ChatResult<Option<i64>> {
        let inner = self.inner.read().await;
        Ok(inner
            .unread
            .get(&(user_id.to_string(), conversation_id.to_string()))
            .copied())
    }
}

pub struct PresenceCache {
    backend: Arc<dyn PresenceBackend>,
    ttl: Duration,
}

impl PresenceCache {
    pub fn new(backend: Arc<dyn PresenceBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryPresence::new()), ttl)
    }

    /// Register a session. Returns true when this is the user's first live
    /// session, i.e. the user just came online.
    pub async fn connect(&self, user_id: &str, session_id: &str) -> ChatResult<bool> {
        let live = self
            .backend
            .add_session(user_id, session_id, self.ttl)
            .await?;
        tracing::debug!(user_id, session_id, live, "presence connect");
        Ok(live == 1)
    }

    /// Drop a session. Returns true when the user has no live session left.
    pub async fn disconnect(&self, user_id: &str, session_id: &str) -> ChatResult<bool> {
        let live = self.backend.remove_session(user_id, session_id).await?;
        tracing::debug!(user_id, session_id, live, "presence disconnect");
        Ok(live == 0)
    }

    /// Extend a session's TTL. Returns the owning user if the session is
    /// still live.
    pub async fn heartbeat(&self, session_id: &str) -> ChatResult<Option<String>> {
        self.backend.refresh_session(session_id, self.ttl).await
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        match self.backend.live_sessions(user_id).await {
            Ok(live) => live > 0,
            Err(e) => {
                tracing::warn!(user_id, "presence lookup failed, reporting offline: {e}");
                false
            }
        }
    }

    pub async fn resolve_user(&self, session_id: &str) -> Option<String> {
        match self.backend.session_owner(session_id).await {
            Ok(owner) => owner,
            Err(e) => {
                tracing::warn!(session_id, "session lookup failed: {e}");
                None
            }
        }
    }

    /// Expire sessions whose TTL lapsed without a clean disconnect.
    pub async fn sweep(&self) -> Vec<String> {
        match self.backend.purge_expired().await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!("presence sweep failed: {e}");
                Vec::new()
            }
        }
    }

    pub async fn bump_unread(&self, user_id: &str, conversation_id: &str) {
        if let Err(e) = self.backend.incr_unread(user_id, conversation_id).await {
            tracing::warn!(user_id, conversation_id, "unread counter update failed: {e}");
        }
    }

    pub async fn set_unread(&self, user_id: &str, conversation_id: &str, count: i64) {
        if let Err(e) = self
            .backend
            .set_unread(user_id, conversation_id, count)
            .await
        {
            tracing::warn!(user_id, conversation_id, "unread counter reset failed: {e}");
        }
    }

    pub async fn unread(&self, user_id: &str, conversation_id: &str) -> Option<i64> {
        self.backend
            .unread(user_id, conversation_id)
            .await
            .ok()
            .flatten()
    }
}
