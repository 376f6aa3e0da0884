use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::models::session::{Session, SessionStats};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// The two maps are views of the same owned collection; every operation that
/// touches either one runs inside the single store-wide lock so a reader can
/// never observe one index updated and the other stale.
#[derive(Debug, Default)]
struct SessionIndex {
    by_id: HashMap<Uuid, Session>,
    by_token: HashMap<String, Uuid>,
}

/// Concurrency-safe registry of logged-in sessions, indexed by session id and
/// by bearer token.
///
/// Sessions are created by a successful login, mutated only by `touch` and
/// `invalidate`, and removed only by the background reaper, never
/// synchronously inside a request that may still be using them.
#[derive(Debug)]
pub struct SessionRegistry {
    config: SessionConfig,
    index: Mutex<SessionIndex>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            index: Mutex::new(SessionIndex::default()),
        }
    }

    /// Register a fresh session for `user_id` under `token`.
    ///
    /// Tokens are externally unique per login; if a live session still holds
    /// the same token value it is invalidated first so at most one active
    /// session ever maps to a given token.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        token: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Session {
        let session = Session::new(user_id, token.clone(), ip_address, user_agent);

        let mut index = self.index.lock().await;
        if let Some(previous_id) = index.by_token.remove(&token) {
            if let Some(previous) = index.by_id.get_mut(&previous_id) {
                previous.active = false;
            }
        }
        index.by_token.insert(token, session.id);
        index.by_id.insert(session.id, session.clone());

        info!(
            session_id = %session.id,
            user_id = %session.user_id,
            ip = session.ip_address.as_deref().unwrap_or("-"),
            "session created"
        );

        session
    }

    /// Look up an active session by id. Missing and invalidated sessions both
    /// resolve to `None`.
    pub async fn get_session(&self, id: Uuid) -> Option<Session> {
        let index = self.index.lock().await;
        index.by_id.get(&id).filter(|s| s.active).cloned()
    }

    /// Look up an active session by its bearer token.
    pub async fn get_session_by_token(&self, token: &str) -> Option<Session> {
        let index = self.index.lock().await;
        let id = index.by_token.get(token)?;
        index.by_id.get(id).filter(|s| s.active).cloned()
    }

    /// Update `last_seen_at` to now. A no-op when the session is absent or
    /// inactive: callers must not fail a request merely because touch lost a
    /// race with invalidation.
    pub async fn touch(&self, id: Uuid) {
        let mut index = self.index.lock().await;
        if let Some(session) = index.by_id.get_mut(&id).filter(|s| s.active) {
            session.last_seen_at = Utc::now();
        }
    }

    /// Mark a session as dead. Idempotent. The record stays in the store
    /// (visible to `list_*`) until the reaper removes it, so recently ended
    /// sessions remain inspectable.
    pub async fn invalidate(&self, id: Uuid) {
        let mut index = self.index.lock().await;
        let index = &mut *index;
        if let Some(session) = index.by_id.get_mut(&id) {
            if session.active {
                session.active = false;
                index.by_token.remove(&session.token);
                info!(session_id = %id, "session invalidated");
            }
        }
    }

    /// Invalidate every session owned by `user_id`; used on password change
    /// or "log out everywhere". Returns how many sessions were ended.
    pub async fn invalidate_all_for_user(&self, user_id: Uuid) -> usize {
        let mut index = self.index.lock().await;
        let mut ended = 0;
        let mut tokens = Vec::new();

        for session in index.by_id.values_mut() {
            if session.user_id == user_id && session.active {
                session.active = false;
                tokens.push(session.token.clone());
                ended += 1;
            }
        }
        for token in tokens {
            index.by_token.remove(&token);
        }

        if ended > 0 {
            info!(user_id = %user_id, count = ended, "invalidated all sessions for user");
        }
        ended
    }

    /// Snapshot of all sessions (active and recently invalidated) owned by
    /// one user.
    pub async fn list_for_user(&self, user_id: Uuid) -> Vec<Session> {
        let index = self.index.lock().await;
        index.by_id.values().filter(|s| s.user_id == user_id).cloned().collect()
    }

    pub async fn list_all(&self) -> Vec<Session> {
        let index = self.index.lock().await;
        index.by_id.values().cloned().collect()
    }

    pub async fn stats(&self) -> SessionStats {
        let index = self.index.lock().await;
        let mut by_user: HashMap<Uuid, usize> = HashMap::new();
        let mut active = 0;

        for session in index.by_id.values() {
            if session.active {
                active += 1;
                *by_user.entry(session.user_id).or_insert(0) += 1;
            }
        }

        SessionStats {
            active,
            total: index.by_id.len(),
            by_user,
        }
    }

    /// One sweep pass: invalidate sessions idle past the configured timeout
    /// and drop invalidated sessions whose grace period has elapsed.
    pub async fn reap(&self) -> (usize, usize) {
        let now = Utc::now();
        let idle_timeout = chrono::Duration::seconds(self.config.idle_timeout_seconds as i64);
        let grace = chrono::Duration::seconds(self.config.inactive_grace_seconds as i64);

        let mut index = self.index.lock().await;

        let mut expired_tokens = Vec::new();
        let mut expired = 0;
        for session in index.by_id.values_mut() {
            if session.active && now - session.last_seen_at > idle_timeout {
                session.active = false;
                expired_tokens.push(session.token.clone());
                expired += 1;
            }
        }
        for token in expired_tokens {
            index.by_token.remove(&token);
        }

        let before = index.by_id.len();
        index.by_id.retain(|_, s| s.active || now - s.last_seen_at <= grace);
        let removed = before - index.by_id.len();

        if expired > 0 || removed > 0 {
            debug!(expired, removed, "session reap pass");
        }
        (expired, removed)
    }

    /// Run `reap` on its own timer, independent of request handling. The
    /// registry lock is held only for the duration of each sweep pass.
    pub fn spawn_reaper_task(self: Arc<Self>) {
        let reap_interval = Duration::from_secs(self.config.reap_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reap_interval);
            loop {
                ticker.tick().await;
                self.reap().await;
            }
        });
    }
}
