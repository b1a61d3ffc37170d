//! In-memory map of `session_id` → `Session`, with touch-on-activity and
//! TTL sweep (§4.3). This is the only shared mutable structure between
//! connections and the sweep worker; every operation below takes the lock
//! for the shortest possible critical section and returns defensive copies
//! of anything handed back to a caller, so an in-flight pipeline can never
//! observe a half-mutated turn FIFO (I6).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::domain::{MAX_CONTEXT_TURNS_DEFAULT, Role, Session, SessionId, Turn};

/// Outcome of a `restore` attempt.
#[derive(Debug)]
pub enum RestoreOutcome {
    Restored(Session),
    NotFound,
    Expired,
}

/// Point-in-time counts backing the `sessions` observable-state snapshot
/// (§6.4).
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SessionsSnapshot {
    pub active: usize,
    pub disconnected: usize,
    pub total_created: u64,
    pub total_expired: u64,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    ttl: chrono::Duration,
    max_context_turns: usize,
    total_created: std::sync::atomic::AtomicU64,
    total_expired: std::sync::atomic::AtomicU64,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_capacity(ttl_secs, MAX_CONTEXT_TURNS_DEFAULT)
    }

    #[must_use]
    pub fn with_capacity(ttl_secs: u64, max_context_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::seconds(ttl_secs as i64),
            max_context_turns,
            total_created: std::sync::atomic::AtomicU64::new(0),
            total_expired: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Allocate a fresh session: `CONNECTED`, empty context, `created_at =
    /// last_active = now`.
    #[must_use]
    pub fn create(&self) -> Session {
        let session = Session::new(self.max_context_turns);
        let snapshot = session.clone();
        self.sessions
            .write()
            .expect("session store lock poisoned")
            .insert(session.session_id, session);
        self.total_created
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        snapshot
    }

    /// Returns the session iff it exists and is not expired; marks
    /// `CONNECTED`, resets the reconnection counter, touches `last_active`.
    pub fn restore(&self, id: SessionId) -> RestoreOutcome {
        let now = Utc::now();
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        match sessions.get_mut(&id) {
            None => RestoreOutcome::NotFound,
            Some(session) if session.is_expired(self.ttl, now) => {
                sessions.remove(&id);
                self.total_expired
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                RestoreOutcome::Expired
            }
            Some(session) => {
                session.mark_connected();
                RestoreOutcome::Restored(session.clone())
            }
        }
    }

    /// No-op on an unknown id.
    pub fn touch(&self, id: SessionId) {
        if let Some(session) = self
            .sessions
            .write()
            .expect("session store lock poisoned")
            .get_mut(&id)
        {
            session.touch();
        }
    }

    /// Preserves context; only flips liveness state.
    pub fn mark_disconnected(&self, id: SessionId) {
        if let Some(session) = self
            .sessions
            .write()
            .expect("session store lock poisoned")
            .get_mut(&id)
        {
            session.mark_disconnected();
        }
    }

    /// Push into the FIFO; enforces capacity by oldest-first eviction.
    /// No-op on an unknown id (store never raises for missing ids, §4.3).
    pub fn append_turn(&self, id: SessionId, role: Role, text: impl Into<String>) {
        if let Some(session) = self
            .sessions
            .write()
            .expect("session store lock poisoned")
            .get_mut(&id)
        {
            session.append_turn(Turn::new(role, text));
        }
    }

    /// Defensive copy of the conversation context at this instant.
    #[must_use]
    pub fn context_snapshot(&self, id: SessionId) -> Option<Vec<Turn>> {
        self.sessions
            .read()
            .expect("session store lock poisoned")
            .get(&id)
            .map(Session::context_snapshot)
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions
            .read()
            .expect("session store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Iterates and removes entries with `now − last_active > SESSION_TTL`.
    /// Returns the count removed. Cost is O(number of sessions), which is
    /// bounded because a single-user deployment holds at most tens of
    /// sessions.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(self.ttl, now));
        let removed = before - sessions.len();
        if removed > 0 {
            self.total_expired
                .fetch_add(removed as u64, std::sync::atomic::Ordering::Relaxed);
            tracing::debug!(removed, "session sweep removed expired sessions");
        }
        removed
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionsSnapshot {
        let sessions = self.sessions.read().expect("session store lock poisoned");
        let (mut active, mut disconnected) = (0, 0);
        for session in sessions.values() {
            match session.state {
                crate::domain::SessionState::Connected => active += 1,
                crate::domain::SessionState::Disconnected => disconnected += 1,
            }
        }
        SessionsSnapshot {
            active,
            disconnected,
            total_created: self.total_created.load(std::sync::atomic::Ordering::Relaxed),
            total_expired: self.total_expired.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_restore_roundtrips_modulo_touch() {
        let store = SessionStore::new(300);
        let created = store.create();

        match store.restore(created.session_id) {
            RestoreOutcome::Restored(session) => {
                assert_eq!(session.session_id, created.session_id);
                assert_eq!(session.context_len(), 0);
                assert_eq!(session.state, crate::domain::SessionState::Connected);
            }
            other => panic!("expected restore, got {other:?}"),
        }
    }

    #[test]
    fn restore_unknown_id_is_not_found() {
        let store = SessionStore::new(300);
        assert!(matches!(
            store.restore(SessionId::new()),
            RestoreOutcome::NotFound
        ));
    }

    #[test]
    fn expired_session_is_removed_and_not_resurrectable() {
        let store = SessionStore::with_capacity(0, MAX_CONTEXT_TURNS_DEFAULT);
        let created = store.create();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.mark_disconnected(created.session_id);

        // TTL of 0s means the session is immediately stale once disconnected.
        assert!(matches!(
            store.restore(created.session_id),
            RestoreOutcome::Expired
        ));
        assert!(matches!(
            store.restore(created.session_id),
            RestoreOutcome::NotFound
        ));
    }

    #[test]
    fn append_turn_evicts_oldest_at_capacity() {
        let store = SessionStore::with_capacity(300, 2);
        let created = store.create();
        store.append_turn(created.session_id, Role::User, "one");
        store.append_turn(created.session_id, Role::Assistant, "two");
        store.append_turn(created.session_id, Role::User, "three");

        let snapshot = store.context_snapshot(created.session_id).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].text, "two");
        assert_eq!(snapshot[1].text, "three");
    }

    #[test]
    fn touch_on_unknown_id_is_noop() {
        let store = SessionStore::new(300);
        store.touch(SessionId::new());
    }

    #[test]
    fn sweep_removes_only_expired_disconnected_sessions() {
        let store = SessionStore::with_capacity(0, MAX_CONTEXT_TURNS_DEFAULT);
        let live = store.create();
        let stale = store.create();
        store.mark_disconnected(stale.session_id);
        std::thread::sleep(std::time::Duration::from_millis(5));

        let removed = store.sweep();
        assert_eq!(removed, 1);
        assert!(store.get(live.session_id).is_some());
        assert!(store.get(stale.session_id).is_none());
    }
}
