use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default capacity of a session's turn FIFO (`MAX_CONTEXT_TURNS`).
pub const MAX_CONTEXT_TURNS_DEFAULT: usize = 100;

/// Opaque, printable session identifier with 128 bits of entropy.
///
/// Never carries user data; safe to log and to hand back to the client for
/// persistence in local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Connection-liveness state of a `Session`, independent of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connected,
    Disconnected,
}

/// Who spoke a `Turn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One user or assistant utterance — the unit of conversational context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Persisted conversation state keyed by an opaque `session_id`, independent
/// of any single WebSocket connection (I1, I2).
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    turns: VecDeque<Turn>,
    capacity: usize,
    /// Number of times this session has been restored after a disconnect.
    pub reconnect_count: u32,
}

impl Session {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::new(),
            state: SessionState::Connected,
            created_at: now,
            last_active: now,
            turns: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            reconnect_count: 0,
        }
    }

    /// Defensive copy of the turn FIFO, oldest first — safe to hand to an
    /// in-flight pipeline without risking corruption from a concurrent
    /// `append_turn` (I6).
    #[must_use]
    pub fn context_snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    #[must_use]
    pub fn context_len(&self) -> usize {
        self.turns.len()
    }

    /// Push a turn, evicting the oldest on overflow.
    pub fn append_turn(&mut self, turn: Turn) {
        if self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    /// Bind the session to a fresh connection: mark connected, reset the
    /// reconnection counter, and touch activity.
    pub fn mark_connected(&mut self) {
        self.state = SessionState::Connected;
        self.reconnect_count = 0;
        self.touch();
    }

    pub fn mark_disconnected(&mut self) {
        self.state = SessionState::Disconnected;
    }

    #[must_use]
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.state == SessionState::Disconnected && now - self.last_active > ttl
    }
}
