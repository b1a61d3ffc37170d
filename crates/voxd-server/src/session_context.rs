//! Adapts [`SessionStore`] to the pipeline's [`TurnContext`] seam (§4.3 vs
//! §4.6): the pipeline reads/writes conversation turns without knowing
//! anything about session lifecycle, restore, or TTL.

use std::sync::Arc;

use voxd_core::domain::{SessionId, Turn};
use voxd_core::session_store::SessionStore;
use voxd_pipeline::TurnContext;

pub struct SessionTurnContext {
    store: Arc<SessionStore>,
    session_id: SessionId,
}

impl SessionTurnContext {
    #[must_use]
    pub fn new(store: Arc<SessionStore>, session_id: SessionId) -> Self {
        Self { store, session_id }
    }
}

impl TurnContext for SessionTurnContext {
    fn context_snapshot(&self) -> Vec<Turn> {
        self.store.context_snapshot(self.session_id).unwrap_or_default()
    }

    fn append_turn(&self, turn: Turn) {
        self.store.append_turn(self.session_id, turn.role, turn.text);
    }
}
