//! Turn-scoped cancellation, distinct from worker shutdown (§4.1 ambient
//! addition). A `CancelToken` is a cheaply cloneable flag threaded into
//! LLM/TTS calls; a `CancelGroup` cascades cancellation from a parent token
//! (e.g. "this turn") to every child registered under it (its LLM stream,
//! its TTS stream), so a single barge-in call cancels the whole fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A single-shot, cheaply cloneable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent, non-blocking.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// True iff `self` and `other` share the same underlying flag — i.e.
    /// one is a clone of the other, not just an equally-named token.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

/// Registers tokens under string keys and supports cascading cancellation
/// from a parent key to a set of child keys registered under it.
#[derive(Default)]
pub struct CancelGroup {
    tokens: Mutex<HashMap<String, CancelToken>>,
    children: Mutex<HashMap<String, HashSet<String>>>,
}

impl CancelGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the token for `key`.
    pub fn register(&self, key: impl Into<String>) -> CancelToken {
        let key = key.into();
        let token = CancelToken::new();
        self.tokens
            .lock()
            .expect("cancel group lock poisoned")
            .insert(key, token.clone());
        token
    }

    pub fn add_to_group(&self, parent: impl Into<String>, child: impl Into<String>) {
        self.children
            .lock()
            .expect("cancel group lock poisoned")
            .entry(parent.into())
            .or_default()
            .insert(child.into());
    }

    /// Cancel `key` and every child registered under it.
    pub fn cancel(&self, key: &str) {
        if let Some(token) = self.tokens.lock().expect("cancel group lock poisoned").get(key) {
            token.cancel();
        }
        let child_keys: Vec<String> = self
            .children
            .lock()
            .expect("cancel group lock poisoned")
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for child in child_keys {
            self.cancel(&child);
        }
    }

    #[must_use]
    pub fn is_cancelled(&self, key: &str) -> bool {
        self.tokens
            .lock()
            .expect("cancel group lock poisoned")
            .get(key)
            .is_some_and(CancelToken::is_cancelled)
    }

    pub fn remove(&self, key: &str) {
        self.tokens.lock().expect("cancel group lock poisoned").remove(key);
        self.children.lock().expect("cancel group lock poisoned").remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clone_shares_state() {
        let a = CancelToken::new();
        let b = a.clone();
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn cascades_to_children() {
        let group = CancelGroup::new();
        let turn = group.register("turn-1");
        let llm = group.register("turn-1:llm");
        let tts = group.register("turn-1:tts");
        group.add_to_group("turn-1", "turn-1:llm");
        group.add_to_group("turn-1", "turn-1:tts");

        group.cancel("turn-1");

        assert!(turn.is_cancelled());
        assert!(llm.is_cancelled());
        assert!(tts.is_cancelled());
    }

    #[test]
    fn unrelated_keys_are_unaffected() {
        let group = CancelGroup::new();
        let a = group.register("a");
        let b = group.register("b");
        group.cancel("a");
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }
}
