use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A non-final STT output, superseded by later revisions within the same
/// turn. Revision numbers are strictly monotonic per turn (P8); consumers
/// must ignore a revision that does not increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialTranscript {
    pub text: String,
    pub revision: u64,
    pub stable: bool,
}

impl PartialTranscript {
    #[must_use]
    pub fn new(text: impl Into<String>, revision: u64, stable: bool) -> Self {
        Self {
            text: text.into(),
            revision,
            stable,
        }
    }
}

/// Emitted once per user turn when the turn-end detector's commit condition
/// fires; triggers assistant generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalTranscript {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl FinalTranscript {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Minimum-content rule from §4.6.1: at least one alphanumeric
    /// character and a minimum length.
    #[must_use]
    pub fn has_minimum_content(&self, min_chars: usize) -> bool {
        self.text.len() >= min_chars && self.text.chars().any(char::is_alphanumeric)
    }
}
