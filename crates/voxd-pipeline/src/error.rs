//! Pipeline error kinds (§4.6.7, §7). These are the machine-checkable
//! `code`s an `error` frame carries to the client; the policy for each is
//! "abort this turn, keep the connection open" unless noted otherwise.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The STT worker died mid-turn. The turn is canceled; the connection
    /// stays open awaiting new audio.
    #[error("speech recognition worker was lost")]
    SttLost,

    /// LLM produced zero tokens, or the first-token/total timeout elapsed.
    /// No assistant turn is appended.
    #[error("assistant produced no response")]
    LlmEmpty,

    /// TTS failed partway through a reply. The turn is appended with the
    /// text generated so far; the client is notified.
    #[error("speech synthesis failed: {0}")]
    TtsFailed(String),

    /// A second live connection bound to the same session id (§4.4, I1).
    #[error("session {0} is already bound to another connection")]
    SessionSuperseded(String),

    /// Inbound control message failed validation (§6.1, §7).
    #[error("{0}")]
    ValidationFailed(String),
}

impl PipelineError {
    /// The stable machine key sent as `error.code` on the wire (§6.1, §7).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SttLost => "stt_lost",
            Self::LlmEmpty => "llm_empty",
            Self::TtsFailed(_) => "tts_error",
            Self::SessionSuperseded(_) => "session_superseded",
            Self::ValidationFailed(_) => "validation_failed",
        }
    }

    /// Scrubbed message safe to place on the wire: `code()` identifies the
    /// kind, so this strips anything that might carry a path or identifier
    /// that snuck into a `Display` impl upstream.
    #[must_use]
    pub fn sanitized_message(&self) -> String {
        match self {
            Self::SttLost | Self::LlmEmpty => self.to_string(),
            Self::TtsFailed(_) => "speech synthesis failed".to_string(),
            Self::SessionSuperseded(_) => "session superseded by a newer connection".to_string(),
            Self::ValidationFailed(reason) => format!("validation failed: {reason}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_machine_keys() {
        assert_eq!(PipelineError::SttLost.code(), "stt_lost");
        assert_eq!(PipelineError::LlmEmpty.code(), "llm_empty");
        assert_eq!(
            PipelineError::TtsFailed("boom".into()).code(),
            "tts_error"
        );
    }

    #[test]
    fn sanitized_tts_message_drops_the_raw_detail() {
        let err = PipelineError::TtsFailed("/home/user/model.bin not found".into());
        assert!(!err.sanitized_message().contains("/home"));
    }
}
