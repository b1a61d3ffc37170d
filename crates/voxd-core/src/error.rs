use thiserror::Error;

/// Crate-wide error type for core domain and session operations.
///
/// Session lookup failures (`SessionNotFound`/`SessionExpired`) are
/// deliberately *not* meant to propagate as errors to WebSocket callers —
/// per §4.3, the session store never raises for missing ids; callers treat
/// both outcomes as "create a new session". This type exists for the
/// genuinely exceptional paths: validation, serialization, invariant
/// violations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("session {0} already bound to a live connection")]
    SessionSuperseded(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
