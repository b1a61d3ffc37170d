//! Pure domain model: sessions, turns, and the incremental transcript types
//! that flow between STT and the pipeline manager.

mod session;
pub mod transcript;

pub use session::{Role, Session, SessionId, SessionState, Turn, MAX_CONTEXT_TURNS_DEFAULT};
