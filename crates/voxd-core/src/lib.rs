//! Core domain types, ports, and session state for the voice conversation server.
//!
//! This crate is infrastructure-free: no axum, no audio I/O, no model
//! bindings. It defines the shapes everything else agrees on — sessions and
//! turns, the wire-adjacent transcript types, the capability traits external
//! STT/LLM/TTS/thermal backends must satisfy, and the environment-driven
//! configuration every component reads at startup.

pub mod cancel;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod session_store;
pub mod trace;

pub use domain::{Role, Session, SessionId, SessionState, Turn};
pub use domain::transcript::{FinalTranscript, PartialTranscript};
pub use error::{Error, Result};
pub use session_store::{RestoreOutcome, SessionStore};

#[cfg(test)]
use tokio_test as _;
