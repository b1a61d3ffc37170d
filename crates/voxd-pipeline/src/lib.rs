//! Turn-end detection and the streaming pipeline orchestrator (§4.5, §4.6):
//! the component that wires incremental STT, a streaming LLM, and streaming
//! TTS into one conversational turn at a time, with barge-in and optional
//! speculative generation.

pub mod error;
pub mod pipeline;
pub mod similarity;
pub mod splitter;
pub mod turn_detector;

pub use error::PipelineError;
pub use pipeline::{ConversationPipeline, OutboundEvent, PipelineState, TurnContext};
pub use turn_detector::{EouClassifier, TurnDetector};
