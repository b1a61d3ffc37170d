//! Structured pipeline events worth grepping in aggregate — turn commits,
//! barge-ins, speculative adoption/discard, thermal transitions. Modeled on
//! `sa_domain::trace::TraceEvent`: a tagged enum serialized to JSON and
//! logged through `tracing` rather than a bespoke event bus.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum PipelineEvent {
    TurnCommitted {
        session_id: String,
        chars: usize,
    },
    BargeIn {
        session_id: String,
        spoken_chars: usize,
    },
    SpeculativeAdopted {
        session_id: String,
        similarity: f64,
    },
    SpeculativeDiscarded {
        session_id: String,
        similarity: f64,
    },
    ThermalTransition {
        protection_active: bool,
        temp_c: f64,
    },
    SessionSuperseded {
        session_id: String,
    },
}

impl PipelineEvent {
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => tracing::info!(trace_event = %json, "voxd_event"),
            Err(err) => tracing::warn!(%err, "failed to serialize trace event"),
        }
    }
}
