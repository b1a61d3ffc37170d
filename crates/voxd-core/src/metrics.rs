//! Observable-state aggregation (§6.4, SPEC_FULL §3.1). Lightweight and
//! hand-rolled rather than pulled from a metrics crate — exposition format
//! is explicitly out of scope; this only needs to back a JSON snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Fixed-size reservoir for approximate p50/p95 without a histogram crate.
const TTFA_RESERVOIR_CAP: usize = 256;

#[derive(Debug, Default)]
struct TtfaReservoir {
    samples: Mutex<Vec<u64>>,
}

impl TtfaReservoir {
    fn record(&self, ms: u64) {
        let mut samples = self.samples.lock().expect("ttfa reservoir lock poisoned");
        if samples.len() >= TTFA_RESERVOIR_CAP {
            samples.remove(0);
        }
        samples.push(ms);
    }

    fn percentile(&self, p: f64) -> u64 {
        let mut samples = self.samples.lock().expect("ttfa reservoir lock poisoned").clone();
        if samples.is_empty() {
            return 0;
        }
        samples.sort_unstable();
        let idx = ((samples.len() - 1) as f64 * p).round() as usize;
        samples[idx]
    }
}

/// Per-connection counters backing the `pipeline` section of the
/// observable-state snapshot.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    turns_total: AtomicU64,
    interruptions: AtomicU64,
    stt_restarts: AtomicU64,
    llm_errors: AtomicU64,
    tts_errors: AtomicU64,
    audio_frames_dropped: AtomicU64,
    ttfa: TtfaReservoir,
}

impl PipelineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_turn_completed(&self) {
        self.turns_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stt_restart(&self) {
        self.stt_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_llm_error(&self) {
        self.llm_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tts_error(&self) {
        self.tts_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_frame_dropped(&self) {
        self.audio_frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ttfa_ms(&self, ms: u64) {
        self.ttfa.record(ms);
    }

    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            turns_total: self.turns_total.load(Ordering::Relaxed),
            ttfa_p50_ms: self.ttfa.percentile(0.50),
            ttfa_p95_ms: self.ttfa.percentile(0.95),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            stt_restarts: self.stt_restarts.load(Ordering::Relaxed),
            llm_errors: self.llm_errors.load(Ordering::Relaxed),
            tts_errors: self.tts_errors.load(Ordering::Relaxed),
            audio_frames_dropped: self.audio_frames_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PipelineSnapshot {
    pub turns_total: u64,
    pub ttfa_p50_ms: u64,
    pub ttfa_p95_ms: u64,
    pub interruptions: u64,
    pub stt_restarts: u64,
    pub llm_errors: u64,
    pub tts_errors: u64,
    pub audio_frames_dropped: u64,
}

/// One entry in the `workers` observable-state listing.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    pub name: String,
    pub alive: bool,
    pub last_started_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_on_empty_reservoir_are_zero() {
        let metrics = PipelineMetrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.ttfa_p50_ms, 0);
        assert_eq!(snap.ttfa_p95_ms, 0);
    }

    #[test]
    fn percentiles_reflect_recorded_samples() {
        let metrics = PipelineMetrics::new();
        for ms in [100, 200, 300, 400, 500] {
            metrics.record_ttfa_ms(ms);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.ttfa_p50_ms, 300);
        assert_eq!(snap.ttfa_p95_ms, 500);
    }

    #[test]
    fn counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_turn_completed();
        metrics.record_interruption();
        metrics.record_interruption();
        let snap = metrics.snapshot();
        assert_eq!(snap.turns_total, 1);
        assert_eq!(snap.interruptions, 2);
    }
}
