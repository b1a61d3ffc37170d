//! Capability boundaries the core depends on but does not own (§4.7):
//! incremental STT, a streaming LLM, streaming TTS, and a temperature
//! probe. Modeled as `async_trait` trait objects, so any concrete engine
//! (local model, remote API, test double) can be boxed and injected at the
//! composition root.

use std::pin::Pin;

use futures_core::Stream;

use crate::domain::Turn;
use crate::cancel::CancelToken;
use crate::error::Result;

/// A boxed, `Send` stream — the shape every streaming port returns.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// One incremental transcription update.
#[derive(Debug, Clone, PartialEq)]
pub struct SttRevision {
    pub text: String,
    pub revision: u64,
    pub stable: bool,
}

/// Incremental speech-to-text. `feed` must be safe to call concurrently
/// with an in-progress `revisions()` stream (thread-safe with respect to
/// `feed`, per §4.7). Implementations must be restartable: a dead STT
/// worker is recreated rather than resurrected in place (§4.6.7).
#[async_trait::async_trait]
pub trait IncrementalStt: Send + Sync {
    /// Push one opaque PCM frame (mono, agreed sample rate, little-endian
    /// int16 by default — see §6.1).
    fn feed(&self, pcm_frame: &[u8]) -> Result<()>;

    /// Stream of transcript revisions. Revision numbers are strictly
    /// monotonic per turn (P8).
    fn revisions(&self) -> BoxStream<'static, SttRevision>;

    /// Tear down and recreate internal state for a fresh utterance.
    async fn restart(&self) -> Result<()>;
}

/// A single generated token. Tokens are Unicode strings; sentence-boundary
/// detection lives in the pipeline's splitter, not here.
pub type LlmToken = String;

/// Streaming language model. Cancellation via `cancel` must stop work
/// promptly (≤500 ms typical, §4.7).
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        context: Vec<Turn>,
        cancel: CancelToken,
    ) -> Result<BoxStream<'static, Result<LlmToken>>>;
}

/// One opaque chunk of synthesized audio (encoding/sample rate agreed at
/// startup, §6.1).
pub type TtsChunk = Vec<u8>;

/// Streaming text-to-speech. Takes a stream of text chunks (sentence-sized,
/// produced by the pipeline's splitter) and yields a stream of audio
/// chunks in the same order.
#[async_trait::async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(
        &self,
        text_chunks: BoxStream<'static, String>,
        cancel: CancelToken,
    ) -> Result<BoxStream<'static, Result<TtsChunk>>>;
}

/// Reads ambient CPU temperature. Must not block longer than
/// `POLL_INTERVAL_S / 2` (§4.7). Returns `None` when unavailable or the
/// read failed — the thermal controller treats both identically.
pub trait TemperatureProbe: Send + Sync {
    fn read(&self) -> Option<f64>;
}

/// A probe that always reports "unavailable" — used when no platform
/// sensor is wired up, satisfying the §4.2 edge case (`platform_supported
/// = false`, state stays `NORMAL`, no callbacks fire).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableProbe;

impl TemperatureProbe for UnavailableProbe {
    fn read(&self) -> Option<f64> {
        None
    }
}
