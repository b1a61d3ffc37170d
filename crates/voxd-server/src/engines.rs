//! Placeholder STT/LLM/TTS engines wired at the composition root.
//!
//! Concrete speech/LLM/TTS internals are out of scope here — the contract
//! this crate owns is the transport, session, and orchestration layer
//! around whatever implements [`voxd_core::ports::IncrementalStt`],
//! [`voxd_core::ports::LlmProvider`], and [`voxd_core::ports::TtsProvider`].
//! These stand-ins satisfy the three trait boundaries with deterministic,
//! dependency-free behavior so the pipeline can be exercised end to end;
//! swapping in a real engine means implementing the same three traits and
//! changing only `AppContext::new_pipeline`.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use voxd_core::cancel::CancelToken;
use voxd_core::domain::Turn;
use voxd_core::error::{Error, Result};
use voxd_core::ports::{BoxStream, IncrementalStt, LlmProvider, LlmToken, SttRevision, TtsChunk, TtsProvider};

/// Never produces a revision on its own; `feed` only records that audio
/// arrived. A caller that wants transcript activity during integration
/// testing should drive a real STT engine instead — this exists purely to
/// satisfy the port at the composition root.
#[derive(Default)]
pub struct SilentStt {
    frames_fed: Mutex<u64>,
}

#[async_trait]
impl IncrementalStt for SilentStt {
    fn feed(&self, pcm_frame: &[u8]) -> Result<()> {
        if pcm_frame.len() % 2 != 0 {
            return Err(Error::Validation("pcm frame must have even byte length".to_string()));
        }
        *self.frames_fed.lock().expect("silent stt lock poisoned") += 1;
        Ok(())
    }

    fn revisions(&self) -> BoxStream<'static, SttRevision> {
        Box::pin(stream::pending())
    }

    async fn restart(&self) -> Result<()> {
        *self.frames_fed.lock().expect("silent stt lock poisoned") = 0;
        Ok(())
    }
}

/// Emits one fixed acknowledgement token and stops. Enough to drive the
/// splitter/TTS fan-out without depending on a real model.
pub struct EchoLlm {
    reply: String,
}

impl EchoLlm {
    #[must_use]
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

impl Default for EchoLlm {
    fn default() -> Self {
        Self::new("I heard you.")
    }
}

#[async_trait]
impl LlmProvider for EchoLlm {
    async fn generate(&self, _context: Vec<Turn>, cancel: CancelToken) -> Result<BoxStream<'static, Result<LlmToken>>> {
        let reply = self.reply.clone();
        let tokens: Vec<Result<LlmToken>> = reply
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(tokens).take_while(move |_| {
            let still_running = !cancel.is_cancelled();
            std::future::ready(still_running)
        })))
    }
}

/// Turns each text chunk into one frame of silence (PCM16LE mono, 20ms at
/// 16kHz) so the egress path has something real to push to the client.
pub struct SilentTts {
    samples_per_chunk: usize,
}

impl SilentTts {
    #[must_use]
    pub fn new(samples_per_chunk: usize) -> Self {
        Self { samples_per_chunk }
    }
}

impl Default for SilentTts {
    fn default() -> Self {
        Self::new(320)
    }
}

#[async_trait]
impl TtsProvider for SilentTts {
    async fn synthesize(
        &self,
        text_chunks: BoxStream<'static, String>,
        cancel: CancelToken,
    ) -> Result<BoxStream<'static, Result<TtsChunk>>> {
        use futures_util::StreamExt;
        let frame = vec![0u8; self.samples_per_chunk * 2];
        let audio_stream = text_chunks
            .take_while(move |_| {
                let still_running = !cancel.is_cancelled();
                std::future::ready(still_running)
            })
            .map(move |_chunk| Ok(frame.clone()));
        Ok(Box::pin(audio_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn echo_llm_yields_the_configured_reply() {
        let llm = EchoLlm::new("hi there");
        let mut stream = llm.generate(Vec::new(), CancelToken::new()).await.unwrap();
        let mut out = String::new();
        while let Some(token) = stream.next().await {
            out.push_str(&token.unwrap());
        }
        assert_eq!(out, "hi there");
    }

    #[tokio::test]
    async fn silent_tts_emits_one_frame_per_chunk() {
        let tts = SilentTts::new(10);
        let chunks = stream::iter(vec!["a".to_string(), "b".to_string()]);
        let mut audio = tts.synthesize(Box::pin(chunks), CancelToken::new()).await.unwrap();
        let mut count = 0;
        while let Some(frame) = audio.next().await {
            assert_eq!(frame.unwrap().len(), 20);
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn silent_stt_rejects_odd_length_frames() {
        let stt = SilentStt::default();
        assert!(stt.feed(&[0u8, 1, 2]).is_err());
        assert!(stt.feed(&[0u8, 1, 2, 3]).is_ok());
    }
}
