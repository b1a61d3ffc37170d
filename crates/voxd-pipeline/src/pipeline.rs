//! The Pipeline Manager (§4.6): one conversational turn at a time, with
//! barge-in and an optional speculative-generation fast path.
//!
//! The state-machine shape is an explicit enum driven by event handlers,
//! with every exit path going through a single stop/cancel routine. The
//! states themselves, the commit/speculative/barge-in logic, and the
//! STT/LLM/TTS fan-out are new.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::{mpsc, Notify};

use voxd_core::cancel::{CancelGroup, CancelToken};
use voxd_core::config::PipelineConfig;
use voxd_core::metrics::PipelineMetrics;
use voxd_core::{FinalTranscript, PartialTranscript, Role, Turn};
use voxd_core::ports::{IncrementalStt, LlmProvider, TtsProvider};
use voxd_core::trace::PipelineEvent as TraceEvent;
use voxd_runtime::thermal::ThermalController;
use voxd_runtime::worker::{ShouldStop, WorkerHandle};

use crate::similarity::blended_similarity;
use crate::turn_detector::TurnDetector;

/// Conversation turns are append-only context external to this crate
/// (owned by the session store); this is the seam through which the
/// pipeline reads/writes them without depending on the session crate.
pub trait TurnContext: Send + Sync {
    fn context_snapshot(&self) -> Vec<Turn>;
    fn append_turn(&self, turn: Turn);
}

/// §4.6.5 state machine. `Interrupted` is a transient label applied while
/// unwinding a barge-in; the resting states are the five named here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Listening,
    Committing,
    Generating,
    Speaking,
}

/// Everything the Pipeline Manager can hand the transport layer. Session
/// lifecycle frames (`session_created`/`session_restored`) are the
/// connection session's concern, not this crate's (§4.4 vs §4.6).
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    Partial { text: String, revision: u64, stable: bool },
    Final { text: String },
    AssistantPartial { text: String },
    AssistantFinal { text: String },
    Status { throttled: bool, reason: Option<String> },
    Error { code: &'static str, message: String },
    Audio(Vec<u8>),
}

/// A bounded queue that drops the oldest entry on overflow rather than
/// rejecting the newest — the audio-ingress policy in §5 ("we always prefer
/// the newest audio for real-time STT").
struct DroppingQueue<T> {
    items: std::sync::Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T: Send> DroppingQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: std::sync::Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, item: T) {
        {
            let mut items = self.items.lock().expect("audio queue lock poisoned");
            if items.len() >= self.capacity {
                items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.items.lock().expect("audio queue lock poisoned").pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }
}

/// Minimal energy gate used only to detect "speech above noise" for
/// barge-in (§4.6.2): accumulates consecutive above-threshold duration and
/// resets on silence. Not a full VAD — full speech-boundary detection
/// belongs to the STT engine, out of this crate's scope.
struct BargeInGate {
    accumulated_ms: std::sync::atomic::AtomicU64,
}

impl BargeInGate {
    fn new() -> Self {
        Self {
            accumulated_ms: AtomicU64::new(0),
        }
    }

    /// `frame` is mono little-endian int16 PCM (§6.1). Returns the updated
    /// accumulated above-noise duration.
    fn observe(&self, frame: &[u8], frame_duration_ms: u64) -> u64 {
        if is_speech_above_noise(frame) {
            self.accumulated_ms.fetch_add(frame_duration_ms, Ordering::SeqCst) + frame_duration_ms
        } else {
            self.accumulated_ms.store(0, Ordering::SeqCst);
            0
        }
    }

    fn reset(&self) {
        self.accumulated_ms.store(0, Ordering::SeqCst);
    }
}

const NOISE_FLOOR_RMS: f64 = 800.0;

fn is_speech_above_noise(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let samples: Vec<i16> = frame
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    if samples.is_empty() {
        return false;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    rms > NOISE_FLOOR_RMS
}

struct SpeculativeState {
    text_so_far: std::sync::Mutex<String>,
    token: CancelToken,
    done: AtomicBool,
}

/// One connection's worth of turn orchestration. Construct with the three
/// external ports, start the steady workers, then feed it audio frames and
/// control events as they arrive from the transport layer.
pub struct ConversationPipeline {
    config: PipelineConfig,
    stt: Arc<dyn IncrementalStt>,
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TtsProvider>,
    turn_detector: TurnDetector,
    thermal: Option<Arc<ThermalController>>,
    context: Arc<dyn TurnContext>,
    metrics: Arc<PipelineMetrics>,
    events: mpsc::UnboundedSender<OutboundEvent>,

    state: std::sync::Mutex<PipelineState>,
    audio_queue: Arc<DroppingQueue<Vec<u8>>>,
    barge_in: BargeInGate,
    cancel_group: Arc<CancelGroup>,
    speculative: std::sync::Mutex<Option<Arc<SpeculativeState>>>,

    current_partial: std::sync::Mutex<Option<PartialTranscript>>,
    current_wait_s: std::sync::Mutex<f64>,
    last_change: std::sync::Mutex<Instant>,
    next_revision: AtomicU64,

    workers: std::sync::Mutex<Vec<WorkerHandle>>,
    turn_in_flight: AtomicBool,
    session_label: String,
}

impl ConversationPipeline {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_label: impl Into<String>,
        config: PipelineConfig,
        turn_detector: TurnDetector,
        stt: Arc<dyn IncrementalStt>,
        llm: Arc<dyn LlmProvider>,
        tts: Arc<dyn TtsProvider>,
        thermal: Option<Arc<ThermalController>>,
        context: Arc<dyn TurnContext>,
        metrics: Arc<PipelineMetrics>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let pipeline = Arc::new(Self {
            audio_queue: Arc::new(DroppingQueue::new(config.audio_queue_max)),
            config,
            stt,
            llm,
            tts,
            turn_detector,
            thermal,
            context,
            metrics,
            events,
            state: std::sync::Mutex::new(PipelineState::Idle),
            barge_in: BargeInGate::new(),
            cancel_group: Arc::new(CancelGroup::new()),
            speculative: std::sync::Mutex::new(None),
            current_partial: std::sync::Mutex::new(None),
            current_wait_s: std::sync::Mutex::new(0.0),
            last_change: std::sync::Mutex::new(Instant::now()),
            next_revision: AtomicU64::new(1),
            workers: std::sync::Mutex::new(Vec::new()),
            turn_in_flight: AtomicBool::new(false),
            session_label: session_label.into(),
        });
        (pipeline, events_rx)
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.lock().expect("pipeline state lock poisoned")
    }

    fn set_state(&self, new_state: PipelineState) {
        *self.state.lock().expect("pipeline state lock poisoned") = new_state;
    }

    fn emit(&self, event: OutboundEvent) {
        let _ = self.events.send(event);
    }

    /// Start the steady-state workers: STT revision consumer and the
    /// turn-end commit timer. Audio ingress has no dedicated worker of its
    /// own — frames are pulled by the STT feeder task below.
    pub fn start(self: &Arc<Self>) {
        let revisions_worker = WorkerHandle::new(format!("{}-stt-revisions", self.session_label));
        let pipeline = self.clone();
        let _ = revisions_worker.start(move |should_stop: ShouldStop| async move {
            pipeline.run_revisions_loop(should_stop).await;
        });

        let feeder_worker = WorkerHandle::new(format!("{}-audio-feeder", self.session_label));
        let pipeline = self.clone();
        let _ = feeder_worker.start(move |should_stop: ShouldStop| async move {
            pipeline.run_audio_feeder(should_stop).await;
        });

        let timer_worker = WorkerHandle::new(format!("{}-commit-timer", self.session_label));
        let pipeline = self.clone();
        let _ = timer_worker.start(move |should_stop: ShouldStop| async move {
            pipeline.run_commit_timer(should_stop).await;
        });

        *self.workers.lock().expect("workers lock poisoned") =
            vec![revisions_worker, feeder_worker, timer_worker];
    }

    /// Disconnect path (§4.4): stop every worker, cancel any in-flight
    /// turn exactly as a barge-in would.
    pub async fn stop(&self) {
        self.cancel_group.cancel("turn");
        let workers = std::mem::take(&mut *self.workers.lock().expect("workers lock poisoned"));
        for worker in &workers {
            worker
                .stop_and_join(Duration::from_secs_f64(self.config.tts_first_chunk_timeout_s.max(1.0)))
                .await;
        }
    }

    /// Push one PCM frame from the transport layer. `frame_duration_ms` is
    /// the caller-known duration of this frame (fixed by the audio format
    /// agreed at startup).
    pub fn feed_audio(&self, frame: Vec<u8>, frame_duration_ms: u64) {
        if self.state() == PipelineState::Speaking {
            let accumulated = self.barge_in.observe(&frame, frame_duration_ms);
            if accumulated >= self.config.barge_in_ms {
                self.barge_in.reset();
                self.trigger_barge_in();
            }
        } else {
            self.barge_in.reset();
        }
        self.audio_queue.push(frame);
    }

    /// Explicit `interrupt` control message (§4.6.2).
    pub fn handle_interrupt(&self) {
        if matches!(self.state(), PipelineState::Generating | PipelineState::Speaking) {
            self.trigger_barge_in();
        }
    }

    /// `text` control message (§6.1): bypass STT entirely and commit this
    /// text as a turn, as if the turn-end detector had just fired on it. If
    /// a turn is already in flight this is dropped per the resource-
    /// overflow policy in §7 rather than queued.
    pub fn submit_text(self: &Arc<Self>, text: String) {
        if self.turn_in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!(session = %self.session_label, "text submitted while a turn was in flight; dropping");
            return;
        }
        self.turn_detector.reset();
        *self.current_partial.lock().expect("partial lock poisoned") = None;
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.commit_turn(text).await;
            pipeline.turn_in_flight.store(false, Ordering::SeqCst);
        });
    }

    fn trigger_barge_in(&self) {
        tracing::info!(session = %self.session_label, "barge-in");
        TraceEvent::BargeIn {
            session_id: self.session_label.clone(),
            spoken_chars: 0,
        }
        .emit();
        self.metrics.record_interruption();
        self.cancel_group.cancel("turn");
        self.set_state(PipelineState::Listening);
    }

    async fn run_audio_feeder(&self, should_stop: ShouldStop) {
        while !should_stop.is_set() {
            let frame = self.audio_queue.pop().await;
            if should_stop.is_set() {
                break;
            }
            if let Err(err) = self.stt.feed(&frame) {
                tracing::warn!(session = %self.session_label, %err, "stt feed failed");
            }
        }
    }

    async fn run_revisions_loop(self: &Arc<Self>, should_stop: ShouldStop) {
        let mut revisions = self.stt.revisions();
        while !should_stop.is_set() {
            match tokio::time::timeout(Duration::from_millis(200), revisions.next()).await {
                Ok(Some(revision)) => self.handle_partial(revision.text, revision.revision, revision.stable),
                Ok(None) => {
                    tracing::warn!(session = %self.session_label, "stt revision stream ended");
                    self.emit(OutboundEvent::Error {
                        code: "stt_lost",
                        message: "speech recognition worker was lost".to_string(),
                    });
                    self.metrics.record_stt_restart();
                    if self.stt.restart().await.is_err() {
                        break;
                    }
                    revisions = self.stt.revisions();
                }
                Err(_elapsed) => {} // just re-check should_stop
            }
        }
    }

    fn handle_partial(&self, text: String, revision: u64, stable: bool) {
        if self.state() == PipelineState::Idle {
            self.set_state(PipelineState::Listening);
        }

        let wait = self.turn_detector.process(&text);
        *self.current_wait_s.lock().expect("wait lock poisoned") = wait;
        *self.current_partial.lock().expect("partial lock poisoned") =
            Some(PartialTranscript::new(text.clone(), revision, stable));
        *self.last_change.lock().expect("last-change lock poisoned") = Instant::now();

        self.emit(OutboundEvent::Partial { text, revision, stable });
    }

    async fn run_commit_timer(self: &Arc<Self>, should_stop: ShouldStop) {
        let mut ticker = tokio::time::interval(Duration::from_millis(50));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        while !should_stop.is_set() {
            ticker.tick().await;
            if should_stop.is_set() {
                break;
            }
            if self.state() != PipelineState::Listening {
                continue;
            }
            if self.turn_in_flight.load(Ordering::SeqCst) {
                continue;
            }

            let elapsed = self.last_change.lock().expect("last-change lock poisoned").elapsed();

            if self.config.speculative_enabled
                && self.speculative.lock().expect("speculative lock poisoned").is_none()
                && elapsed.as_millis() as u64 >= self.config.stable_ms
            {
                self.maybe_start_speculative();
            }

            let wait = *self.current_wait_s.lock().expect("wait lock poisoned");
            if elapsed.as_secs_f64() < wait {
                continue;
            }

            let partial = self.current_partial.lock().expect("partial lock poisoned").clone();
            let Some(partial) = partial else { continue };
            let candidate = FinalTranscript::new(partial.text);
            if !candidate.has_minimum_content(self.turn_detector.min_commit_chars()) {
                continue;
            }

            self.turn_in_flight.store(true, Ordering::SeqCst);
            let pipeline = self.clone();
            tokio::spawn(async move {
                pipeline.commit_turn(candidate.text).await;
                pipeline.turn_in_flight.store(false, Ordering::SeqCst);
            });
        }
    }

    async fn commit_turn(self: &Arc<Self>, final_text: String) {
        self.set_state(PipelineState::Committing);
        self.turn_detector.reset();
        self.emit(OutboundEvent::Final { text: final_text.clone() });
        TraceEvent::TurnCommitted {
            session_id: self.session_label.clone(),
            chars: final_text.len(),
        }
        .emit();
        self.context.append_turn(Turn::new(Role::User, final_text.clone()));

        if let Some(thermal) = &self.thermal {
            if thermal.snapshot().protection_active {
                self.emit(OutboundEvent::Status { throttled: true, reason: Some("thermal".to_string()) });
                while thermal.snapshot().protection_active {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                self.emit(OutboundEvent::Status { throttled: false, reason: None });
            }
        }

        let adopted_speculative = self.take_matching_speculative(&final_text);
        self.set_state(PipelineState::Generating);

        let turn_token = self.cancel_group.register("turn");
        let llm_token = self.cancel_group.register("turn:llm");
        let tts_token = self.cancel_group.register("turn:tts");
        self.cancel_group.add_to_group("turn", "turn:llm");
        self.cancel_group.add_to_group("turn", "turn:tts");

        let context = if adopted_speculative.is_some() {
            Vec::new() // speculative stream already owns its context snapshot
        } else {
            self.context.context_snapshot()
        };

        let started_at = Instant::now();
        let result = self
            .run_generation(context, llm_token, tts_token, turn_token.clone(), adopted_speculative)
            .await;

        match result {
            TurnOutcome::Completed { spoken_text, first_audio_at } => {
                if let Some(first_audio_at) = first_audio_at {
                    self.metrics
                        .record_ttfa_ms(first_audio_at.saturating_duration_since(started_at).as_millis() as u64);
                }
                self.context.append_turn(Turn::new(Role::Assistant, spoken_text.clone()));
                self.emit(OutboundEvent::AssistantFinal { text: spoken_text });
                self.metrics.record_turn_completed();
            }
            TurnOutcome::Interrupted { spoken_text } => {
                self.context.append_turn(Turn::new(Role::Assistant, spoken_text));
            }
            TurnOutcome::LlmEmpty => {
                self.metrics.record_llm_error();
                self.emit(OutboundEvent::Error {
                    code: "llm_empty",
                    message: "assistant produced no response".to_string(),
                });
            }
            TurnOutcome::TtsFailed { spoken_text } => {
                self.metrics.record_tts_error();
                if !spoken_text.is_empty() {
                    self.context.append_turn(Turn::new(Role::Assistant, spoken_text.clone()));
                }
                self.emit(OutboundEvent::AssistantFinal { text: spoken_text });
                self.emit(OutboundEvent::Error {
                    code: "tts_error",
                    message: "speech synthesis failed".to_string(),
                });
            }
        }

        self.cancel_group.remove("turn");
        self.cancel_group.remove("turn:llm");
        self.cancel_group.remove("turn:tts");
        if self.state() != PipelineState::Listening {
            self.set_state(PipelineState::Listening);
        }
    }

    /// §4.6.3: while still listening, once the partial has held steady for
    /// `stable_ms` and ends on a strong boundary, start generating a
    /// response against it ahead of the actual commit. At most one
    /// speculative attempt runs at a time.
    fn maybe_start_speculative(self: &Arc<Self>) {
        let partial = self.current_partial.lock().expect("partial lock poisoned").clone();
        let Some(partial) = partial else { return };
        let normalized = crate::similarity::normalize_text(&partial.text);
        if !matches!(normalized.trim_end().chars().next_back(), Some('.' | '!' | '?')) {
            return;
        }
        if !FinalTranscript::new(partial.text.clone()).has_minimum_content(self.turn_detector.min_commit_chars()) {
            return;
        }

        let token = self.cancel_group.register("speculative");
        let state = Arc::new(SpeculativeState {
            text_so_far: std::sync::Mutex::new(String::new()),
            token: token.clone(),
            done: AtomicBool::new(false),
        });
        *self.speculative.lock().expect("speculative lock poisoned") = Some(state.clone());

        let llm = self.llm.clone();
        let context = self.context.context_snapshot();
        let session = self.session_label.clone();
        tokio::spawn(async move {
            let Ok(mut stream) = llm.generate(context, token.clone()).await else {
                state.done.store(true, Ordering::SeqCst);
                return;
            };
            while let Some(next) = stream.next().await {
                if token.is_cancelled() {
                    break;
                }
                match next {
                    Ok(chunk) => {
                        state
                            .text_so_far
                            .lock()
                            .expect("speculative text lock poisoned")
                            .push_str(&chunk);
                    }
                    Err(_) => break,
                }
            }
            state.done.store(true, Ordering::SeqCst);
            tracing::debug!(session = %session, "speculative generation finished");
        });
    }

    fn take_matching_speculative(&self, final_text: &str) -> Option<Arc<SpeculativeState>> {
        let mut guard = self.speculative.lock().expect("speculative lock poisoned");
        let Some(state) = guard.take() else { return None };
        let spoken_so_far = state.text_so_far.lock().expect("speculative text lock poisoned").clone();
        let similarity = blended_similarity(final_text, &spoken_so_far, self.config.tail_words, 0.6);
        if similarity >= self.config.sim_threshold {
            TraceEvent::SpeculativeAdopted {
                session_id: self.session_label.clone(),
                similarity,
            }
            .emit();
            Some(state)
        } else {
            TraceEvent::SpeculativeDiscarded {
                session_id: self.session_label.clone(),
                similarity,
            }
            .emit();
            state.token.cancel();
            None
        }
    }

    /// Runs one turn's (LLM or adopted-speculative)→splitter→TTS→egress
    /// fan-out to completion, interruption, or failure. When `adopted` is
    /// `Some`, the response text was already generated ahead of the commit
    /// (§4.6.3); this skips the LLM call entirely and feeds that text
    /// straight to the splitter, which is where the latency win comes from.
    /// TTS itself still runs fresh in both cases — pre-synthesizing audio
    /// for a not-yet-adopted speculative guess is out of scope here.
    async fn run_generation(
        self: &Arc<Self>,
        context: Vec<Turn>,
        llm_token: CancelToken,
        tts_token: CancelToken,
        turn_token: CancelToken,
        adopted: Option<Arc<SpeculativeState>>,
    ) -> TurnOutcome {
        let (chunk_tx, chunk_rx) = mpsc::channel::<String>(self.config.llm_tts_queue_max.max(1));
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(self.config.tts_egress_queue_max.max(1));

        let spoken_accum = Arc::new(std::sync::Mutex::new(String::new()));
        let splitter_accum = spoken_accum.clone();
        let chunk_max_chars = self.config.tts_chunk_max_chars;

        let llm_task = if let Some(state) = adopted {
            tokio::spawn(async move {
                let deadline = Instant::now() + Duration::from_millis(500);
                while !state.done.load(Ordering::SeqCst) && Instant::now() < deadline {
                    if llm_token.is_cancelled() {
                        return false;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                let text = state.text_so_far.lock().expect("speculative text lock poisoned").clone();
                if text.is_empty() {
                    return false;
                }
                splitter_accum.lock().expect("speculative text lock poisoned").push_str(&text);
                let mut splitter = crate::splitter::ChunkSplitter::new(chunk_max_chars);
                for chunk in splitter.push_token(&text) {
                    if chunk_tx.send(chunk).await.is_err() {
                        return true;
                    }
                }
                if let Some(tail) = splitter.flush() {
                    let _ = chunk_tx.send(tail).await;
                }
                true
            })
        } else {
            let llm = self.llm.clone();
            let total_timeout_s = self.config.llm_total_timeout_s;
            let first_token_timeout_s = self.config.llm_first_token_timeout_s;
            tokio::spawn(async move {
                let stream = match tokio::time::timeout(
                    Duration::from_secs_f64(first_token_timeout_s),
                    llm.generate(context, llm_token.clone()),
                )
                .await
                {
                    Ok(Ok(stream)) => stream,
                    _ => return false,
                };
                let mut stream = stream;
                let mut any_token = false;
                let mut splitter = crate::splitter::ChunkSplitter::new(chunk_max_chars);
                let total_timeout = tokio::time::sleep(Duration::from_secs_f64(total_timeout_s));
                tokio::pin!(total_timeout);
                loop {
                    tokio::select! {
                        () = &mut total_timeout => break,
                        next = stream.next() => {
                            match next {
                                Some(Ok(token)) => {
                                    any_token = true;
                                    splitter_accum.lock().expect("speculative text lock poisoned").push_str(&token);
                                    for chunk in splitter.push_token(&token) {
                                        if chunk_tx.send(chunk).await.is_err() || llm_token.is_cancelled() {
                                            return any_token;
                                        }
                                    }
                                    if llm_token.is_cancelled() {
                                        return any_token;
                                    }
                                }
                                Some(Err(_)) | None => break,
                            }
                        }
                    }
                }
                if let Some(tail) = splitter.flush() {
                    let _ = chunk_tx.send(tail).await;
                }
                any_token
            })
        };

        let tts = self.tts.clone();
        let tts_cancel_for_stream = tts_token.clone();
        let chunk_stream = tokio_stream::wrappers::ReceiverStream::new(chunk_rx);
        let tts_task = tokio::spawn(async move {
            let Ok(mut audio_stream) = tts
                .synthesize(Box::pin(chunk_stream), tts_cancel_for_stream.clone())
                .await
            else {
                return false;
            };
            let mut produced = false;
            while let Some(result) = audio_stream.next().await {
                if tts_cancel_for_stream.is_cancelled() {
                    break;
                }
                match result {
                    Ok(audio) => {
                        produced = true;
                        if audio_tx.send(audio).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            produced
        });

        let mut first_audio_at = None;
        self.set_state(PipelineState::Speaking);
        loop {
            if turn_token.is_cancelled() {
                break;
            }
            match tokio::time::timeout(Duration::from_millis(200), audio_rx.recv()).await {
                Ok(Some(audio)) => {
                    if turn_token.is_cancelled() {
                        break;
                    }
                    if first_audio_at.is_none() {
                        first_audio_at = Some(Instant::now());
                    }
                    self.emit(OutboundEvent::Audio(audio));
                    self.emit(OutboundEvent::AssistantPartial {
                        text: spoken_accum.lock().expect("speculative text lock poisoned").clone(),
                    });
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    if llm_task.is_finished() && tts_task.is_finished() {
                        break;
                    }
                }
            }
        }

        let interrupted = turn_token.is_cancelled();
        let any_llm_token = llm_task.await.unwrap_or(false);
        let tts_ok = tts_task.await.unwrap_or(false);
        let spoken_text = spoken_accum.lock().expect("speculative text lock poisoned").clone();

        if interrupted {
            TurnOutcome::Interrupted { spoken_text }
        } else if !any_llm_token {
            TurnOutcome::LlmEmpty
        } else if !tts_ok && !spoken_text.is_empty() {
            TurnOutcome::TtsFailed { spoken_text }
        } else {
            TurnOutcome::Completed { spoken_text, first_audio_at }
        }
    }
}

enum TurnOutcome {
    Completed { spoken_text: String, first_audio_at: Option<Instant> },
    Interrupted { spoken_text: String },
    LlmEmpty,
    TtsFailed { spoken_text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_above_noise_detects_loud_frames() {
        let loud: Vec<u8> = (0..200i16)
            .flat_map(|_| 20000i16.to_le_bytes())
            .collect();
        let quiet: Vec<u8> = (0..200i16).flat_map(|_| 10i16.to_le_bytes()).collect();
        assert!(is_speech_above_noise(&loud));
        assert!(!is_speech_above_noise(&quiet));
    }

    #[test]
    fn barge_in_gate_accumulates_then_resets_on_silence() {
        let gate = BargeInGate::new();
        let loud: Vec<u8> = (0..200i16).flat_map(|_| 20000i16.to_le_bytes()).collect();
        let quiet: Vec<u8> = (0..200i16).flat_map(|_| 10i16.to_le_bytes()).collect();
        assert_eq!(gate.observe(&loud, 20), 20);
        assert_eq!(gate.observe(&loud, 20), 40);
        assert_eq!(gate.observe(&quiet, 20), 0);
    }

    #[tokio::test]
    async fn dropping_queue_keeps_only_the_newest_entries() {
        let queue: DroppingQueue<u32> = DroppingQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.pop().await, 2);
        assert_eq!(queue.pop().await, 3);
    }
}
