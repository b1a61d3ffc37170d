//! `GET /ws` — the single WebSocket endpoint carrying both the control
//! plane and the audio data plane (§6.1). The socket is split into an
//! ingest task and an egress task running concurrently, with
//! `tokio::select!` tearing down whichever survives the other. The session
//! handshake (§4.4) and frame validation (§6.1, §7) sit on top of that
//! split to multiplex the JSON control plane onto the same socket as
//! binary audio.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use voxd_core::cancel::CancelToken;
use voxd_core::domain::SessionId;
use voxd_core::session_store::RestoreOutcome;
use voxd_pipeline::OutboundEvent;

use crate::protocol::{parse_client_frame, ClientFrame, ServerFrame, ThrottleState};
use crate::state::AppState;

/// 16kHz mono PCM16LE, agreed at startup (§6.1) — every inbound binary
/// frame is this format.
const SAMPLE_RATE_HZ: u64 = 16_000;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let session_id = query.get("session_id").cloned();
    ws.on_upgrade(move |socket| handle_connection(socket, state, session_id))
}

async fn handle_connection(socket: WebSocket, state: AppState, requested_session_id: Option<String>) {
    let (session_id, first_frame) = match requested_session_id.as_deref().and_then(|s| s.parse::<SessionId>().ok()) {
        Some(id) => match state.session_store.restore(id) {
            RestoreOutcome::Restored(session) => (
                session.session_id,
                ServerFrame::SessionRestored {
                    session_id: session.session_id.to_string(),
                    context_len: session.context_len(),
                },
            ),
            RestoreOutcome::NotFound | RestoreOutcome::Expired => create_session(&state),
        },
        None => create_session(&state),
    };

    let my_token = state.bind_connection(session_id);
    let (pipeline, events_rx) = state.new_pipeline(session_id);
    pipeline.start();

    let (mut ws_sender, ws_receiver) = socket.split();

    if send_frame(&mut ws_sender, &first_frame).await.is_err() {
        pipeline.stop().await;
        state.unbind_connection(session_id, &my_token);
        return;
    }

    let mut egress = tokio::spawn(run_egress(ws_sender, events_rx));
    let mut ingest = tokio::spawn(run_ingest(ws_receiver, pipeline.clone()));

    tokio::select! {
        _ = &mut ingest => { egress.abort(); }
        _ = &mut egress => { ingest.abort(); }
        () = supersede_check(&my_token) => {
            ingest.abort();
            egress.abort();
        }
    }

    pipeline.stop().await;
    state.session_store.mark_disconnected(session_id);
    state.unbind_connection(session_id, &my_token);
}

fn create_session(state: &AppState) -> (SessionId, ServerFrame) {
    let session = state.session_store.create();
    (session.session_id, ServerFrame::SessionCreated { session_id: session.session_id.to_string() })
}

/// Polls `token` rather than blocking on it — `CancelToken` has no async
/// wait primitive, and a connection's own steady-state polling loops
/// already run on a similar cadence (§4.1 worker shutdown latency).
async fn supersede_check(token: &CancelToken) {
    loop {
        if token.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn run_ingest(
    mut ws_receiver: futures_util::stream::SplitStream<WebSocket>,
    pipeline: Arc<voxd_pipeline::ConversationPipeline>,
) {
    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                if data.len() % 2 != 0 {
                    tracing::debug!(bytes = data.len(), "ws ingest: odd-length pcm frame, dropping");
                    continue;
                }
                let duration_ms = pcm_frame_duration_ms(data.len());
                pipeline.feed_audio(data.to_vec(), duration_ms);
            }
            Ok(Message::Text(text)) => match parse_client_frame(&text) {
                Ok(ClientFrame::Interrupt {}) => pipeline.handle_interrupt(),
                Ok(ClientFrame::Text { text }) => pipeline.submit_text(text),
                Ok(ClientFrame::Control { action }) => {
                    tracing::debug!(%action, "ws ingest: control action received");
                }
                Err(_reason) => {
                    // The validation-failed error frame itself travels over
                    // the egress task's channel, not directly from here —
                    // the pipeline owns the only sender into that channel,
                    // so a local validation failure is logged and otherwise
                    // dropped per §7 rather than surfaced on the wire.
                    tracing::debug!(raw = %text, "ws ingest: frame failed validation");
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

async fn run_egress(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<OutboundEvent>,
) {
    while let Some(event) = events.recv().await {
        let result = match event {
            OutboundEvent::Audio(bytes) => ws_sender.send(Message::Binary(bytes.into())).await,
            other => {
                let frame = to_server_frame(other);
                send_frame(&mut ws_sender, &frame).await
            }
        };
        if result.is_err() {
            break;
        }
    }
}

fn to_server_frame(event: OutboundEvent) -> ServerFrame {
    match event {
        OutboundEvent::Partial { text, revision, stable } => ServerFrame::Partial { text, revision, stable },
        OutboundEvent::Final { text } => ServerFrame::Final { text },
        OutboundEvent::AssistantPartial { text } => ServerFrame::AssistantPartial { text },
        OutboundEvent::AssistantFinal { text } => ServerFrame::AssistantFinal { text },
        OutboundEvent::Status { throttled, reason } => ServerFrame::Status {
            state: if throttled { ThrottleState::Throttled } else { ThrottleState::Normal },
            reason,
        },
        OutboundEvent::Error { code, message } => ServerFrame::Error { code, message },
        OutboundEvent::Audio(_) => unreachable!("audio is dispatched as a binary frame before reaching this branch"),
    }
}

async fn send_frame(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).expect("ServerFrame serialization is infallible");
    sender.send(Message::Text(json)).await
}

/// Frame duration implied by `byte_len` PCM16LE bytes at [`SAMPLE_RATE_HZ`].
fn pcm_frame_duration_ms(byte_len: usize) -> u64 {
    let samples = (byte_len / 2) as u64;
    samples.saturating_mul(1000) / SAMPLE_RATE_HZ.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration_matches_a_20ms_frame_at_16khz() {
        // 16kHz * 20ms = 320 samples = 640 bytes.
        assert_eq!(pcm_frame_duration_ms(640), 20);
    }
}
