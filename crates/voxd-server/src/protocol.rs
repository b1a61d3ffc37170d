//! Wire protocol for `/ws` (§6.1): JSON control frames multiplexed with
//! binary PCM frames on one WebSocket. Server and client frames are kept as
//! separate enums — a server never deserializes its own output, and the
//! discriminated `type` tag reads the same on both sides.

use serde::{Deserialize, Serialize};

/// Inbound text frames accept at most this many characters in a `text`
/// message body (§6.1).
pub const MAX_TEXT_CHARS: usize = 5000;

/// Control frames the server sends to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    SessionCreated {
        session_id: String,
    },
    SessionRestored {
        session_id: String,
        context_len: usize,
    },
    Partial {
        text: String,
        revision: u64,
        stable: bool,
    },
    Final {
        text: String,
    },
    AssistantPartial {
        text: String,
    },
    AssistantFinal {
        text: String,
    },
    Status {
        state: ThrottleState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleState {
    Throttled,
    Normal,
}

/// Control frames the client sends to the server. Deserialized from a raw
/// JSON `Value` by [`parse_client_frame`] so an unknown/malformed frame can
/// be reported as a `validation_failed` error instead of killing the
/// connection (§7).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ClientFrame {
    Interrupt {},
    Text { text: String },
    Control { action: String },
}

/// Parse one inbound text frame, enforcing §6.1's validation rules:
/// `type` must be present and one of the known variants, unknown fields are
/// rejected, and a `text` body is capped at [`MAX_TEXT_CHARS`]. Returns the
/// sanitized validation-failure reason on any rejection — never panics on
/// attacker-controlled input.
pub fn parse_client_frame(raw: &str) -> Result<ClientFrame, String> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| "malformed json".to_string())?;

    let Some(type_field) = value.get("type").and_then(serde_json::Value::as_str) else {
        return Err("missing or non-string \"type\" field".to_string());
    };
    if type_field.is_empty() {
        return Err("\"type\" field must not be empty".to_string());
    }

    let frame: ClientFrame =
        serde_json::from_value(value).map_err(|err| format!("unrecognized frame: {err}"))?;

    if let ClientFrame::Text { text } = &frame {
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(format!("text exceeds {MAX_TEXT_CHARS} characters"));
        }
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_round_trips() {
        let frame = parse_client_frame(r#"{"type":"interrupt"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Interrupt {}));
    }

    #[test]
    fn text_frame_over_the_limit_is_rejected() {
        let body = "a".repeat(MAX_TEXT_CHARS + 1);
        let raw = serde_json::json!({"type": "text", "text": body}).to_string();
        assert!(parse_client_frame(&raw).is_err());
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(parse_client_frame(r#"{"text":"hi"}"#).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(parse_client_frame(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn unknown_field_on_a_known_type_is_rejected() {
        assert!(parse_client_frame(r#"{"type":"interrupt","extra":1}"#).is_err());
    }

    #[test]
    fn control_action_round_trips() {
        let frame = parse_client_frame(r#"{"type":"control","action":"mute"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Control { action } if action == "mute"));
    }
}
