//! Upstream chat protocol wire types
//!
//! The upstream accepts a single user message per call and answers with a
//! stream of `data: {"type": ..., "delta": ...}` lines ending in
//! `data: [DONE]`.

use crate::ids::IdGenerator;
use serde::{Deserialize, Serialize};

/// Event type carrying a fragment of model output
pub const TEXT_DELTA: &str = "text-delta";

/// Terminal payload of the upstream event stream
pub const DONE_MARKER: &str = "[DONE]";

/// Body of `POST {base}/api/chat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamChatRequest {
    pub id: String,
    pub message: UpstreamMessage,
    pub selected_chat_model: String,
    pub selected_visibility_type: String,
}

impl UpstreamChatRequest {
    /// Build a private single-message request with fresh ids
    pub fn new(ids: &dyn IdGenerator, text: String, model: String) -> Self {
        Self {
            id: ids.new_id(),
            message: UpstreamMessage {
                role: "user".to_string(),
                parts: vec![MessagePart {
                    part_type: "text".to_string(),
                    text,
                }],
                id: ids.new_id(),
            },
            selected_chat_model: model,
            selected_visibility_type: "private".to_string(),
        }
    }

    /// Length of the flattened text being sent
    pub fn text_len(&self) -> usize {
        self.message.parts.iter().map(|p| p.text.len()).sum()
    }
}

/// The single message carried by an upstream request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamMessage {
    pub role: String,
    pub parts: Vec<MessagePart>,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub part_type: String,
    pub text: String,
}

/// One parsed event from the upstream stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
}

impl UpstreamEvent {
    /// Convenience constructor for a text delta
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            event_type: TEXT_DELTA.to_string(),
            delta: Some(delta.into()),
        }
    }

    /// Text carried by this event, if it is a non-empty text delta
    pub fn text_delta(&self) -> Option<&str> {
        if self.event_type != TEXT_DELTA {
            return None;
        }
        self.delta.as_deref().filter(|d| !d.is_empty())
    }
}

/// Outcome of parsing one line of the upstream stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamLine {
    Event(UpstreamEvent),
    Done,
}

/// Parse the payload that follows `data:` on an event-stream line.
///
/// Returns `None` for blank or malformed payloads; callers skip those.
pub fn parse_data(payload: &str) -> Option<UpstreamLine> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_MARKER {
        return Some(UpstreamLine::Done);
    }
    serde_json::from_str::<UpstreamEvent>(payload)
        .ok()
        .map(UpstreamLine::Event)
}

/// Parse a raw line, ignoring anything that is not a `data:` field
pub fn parse_line(line: &str) -> Option<UpstreamLine> {
    line.strip_prefix("data:").and_then(parse_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIdGenerator;

    #[test]
    fn test_request_wire_shape() {
        let ids = SequentialIdGenerator::new("id");
        let req = UpstreamChatRequest::new(
            &ids,
            "[System]\nx".to_string(),
            "anthropic/claude-opus-4.5".to_string(),
        );

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "id-1",
                "message": {
                    "role": "user",
                    "parts": [{"type": "text", "text": "[System]\nx"}],
                    "id": "id-2"
                },
                "selectedChatModel": "anthropic/claude-opus-4.5",
                "selectedVisibilityType": "private"
            })
        );
        assert_eq!(req.text_len(), 10);
    }

    #[test]
    fn test_parse_text_delta_line() {
        let line = r#"data: {"type":"text-delta","delta":"Hel"}"#;
        assert_eq!(
            parse_line(line),
            Some(UpstreamLine::Event(UpstreamEvent::text("Hel")))
        );
    }

    #[test]
    fn test_parse_done_line() {
        assert_eq!(parse_line("data: [DONE]"), Some(UpstreamLine::Done));
        assert_eq!(parse_data("[DONE]"), Some(UpstreamLine::Done));
    }

    #[test]
    fn test_non_data_and_malformed_lines_skipped() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line(": keepalive"), None);
        assert_eq!(parse_line("event: message"), None);
        assert_eq!(parse_line("data: {not json"), None);
        assert_eq!(parse_line("data: "), None);
    }

    #[test]
    fn test_text_delta_filtering() {
        assert_eq!(UpstreamEvent::text("a").text_delta(), Some("a"));
        assert_eq!(UpstreamEvent::text("").text_delta(), None);

        let start = UpstreamEvent {
            event_type: "start-step".to_string(),
            delta: None,
        };
        assert_eq!(start.text_delta(), None);

        let reasoning = UpstreamEvent {
            event_type: "reasoning-delta".to_string(),
            delta: Some("thinking".to_string()),
        };
        assert_eq!(reasoning.text_delta(), None);
    }
}
