//! Anthropic ingress adapter

use crate::dispatcher::{ChatCall, RequestDispatcher};
use crate::translator::Dialect;
use crate::types::IngressResult;
use axum::{Router, body::Bytes, extract::State, response::Response, routing::post};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warpgate_core::conversation::{ChatMessage, Conversation, MessageContent, Role};

/// Anthropic messages request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessagesRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Top-level system prompt (string or array of text blocks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl AnthropicMessagesRequest {
    /// Convert to a dialect-neutral call. A non-empty `system` field becomes
    /// the leading system turn.
    pub fn into_call(self) -> IngressResult<ChatCall> {
        // Validated before the system turn is added, so a bare system prompt is rejected
        let turns = Conversation::new(self.messages)?;

        let mut messages = Vec::with_capacity(turns.len() + 1);
        if let Some(system) = self.system.filter(|s| !s.to_text().is_empty()) {
            messages.push(ChatMessage {
                role: Role::System,
                content: Some(system),
            });
        }
        messages.extend(turns.messages().iter().cloned());

        Ok(ChatCall {
            model: self.model,
            conversation: Conversation::new(messages)?,
            stream: self.stream.unwrap_or(false),
        })
    }
}

/// Anthropic messages response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub role: String,
    pub content: Vec<AnthropicContent>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}

/// Anthropic content block (for responses)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContent {
    Text { text: String },
}

/// Anthropic usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Anthropic streaming event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    ContentBlockDelta {
        index: u32,
        delta: AnthropicContentDelta,
    },
    MessageStop,
}

impl AnthropicStreamEvent {
    /// SSE `event:` name, identical to the `type` tag
    pub fn event_name(&self) -> &'static str {
        match self {
            AnthropicStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            AnthropicStreamEvent::MessageStop => "message_stop",
        }
    }
}

/// Anthropic content delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentDelta {
    TextDelta { text: String },
}

/// Messages endpoint handler
pub async fn messages(
    State(dispatcher): State<Arc<RequestDispatcher>>,
    body: Bytes,
) -> Response {
    dispatcher
        .dispatch(Dialect::Anthropic, || {
            serde_json::from_slice::<AnthropicMessagesRequest>(&body)?.into_call()
        })
        .await
}

/// Create Anthropic router
pub fn router(dispatcher: Arc<RequestDispatcher>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages))
        .with_state(dispatcher)
}
