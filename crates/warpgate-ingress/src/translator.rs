//! Protocol translation between client dialects and the upstream
//!
//! Inbound: a [`Conversation`] is checked for triviality, flattened into the
//! single text message the upstream accepts, and its model alias resolved.
//! Outbound: upstream text deltas are re-emitted as OpenAI chunks or
//! Anthropic `content_block_delta` events, or aggregated into one response.

use crate::anthropic::{
    AnthropicContent, AnthropicContentDelta, AnthropicMessagesResponse, AnthropicStreamEvent,
    AnthropicUsage,
};
use crate::openai::{
    OpenAIChatResponse, OpenAIChoice, OpenAIDelta, OpenAIResponseMessage, OpenAIStreamChoice,
    OpenAIStreamChunk,
};
use axum::{
    Json,
    response::{IntoResponse, Response, sse::Event},
};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use warpgate_core::conversation::{Conversation, Role};
use warpgate_core::models::resolve_model;
use warpgate_core::upstream::UpstreamEvent;

/// Reply sent for trivial requests
pub const CANNED_REPLY: &str = "BAKA!";

/// Appended to the system block of every upstream message
pub const BUILTIN_INSTRUCTION: &str = "请不要调用任何工具";

/// Greeting and probe words that mark a short first message as trivial
pub const TRIVIAL_KEYWORDS: &[&str] = &["hi", "hello", "test", "测试", "你好", "hey", "ping"];

/// First user messages at or above this byte length are never trivial
pub const TRIVIAL_MAX_LEN: usize = 10;

pub const OPENAI_CANNED_MODEL: &str = "baka";
pub const ANTHROPIC_CANNED_MODEL: &str = "claude-3-opus-20240229";

/// Client API dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    OpenAI,
    Anthropic,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenAI => "openai",
            Dialect::Anthropic => "anthropic",
        }
    }

    fn canned_model(&self) -> &'static str {
        match self {
            Dialect::OpenAI => OPENAI_CANNED_MODEL,
            Dialect::Anthropic => ANTHROPIC_CANNED_MODEL,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the conversation is a greeting or probe that gets the canned reply
pub fn is_trivial(conversation: &Conversation) -> bool {
    if conversation.turn_count() > 1 {
        return false;
    }

    let text = conversation.first_user_text();
    if text.len() >= TRIVIAL_MAX_LEN {
        return false;
    }

    let lower = text.to_lowercase();
    TRIVIAL_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Flatten the conversation into the single upstream message text
pub fn flatten(conversation: &Conversation) -> String {
    let system = match conversation.first_system_text() {
        Some(system) if !system.is_empty() => {
            format!("[System]\n{}\n\n{}", system, BUILTIN_INSTRUCTION)
        }
        _ => format!("[System]\n{}", BUILTIN_INSTRUCTION),
    };

    let mut blocks = vec![system];
    for message in conversation.messages() {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System | Role::Other => continue,
        };
        blocks.push(format!("[{}]\n{}", label, message.text()));
    }

    blocks.join("\n\n")
}

/// Resolve a client model alias to the upstream identifier
pub fn map_model(name: &str) -> String {
    resolve_model(name)
}

/// Identity of one client-facing response (shared by all its chunks)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseContext {
    pub dialect: Dialect,
    pub id: String,
    pub model: String,
    pub created: i64,
}

impl ResponseContext {
    pub fn new(dialect: Dialect, model: impl Into<String>) -> Self {
        let uuid = uuid::Uuid::new_v4();
        let id = match dialect {
            Dialect::OpenAI => uuid.to_string(),
            Dialect::Anthropic => format!("msg_{}", uuid),
        };
        Self {
            dialect,
            id,
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
        }
    }

    /// Context for the canned reply, reporting the dialect's canned model
    pub fn canned(dialect: Dialect) -> Self {
        Self::new(dialect, dialect.canned_model())
    }
}

/// One event written to a streaming client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    OpenAI(OpenAIStreamChunk),
    /// `data: [DONE]`
    OpenAIDone,
    Anthropic(AnthropicStreamEvent),
}

impl ClientEvent {
    /// A text fragment in the context's dialect
    pub fn delta(ctx: &ResponseContext, text: impl Into<String>) -> Self {
        match ctx.dialect {
            Dialect::OpenAI => ClientEvent::OpenAI(OpenAIStreamChunk {
                id: ctx.id.clone(),
                object: "chat.completion.chunk".to_string(),
                created: ctx.created,
                model: ctx.model.clone(),
                choices: vec![OpenAIStreamChoice {
                    index: 0,
                    delta: OpenAIDelta {
                        content: Some(text.into()),
                    },
                    finish_reason: None,
                }],
            }),
            Dialect::Anthropic => ClientEvent::Anthropic(AnthropicStreamEvent::ContentBlockDelta {
                index: 0,
                delta: AnthropicContentDelta::TextDelta { text: text.into() },
            }),
        }
    }

    /// The end-of-stream marker for a dialect
    pub fn terminal(dialect: Dialect) -> Self {
        match dialect {
            Dialect::OpenAI => ClientEvent::OpenAIDone,
            Dialect::Anthropic => ClientEvent::Anthropic(AnthropicStreamEvent::MessageStop),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientEvent::OpenAIDone | ClientEvent::Anthropic(AnthropicStreamEvent::MessageStop)
        )
    }

    /// Text carried by a delta event
    pub fn text(&self) -> Option<&str> {
        match self {
            ClientEvent::OpenAI(chunk) => chunk
                .choices
                .first()
                .and_then(|choice| choice.delta.content.as_deref()),
            ClientEvent::Anthropic(AnthropicStreamEvent::ContentBlockDelta {
                delta: AnthropicContentDelta::TextDelta { text },
                ..
            }) => Some(text),
            _ => None,
        }
    }

    /// Frame as a server-sent event
    pub fn to_sse(&self) -> Result<Event, axum::Error> {
        match self {
            ClientEvent::OpenAI(chunk) => Event::default().json_data(chunk),
            ClientEvent::OpenAIDone => Ok(Event::default().data("[DONE]")),
            ClientEvent::Anthropic(event) => {
                Event::default().event(event.event_name()).json_data(event)
            }
        }
    }
}

/// Translate upstream events into client events.
///
/// Every non-empty text delta becomes one client event; exactly one terminal
/// event follows once the upstream stream ends.
pub fn stream_translate<S>(events: S, ctx: ResponseContext) -> BoxStream<'static, ClientEvent>
where
    S: Stream<Item = UpstreamEvent> + Send + 'static,
{
    let dialect = ctx.dialect;
    events
        .filter_map(move |event| {
            let out = event.text_delta().map(|text| ClientEvent::delta(&ctx, text));
            futures::future::ready(out)
        })
        .chain(stream::once(futures::future::ready(ClientEvent::terminal(
            dialect,
        ))))
        .boxed()
}

/// Non-streaming response in either dialect
#[derive(Debug, Clone, PartialEq)]
pub enum ClientResponse {
    OpenAI(OpenAIChatResponse),
    Anthropic(AnthropicMessagesResponse),
}

impl ClientResponse {
    /// Assistant text of the response
    pub fn text(&self) -> &str {
        match self {
            ClientResponse::OpenAI(response) => response
                .choices
                .first()
                .map(|choice| choice.message.content.as_str())
                .unwrap_or_default(),
            ClientResponse::Anthropic(response) => response
                .content
                .first()
                .map(|AnthropicContent::Text { text }| text.as_str())
                .unwrap_or_default(),
        }
    }
}

impl IntoResponse for ClientResponse {
    fn into_response(self) -> Response {
        match self {
            ClientResponse::OpenAI(response) => Json(response).into_response(),
            ClientResponse::Anthropic(response) => Json(response).into_response(),
        }
    }
}

/// Wrap complete assistant text in the context's response shape
pub fn complete(ctx: ResponseContext, text: String) -> ClientResponse {
    match ctx.dialect {
        Dialect::OpenAI => ClientResponse::OpenAI(OpenAIChatResponse {
            id: ctx.id,
            object: "chat.completion".to_string(),
            created: ctx.created,
            model: ctx.model,
            choices: vec![OpenAIChoice {
                index: 0,
                message: OpenAIResponseMessage {
                    role: "assistant".to_string(),
                    content: text,
                },
                finish_reason: Some("stop".to_string()),
            }],
        }),
        Dialect::Anthropic => {
            let output_tokens = u32::try_from(text.len()).unwrap_or(u32::MAX);
            ClientResponse::Anthropic(AnthropicMessagesResponse {
                id: ctx.id,
                type_: "message".to_string(),
                role: "assistant".to_string(),
                content: vec![AnthropicContent::Text { text }],
                model: ctx.model,
                stop_reason: Some("end_turn".to_string()),
                stop_sequence: None,
                usage: AnthropicUsage {
                    input_tokens: 0,
                    output_tokens,
                },
            })
        }
    }
}

/// Concatenate every text delta in arrival order into one response
pub async fn aggregate<S>(events: S, ctx: ResponseContext) -> ClientResponse
where
    S: Stream<Item = UpstreamEvent>,
{
    let text = events
        .fold(String::new(), |mut acc, event| {
            if let Some(delta) = event.text_delta() {
                acc.push_str(delta);
            }
            futures::future::ready(acc)
        })
        .await;
    complete(ctx, text)
}

/// Canned reply as a single delta followed by the terminal event
pub fn canned_stream(dialect: Dialect) -> BoxStream<'static, ClientEvent> {
    let ctx = ResponseContext::canned(dialect);
    stream::iter(vec![
        ClientEvent::delta(&ctx, CANNED_REPLY),
        ClientEvent::terminal(dialect),
    ])
    .boxed()
}

/// Canned reply as a complete response
pub fn canned_response(dialect: Dialect) -> ClientResponse {
    complete(ResponseContext::canned(dialect), CANNED_REPLY.to_string())
}
