//! OpenAI ingress adapter
//!
//! - POST /v1/chat/completions
//! - GET /v1/models

use crate::dispatcher::{ChatCall, RequestDispatcher};
use crate::translator::Dialect;
use crate::types::IngressResult;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    response::Response,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warpgate_core::conversation::{ChatMessage, Conversation};
use warpgate_core::models::{MODEL_CREATED, MODEL_OWNER, model_aliases};

/// OpenAI chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl OpenAIChatRequest {
    pub fn into_call(self) -> IngressResult<ChatCall> {
        Ok(ChatCall {
            model: self.model,
            conversation: Conversation::new(self.messages)?,
            stream: self.stream.unwrap_or(false),
        })
    }
}

/// OpenAI chat completion response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAIChoice>,
}

/// OpenAI choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIChoice {
    pub index: u32,
    pub message: OpenAIResponseMessage,
    pub finish_reason: Option<String>,
}

/// Assistant message in a completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIResponseMessage {
    pub role: String,
    pub content: String,
}

/// OpenAI stream chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIStreamChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAIStreamChoice>,
}

/// OpenAI stream choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIStreamChoice {
    pub index: u32,
    pub delta: OpenAIDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// OpenAI delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// `GET /v1/models` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelList {
    /// Every model alias, sorted by id
    pub fn aliases() -> Self {
        let mut data: Vec<ModelObject> = model_aliases()
            .map(|id| ModelObject {
                id: id.to_string(),
                object: "model".to_string(),
                created: MODEL_CREATED,
                owned_by: MODEL_OWNER.to_string(),
            })
            .collect();
        data.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            object: "list".to_string(),
            data,
        }
    }
}

/// Chat completions handler
pub async fn chat_completions(
    State(dispatcher): State<Arc<RequestDispatcher>>,
    body: Bytes,
) -> Response {
    dispatcher
        .dispatch(Dialect::OpenAI, || {
            serde_json::from_slice::<OpenAIChatRequest>(&body)?.into_call()
        })
        .await
}

/// Models handler
pub async fn models() -> Json<ModelList> {
    Json(ModelList::aliases())
}

/// Create OpenAI router
pub fn router(dispatcher: Arc<RequestDispatcher>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models))
        .with_state(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IngressError;

    #[test]
    fn test_request_into_call() {
        let req: OpenAIChatRequest = serde_json::from_str(
            r#"{"model":"gpt-5.2","messages":[{"role":"system","content":"be terse"},{"role":"user","content":"Hello!"}],"stream":true,"temperature":0.7}"#,
        )
        .unwrap();

        let call = req.into_call().unwrap();
        assert_eq!(call.model, "gpt-5.2");
        assert_eq!(call.conversation.len(), 2);
        assert!(call.stream);
    }

    #[test]
    fn test_stream_defaults_to_false() {
        let req: OpenAIChatRequest =
            serde_json::from_str(r#"{"model":"m","messages":[{"role":"user","content":"x"}]}"#)
                .unwrap();
        assert!(!req.into_call().unwrap().stream);
    }

    #[test]
    fn test_missing_messages_rejected() {
        let req: OpenAIChatRequest = serde_json::from_str(r#"{"model":"m"}"#).unwrap();
        let err = req.into_call().unwrap_err();
        assert!(matches!(err, IngressError::InvalidRequest(ref m) if m == "No messages found"));
    }

    #[test]
    fn test_stream_chunk_shape() {
        let chunk = OpenAIStreamChunk {
            id: "abc".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 1,
            model: "openai/gpt-5.2".to_string(),
            choices: vec![OpenAIStreamChoice {
                index: 0,
                delta: OpenAIDelta {
                    content: Some("Hi".to_string()),
                },
                finish_reason: None,
            }],
        };
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            serde_json::json!({
                "id": "abc",
                "object": "chat.completion.chunk",
                "created": 1,
                "model": "openai/gpt-5.2",
                "choices": [{"index": 0, "delta": {"content": "Hi"}}]
            })
        );
    }

    #[test]
    fn test_model_list() {
        let list = ModelList::aliases();
        assert_eq!(list.object, "list");
        let ids: Vec<_> = list.data.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "claude-opus-4.5",
                "claude-sonnet-4.5",
                "gemini-3-pro-preview",
                "gpt-5.2"
            ]
        );
        assert!(list.data.iter().all(|m| m.created == 1_700_000_000 && m.owned_by == "chat-sdk"));
    }
}
