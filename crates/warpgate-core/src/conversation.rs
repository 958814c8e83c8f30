//! Conversation types shared by the OpenAI and Anthropic dialects
//!
//! Both client dialects carry a list of role-tagged messages whose `content`
//! is either a plain string or an array of typed blocks. These types model
//! that shape once so the translator can work on a single representation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Any role the gateway does not forward (tool, function, developer, ...)
    #[serde(other)]
    Other,
}

impl Role {
    /// Whether this role counts as a conversational turn
    pub fn is_turn(self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

/// Content of a message (plain text or an array of blocks)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),

    /// Array of typed content blocks
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Normalize to plain text.
    ///
    /// Block arrays contribute the text of every `type == "text"` block, in
    /// order and without separators. Other block types are ignored.
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter(|block| block.block_type == "text")
                .filter_map(|block| block.text.as_deref())
                .collect(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// A single typed content block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentBlock {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: Role,

    /// Content of the message; `null` and missing are treated as empty
    #[serde(default)]
    pub content: Option<MessageContent>,
}

impl ChatMessage {
    /// Create a message with plain text content
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(text.into())),
        }
    }

    /// Plain-text view of the content
    pub fn text(&self) -> String {
        self.content
            .as_ref()
            .map(MessageContent::to_text)
            .unwrap_or_default()
    }
}

/// Ordered, non-empty list of messages received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    /// Build a conversation, rejecting an empty message list
    pub fn new(messages: Vec<ChatMessage>) -> Result<Self> {
        if messages.is_empty() {
            return Err(Error::EmptyConversation);
        }
        Ok(Self { messages })
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user/assistant turns
    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role.is_turn()).count()
    }

    /// Text of the first user message, empty if there is none
    pub fn first_user_text(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(ChatMessage::text)
            .unwrap_or_default()
    }

    /// Text of the first system message, if any
    pub fn first_system_text(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(ChatMessage::text)
    }
}

#[cfg(test)]
mod tests;
