//! Conversation validation errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The client sent an empty `messages` array
    #[error("No messages found")]
    EmptyConversation,
}

pub type Result<T> = std::result::Result<T, Error>;
