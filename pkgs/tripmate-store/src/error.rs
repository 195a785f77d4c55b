//! Error types for store operations

use thiserror::Error;

/// Errors that can occur in chat and exchange-rate store operations
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("User {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        conversation_id: String,
        user_id: String,
    },
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Media upload error: {0}")]
    Media(String),
    #[error("Rate source error: {0}")]
    RateSource(String),
}

impl ChatError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ChatError::InvalidArgument(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
