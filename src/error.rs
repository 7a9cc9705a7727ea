//! Error types for the comment store.

use crate::types::{CommentId, PostId};
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Post not found: {0}")]
    PostNotFound(PostId),

    #[error("Comment not found: {0}")]
    CommentNotFound(CommentId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Subscription dropped")]
    SubscriptionDropped,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// A referenced post or comment does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::PostNotFound(_) | StoreError::CommentNotFound(_)
        )
    }

    /// The operation context ended before the operation completed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled | StoreError::DeadlineExceeded)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<envy::Error> for StoreError {
    fn from(e: envy::Error) -> Self {
        StoreError::Config(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
