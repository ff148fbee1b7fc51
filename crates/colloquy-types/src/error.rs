use thiserror::Error;

use crate::llm::LlmError;

/// Errors from repository operations (used by trait definitions in colloquy-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors surfaced by a chat turn or a conversation operation.
///
/// The transport layer owns the mapping to status codes; nothing in the
/// core decides one.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("model backend failed: {0}")]
    Backend(#[from] LlmError),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for ChatError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => ChatError::NotFound("entity".to_string()),
            RepositoryError::Conflict(msg) => ChatError::Conflict(msg),
            RepositoryError::Connection => ChatError::Storage(e.to_string()),
            RepositoryError::Query(msg) => ChatError::Storage(msg),
        }
    }
}
