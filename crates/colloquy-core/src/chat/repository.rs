//! ChatRepository trait definition.
//!
//! Provides conversation CRUD and the append-only, cursor-paginated message
//! log. Uses native async fn in traits (RPITIT, Rust 2024 edition).

use colloquy_types::chat::{ChatMessage, Conversation, ConversationStatus, NewMessage};
use colloquy_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for conversation and message persistence.
///
/// Implementations live in colloquy-infra (e.g., `SqliteChatRepository`).
pub trait ChatRepository: Send + Sync {
    /// Insert a new conversation.
    ///
    /// Returns `Conflict` when a conversation with the same external id exists.
    fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<Conversation, RepositoryError>> + Send;

    /// Get a conversation by external id, whatever its status.
    fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// List an owner's active conversations, most recent activity first.
    fn list_conversations(
        &self,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;

    /// Count an owner's active conversations.
    fn count_conversations(
        &self,
        owner_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Change a conversation's lifecycle status. `NotFound` when absent.
    fn set_conversation_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Append a message, assigning id and sequence when absent.
    ///
    /// The insert and the conversation's counter update (message_count,
    /// total_tokens, last_message_at, updated_at) commit together.
    /// `NotFound` for an unknown conversation, `Conflict` on a duplicate
    /// message id or explicit sequence.
    fn append_message(
        &self,
        message: &NewMessage,
    ) -> impl std::future::Future<Output = Result<ChatMessage, RepositoryError>> + Send;

    /// At most `limit` normal-status messages, newest first.
    fn list_recent(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, RepositoryError>> + Send;

    /// At most `limit` normal-status messages strictly older than `cursor`,
    /// newest first.
    ///
    /// A cursor that does not resolve within the conversation behaves as
    /// [`ChatRepository::list_recent`].
    fn list_before(
        &self,
        conversation_id: &str,
        limit: u32,
        cursor: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, RepositoryError>> + Send;
}
