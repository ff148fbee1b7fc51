//! Conversation, message, and chat-turn types for Colloquy.
//!
//! These types model persisted conversations and their append-mostly message
//! logs, plus the request/response shapes of a single chat turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

// Re-export MessageRole from llm module (it's used in both chat and llm contexts).
pub use crate::llm::MessageRole;

/// Content-type tag for plain text messages.
pub const CONTENT_TYPE_TEXT: &str = "text";

/// Lifecycle status of a conversation.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (status IN ('active', 'archived', 'deleted'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Deleted,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Active => write!(f, "active"),
            ConversationStatus::Archived => write!(f, "archived"),
            ConversationStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ConversationStatus::Active),
            "archived" => Ok(ConversationStatus::Archived),
            "deleted" => Ok(ConversationStatus::Deleted),
            other => Err(format!("invalid conversation status: '{other}'")),
        }
    }
}

impl Default for ConversationStatus {
    fn default() -> Self {
        ConversationStatus::Active
    }
}

/// Soft status of a stored message. Only `Normal` messages are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Normal,
    Retracted,
    Edited,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageStatus::Normal => write!(f, "normal"),
            MessageStatus::Retracted => write!(f, "retracted"),
            MessageStatus::Edited => write!(f, "edited"),
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(MessageStatus::Normal),
            "retracted" => Ok(MessageStatus::Retracted),
            "edited" => Ok(MessageStatus::Edited),
            other => Err(format!("invalid message status: '{other}'")),
        }
    }
}

impl Default for MessageStatus {
    fn default() -> Self {
        MessageStatus::Normal
    }
}

/// A conversation between a user and a model.
///
/// `id` is the externally visible identifier (chosen by the client on the
/// first turn, or generated on explicit creation). `key` is the internal
/// numeric row key and is never exposed over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(skip)]
    pub key: i64,
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub status: ConversationStatus,
    pub message_count: u32,
    pub total_tokens: u64,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A fresh, active conversation with zeroed counters.
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: 0,
            id: id.into(),
            owner_id: owner_id.into(),
            title: String::new(),
            model_name: model_name.into(),
            system_prompt: None,
            status: ConversationStatus::Active,
            message_count: 0,
            total_tokens: 0,
            last_message_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A message persisted within a conversation.
///
/// `sequence` is assigned by the store and increases monotonically within
/// a conversation; it is the ordering key for pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(skip)]
    pub key: i64,
    pub id: Uuid,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub content_type: String,
    pub tokens: u32,
    pub status: MessageStatus,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message about to be appended.
///
/// `id` and `sequence` are assigned by the store when absent.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Option<Uuid>,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub content_type: String,
    pub tokens: u32,
    pub sequence: Option<i64>,
}

impl NewMessage {
    pub fn text(conversation_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: None,
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            content_type: CONTENT_TYPE_TEXT.to_string(),
            tokens: 0,
            sequence: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens = tokens;
        self
    }
}

/// One page of conversation history, chronological for display.
///
/// `has_more` is `messages.len() == limit`: it reports `true` when exactly
/// `limit` messages remained, so a final empty page is possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
}

/// One page of an owner's conversations plus the total active count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPage {
    pub total_count: u64,
    pub conversations: Vec<Conversation>,
}

/// A new chat turn as received from the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub content: String,
    /// Falls back to the configured default model when absent or empty.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

/// Result of a non-streaming turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    pub message_id: Uuid,
    pub content: String,
}

/// Event pushed to the live transport during a streaming turn.
///
/// Serialized as `{content, done:false}` for deltas and `{done:true,
/// message_id?}` for the terminal marker; errors travel as their own event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Delta { content: String },
    Error { message: String },
    Done { message_id: Option<Uuid> },
}

/// Wire shape of a streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    pub done: bool,
}
