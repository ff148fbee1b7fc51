//! SQLite chat repository implementation.
//!
//! Implements `ChatRepository` from `colloquy-core` using sqlx with split
//! read/write pools: raw queries, private Row structs, reads on the reader
//! pool and every mutation on the single writer connection.

use chrono::{DateTime, Utc};
use colloquy_core::chat::repository::ChatRepository;
use colloquy_types::chat::{
    ChatMessage, Conversation, ConversationStatus, MessageRole, MessageStatus, NewMessage,
};
use colloquy_types::error::RepositoryError;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ChatRepository`.
pub struct SqliteChatRepository {
    pool: DatabasePool,
}

impl SqliteChatRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

/// Internal row type for mapping SQLite rows to domain Conversation.
struct ConversationRow {
    pk: i64,
    id: String,
    owner_id: String,
    title: String,
    model_name: String,
    system_prompt: Option<String>,
    status: String,
    message_count: i64,
    total_tokens: i64,
    last_message_at: String,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            pk: row.try_get("pk")?,
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            model_name: row.try_get("model_name")?,
            system_prompt: row.try_get("system_prompt")?,
            status: row.try_get("status")?,
            message_count: row.try_get("message_count")?,
            total_tokens: row.try_get("total_tokens")?,
            last_message_at: row.try_get("last_message_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        let status: ConversationStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(Conversation {
            key: self.pk,
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
            model_name: self.model_name,
            system_prompt: self.system_prompt,
            status,
            message_count: self.message_count as u32,
            total_tokens: self.total_tokens as u64,
            last_message_at: parse_datetime(&self.last_message_at)?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

/// Internal row type for mapping SQLite rows to domain ChatMessage.
struct MessageRow {
    pk: i64,
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    content_type: String,
    tokens: i64,
    status: String,
    sequence: i64,
    created_at: String,
    updated_at: String,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            pk: row.try_get("pk")?,
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            content_type: row.try_get("content_type")?,
            tokens: row.try_get("tokens")?,
            status: row.try_get("status")?,
            sequence: row.try_get("sequence")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let role: MessageRole = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let status: MessageStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(ChatMessage {
            key: self.pk,
            id,
            conversation_id: self.conversation_id,
            role,
            content: self.content,
            content_type: self.content_type,
            tokens: self.tokens as u32,
            status,
            sequence: self.sequence,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn messages_from_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<ChatMessage>, RepositoryError> {
    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let msg_row = MessageRow::from_row(row).map_err(query_error)?;
        messages.push(msg_row.into_message()?);
    }
    Ok(messages)
}

// ---------------------------------------------------------------------------
// ChatRepository implementation
// ---------------------------------------------------------------------------

impl ChatRepository for SqliteChatRepository {
    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO conversations (id, owner_id, title, model_name, system_prompt, status, message_count, total_tokens, last_message_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&conversation.id)
        .bind(&conversation.owner_id)
        .bind(&conversation.title)
        .bind(&conversation.model_name)
        .bind(&conversation.system_prompt)
        .bind(conversation.status.to_string())
        .bind(conversation.message_count as i64)
        .bind(conversation.total_tokens as i64)
        .bind(format_datetime(&conversation.last_message_at))
        .bind(format_datetime(&conversation.created_at))
        .bind(format_datetime(&conversation.updated_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(done) => {
                let mut created = conversation.clone();
                created.key = done.last_insert_rowid();
                Ok(created)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
                Err(RepositoryError::Conflict(format!(
                    "conversation '{}' already exists",
                    conversation.id
                )))
            }
            Err(e) => Err(query_error(e)),
        }
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let conv_row = ConversationRow::from_row(&row).map_err(query_error)?;
                Ok(Some(conv_row.into_conversation()?))
            }
            None => Ok(None),
        }
    }

    async fn list_conversations(
        &self,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM conversations
               WHERE owner_id = ? AND status = 'active'
               ORDER BY last_message_at DESC, pk DESC
               LIMIT ? OFFSET ?"#,
        )
        .bind(owner_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in &rows {
            let conv_row = ConversationRow::from_row(row).map_err(query_error)?;
            conversations.push(conv_row.into_conversation()?);
        }

        Ok(conversations)
    }

    async fn count_conversations(&self, owner_id: &str) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as cnt FROM conversations WHERE owner_id = ? AND status = 'active'",
        )
        .bind(owner_id)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let count: i64 = row.try_get("cnt").map_err(query_error)?;
        Ok(count as u64)
    }

    async fn set_conversation_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE conversations SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(format_datetime(&Utc::now()))
            .bind(conversation_id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn append_message(&self, message: &NewMessage) -> Result<ChatMessage, RepositoryError> {
        let id = message.id.unwrap_or_else(Uuid::now_v7);
        let now = Utc::now();
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let exists = sqlx::query("SELECT 1 FROM conversations WHERE id = ?")
            .bind(&message.conversation_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound);
        }

        // The single writer connection serializes appends, so MAX + 1 is stable
        // for the lifetime of this transaction.
        let sequence = match message.sequence {
            Some(sequence) => sequence,
            None => {
                let row = sqlx::query(
                    "SELECT COALESCE(MAX(sequence), 0) + 1 as next FROM messages WHERE conversation_id = ?",
                )
                .bind(&message.conversation_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(query_error)?;
                row.try_get::<i64, _>("next").map_err(query_error)?
            }
        };

        let inserted = sqlx::query(
            r#"INSERT INTO messages (id, conversation_id, role, content, content_type, tokens, status, sequence, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id.to_string())
        .bind(&message.conversation_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(&message.content_type)
        .bind(message.tokens as i64)
        .bind(MessageStatus::Normal.to_string())
        .bind(sequence)
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!(
                        "message {id} (sequence {sequence}) already exists in conversation '{}'",
                        message.conversation_id
                    ));
                }
                if db_err.message().contains("FOREIGN KEY") {
                    return RepositoryError::NotFound;
                }
            }
            query_error(e)
        })?;

        sqlx::query(
            r#"UPDATE conversations
               SET message_count = message_count + 1,
                   total_tokens = total_tokens + ?,
                   last_message_at = ?,
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(message.tokens as i64)
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .bind(&message.conversation_id)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;

        Ok(ChatMessage {
            key: inserted.last_insert_rowid(),
            id,
            conversation_id: message.conversation_id.clone(),
            role: message.role,
            content: message.content.clone(),
            content_type: message.content_type.clone(),
            tokens: message.tokens,
            status: MessageStatus::Normal,
            sequence,
            created_at: now,
            updated_at: now,
        })
    }

    async fn list_recent(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM messages
               WHERE conversation_id = ? AND status = 'normal'
               ORDER BY sequence DESC
               LIMIT ?"#,
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        messages_from_rows(&rows)
    }

    async fn list_before(
        &self,
        conversation_id: &str,
        limit: u32,
        cursor: &Uuid,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let cursor_row = sqlx::query("SELECT sequence FROM messages WHERE id = ? AND conversation_id = ?")
            .bind(cursor.to_string())
            .bind(conversation_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let Some(cursor_row) = cursor_row else {
            debug!(
                conversation_id = %conversation_id,
                cursor = %cursor,
                "Cursor not found in conversation, returning most recent page"
            );
            return self.list_recent(conversation_id, limit).await;
        };
        let cursor_sequence: i64 = cursor_row.try_get("sequence").map_err(query_error)?;

        let rows = sqlx::query(
            r#"SELECT * FROM messages
               WHERE conversation_id = ? AND status = 'normal' AND sequence < ?
               ORDER BY sequence DESC
               LIMIT ?"#,
        )
        .bind(conversation_id)
        .bind(cursor_sequence)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        messages_from_rows(&rows)
    }
}
