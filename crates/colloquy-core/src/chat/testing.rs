//! In-memory repository and scripted backend shared by the chat tests.

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::StreamExt;
use uuid::Uuid;

use colloquy_types::chat::{
    ChatMessage, Conversation, ConversationStatus, MessageRole, MessageStatus, NewMessage,
};
use colloquy_types::error::RepositoryError;
use colloquy_types::llm::{CompletionRequest, CompletionResponse, LlmError, StreamEvent, Usage};

use super::repository::ChatRepository;
use crate::llm::provider::{EventStream, LlmProvider};

#[derive(Default)]
struct Store {
    conversations: Vec<Conversation>,
    messages: Vec<ChatMessage>,
}

/// Vec-backed `ChatRepository` with the same ordering rules as the SQLite one.
#[derive(Clone, Default)]
pub struct InMemoryChatRepository {
    store: Arc<Mutex<Store>>,
    fail_role: Arc<Mutex<Option<MessageRole>>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every append of `role` fail with a query error.
    pub fn fail_appends_for(&self, role: MessageRole) {
        *self.fail_role.lock().unwrap() = Some(role);
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        let store = self.store.lock().unwrap();
        let mut out: Vec<_> = store
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.sequence);
        out
    }

    pub fn conversation_rows(&self, conversation_id: &str) -> usize {
        let store = self.store.lock().unwrap();
        store
            .conversations
            .iter()
            .filter(|c| c.id == conversation_id)
            .count()
    }

    fn normal_desc(store: &Store, conversation_id: &str) -> Vec<ChatMessage> {
        let mut out: Vec<_> = store
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.status == MessageStatus::Normal)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        out
    }
}

impl ChatRepository for InMemoryChatRepository {
    fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> impl Future<Output = Result<Conversation, RepositoryError>> + Send {
        let result = {
            let mut store = self.store.lock().unwrap();
            if store.conversations.iter().any(|c| c.id == conversation.id) {
                Err(RepositoryError::Conflict(format!(
                    "conversation {} already exists",
                    conversation.id
                )))
            } else {
                let mut row = conversation.clone();
                row.key = store.conversations.len() as i64 + 1;
                store.conversations.push(row.clone());
                Ok(row)
            }
        };
        async move {
            tokio::task::yield_now().await;
            result
        }
    }

    fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Option<Conversation>, RepositoryError>> + Send {
        let found = {
            let store = self.store.lock().unwrap();
            store
                .conversations
                .iter()
                .find(|c| c.id == conversation_id)
                .cloned()
        };
        async move {
            tokio::task::yield_now().await;
            Ok(found)
        }
    }

    fn list_conversations(
        &self,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send {
        let mut rows: Vec<_> = {
            let store = self.store.lock().unwrap();
            store
                .conversations
                .iter()
                .filter(|c| c.owner_id == owner_id && c.status == ConversationStatus::Active)
                .cloned()
                .collect()
        };
        rows.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        let page = rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        async move { Ok(page) }
    }

    fn count_conversations(
        &self,
        owner_id: &str,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send {
        let count = {
            let store = self.store.lock().unwrap();
            store
                .conversations
                .iter()
                .filter(|c| c.owner_id == owner_id && c.status == ConversationStatus::Active)
                .count() as u64
        };
        async move { Ok(count) }
    }

    fn set_conversation_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send {
        let result = {
            let mut store = self.store.lock().unwrap();
            match store.conversations.iter_mut().find(|c| c.id == conversation_id) {
                Some(conv) => {
                    conv.status = status;
                    conv.updated_at = Utc::now();
                    Ok(())
                }
                None => Err(RepositoryError::NotFound),
            }
        };
        async move { result }
    }

    fn append_message(
        &self,
        message: &NewMessage,
    ) -> impl Future<Output = Result<ChatMessage, RepositoryError>> + Send {
        let failing = *self.fail_role.lock().unwrap() == Some(message.role);
        let result = if failing {
            Err(RepositoryError::Query("disk I/O error".to_string()))
        } else {
            let mut store = self.store.lock().unwrap();
            let id = message.id.unwrap_or_else(Uuid::now_v7);
            let next_sequence = store
                .messages
                .iter()
                .filter(|m| m.conversation_id == message.conversation_id)
                .map(|m| m.sequence)
                .max()
                .unwrap_or(0)
                + 1;
            let sequence = message.sequence.unwrap_or(next_sequence);
            if !store.conversations.iter().any(|c| c.id == message.conversation_id) {
                Err(RepositoryError::NotFound)
            } else if store.messages.iter().any(|m| {
                m.id == id
                    || (m.conversation_id == message.conversation_id && m.sequence == sequence)
            }) {
                Err(RepositoryError::Conflict(format!("message {id} already exists")))
            } else {
                let now = Utc::now();
                let stored = ChatMessage {
                    key: store.messages.len() as i64 + 1,
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
                };
                store.messages.push(stored.clone());
                if let Some(conv) = store
                    .conversations
                    .iter_mut()
                    .find(|c| c.id == message.conversation_id)
                {
                    conv.message_count += 1;
                    conv.total_tokens += u64::from(message.tokens);
                    conv.last_message_at = now;
                    conv.updated_at = now;
                }
                Ok(stored)
            }
        };
        async move {
            tokio::task::yield_now().await;
            result
        }
    }

    fn list_recent(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, RepositoryError>> + Send {
        let page: Vec<_> = {
            let store = self.store.lock().unwrap();
            Self::normal_desc(&store, conversation_id)
                .into_iter()
                .take(limit as usize)
                .collect()
        };
        async move { Ok(page) }
    }

    fn list_before(
        &self,
        conversation_id: &str,
        limit: u32,
        cursor: &Uuid,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, RepositoryError>> + Send {
        let page: Vec<_> = {
            let store = self.store.lock().unwrap();
            let cursor_seq = store
                .messages
                .iter()
                .find(|m| m.id == *cursor && m.conversation_id == conversation_id)
                .map(|m| m.sequence);
            Self::normal_desc(&store, conversation_id)
                .into_iter()
                .filter(|m| cursor_seq.is_none_or(|seq| m.sequence < seq))
                .take(limit as usize)
                .collect()
        };
        async move { Ok(page) }
    }
}

/// How a [`ScriptedProvider`] stream ends after its chunks.
#[derive(Clone)]
pub enum Ending {
    Done,
    Error(String),
    /// Never ends; used to exercise cancellation.
    Hang,
}

/// Backend that replays a fixed chunk script and records every request.
#[derive(Clone)]
pub struct ScriptedProvider {
    chunks: Vec<String>,
    ending: Ending,
    reply: Result<String, String>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn streaming(chunks: &[&str], ending: Ending) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ending,
            reply: Ok(chunks.concat()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(reply: &str) -> Self {
        Self::streaming(&[reply], Ending::Done)
    }

    pub fn failing(message: &str) -> Self {
        Self {
            chunks: Vec::new(),
            ending: Ending::Error(message.to_string()),
            reply: Err(message.to_string()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<CompletionResponse, LlmError>> + Send {
        self.requests.lock().unwrap().push(request.clone());
        let model = request.model.clone();
        let reply = self.reply.clone();
        async move {
            match reply {
                Ok(content) if content.is_empty() => Err(LlmError::EmptyResponse),
                Ok(content) => Ok(CompletionResponse {
                    content,
                    model,
                    usage: Usage::default(),
                }),
                Err(message) => Err(LlmError::Provider { message }),
            }
        }
    }

    fn stream(&self, request: CompletionRequest) -> EventStream {
        self.requests.lock().unwrap().push(request);
        let deltas: Vec<Result<StreamEvent, LlmError>> = self
            .chunks
            .iter()
            .map(|text| Ok(StreamEvent::TextDelta { text: text.clone() }))
            .collect();
        let head = futures_util::stream::iter(deltas);
        match self.ending.clone() {
            Ending::Done => head
                .chain(futures_util::stream::iter(vec![Ok(StreamEvent::Done)]))
                .boxed(),
            Ending::Error(message) => head
                .chain(futures_util::stream::iter(vec![Err(LlmError::Stream(message))]))
                .boxed(),
            Ending::Hang => head.chain(futures_util::stream::pending()).boxed(),
        }
    }
}
