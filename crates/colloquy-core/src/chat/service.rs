//! Chat service orchestrating one conversational turn end to end.
//!
//! A turn runs: ensure the conversation exists, assemble the context window
//! from recent history, persist the user message, call the backend, then
//! persist the assistant reply. Streaming turns hand the backend stream to
//! a [`StreamingDeltaPipeline`] which owns the second write.

use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, Span, field, info, info_span, warn};
use uuid::Uuid;

use colloquy_observe::genai_attrs;
use colloquy_types::chat::{
    Conversation, ConversationPage, ConversationStatus, MessagePage, MessageRole, NewMessage,
    TurnReply, TurnRequest,
};
use colloquy_types::config::GlobalConfig;
use colloquy_types::error::ChatError;
use colloquy_types::llm::{CompletionRequest, LlmError};
use tokio_util::sync::CancellationToken;

use crate::chat::context::{ContextWindowAssembler, ContextWindowConfig};
use crate::chat::lock::{TurnGuard, TurnLocks};
use crate::chat::pipeline::{DeltaSink, PipelineOutcome, StreamingDeltaPipeline};
use crate::chat::registry::ConversationRegistry;
use crate::chat::repository::ChatRepository;
use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::provider::EventStream;
use crate::llm::system_prompt;
use crate::llm::tokenizer::TokenCounter;

/// Turn-level settings that are not part of the context budget.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_model: String,
    pub default_system_prompt: String,
    pub serialize_turns: bool,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl ChatSettings {
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            default_model: config.llm.default_model.clone(),
            default_system_prompt: config.llm.system_prompt.clone(),
            serialize_turns: config.chat.serialize_turns,
            default_page_size: config.chat.default_page_size,
            max_page_size: config.chat.max_page_size,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}

/// Everything decided before the backend is called.
struct PreparedTurn {
    /// Trimmed id every write of the turn goes to.
    conversation_id: String,
    guard: TurnGuard,
    request: CompletionRequest,
    span: Span,
}

/// A streaming turn whose user message is already persisted.
///
/// Holds the conversation's turn lock until [`StreamingTurn::run`] has
/// persisted the reply.
pub struct StreamingTurn<C: ChatRepository> {
    pipeline: StreamingDeltaPipeline<C>,
    stream: EventStream,
    guard: TurnGuard,
    span: Span,
}

impl<C: ChatRepository> StreamingTurn<C> {
    /// Id the assistant message will be stored under.
    pub fn message_id(&self) -> Uuid {
        self.pipeline.message_id()
    }

    pub fn conversation_id(&self) -> &str {
        self.guard.conversation_id()
    }

    /// Stream the reply into `sink` until it ends or `cancel` fires.
    pub async fn run<S: DeltaSink>(self, sink: &mut S, cancel: CancellationToken) -> PipelineOutcome {
        let StreamingTurn {
            pipeline,
            stream,
            guard,
            span,
        } = self;
        let outcome = pipeline.run(stream, sink, cancel).instrument(span.clone()).await;
        if let Some(usage) = &outcome.usage {
            span.record(genai_attrs::GEN_AI_USAGE_INPUT_TOKENS, usage.input_tokens);
            span.record(genai_attrs::GEN_AI_USAGE_OUTPUT_TOKENS, usage.output_tokens);
        }
        drop(guard);
        outcome
    }
}

/// Orchestrates chat turns, history paging and conversation lifecycle.
///
/// Generic over `ChatRepository` to maintain clean architecture
/// (colloquy-core never depends on colloquy-infra).
pub struct ChatService<C: ChatRepository> {
    repo: Arc<C>,
    provider: Arc<BoxLlmProvider>,
    counter: Arc<TokenCounter>,
    registry: ConversationRegistry<C>,
    assembler: ContextWindowAssembler,
    locks: TurnLocks,
    settings: ChatSettings,
}

impl<C: ChatRepository> ChatService<C> {
    pub fn new(
        repo: Arc<C>,
        provider: Arc<BoxLlmProvider>,
        counter: Arc<TokenCounter>,
        context: ContextWindowConfig,
        settings: ChatSettings,
    ) -> Self {
        Self {
            registry: ConversationRegistry::new(Arc::clone(&repo)),
            assembler: ContextWindowAssembler::new(Arc::clone(&counter), context),
            repo,
            provider,
            counter,
            locks: TurnLocks::new(),
            settings,
        }
    }

    /// Access the chat repository.
    pub fn repo(&self) -> &C {
        &self.repo
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    // --- Turns ---

    /// Run a turn and wait for the whole reply.
    ///
    /// Nothing partial is returned: a backend failure, an empty reply or a
    /// failed assistant append all surface as errors.
    pub async fn run_turn(&self, owner_id: &str, turn: &TurnRequest) -> Result<TurnReply, ChatError> {
        let PreparedTurn {
            conversation_id,
            guard,
            mut request,
            span,
        } = self.prepare(owner_id, turn).await?;
        request.stream = false;
        let started = Instant::now();

        let response = self
            .provider
            .complete(&request)
            .instrument(span.clone())
            .await
            .inspect_err(|e| {
                warn!(conversation_id = %conversation_id, error = %e, "Backend call failed");
            })?;
        if response.content.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }
        span.record(genai_attrs::GEN_AI_USAGE_INPUT_TOKENS, response.usage.input_tokens);
        span.record(genai_attrs::GEN_AI_USAGE_OUTPUT_TOKENS, response.usage.output_tokens);

        let assistant = NewMessage::text(&conversation_id, MessageRole::Assistant, &response.content)
            .with_id(Uuid::now_v7())
            .with_tokens(self.counter.count_u32(&response.content));
        let stored = self.repo.append_message(&assistant).await?;
        drop(guard);

        info!(
            conversation_id = %conversation_id,
            message_id = %stored.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn completed"
        );

        Ok(TurnReply {
            message_id: stored.id,
            content: stored.content,
        })
    }

    /// Prepare a streaming turn. The caller drives it with
    /// [`StreamingTurn::run`], usually on a spawned task.
    ///
    /// Errors before the first fragment (validation, storage, a deleted
    /// conversation) are returned here, before any event is emitted.
    pub async fn start_streaming_turn(
        &self,
        owner_id: &str,
        turn: &TurnRequest,
    ) -> Result<StreamingTurn<C>, ChatError> {
        let PreparedTurn {
            conversation_id,
            guard,
            mut request,
            span,
        } = self.prepare(owner_id, turn).await?;
        request.stream = true;

        let stream = {
            let _enter = span.enter();
            self.provider.stream(request)
        };
        let pipeline = StreamingDeltaPipeline::new(
            Arc::clone(&self.repo),
            Arc::clone(&self.counter),
            conversation_id,
        );

        Ok(StreamingTurn {
            pipeline,
            stream,
            guard,
            span,
        })
    }

    async fn prepare(&self, owner_id: &str, turn: &TurnRequest) -> Result<PreparedTurn, ChatError> {
        let conversation_id = turn.conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(ChatError::Validation("conversation_id is required".to_string()));
        }
        if turn.content.trim().is_empty() {
            return Err(ChatError::Validation("content is required".to_string()));
        }
        let model = turn
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.settings.default_model)
            .to_string();

        let guard = if self.settings.serialize_turns {
            self.locks.acquire(conversation_id).await
        } else {
            TurnGuard::unlocked(conversation_id)
        };

        let conversation = self
            .registry
            .ensure_exists(conversation_id, owner_id, &model)
            .await?;
        if conversation.status == ConversationStatus::Deleted {
            return Err(ChatError::NotFound(format!("conversation {conversation_id}")));
        }

        let prompt = system_prompt::resolve(
            conversation.system_prompt.as_deref(),
            &self.settings.default_system_prompt,
        );
        let window = self
            .assembler
            .build(self.repo.as_ref(), conversation_id, &turn.content, prompt)
            .await?;
        info!(
            conversation_id = %conversation_id,
            fetched = window.fetched,
            retained = window.retained,
            history_tokens = window.history_tokens,
            incoming_tokens = window.incoming_tokens,
            budget = window.budget,
            "Context window assembled"
        );

        let user_message = NewMessage::text(conversation_id, MessageRole::User, &turn.content)
            .with_id(Uuid::now_v7())
            .with_tokens(u32::try_from(window.incoming_tokens).unwrap_or(u32::MAX));
        self.repo.append_message(&user_message).await?;

        let span = info_span!(
            "gen_ai.chat",
            gen_ai.operation.name = genai_attrs::OP_CHAT,
            gen_ai.provider.name = self.provider.name(),
            gen_ai.request.model = %model,
            gen_ai.conversation.id = %conversation_id,
            gen_ai.usage.input_tokens = field::Empty,
            gen_ai.usage.output_tokens = field::Empty,
        );

        Ok(PreparedTurn {
            conversation_id: conversation_id.to_string(),
            guard,
            request: CompletionRequest {
                model,
                messages: window.messages,
                temperature: None,
                stream: turn.stream,
            },
            span,
        })
    }

    // --- History ---

    /// One page of history, oldest first within the page.
    ///
    /// Without a cursor this is the most recent page; with one it is the
    /// page strictly older than that message. `limit` is clamped to
    /// `1..=max_page_size` and defaults to the configured page size.
    pub async fn list_history(
        &self,
        conversation_id: &str,
        limit: Option<u32>,
        before: Option<Uuid>,
    ) -> Result<MessagePage, ChatError> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::Validation("conversation_id is required".to_string()));
        }
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(self.settings.default_page_size)
            .clamp(1, self.settings.max_page_size.max(1));

        let mut messages = match before {
            Some(cursor) => self.repo.list_before(conversation_id, limit, &cursor).await?,
            None => self.repo.list_recent(conversation_id, limit).await?,
        };
        let has_more = messages.len() == limit as usize;
        messages.reverse();

        Ok(MessagePage { messages, has_more })
    }

    // --- Conversations ---

    /// Create a conversation with a generated id.
    pub async fn create_conversation(
        &self,
        owner_id: &str,
        model_name: Option<String>,
        system_prompt: Option<String>,
    ) -> Result<Conversation, ChatError> {
        let model = model_name
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_model.clone());
        let mut conversation = Conversation::new(Uuid::now_v7().to_string(), owner_id, model);
        conversation.system_prompt = system_prompt.filter(|p| !p.trim().is_empty());
        Ok(self.registry.create(&conversation).await?)
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        self.registry
            .get(conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id}")))
    }

    /// An owner's active conversations, most recent activity first.
    pub async fn list_conversations(
        &self,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<ConversationPage, ChatError> {
        let limit = limit.clamp(1, self.settings.max_page_size.max(1));
        let conversations = self.repo.list_conversations(owner_id, limit, offset).await?;
        let total_count = self.repo.count_conversations(owner_id).await?;
        Ok(ConversationPage {
            total_count,
            conversations,
        })
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ChatError> {
        self.registry.delete(conversation_id).await.map_err(|e| match e {
            colloquy_types::error::RepositoryError::NotFound => {
                ChatError::NotFound(format!("conversation {conversation_id}"))
            }
            other => other.into(),
        })
    }
}
