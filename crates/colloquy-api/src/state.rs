//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! `ChatService` is generic over the repository trait; AppState pins it to
//! the SQLite implementation.

use std::path::PathBuf;
use std::sync::Arc;

use colloquy_core::chat::context::ContextWindowConfig;
use colloquy_core::chat::service::{ChatService, ChatSettings};
use colloquy_core::llm::box_provider::BoxLlmProvider;
use colloquy_core::llm::tokenizer::TokenCounter;
use colloquy_infra::config::{load_global_config, resolve_data_dir, resolve_database_url};
use colloquy_infra::llm::create_provider;
use colloquy_infra::sqlite::chat::SqliteChatRepository;
use colloquy_infra::sqlite::pool::DatabasePool;
use colloquy_types::config::GlobalConfig;

/// Concrete type alias for the chat service pinned to the infra implementation.
pub type ConcreteChatService = ChatService<SqliteChatRepository>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ConcreteChatService>,
    pub provider: Arc<BoxLlmProvider>,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    ///
    /// `model_override` replaces `[llm] default_model` for this process.
    pub async fn init(model_override: Option<String>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let mut config = load_global_config(&data_dir).await;
        if let Some(model) = model_override.filter(|m| !m.trim().is_empty()) {
            config.llm.default_model = model;
        }

        let db_url = resolve_database_url(&config, &data_dir);
        let db_pool = DatabasePool::new(&db_url).await?;

        let provider = create_provider(&config.llm)?;
        tracing::debug!(
            base_url = %config.llm.base_url,
            default_model = %config.llm.default_model,
            "Model backend configured"
        );

        Ok(Self::from_parts(config, data_dir, db_pool, provider))
    }

    /// Wire services from already-built parts.
    pub fn from_parts(
        config: GlobalConfig,
        data_dir: PathBuf,
        db_pool: DatabasePool,
        provider: BoxLlmProvider,
    ) -> Self {
        let provider = Arc::new(provider);
        let chat_repo = Arc::new(SqliteChatRepository::new(db_pool.clone()));
        let chat_service = ChatService::new(
            chat_repo,
            Arc::clone(&provider),
            Arc::new(TokenCounter::cl100k()),
            ContextWindowConfig::from(config.context.clone()),
            ChatSettings::from_config(&config),
        );

        Self {
            chat_service: Arc::new(chat_service),
            provider,
            config: Arc::new(config),
            data_dir,
            db_pool,
        }
    }
}
