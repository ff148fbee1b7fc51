//! Global configuration types for Colloquy.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! HTTP listener, database location, model backend, context-window budget,
//! and chat-turn behaviour.

use serde::{Deserialize, Serialize};

/// Top-level configuration for Colloquy.
///
/// Loaded from `~/.colloquy/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub chat: ChatConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database settings. When `url` is absent the database lives in the data dir.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// Model backend settings (Ollama-compatible `/api/chat`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Used when a turn does not name a model.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Used when a conversation carries no system prompt override.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            system_prompt: default_system_prompt(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Context-window budget. The usable budget is
/// `max_context_tokens - reserved_tokens` (saturating).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Headroom kept free for the model's reply.
    #[serde(default = "default_reserved_tokens")]
    pub reserved_tokens: usize,
}

fn default_history_limit() -> u32 {
    50
}

fn default_max_context_tokens() -> usize {
    4000
}

fn default_reserved_tokens() -> usize {
    1000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            max_context_tokens: default_max_context_tokens(),
            reserved_tokens: default_reserved_tokens(),
        }
    }
}

/// Chat-turn behaviour and history paging limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Serialize turns on the same conversation behind an async lock.
    #[serde(default = "default_serialize_turns")]
    pub serialize_turns: bool,

    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

fn default_serialize_turns() -> bool {
    true
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            serialize_turns: default_serialize_turns(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}
