//! Model backend implementations.
//!
//! Contains the concrete implementation of the [`LlmProvider`] trait
//! defined in `colloquy-core` for Ollama, plus a factory
//! ([`create_provider`]) that builds it from [`LlmConfig`] and a
//! connectivity check ([`test_provider_connection`]).
//!
//! [`LlmProvider`]: colloquy_core::llm::provider::LlmProvider

pub mod ollama;

use std::time::Duration;

use colloquy_core::llm::box_provider::BoxLlmProvider;
use colloquy_types::config::LlmConfig;
use colloquy_types::llm::{CompletionRequest, LlmError, Message};

use self::ollama::OllamaProvider;

/// Create a [`BoxLlmProvider`] from the `[llm]` section of the config.
///
/// # Errors
///
/// Returns an error if the base URL is blank or the HTTP client cannot be built.
pub fn create_provider(config: &LlmConfig) -> Result<BoxLlmProvider, LlmError> {
    if config.base_url.trim().is_empty() {
        return Err(LlmError::InvalidRequest("llm.base_url is empty".to_string()));
    }

    let provider = OllamaProvider::new(
        config.base_url.clone(),
        config.default_model.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )?;
    Ok(BoxLlmProvider::new(provider))
}

/// Send a minimal completion to check the backend answers.
///
/// Used by the `/health` endpoint when a deep check is requested.
pub async fn test_provider_connection(provider: &BoxLlmProvider) -> Result<(), LlmError> {
    let request = CompletionRequest {
        model: String::new(), // Provider uses its configured default
        messages: vec![Message::user("Hello")],
        temperature: Some(0.0),
        stream: false,
    };
    provider.complete(&request).await?;
    Ok(())
}
