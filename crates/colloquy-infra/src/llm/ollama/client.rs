//! OllamaProvider -- concrete [`LlmProvider`] implementation for Ollama.
//!
//! Talks to a local or remote Ollama server over `POST /api/chat`.
//! Non-streaming calls send `stream: false` and read one JSON object;
//! streaming calls read newline-delimited JSON via [`decode_ndjson`].

use std::time::Duration;

use futures_util::StreamExt;

use colloquy_core::llm::provider::{EventStream, LlmProvider};
use colloquy_observe::genai_attrs::PROVIDER_OLLAMA;
use colloquy_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, StreamEvent, Usage,
};

use super::streaming::decode_ndjson;
use super::types::{OllamaChatChunk, OllamaChatRequest, OllamaErrorResponse, OllamaMessage, OllamaOptions};

/// Ollama chat backend.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl OllamaProvider {
    /// Create a provider for the server at `base_url`.
    ///
    /// `default_model` is used for requests that leave `model` empty.
    pub fn new(
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        })
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn resolve_model(&self, model: &str) -> String {
        if model.is_empty() {
            self.default_model.clone()
        } else {
            model.to_string()
        }
    }

    fn to_ollama_request(&self, request: &CompletionRequest, stream: bool) -> OllamaChatRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| OllamaMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();

        OllamaChatRequest {
            model: self.resolve_model(&request.model),
            messages,
            stream,
            options: request.temperature.map(|t| OllamaOptions {
                temperature: Some(t),
            }),
        }
    }
}

/// Send the request and map non-2xx statuses to [`LlmError`].
async fn send_chat(
    client: &reqwest::Client,
    url: &str,
    body: &OllamaChatRequest,
) -> Result<reqwest::Response, LlmError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| LlmError::Provider {
            message: format!("HTTP request failed: {e}"),
        })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<OllamaErrorResponse>(&error_body)
        .map(|e| e.error)
        .unwrap_or(error_body);

    Err(match status.as_u16() {
        404 => LlmError::ModelNotFound(body.model.clone()),
        400 => LlmError::InvalidRequest(detail),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {detail}"),
        },
    })
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        PROVIDER_OLLAMA
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.to_ollama_request(request, false);
        let response = send_chat(&self.client, &self.chat_url(), &body).await?;

        let chunk: OllamaChatChunk = response.json().await.map_err(|e| {
            LlmError::Deserialization(format!("failed to parse response: {e}"))
        })?;

        if let Some(error) = chunk.error {
            return Err(LlmError::Provider { message: error });
        }

        let content = chunk.text().to_string();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let model = if chunk.model.is_empty() {
            body.model
        } else {
            chunk.model
        };

        Ok(CompletionResponse {
            content,
            model,
            usage: Usage {
                input_tokens: chunk.prompt_eval_count.unwrap_or(0),
                output_tokens: chunk.eval_count.unwrap_or(0),
            },
        })
    }

    fn stream(&self, request: CompletionRequest) -> EventStream {
        let body = self.to_ollama_request(&request, true);
        let client = self.client.clone();
        let url = self.chat_url();

        Box::pin(async_stream::try_stream! {
            let response = send_chat(&client, &url, &body).await?;
            let mut events = decode_ndjson(response.bytes_stream());
            while let Some(event) = events.next().await {
                let event: StreamEvent = event?;
                yield event;
            }
        })
    }
}
