//! Conversation HTTP handlers.
//!
//! Endpoints:
//! - POST   /api/v1/conversations               - Create a conversation
//! - GET    /api/v1/conversations               - List the caller's conversations
//! - GET    /api/v1/conversations/{id}          - Get a single conversation
//! - DELETE /api/v1/conversations/{id}          - Soft delete a conversation
//! - GET    /api/v1/conversations/{id}/messages - Page through history

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use colloquy_types::chat::{Conversation, ConversationPage, MessagePage};

use crate::http::error::AppError;
use crate::http::extractors::owner::Owner;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for conversation creation.
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// Falls back to the configured default model.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Overrides the configured default system prompt for this conversation.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Query parameters for conversation listing.
#[derive(Debug, Deserialize)]
pub struct ConversationListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    10
}

/// Query parameters for message listing.
#[derive(Debug, Default, Deserialize)]
pub struct MessageListQuery {
    pub limit: Option<u32>,
    /// Cursor: return messages strictly older than this one.
    pub before_id: Option<String>,
}

/// Parse the `before_id` cursor. A malformed cursor is ignored, like an
/// unknown one.
fn parse_cursor(raw: Option<&str>) -> Option<Uuid> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.parse::<Uuid>() {
        Ok(id) => Some(id),
        Err(_) => {
            debug!(before_id = %raw, "Ignoring malformed history cursor");
            None
        }
    }
}

/// POST /api/v1/conversations - Create a conversation.
pub async fn create_conversation(
    State(state): State<AppState>,
    owner: Owner,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Conversation>>), AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let conversation = state
        .chat_service
        .create_conversation(owner.as_str(), body.model_name, body.system_prompt)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/conversations/{}", conversation.id);
    let messages_link = format!("{self_link}/messages");
    let resp = ApiResponse::success(conversation, request_id, elapsed)
        .with_link("self", &self_link)
        .with_link("messages", &messages_link);

    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/v1/conversations - List the caller's active conversations.
pub async fn list_conversations(
    State(state): State<AppState>,
    owner: Owner,
    Query(query): Query<ConversationListQuery>,
) -> Result<Json<ApiResponse<ConversationPage>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let page = state
        .chat_service
        .list_conversations(owner.as_str(), query.limit, query.offset)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(page, request_id, elapsed)
        .with_link("self", "/api/v1/conversations");

    Ok(Json(resp))
}

/// GET /api/v1/conversations/{id} - Get a conversation.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ApiResponse<Conversation>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let conversation = state.chat_service.get_conversation(&conversation_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/conversations/{}", conversation.id);
    let messages_link = format!("{self_link}/messages");
    let resp = ApiResponse::success(conversation, request_id, elapsed)
        .with_link("self", &self_link)
        .with_link("messages", &messages_link);

    Ok(Json(resp))
}

/// DELETE /api/v1/conversations/{id} - Soft delete a conversation.
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state.chat_service.delete_conversation(&conversation_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        serde_json::json!({"deleted": true}),
        request_id,
        elapsed,
    );

    Ok(Json(resp))
}

/// GET /api/v1/conversations/{id}/messages - One page of history.
///
/// Messages are chronological within the page. Pass the oldest message's
/// id as `before_id` to fetch the previous page.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessageListQuery>,
) -> Result<Json<ApiResponse<MessagePage>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let cursor = parse_cursor(query.before_id.as_deref());
    let page = state
        .chat_service
        .list_history(&conversation_id, query.limit, cursor)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let mut resp = ApiResponse::success(page, request_id, elapsed).with_link(
        "self",
        &format!("/api/v1/conversations/{conversation_id}/messages"),
    );
    let oldest = resp
        .data
        .as_ref()
        .filter(|p| p.has_more)
        .and_then(|p| p.messages.first())
        .map(|m| m.id);
    if let Some(oldest) = oldest {
        resp = resp.with_link(
            "next",
            &format!("/api/v1/conversations/{conversation_id}/messages?before_id={oldest}"),
        );
    }

    Ok(Json(resp))
}
