//! Chat turn endpoint.
//!
//! POST /api/v1/chat
//!
//! With `stream: false` the reply is returned in the JSON envelope as
//! `{ message_id, content }`. With `stream: true` it is streamed as
//! Server-Sent Events:
//! - `message` with `{ "content": "...", "done": false }` per fragment
//! - `error` with `{ "message": "..." }` when the backend fails mid-stream
//! - `message` with `{ "done": true, "message_id": "..." }` as the terminal event
//!
//! Errors found before the first fragment (validation, storage, unknown
//! conversation) are ordinary JSON error responses.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use colloquy_types::chat::{StreamChunk, TurnEvent, TurnRequest};

use crate::http::error::AppError;
use crate::http::extractors::owner::Owner;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// SSE event name and JSON payload for one turn event.
pub fn sse_payload(event: &TurnEvent) -> (&'static str, String) {
    match event {
        TurnEvent::Delta { content } => {
            let chunk = StreamChunk {
                message_id: None,
                content: content.clone(),
                done: false,
            };
            ("message", serde_json::to_string(&chunk).unwrap_or_default())
        }
        TurnEvent::Error { message } => (
            "error",
            serde_json::json!({ "message": message }).to_string(),
        ),
        TurnEvent::Done { message_id } => {
            let chunk = StreamChunk {
                message_id: *message_id,
                content: String::new(),
                done: true,
            };
            ("message", serde_json::to_string(&chunk).unwrap_or_default())
        }
    }
}

fn to_sse_event(event: &TurnEvent) -> Event {
    let (name, data) = sse_payload(event);
    Event::default().event(name).data(data)
}

/// POST /api/v1/chat - Run one conversational turn.
pub async fn post_chat(
    State(state): State<AppState>,
    owner: Owner,
    Json(body): Json<TurnRequest>,
) -> Result<Response, AppError> {
    if !body.stream {
        let start = Instant::now();
        let request_id = Uuid::now_v7().to_string();

        let reply = state.chat_service.run_turn(owner.as_str(), &body).await?;

        let elapsed = start.elapsed().as_millis() as u64;
        let resp = ApiResponse::success(reply, request_id, elapsed).with_link(
            "messages",
            &format!("/api/v1/conversations/{}/messages", body.conversation_id.trim()),
        );
        return Ok(Json(resp).into_response());
    }

    let turn = state
        .chat_service
        .start_streaming_turn(owner.as_str(), &body)
        .await?;

    let (tx, rx) = mpsc::unbounded_channel::<TurnEvent>();
    let cancel = CancellationToken::new();
    // Dropped with the SSE body when the client disconnects.
    let disconnect_guard = cancel.clone().drop_guard();

    // Detached: partial text is persisted even after the client disconnects.
    tokio::spawn(async move {
        let mut sink = tx;
        let conversation_id = turn.conversation_id().to_string();
        let outcome = turn.run(&mut sink, cancel).await;
        debug!(
            conversation_id = %conversation_id,
            state = %outcome.state,
            chars = outcome.content.len(),
            "Streaming turn finished"
        );
    });

    let sse_stream = async_stream::stream! {
        let _disconnect_guard = disconnect_guard;
        let mut events = UnboundedReceiverStream::new(rx);
        while let Some(event) = events.next().await {
            yield Ok::<_, Infallible>(to_sse_event(&event));
        }
    };

    Ok(Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}
