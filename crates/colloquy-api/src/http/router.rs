//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`, except `/health`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Turns
        .route("/chat", post(handlers::chat::post_chat))
        // Conversations
        .route(
            "/conversations",
            get(handlers::conversation::list_conversations)
                .post(handlers::conversation::create_conversation),
        )
        .route(
            "/conversations/{id}",
            get(handlers::conversation::get_conversation)
                .delete(handlers::conversation::delete_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(handlers::conversation::list_messages),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health::health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures_util::StreamExt;
    use std::time::Duration;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use colloquy_core::llm::box_provider::BoxLlmProvider;
    use colloquy_core::llm::provider::{EventStream, LlmProvider};
    use colloquy_infra::sqlite::pool::{DatabasePool, database_url_in};
    use colloquy_types::config::GlobalConfig;
    use colloquy_types::llm::{
        CompletionRequest, CompletionResponse, LlmError, StreamEvent, Usage,
    };

    /// Replies with fixed text; streams it in fixed chunks.
    struct CannedProvider {
        chunks: Vec<&'static str>,
        /// Stall after the last chunk instead of finishing.
        stall: bool,
    }

    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.chunks.concat(),
                model: request.model.clone(),
                usage: Usage::default(),
            })
        }

        fn stream(&self, _request: CompletionRequest) -> EventStream {
            let events: Vec<Result<StreamEvent, LlmError>> = self
                .chunks
                .iter()
                .map(|c| Ok(StreamEvent::TextDelta { text: c.to_string() }))
                .collect();
            let chunks = futures_util::stream::iter(events);
            if self.stall {
                Box::pin(chunks.chain(futures_util::stream::pending()))
            } else {
                let done = futures_util::stream::iter([Ok(StreamEvent::Done)]);
                Box::pin(chunks.chain(done))
            }
        }
    }

    async fn test_app() -> (Router, TempDir) {
        app_with(CannedProvider {
            chunks: vec!["Hel", "lo", " world"],
            stall: false,
        })
        .await
    }

    async fn app_with(provider: CannedProvider) -> (Router, TempDir) {
        let tmp = TempDir::new().unwrap();
        let pool = DatabasePool::new(&database_url_in(tmp.path())).await.unwrap();
        let provider = BoxLlmProvider::new(provider);
        let state = AppState::from_parts(
            GlobalConfig::default(),
            tmp.path().to_path_buf(),
            pool,
            provider,
        );
        (build_router(state), tmp)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-id", "alice")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-user-id", "alice")
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_database() {
        let (app, _tmp) = test_app().await;
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["database"], "ok");
        assert!(json.get("backend").is_none());
    }

    #[tokio::test]
    async fn non_streaming_turn_then_history() {
        let (app, _tmp) = test_app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/chat",
                serde_json::json!({"conversation_id": "c-1", "content": "Hi", "stream": false}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["content"], "Hello world");
        let reply_id = json["data"]["message_id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(get_request("/api/v1/conversations/c-1/messages"))
            .await
            .unwrap();
        let json = body_json(response).await;
        let messages = json["data"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "Hi");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["id"], reply_id.as_str());
        assert_eq!(json["data"]["has_more"], false);
    }

    #[tokio::test]
    async fn streaming_turn_emits_sse_and_persists() {
        let (app, _tmp) = test_app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/chat",
                serde_json::json!({"conversation_id": "c-2", "content": "Hi", "stream": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();

        let data_lines: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .collect();
        assert_eq!(data_lines.len(), 4);
        assert_eq!(data_lines[0], r#"{"content":"Hel","done":false}"#);
        assert_eq!(data_lines[1], r#"{"content":"lo","done":false}"#);
        assert_eq!(data_lines[2], r#"{"content":" world","done":false}"#);
        let done: serde_json::Value = serde_json::from_str(data_lines[3]).unwrap();
        assert_eq!(done["done"], true);
        let message_id = done["message_id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(get_request("/api/v1/conversations/c-2/messages"))
            .await
            .unwrap();
        let json = body_json(response).await;
        let messages = json["data"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["content"], "Hello world");
        assert_eq!(messages[1]["id"], message_id.as_str());
    }

    #[tokio::test]
    async fn client_disconnect_persists_partial_reply() {
        let (app, _tmp) = app_with(CannedProvider {
            chunks: vec!["Par", "tial"],
            stall: true,
        })
        .await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/chat",
                serde_json::json!({"conversation_id": "c-3", "content": "Hi", "stream": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Read until both fragments have arrived, then hang up.
        let mut body = response.into_body();
        let mut received = String::new();
        while !received.contains(r#""content":"tial""#) {
            let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
                .await
                .expect("fragments should arrive")
                .unwrap()
                .unwrap();
            if let Ok(data) = frame.into_data() {
                received.push_str(&String::from_utf8_lossy(&data));
            }
        }
        drop(body);

        let mut messages = Vec::new();
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(get_request("/api/v1/conversations/c-3/messages"))
                .await
                .unwrap();
            let json = body_json(response).await;
            messages = json["data"]["messages"].as_array().unwrap().clone();
            if messages.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "Partial");
    }

    #[tokio::test]
    async fn blank_content_is_bad_request() {
        let (app, _tmp) = test_app().await;
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/v1/chat",
                serde_json::json!({"conversation_id": "c-1", "content": "  "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["errors"][0]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn conversation_lifecycle() {
        let (app, _tmp) = test_app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/conversations",
                serde_json::json!({"system_prompt": "Be terse."}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        let id = json["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(json["data"]["owner_id"], "alice");
        assert_eq!(json["data"]["model_name"], "llama3.2");
        assert_eq!(json["data"]["system_prompt"], "Be terse.");

        let response = app
            .clone()
            .oneshot(get_request("/api/v1/conversations"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["data"]["total_count"], 1);
        assert_eq!(json["data"]["conversations"][0]["id"], id.as_str());

        let uri = format!("/api/v1/conversations/{id}");
        let response = app.clone().oneshot(get_request(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let delete = Request::builder()
            .method("DELETE")
            .uri(&uri)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get_request(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(get_request("/api/v1/conversations"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["data"]["total_count"], 0);
    }

    #[tokio::test]
    async fn unknown_conversation_history_is_empty() {
        let (app, _tmp) = test_app().await;
        let response = app
            .oneshot(get_request("/api/v1/conversations/nope/messages?before_id=garbage"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["messages"].as_array().unwrap().len(), 0);
        assert_eq!(json["data"]["has_more"], false);
    }
}
