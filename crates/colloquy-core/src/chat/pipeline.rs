//! Streaming delta pipeline.
//!
//! Consumes a backend event stream, forwards each text fragment to a live
//! sink as soon as it arrives, and buffers the full reply. When the stream
//! ends (cleanly, with an error, or by cancellation) the buffered text is
//! persisted as one assistant message, at most once.

use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use colloquy_types::chat::{ChatMessage, MessageRole, NewMessage, TurnEvent};
use colloquy_types::error::RepositoryError;
use colloquy_types::llm::{StreamEvent, Usage};

use crate::chat::repository::ChatRepository;
use crate::llm::provider::EventStream;
use crate::llm::tokenizer::TokenCounter;

/// Lifecycle of one streamed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Idle => write!(f, "idle"),
            StreamState::Streaming => write!(f, "streaming"),
            StreamState::Completed => write!(f, "completed"),
            StreamState::Failed => write!(f, "failed"),
            StreamState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The live transport went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delta sink closed")]
pub struct SinkClosed;

/// Synchronous, non-blocking destination for turn events.
pub trait DeltaSink: Send {
    fn emit(&mut self, event: TurnEvent) -> Result<(), SinkClosed>;
}

impl DeltaSink for UnboundedSender<TurnEvent> {
    fn emit(&mut self, event: TurnEvent) -> Result<(), SinkClosed> {
        self.send(event).map_err(|_| SinkClosed)
    }
}

/// Why a stream ended in [`StreamState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The backend reported an error mid-stream.
    Backend(String),
    /// Writing to the sink failed.
    SinkClosed,
}

/// What a finished pipeline run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: StreamState,
    /// Everything received, complete or partial.
    pub content: String,
    pub failure: Option<FailureCause>,
    pub usage: Option<Usage>,
    /// The persisted assistant message, when there was text to persist.
    pub message: Option<ChatMessage>,
    pub persist_error: Option<RepositoryError>,
}

/// One streamed reply for one conversation.
///
/// The assistant message id is assigned up front so the terminal `done`
/// event can name it before the row is written.
pub struct StreamingDeltaPipeline<C: ChatRepository> {
    repo: Arc<C>,
    counter: Arc<TokenCounter>,
    conversation_id: String,
    message_id: Uuid,
    state: StreamState,
}

impl<C: ChatRepository> StreamingDeltaPipeline<C> {
    pub fn new(repo: Arc<C>, counter: Arc<TokenCounter>, conversation_id: impl Into<String>) -> Self {
        Self {
            repo,
            counter,
            conversation_id: conversation_id.into(),
            message_id: Uuid::now_v7(),
            state: StreamState::Idle,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Drive `stream` to its end, forwarding deltas to `sink`.
    ///
    /// Fragments are emitted one event each, in receive order. On a clean
    /// end a `done` event follows. A backend error yields an `error` event
    /// and then `done`. A closed sink or a fired `cancel` token drops the
    /// backend stream and emits nothing further. In every case non-empty
    /// text is persisted exactly once.
    pub async fn run<S: DeltaSink>(
        mut self,
        stream: EventStream,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        let mut stream = stream;
        let mut content = String::new();
        let mut usage = None;
        let mut failure = None;
        self.state = StreamState::Streaming;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.state = StreamState::Cancelled;
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(StreamEvent::TextDelta { text })) => {
                    if text.is_empty() {
                        continue;
                    }
                    content.push_str(&text);
                    if sink.emit(TurnEvent::Delta { content: text }).is_err() {
                        debug!(conversation_id = %self.conversation_id, "Client went away mid-stream");
                        self.state = StreamState::Failed;
                        failure = Some(FailureCause::SinkClosed);
                        break;
                    }
                }
                Some(Ok(StreamEvent::Usage(u))) => usage = Some(u),
                Some(Ok(StreamEvent::Done)) | None => {
                    self.state = StreamState::Completed;
                    break;
                }
                Some(Err(e)) => {
                    warn!(conversation_id = %self.conversation_id, error = %e, "Backend stream failed");
                    self.state = StreamState::Failed;
                    failure = Some(FailureCause::Backend(e.to_string()));
                    break;
                }
            }
        }

        // Dropping the stream aborts the backend call if it is still running.
        drop(stream);

        let message_id = (!content.is_empty()).then_some(self.message_id);
        match (&self.state, &failure) {
            (StreamState::Completed, _) => {
                let _ = sink.emit(TurnEvent::Done { message_id });
            }
            (StreamState::Failed, Some(FailureCause::Backend(message))) => {
                let _ = sink
                    .emit(TurnEvent::Error {
                        message: message.clone(),
                    })
                    .and_then(|_| sink.emit(TurnEvent::Done { message_id }));
            }
            _ => {}
        }

        let (message, persist_error) = self.persist(&content).await;

        info!(
            conversation_id = %self.conversation_id,
            state = %self.state,
            chars = content.chars().count(),
            persisted = message.is_some(),
            "Stream finished"
        );

        PipelineOutcome {
            state: self.state,
            content,
            failure,
            usage,
            message,
            persist_error,
        }
    }

    async fn persist(&self, content: &str) -> (Option<ChatMessage>, Option<RepositoryError>) {
        if content.is_empty() {
            return (None, None);
        }
        let new_message = NewMessage::text(&self.conversation_id, MessageRole::Assistant, content)
            .with_id(self.message_id)
            .with_tokens(self.counter.count_u32(content));
        match self.repo.append_message(&new_message).await {
            Ok(stored) => (Some(stored), None),
            Err(e) => {
                error!(
                    conversation_id = %self.conversation_id,
                    message_id = %self.message_id,
                    error = %e,
                    "Failed to persist assistant reply"
                );
                (None, Some(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{Ending, InMemoryChatRepository, ScriptedProvider};
    use crate::llm::provider::LlmProvider;
    use colloquy_types::chat::Conversation;
    use colloquy_types::llm::CompletionRequest;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    async fn setup() -> (Arc<InMemoryChatRepository>, StreamingDeltaPipeline<InMemoryChatRepository>) {
        let repo = Arc::new(InMemoryChatRepository::new());
        repo.create_conversation(&Conversation::new("c-1", "alice", "llama3.2"))
            .await
            .unwrap();
        let pipeline = StreamingDeltaPipeline::new(
            Arc::clone(&repo),
            Arc::new(TokenCounter::characters()),
            "c-1",
        );
        (repo, pipeline)
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "llama3.2".to_string(),
            messages: Vec::new(),
            temperature: None,
            stream: true,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn delta(text: &str) -> TurnEvent {
        TurnEvent::Delta {
            content: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_completed_stream_emits_and_persists_once() {
        let (repo, pipeline) = setup().await;
        let id = pipeline.message_id();
        let provider = ScriptedProvider::streaming(&["Hel", "lo", " world"], Ending::Done);
        let (mut tx, mut rx) = mpsc::unbounded_channel();

        let outcome = pipeline
            .run(provider.stream(request()), &mut tx, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, StreamState::Completed);
        assert_eq!(
            drain(&mut rx),
            vec![
                delta("Hel"),
                delta("lo"),
                delta(" world"),
                TurnEvent::Done {
                    message_id: Some(id)
                },
            ]
        );
        let stored = repo.messages("c-1");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Hello world");
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].role, MessageRole::Assistant);
        assert_eq!(stored[0].tokens, 11);
    }

    #[tokio::test]
    async fn test_backend_error_persists_partial() {
        let (repo, pipeline) = setup().await;
        let provider =
            ScriptedProvider::streaming(&["Par", "tial"], Ending::Error("connection reset".into()));
        let (mut tx, mut rx) = mpsc::unbounded_channel();

        let outcome = pipeline
            .run(provider.stream(request()), &mut tx, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, StreamState::Failed);
        assert!(matches!(outcome.failure, Some(FailureCause::Backend(_))));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], delta("Par"));
        assert_eq!(events[1], delta("tial"));
        assert!(matches!(&events[2], TurnEvent::Error { message } if message.contains("connection reset")));
        assert!(matches!(events[3], TurnEvent::Done { message_id: Some(_) }));

        let stored = repo.messages("c-1");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Partial");
    }

    #[tokio::test]
    async fn test_cancellation_stops_events_and_persists_partial() {
        let (repo, pipeline) = setup().await;
        let provider = ScriptedProvider::streaming(&["Par"], Ending::Hang);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let stream = provider.stream(request());
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut tx = tx;
            pipeline.run(stream, &mut tx, run_cancel).await
        });

        assert_eq!(rx.recv().await, Some(delta("Par")));
        cancel.cancel();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.state, StreamState::Cancelled);
        // Sender dropped with the task and nothing else was sent.
        assert_eq!(rx.recv().await, None);
        let stored = repo.messages("c-1");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Par");
    }

    #[tokio::test]
    async fn test_closed_sink_fails_and_persists_partial() {
        let (repo, pipeline) = setup().await;
        let provider = ScriptedProvider::streaming(&["Hel", "lo"], Ending::Done);
        let (mut tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let outcome = pipeline
            .run(provider.stream(request()), &mut tx, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, StreamState::Failed);
        assert_eq!(outcome.failure, Some(FailureCause::SinkClosed));
        assert_eq!(outcome.content, "Hel");
        assert_eq!(repo.messages("c-1")[0].content, "Hel");
    }

    #[tokio::test]
    async fn test_empty_stream_persists_nothing() {
        let (repo, pipeline) = setup().await;
        let provider = ScriptedProvider::streaming(&["", ""], Ending::Done);
        let (mut tx, mut rx) = mpsc::unbounded_channel();

        let outcome = pipeline
            .run(provider.stream(request()), &mut tx, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, StreamState::Completed);
        assert!(outcome.message.is_none());
        assert_eq!(drain(&mut rx), vec![TurnEvent::Done { message_id: None }]);
        assert!(repo.messages("c-1").is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let (repo, pipeline) = setup().await;
        repo.fail_appends_for(MessageRole::Assistant);
        let provider = ScriptedProvider::streaming(&["Hi"], Ending::Done);
        let (mut tx, _rx) = mpsc::unbounded_channel();

        let outcome = pipeline
            .run(provider.stream(request()), &mut tx, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, StreamState::Completed);
        assert!(outcome.message.is_none());
        assert!(outcome.persist_error.is_some());
    }

    #[test]
    fn test_new_pipeline_is_idle() {
        let repo = Arc::new(InMemoryChatRepository::new());
        let pipeline =
            StreamingDeltaPipeline::new(repo, Arc::new(TokenCounter::characters()), "c-1");
        assert_eq!(pipeline.state(), StreamState::Idle);
        assert_eq!(StreamState::Cancelled.to_string(), "cancelled");
    }
}
