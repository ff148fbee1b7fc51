//! NDJSON stream adapter for Ollama `/api/chat`.
//!
//! Ollama streams one JSON object per line. HTTP chunk boundaries do not
//! line up with object boundaries, so bytes are buffered until a newline
//! arrives. Each object maps to zero or more [`StreamEvent`]s:
//!
//! - non-empty `message.content` -> `TextDelta`
//! - `error` -> stream error, the stream ends
//! - `done: true` -> `Usage` (when counts are present) then `Done`

use std::fmt::Display;

use futures_util::{Stream, StreamExt};

use colloquy_core::llm::provider::EventStream;
use colloquy_types::llm::{LlmError, StreamEvent, Usage};

use super::types::OllamaChatChunk;

/// Splits a byte stream into complete lines.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every line completed by them. Blank lines are dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the byte stream ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest).trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Map one decoded line to stream events. `Ok(true)` means the backend said done.
fn events_for_line(line: &str, out: &mut Vec<StreamEvent>) -> Result<bool, LlmError> {
    let chunk: OllamaChatChunk = serde_json::from_str(line)
        .map_err(|e| LlmError::Deserialization(format!("invalid stream line: {e}")))?;

    if let Some(error) = chunk.error {
        return Err(LlmError::Stream(error));
    }

    let text = chunk.text();
    if !text.is_empty() {
        out.push(StreamEvent::TextDelta {
            text: text.to_string(),
        });
    }

    if chunk.done {
        if chunk.prompt_eval_count.is_some() || chunk.eval_count.is_some() {
            out.push(StreamEvent::Usage(Usage {
                input_tokens: chunk.prompt_eval_count.unwrap_or(0),
                output_tokens: chunk.eval_count.unwrap_or(0),
            }));
        }
        out.push(StreamEvent::Done);
        return Ok(true);
    }

    Ok(false)
}

/// Turn a raw NDJSON byte stream into an [`EventStream`].
///
/// A transport error or a byte stream that ends before `done: true` is a
/// [`LlmError::Stream`].
pub fn decode_ndjson<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut decoder = NdjsonDecoder::new();
        let mut bytes = Box::pin(bytes);
        let mut finished = false;

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| LlmError::Stream(format!("connection error: {e}")))?;
            for line in decoder.push(chunk.as_ref()) {
                let mut events = Vec::new();
                finished = events_for_line(&line, &mut events)?;
                for event in events {
                    yield event;
                }
                if finished {
                    break;
                }
            }
            if finished {
                break;
            }
        }

        if !finished {
            if let Some(line) = decoder.finish() {
                let mut events = Vec::new();
                finished = events_for_line(&line, &mut events)?;
                for event in events {
                    yield event;
                }
            }
        }

        if !finished {
            Err::<(), _>(LlmError::Stream("stream ended before completion".to_string()))?;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn byte_stream(parts: Vec<&'static str>) -> impl Stream<Item = Result<Vec<u8>, String>> + Send {
        stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())))
    }

    async fn collect(stream: EventStream) -> Vec<Result<StreamEvent, LlmError>> {
        stream.collect().await
    }

    #[test]
    fn test_decoder_buffers_partial_lines() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(b"{\"a\":").is_empty());
        let lines = decoder.push(b"1}\n\n{\"b\":2}\n{\"c\"");
        assert_eq!(lines, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
        assert_eq!(decoder.finish().as_deref(), Some("{\"c\""));
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_deltas_usage_and_done() {
        let stream = decode_ndjson(byte_stream(vec![
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n{\"message\":{\"role\":\"assis",
            "tant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"prompt_eval_count\":7,\"eval_count\":2}\n",
        ]));
        let events: Vec<StreamEvent> = collect(stream)
            .await
            .into_iter()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta { text: "Hel".to_string() },
                StreamEvent::TextDelta { text: "lo".to_string() },
                StreamEvent::Usage(Usage {
                    input_tokens: 7,
                    output_tokens: 2
                }),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_content_is_skipped() {
        let stream = decode_ndjson(byte_stream(vec![
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":false}\n",
            "{\"done\":true}",
        ]));
        let events: Vec<StreamEvent> = collect(stream)
            .await
            .into_iter()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[tokio::test]
    async fn test_error_line_ends_stream() {
        let stream = decode_ndjson(byte_stream(vec![
            "{\"message\":{\"role\":\"assistant\",\"content\":\"a\"},\"done\":false}\n",
            "{\"error\":\"out of memory\"}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"never\"},\"done\":false}\n",
        ]));
        let events = collect(stream).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(StreamEvent::TextDelta { .. })));
        match &events[1] {
            Err(LlmError::Stream(msg)) => assert_eq!(msg, "out of memory"),
            other => panic!("expected stream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let stream = decode_ndjson(byte_stream(vec![
            "{\"message\":{\"role\":\"assistant\",\"content\":\"partial\"},\"done\":false}\n",
        ]));
        let events = collect(stream).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(LlmError::Stream(_))));
    }

    #[tokio::test]
    async fn test_transport_error_is_a_stream_error() {
        let parts: Vec<Result<Vec<u8>, String>> = vec![Err("reset by peer".to_string())];
        let events = collect(decode_ndjson(stream::iter(parts))).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(LlmError::Stream(_))));
    }

    #[tokio::test]
    async fn test_invalid_json_is_deserialization_error() {
        let events = collect(decode_ndjson(byte_stream(vec!["not json\n"]))).await;
        assert!(matches!(events[0], Err(LlmError::Deserialization(_))));
    }
}
