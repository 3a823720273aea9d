// Streaming relay
//
// Reads a backend's native stream, re-emits it as canonical
// `chat.completion.chunk` frames, and terminates with either `[DONE]` or an
// explicit error frame. A stream that stops without its end marker is never
// reported as a success.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::dialects::Dialect;
use crate::error::RouteError;
use crate::server::openai_types::{ChatCompletionChunk, ChatCompletionResponse, Delta};

/// Buffered frames between the relay task and the HTTP body.
pub const FRAME_BUFFER: usize = 32;

/// Longest pending line accepted from a backend stream.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One canonical SSE frame.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Chunk(ChatCompletionChunk),
    Done,
    Error(RouteError),
}

impl StreamFrame {
    pub fn to_sse(&self) -> String {
        match self {
            StreamFrame::Chunk(chunk) => match serde_json::to_string(chunk) {
                Ok(json) => format!("data: {}\n\n", json),
                Err(e) => format!(
                    "event: error\ndata: {}\n\n",
                    serde_json::json!({"error": {"code": "INTERNAL_ERROR", "message": e.to_string()}})
                ),
            },
            StreamFrame::Done => "data: [DONE]\n\n".to_string(),
            StreamFrame::Error(err) => format!("event: error\ndata: {}\n\n", err.body()),
        }
    }
}

pub(crate) struct Relay {
    dialect: Dialect,
    backend: String,
    id: String,
    model: String,
    idle_timeout: Duration,
    tx: mpsc::Sender<StreamFrame>,
}

impl Relay {
    pub(crate) fn new(
        dialect: Dialect,
        backend: String,
        model: String,
        idle_timeout: Duration,
        tx: mpsc::Sender<StreamFrame>,
    ) -> Self {
        Self {
            dialect,
            backend,
            id: crate::server::openai_types::completion_id(),
            model,
            idle_timeout,
            tx,
        }
    }

    /// Drive `body` to completion. Each read is bounded by the idle timeout.
    pub(crate) async fn run<S>(self, body: S)
    where
        S: Stream<Item = reqwest::Result<Bytes>>,
    {
        tracing::debug!(service = %self.backend, "Stream relay started");
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = match tokio::time::timeout(self.idle_timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.fail(RouteError::Timeout {
                        backend: self.backend.clone(),
                    })
                    .await;
                    return;
                }
            };

            match next {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_bytes: Vec<u8> = buffer.drain(..=newline_pos).collect();
                        let line = String::from_utf8_lossy(&line_bytes);
                        if self.handle_line(&line).await.is_break() {
                            return;
                        }
                    }
                    if buffer.len() > MAX_LINE_BYTES {
                        tracing::warn!(
                            service = %self.backend,
                            pending = buffer.len(),
                            "Backend stream line exceeds limit"
                        );
                        self.fail(RouteError::InvalidResponse {
                            backend: self.backend.clone(),
                            message: format!("stream line longer than {} bytes", MAX_LINE_BYTES),
                        })
                        .await;
                        return;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(service = %self.backend, "Backend stream failed: {}", e);
                    self.fail(RouteError::from_transport(&self.backend, &e)).await;
                    return;
                }
                None => {
                    // NDJSON backends may omit the trailing newline
                    if !buffer.is_empty() {
                        let line = String::from_utf8_lossy(&buffer).into_owned();
                        if self.handle_line(&line).await.is_break() {
                            return;
                        }
                    }
                    tracing::warn!(service = %self.backend, "Backend stream ended without end marker");
                    self.fail(RouteError::InvalidResponse {
                        backend: self.backend.clone(),
                        message: "stream ended before completion".to_string(),
                    })
                    .await;
                    return;
                }
            }
        }
    }

    /// Break when the stream is finished (cleanly or not) or the caller went away.
    async fn handle_line(&self, line: &str) -> ControlFlow<()> {
        let events = match self.dialect.decode_stream_line(line) {
            Ok(events) => events,
            Err(e) => {
                self.fail(RouteError::InvalidResponse {
                    backend: self.backend.clone(),
                    message: e.to_string(),
                })
                .await;
                return ControlFlow::Break(());
            }
        };

        for event in events {
            let frame = match event.to_delta() {
                Some((delta, finish_reason)) => {
                    if delta.role.is_none() && delta.content.is_none() && finish_reason.is_none() {
                        continue;
                    }
                    StreamFrame::Chunk(ChatCompletionChunk::new(
                        &self.id,
                        &self.model,
                        delta,
                        finish_reason,
                    ))
                }
                None => {
                    let _ = self.tx.send(StreamFrame::Done).await;
                    tracing::debug!(service = %self.backend, "Stream relay finished");
                    return ControlFlow::Break(());
                }
            };
            if self.tx.send(frame).await.is_err() {
                tracing::debug!(service = %self.backend, "Caller disconnected from stream");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn fail(&self, err: RouteError) {
        let _ = self.tx.send(StreamFrame::Error(err)).await;
    }
}

/// Serve a buffered response as a one-chunk stream (for backends without native streaming).
pub fn synthesize(response: &ChatCompletionResponse) -> mpsc::Receiver<StreamFrame> {
    let (tx, rx) = mpsc::channel(4);
    let content = response.content().unwrap_or_default().to_string();
    let chunk = |delta: Delta, finish: Option<String>| {
        StreamFrame::Chunk(ChatCompletionChunk::new(&response.id, &response.model, delta, finish))
    };

    let frames = [
        chunk(
            Delta {
                role: Some("assistant".to_string()),
                content: Some(content),
            },
            None,
        ),
        chunk(Delta::default(), Some("stop".to_string())),
        StreamFrame::Done,
    ];
    for frame in frames {
        // Capacity covers every frame
        let _ = tx.try_send(frame);
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    async fn collect(mut rx: mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    async fn relay_chunks(dialect: Dialect, chunks: Vec<&'static str>) -> Vec<StreamFrame> {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let body = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, reqwest::Error>(Bytes::from_static(c.as_bytes()))),
        );
        Relay::new(dialect, "box".into(), "m".into(), Duration::from_secs(5), tx)
            .run(body)
            .await;
        collect(rx).await
    }

    fn content_of(frame: &StreamFrame) -> Option<String> {
        match frame {
            StreamFrame::Chunk(chunk) => chunk.choices[0].delta.content.clone(),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_openai_lines_split_across_reads() {
        let frames = relay_chunks(
            Dialect::OpenAi,
            vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
                "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                "data: [DONE]\n\n",
            ],
        )
        .await;

        assert_eq!(frames.len(), 3);
        assert_eq!(content_of(&frames[0]).as_deref(), Some("Hel"));
        assert_eq!(content_of(&frames[1]).as_deref(), Some("lo"));
        assert!(matches!(frames[2], StreamFrame::Done));
    }

    #[tokio::test]
    async fn test_premature_eof_ends_with_error_frame() {
        let frames = relay_chunks(
            Dialect::OpenAi,
            vec!["data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"],
        )
        .await;

        assert_eq!(frames.len(), 2);
        assert!(matches!(frames.last(), Some(StreamFrame::Error(_))));
        assert!(!frames.iter().any(|f| matches!(f, StreamFrame::Done)));
    }

    #[tokio::test]
    async fn test_ndjson_without_trailing_newline() {
        let frames = relay_chunks(
            Dialect::Ollama,
            vec![
                "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n",
                "{\"message\":{\"content\":\"\"},\"done\":true}",
            ],
        )
        .await;

        assert_eq!(content_of(&frames[0]).as_deref(), Some("Hi"));
        assert!(matches!(frames.last(), Some(StreamFrame::Done)));
    }

    #[tokio::test]
    async fn test_garbage_line_is_an_error() {
        let frames = relay_chunks(Dialect::OpenAi, vec!["data: {oops\n"]).await;
        assert!(matches!(
            frames.as_slice(),
            [StreamFrame::Error(RouteError::InvalidResponse { .. })]
        ));
    }

    #[tokio::test]
    async fn test_endless_line_is_cut_off() {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let block = Bytes::from(vec![b'a'; 64 * 1024]);
        let body = stream::repeat_with(move || Ok::<_, reqwest::Error>(block.clone()));

        tokio::time::timeout(
            Duration::from_secs(5),
            Relay::new(Dialect::OpenAi, "box".into(), "m".into(), Duration::from_secs(5), tx)
                .run(body),
        )
        .await
        .expect("relay kept buffering");

        let frames = collect(rx).await;
        assert!(matches!(
            frames.as_slice(),
            [StreamFrame::Error(RouteError::InvalidResponse { .. })]
        ));
    }

    #[test]
    fn test_sse_encoding() {
        assert_eq!(StreamFrame::Done.to_sse(), "data: [DONE]\n\n");
        let err = StreamFrame::Error(RouteError::Timeout {
            backend: "box".into(),
        })
        .to_sse();
        assert!(err.starts_with("event: error\ndata: "));
        assert!(err.contains("BACKEND_TIMEOUT"));
    }

    #[tokio::test]
    async fn test_synthesized_stream() {
        let response = ChatCompletionResponse::single("llama2", "Hello", None);
        let frames = collect(synthesize(&response)).await;
        assert_eq!(frames.len(), 3);
        assert_eq!(content_of(&frames[0]).as_deref(), Some("Hello"));
        assert!(matches!(frames[2], StreamFrame::Done));
    }
}
