//! Generic SSE (Server-Sent Events) parser.
//!
//! [`SseParser`] is a push parser fed raw byte chunks; [`sse_events`]
//! wraps a `reqwest::Response` body into a `Stream<Item = SseEvent>`.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::Stream;
use tokio_stream::StreamExt;

/// A parsed SSE event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser. Partial lines are carried across chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline_pos);

            if line.is_empty() {
                // Blank line dispatches the accumulated event.
                if let Some(event) = self.take_event() {
                    events.push(event);
                }
                continue;
            }

            if line.starts_with(':') {
                // Comment, skip
                continue;
            }

            if let Some(value) = line.strip_prefix("event:") {
                self.event = Some(value.trim_start().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.trim_start().to_string());
            }
            // Unknown fields (id:, retry:, …) are ignored.
        }
        events
    }

    /// Flush any event left when the stream ends without a trailing blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.take_event()
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Parse a `reqwest` response body as an SSE event stream.
pub fn sse_events(response: reqwest::Response) -> impl Stream<Item = anyhow::Result<SseEvent>> {
    struct State {
        bytes: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
        parser: SseParser,
        ready: VecDeque<SseEvent>,
        done: bool,
    }

    futures::stream::unfold(
        State {
            bytes: Box::pin(response.bytes_stream()),
            parser: SseParser::new(),
            ready: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.ready.pop_front() {
                    return Some((Ok(event), state));
                }
                if state.done {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.ready.extend(state.parser.push(&chunk));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(anyhow::anyhow!("SSE stream error: {e}")), state));
                    }
                    None => {
                        state.done = true;
                        if let Some(event) = state.parser.finish() {
                            state.ready.push_back(event);
                        }
                    }
                }
            }
        },
    )
}
