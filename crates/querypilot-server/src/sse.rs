//! Outbound SSE framing.
//!
//! Events are newline-delimited `data: <json>\n\n` frames; the body
//! stream ends when the agent's event channel closes.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::IntoResponse;
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio_stream::wrappers::UnboundedReceiverStream;

use querypilot_agent::AgentEvent;

/// Encode one event as an SSE frame.
pub fn frame(event: &AgentEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!(%e, "Failed to serialize agent event");
        r#"{"type":"error","error":"event serialization failed"}"#.to_string()
    });
    format!("data: {json}\n\n")
}

pin_project! {
    /// Response body that frames agent events as they arrive.
    pub struct EventStreamBody {
        #[pin]
        rx: UnboundedReceiverStream<AgentEvent>,
    }
}

impl EventStreamBody {
    pub fn new(rx: tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> Self {
        Self {
            rx: UnboundedReceiverStream::new(rx),
        }
    }
}

impl Stream for EventStreamBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .rx
            .poll_next(cx)
            .map(|opt| opt.map(|event| Ok(Bytes::from(frame(&event)))))
    }
}

impl IntoResponse for EventStreamBody {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        axum::http::Response::builder()
            .header("content-type", "text/event-stream")
            .header("cache-control", "no-cache")
            .header("connection", "keep-alive")
            .body(body)
            .expect("static response headers are valid")
    }
}
