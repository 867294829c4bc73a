//! Agent runtime — drives the tool-calling conversation loop.
//!
//! The runtime takes a natural-language query with its database context,
//! streams the LLM response, reconciles deltas into complete turns,
//! executes tool calls, and produces an append-only stream of
//! [`AgentEvent`]s for the transport layer to serialize.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod prompt;
pub mod reconcile;
pub mod runtime;
pub mod truncate;

pub use runtime::{RunOptions, run_agent};

/// Events emitted during an agent run, in the order the UI renders them.
///
/// For a given invocation `tool_call` always precedes its `tool_response`;
/// `done` is the last event on success; on a transport failure `error` is
/// last and `done` is never sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The tool roster, sent once before the first provider call.
    Tools { tools: Vec<String> },

    /// Incremental assistant text.
    Chunk { content: String },

    /// A tool is about to run.
    ToolCall {
        #[serde(rename = "toolName")]
        tool_name: String,
        args: serde_json::Value,
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
    },

    /// A tool finished. `response` is a short human-readable summary;
    /// `data` carries up to ten preview rows for tabular results.
    ToolResponse {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        success: bool,
        response: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },

    /// Keep-alive for the outbound transport.
    Heartbeat {},

    /// Fatal transport/provider failure; the run is over.
    Error { error: String },

    /// Clean termination.
    Done {},
}

/// Fire-and-forget sender for agent events.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { tx }
    }

    /// Emit an event. Returns false when the consumer is gone, which the
    /// loop treats as a signal to stop computing discarded results.
    pub fn emit(&self, event: AgentEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Result of a completed agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    /// Final assistant text, if the run produced any.
    pub final_text: Option<String>,
    pub meta: AgentRunMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunMeta {
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_calls: u32,
    pub iterations: u32,
    /// True when the event consumer went away mid-run.
    pub aborted: bool,
    pub stop_reason: Option<String>,
    pub error: Option<AgentRunError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunError {
    pub kind: AgentErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    ProviderError,
    ClientGone,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shapes() {
        let event = AgentEvent::ToolCall {
            tool_name: "execute_sql_query".into(),
            args: json!({"query": "SELECT 1"}),
            tool_use_id: "toolu_1".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["toolName"], "execute_sql_query");
        assert_eq!(value["toolUseId"], "toolu_1");

        let event = AgentEvent::ToolResponse {
            tool_name: "execute_sql_query".into(),
            tool_use_id: "toolu_1".into(),
            success: true,
            response: "Result: 1".into(),
            data: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_response");
        assert_eq!(value["success"], true);
        // Absent data is omitted, not null
        assert!(value.get("data").is_none());

        assert_eq!(
            serde_json::to_value(AgentEvent::Heartbeat {}).unwrap(),
            json!({"type": "heartbeat"})
        );
        assert_eq!(
            serde_json::to_value(AgentEvent::Done {}).unwrap(),
            json!({"type": "done"})
        );
    }

    #[test]
    fn test_sink_reports_closed_consumer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        assert!(sink.emit(AgentEvent::Done {}));
        drop(rx);
        assert!(!sink.emit(AgentEvent::Done {}));
    }
}
