//! Stream reconciliation — assembles provider deltas into complete turns.
//!
//! Text deltas are forwarded to the caller as `chunk` events the moment
//! they arrive; tool invocations are buffered as raw JSON fragments keyed
//! by invocation id and surface only once their block closes. Finished
//! turns satisfy two invariants the providers require: all text blocks
//! precede all tool-invocation blocks, and the content list is never empty.

use std::collections::HashMap;

use thiserror::Error;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use querypilot_core::types::{ContentBlock, Role, Turn};
use querypilot_providers::{BlockKind, DeltaStream, ProviderDelta};

use crate::{AgentEvent, EventSink};

/// A fully assembled assistant turn with its stream metadata.
#[derive(Debug)]
pub struct AssembledTurn {
    pub turn: Turn,
    pub stop_reason: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Why assembling a turn stopped early.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The event consumer disconnected; stop computing discarded results.
    #[error("event consumer disconnected")]
    ClientGone,
    /// The provider stream failed mid-flight; fatal for this run.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// Buffer for a tool invocation whose arguments are still streaming.
#[derive(Debug, Default)]
struct PartialToolInvocation {
    name: String,
    buffer: String,
}

#[derive(Debug, PartialEq)]
enum CurrentBlock {
    Text,
    Tool(String),
}

/// Incremental turn builder. Feed [`ProviderDelta`]s with [`apply`],
/// then call [`finish`] for the reordered, normalized turn.
///
/// [`apply`]: TurnAssembler::apply
/// [`finish`]: TurnAssembler::finish
#[derive(Debug, Default)]
pub struct TurnAssembler {
    current: Option<CurrentBlock>,
    open_text: String,
    open_tools: HashMap<String, PartialToolInvocation>,
    texts: Vec<String>,
    tools: Vec<(String, String, serde_json::Value)>,
    stop_reason: Option<String>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    anonymous_ids: usize,
    done: bool,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Apply one delta. Returns text to forward immediately as a `chunk`
    /// event — text is the only block type surfaced before it closes.
    pub fn apply(&mut self, delta: ProviderDelta) -> Option<String> {
        match delta {
            ProviderDelta::BlockStart { kind, id, name } => {
                self.close_current();
                match kind {
                    BlockKind::Text => {
                        self.current = Some(CurrentBlock::Text);
                    }
                    BlockKind::ToolInvocation => {
                        let id = id.unwrap_or_else(|| {
                            self.anonymous_ids += 1;
                            format!("tool_{}", self.anonymous_ids)
                        });
                        self.open_tools.insert(
                            id.clone(),
                            PartialToolInvocation {
                                name: name.unwrap_or_default(),
                                buffer: String::new(),
                            },
                        );
                        self.current = Some(CurrentBlock::Tool(id));
                    }
                }
                None
            }
            ProviderDelta::TextDelta { text } => {
                // Lenient: a text delta without a preceding block start
                // opens the block implicitly.
                if self.current != Some(CurrentBlock::Text) {
                    self.close_current();
                    self.current = Some(CurrentBlock::Text);
                }
                self.open_text.push_str(&text);
                Some(text)
            }
            ProviderDelta::ToolArgumentDelta { fragment } => {
                if let Some(CurrentBlock::Tool(ref id)) = self.current {
                    if let Some(partial) = self.open_tools.get_mut(id) {
                        partial.buffer.push_str(&fragment);
                    }
                } else {
                    debug!("Dropping tool-argument fragment with no open tool block");
                }
                None
            }
            ProviderDelta::BlockStop => {
                self.close_current();
                None
            }
            ProviderDelta::MessageStop { reason } => {
                self.close_current();
                self.stop_reason = reason;
                self.done = true;
                None
            }
            ProviderDelta::Usage {
                input_tokens,
                output_tokens,
            } => {
                if input_tokens.is_some() {
                    self.input_tokens = input_tokens;
                }
                if output_tokens.is_some() {
                    self.output_tokens = output_tokens;
                }
                None
            }
        }
    }

    fn close_current(&mut self) {
        match self.current.take() {
            Some(CurrentBlock::Text) => {
                let text = std::mem::take(&mut self.open_text);
                if !text.is_empty() {
                    self.texts.push(text);
                }
            }
            Some(CurrentBlock::Tool(id)) => {
                let Some(partial) = self.open_tools.remove(&id) else {
                    return;
                };
                let arguments = if partial.buffer.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    match serde_json::from_str(&partial.buffer) {
                        Ok(value) => value,
                        Err(e) => {
                            // Non-fatal: the tool rejects empty arguments
                            // itself. The buffer may embed user data, so
                            // log its length only.
                            warn!(
                                invocation_id = %id,
                                buffer_len = partial.buffer.len(),
                                %e,
                                "Tool arguments failed to parse, degrading to empty object"
                            );
                            serde_json::json!({})
                        }
                    }
                };
                self.tools.push((id, partial.name, arguments));
            }
            None => {}
        }
    }

    /// Finalize: text blocks first (original relative order), then tool
    /// invocations (original relative order); an otherwise empty turn
    /// becomes a single empty text block.
    pub fn finish(mut self) -> AssembledTurn {
        self.close_current();

        let mut content: Vec<ContentBlock> = self
            .texts
            .into_iter()
            .map(|text| ContentBlock::Text { text })
            .collect();
        content.extend(
            self.tools
                .into_iter()
                .map(|(id, name, arguments)| ContentBlock::ToolInvocation { id, name, arguments }),
        );

        if content.is_empty() {
            content.push(ContentBlock::Text { text: String::new() });
        }

        AssembledTurn {
            turn: Turn {
                role: Role::Assistant,
                content,
            },
            stop_reason: self.stop_reason,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

/// Drain a provider delta stream into one assembled turn, forwarding text
/// chunks to the sink as they arrive.
pub async fn assemble_turn(
    mut stream: DeltaStream,
    sink: &EventSink,
) -> Result<AssembledTurn, StreamError> {
    let mut assembler = TurnAssembler::new();

    while let Some(item) = stream.next().await {
        let delta = item.map_err(StreamError::Provider)?;
        if let Some(chunk) = assembler.apply(delta) {
            if !sink.emit(AgentEvent::Chunk { content: chunk }) {
                return Err(StreamError::ClientGone);
            }
        }
        if assembler.is_done() {
            break;
        }
    }

    Ok(assembler.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn text_start() -> ProviderDelta {
        ProviderDelta::BlockStart {
            kind: BlockKind::Text,
            id: None,
            name: None,
        }
    }

    fn tool_start(id: &str, name: &str) -> ProviderDelta {
        ProviderDelta::BlockStart {
            kind: BlockKind::ToolInvocation,
            id: Some(id.into()),
            name: Some(name.into()),
        }
    }

    fn text(t: &str) -> ProviderDelta {
        ProviderDelta::TextDelta { text: t.into() }
    }

    fn fragment(f: &str) -> ProviderDelta {
        ProviderDelta::ToolArgumentDelta { fragment: f.into() }
    }

    fn stop(reason: &str) -> ProviderDelta {
        ProviderDelta::MessageStop {
            reason: Some(reason.into()),
        }
    }

    fn assemble(deltas: Vec<ProviderDelta>) -> AssembledTurn {
        let mut assembler = TurnAssembler::new();
        for delta in deltas {
            assembler.apply(delta);
        }
        assembler.finish()
    }

    #[test]
    fn test_text_blocks_precede_tool_blocks() {
        // Interleaved: text, tool, text — reordered to text, text, tool
        let assembled = assemble(vec![
            text_start(),
            text("first"),
            ProviderDelta::BlockStop,
            tool_start("toolu_1", "select_rows"),
            fragment("{}"),
            ProviderDelta::BlockStop,
            text_start(),
            text("second"),
            ProviderDelta::BlockStop,
            stop("tool_use"),
        ]);

        let kinds: Vec<&str> = assembled
            .turn
            .content
            .iter()
            .map(|b| match b {
                ContentBlock::Text { .. } => "text",
                ContentBlock::ToolInvocation { .. } => "tool",
                ContentBlock::ToolResult { .. } => "result",
            })
            .collect();
        assert_eq!(kinds, vec!["text", "text", "tool"]);
        assert_eq!(assembled.turn.text(), "firstsecond");
    }

    #[test]
    fn test_relative_order_preserved_within_kinds() {
        let assembled = assemble(vec![
            tool_start("a", "first_tool"),
            ProviderDelta::BlockStop,
            tool_start("b", "second_tool"),
            ProviderDelta::BlockStop,
            stop("tool_use"),
        ]);
        let invocations = assembled.turn.tool_invocations();
        assert_eq!(invocations[0].0, "a");
        assert_eq!(invocations[1].0, "b");
    }

    #[test]
    fn test_empty_turn_normalized_to_empty_text() {
        let assembled = assemble(vec![stop("end_turn")]);
        assert_eq!(assembled.turn.content.len(), 1);
        assert_eq!(
            assembled.turn.content[0],
            ContentBlock::Text { text: String::new() }
        );
    }

    #[test]
    fn test_argument_fragments_concatenate_and_parse() {
        let assembled = assemble(vec![
            tool_start("toolu_1", "execute_sql_query"),
            fragment("{\"query\":"),
            fragment("\"SELECT 1\""),
            fragment("}"),
            ProviderDelta::BlockStop,
            stop("tool_use"),
        ]);
        let invocations = assembled.turn.tool_invocations();
        assert_eq!(*invocations[0].2, json!({"query": "SELECT 1"}));
    }

    #[test]
    fn test_malformed_arguments_degrade_to_empty_object() {
        let assembled = assemble(vec![
            tool_start("toolu_1", "execute_sql_query"),
            fragment("{\"query\": not json"),
            ProviderDelta::BlockStop,
            stop("tool_use"),
        ]);
        let invocations = assembled.turn.tool_invocations();
        assert_eq!(*invocations[0].2, json!({}));
    }

    #[test]
    fn test_empty_argument_buffer_is_empty_object() {
        let assembled = assemble(vec![
            tool_start("toolu_1", "list_enum_values"),
            ProviderDelta::BlockStop,
            stop("tool_use"),
        ]);
        assert_eq!(*assembled.turn.tool_invocations()[0].2, json!({}));
    }

    #[test]
    fn test_tool_blocks_kept_despite_stale_stop_reason() {
        // Stop reason is advisory: tool blocks assembled under a
        // non-tool_use reason are still reported.
        let assembled = assemble(vec![
            tool_start("toolu_1", "select_rows"),
            fragment("{}"),
            ProviderDelta::BlockStop,
            stop("end_turn"),
        ]);
        assert_eq!(assembled.turn.tool_invocations().len(), 1);
        assert_eq!(assembled.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_usage_recorded() {
        let mut assembler = TurnAssembler::new();
        assembler.apply(ProviderDelta::Usage {
            input_tokens: Some(100),
            output_tokens: None,
        });
        assembler.apply(ProviderDelta::Usage {
            input_tokens: None,
            output_tokens: Some(25),
        });
        let assembled = assembler.finish();
        assert_eq!(assembled.input_tokens, Some(100));
        assert_eq!(assembled.output_tokens, Some(25));
    }

    #[tokio::test]
    async fn test_chunks_forwarded_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        let deltas: Vec<anyhow::Result<ProviderDelta>> = vec![
            Ok(text_start()),
            Ok(text("Here are ")),
            Ok(text("3 users")),
            Ok(ProviderDelta::BlockStop),
            Ok(stop("end_turn")),
        ];
        let stream: DeltaStream = Box::pin(futures::stream::iter(deltas));

        let assembled = assemble_turn(stream, &sink).await.unwrap();
        assert_eq!(assembled.turn.text(), "Here are 3 users");

        let mut chunks = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::Chunk { content } = event {
                chunks.push(content);
            }
        }
        assert_eq!(chunks, vec!["Here are ", "3 users"]);
    }

    #[tokio::test]
    async fn test_provider_error_is_terminal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        let deltas: Vec<anyhow::Result<ProviderDelta>> = vec![
            Ok(text_start()),
            Ok(text("partial")),
            Err(anyhow::anyhow!("connection reset")),
        ];
        let stream: DeltaStream = Box::pin(futures::stream::iter(deltas));

        let result = assemble_turn(stream, &sink).await;
        assert!(matches!(result, Err(StreamError::Provider(_))));
    }

    #[tokio::test]
    async fn test_closed_consumer_aborts_assembly() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = EventSink::new(tx);

        let deltas: Vec<anyhow::Result<ProviderDelta>> =
            vec![Ok(text_start()), Ok(text("to nobody"))];
        let stream: DeltaStream = Box::pin(futures::stream::iter(deltas));

        let result = assemble_turn(stream, &sink).await;
        assert!(matches!(result, Err(StreamError::ClientGone)));
    }
}
