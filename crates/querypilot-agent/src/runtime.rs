//! Agent loop — orchestrates provider streaming and tool execution.
//!
//! One invocation owns one conversation; nothing is shared across
//! requests and nothing is persisted. Tool calls run sequentially so the
//! `tool_call`/`tool_response` event trace matches invocation order.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use querypilot_core::config::Config;
use querypilot_core::types::{ContentBlock, QueryRequest, Turn};
use querypilot_providers::{CompletionRequest, Credentials, LlmProvider, ToolDefinition};
use querypilot_tools::{ToolContext, ToolRegistry};

use crate::prompt::build_system_prompt;
use crate::reconcile::{StreamError, assemble_turn};
use crate::truncate::{summarize, truncate_payload};
use crate::{AgentErrorKind, AgentEvent, AgentRunError, AgentRunMeta, AgentRunResult, EventSink};

/// Per-run options resolved from config and the request.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub max_iterations: u32,
    pub force_tool_use: bool,
}

impl RunOptions {
    pub fn from_config(config: &Config, model: String) -> Self {
        Self {
            model,
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            max_iterations: config.max_tool_iterations(),
            force_tool_use: config.force_tool_use(),
        }
    }
}

/// Run the agent loop: stream the model, execute tools, emit events.
///
/// All outcomes are encoded in the returned meta; the only early exits
/// are a provider transport failure (single `error` event, no `done`) and
/// a disconnected event consumer (no further events at all).
pub async fn run_agent(
    request: &QueryRequest,
    options: &RunOptions,
    tools: &ToolRegistry,
    tool_context: &ToolContext,
    provider: &dyn LlmProvider,
    credentials: &Credentials,
    sink: &EventSink,
) -> AgentRunResult {
    let start = Instant::now();
    let system_prompt = build_system_prompt(request, tools);

    // The conversation lives for this run only: replayed history, then
    // the new user turn, growing as the loop appends assistant turns and
    // tool results.
    let mut conversation: Vec<Turn> = request.history.clone();
    conversation.push(Turn::user_text(&request.query));

    let mut meta = AgentRunMeta {
        duration_ms: 0,
        input_tokens: 0,
        output_tokens: 0,
        tool_calls: 0,
        iterations: 0,
        aborted: false,
        stop_reason: None,
        error: None,
    };

    let tool_names: Vec<String> = tools.list().iter().map(|n| n.to_string()).collect();
    if !sink.emit(AgentEvent::Tools { tools: tool_names }) {
        return aborted(meta, start);
    }

    let tool_defs = if tools.is_empty() {
        None
    } else {
        let definitions: Vec<ToolDefinition> = tools
            .tools()
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        Some(provider.format_tools(&definitions))
    };

    let mut final_text: Option<String> = None;

    for iteration in 0..options.max_iterations {
        debug!(iteration, "Agent loop iteration");

        let completion = CompletionRequest {
            model: options.model.clone(),
            system: Some(system_prompt.clone()),
            messages: provider.format_turns(&conversation),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tools: tool_defs.clone(),
            // Forcing is first-iteration only; forcing every round would
            // loop forever on providers that honor it strictly.
            force_tool_use: options.force_tool_use && iteration == 0 && tool_defs.is_some(),
        };

        let stream = match provider.send(&completion, credentials).await {
            Ok(s) => s,
            Err(e) => {
                error!(%e, "Provider stream error");
                sink.emit(AgentEvent::Error {
                    error: e.to_string(),
                });
                return failed(meta, start, e.to_string());
            }
        };

        let assembled = match assemble_turn(stream, sink).await {
            Ok(a) => a,
            Err(StreamError::ClientGone) => {
                debug!("Event consumer disconnected mid-stream, aborting run");
                return aborted(meta, start);
            }
            Err(StreamError::Provider(e)) => {
                error!(%e, "Provider stream failed mid-flight");
                sink.emit(AgentEvent::Error {
                    error: e.to_string(),
                });
                return failed(meta, start, e.to_string());
            }
        };

        if let Some(input) = assembled.input_tokens {
            meta.input_tokens = input;
        }
        if let Some(output) = assembled.output_tokens {
            meta.output_tokens += output;
        }
        meta.stop_reason = assembled.stop_reason.clone();

        let invocations: Vec<(String, String, serde_json::Value)> = assembled
            .turn
            .tool_invocations()
            .into_iter()
            .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
            .collect();
        let turn_text = assembled.turn.text();
        conversation.push(assembled.turn);

        if invocations.is_empty() {
            final_text = Some(turn_text);
            break;
        }

        // Some providers report a stale stop reason under tool forcing;
        // the assembled blocks are authoritative, but make it observable.
        let stop_says_tools = assembled
            .stop_reason
            .as_deref()
            .is_some_and(|r| provider.is_tool_use_stop(r));
        if !stop_says_tools {
            warn!(
                stop_reason = assembled.stop_reason.as_deref().unwrap_or("none"),
                tool_blocks = invocations.len(),
                "Stale stop reason: executing assembled tool calls anyway"
            );
        }

        if !turn_text.is_empty() {
            final_text = Some(turn_text);
        }

        let mut result_blocks = Vec::with_capacity(invocations.len());
        for (id, name, arguments) in &invocations {
            meta.tool_calls += 1;
            info!(tool = %name, "Executing tool");

            if !sink.emit(AgentEvent::ToolCall {
                tool_name: name.clone(),
                args: arguments.clone(),
                tool_use_id: id.clone(),
            }) {
                return aborted(meta, start);
            }

            let payload = tools.resolve(name, arguments.clone(), tool_context).await;
            let payload = truncate_payload(payload);
            let summary = summarize(&payload);

            if !sink.emit(AgentEvent::ToolResponse {
                tool_name: name.clone(),
                tool_use_id: id.clone(),
                success: summary.success,
                response: summary.response,
                data: summary.data,
            }) {
                return aborted(meta, start);
            }

            result_blocks.push(ContentBlock::ToolResult {
                invocation_id: id.clone(),
                payload,
            });
        }

        conversation.push(Turn::tool_results(result_blocks));
        meta.iterations += 1;

        if meta.iterations >= options.max_iterations {
            // Cap exhaustion is a clean finish with whatever has been
            // produced, not an error.
            info!(iterations = meta.iterations, "Iteration cap reached");
            meta.stop_reason = Some("max_iterations".into());
        }
    }

    sink.emit(AgentEvent::Done {});

    meta.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        duration_ms = meta.duration_ms,
        tool_calls = meta.tool_calls,
        input_tokens = meta.input_tokens,
        output_tokens = meta.output_tokens,
        "Agent run finished"
    );

    AgentRunResult { final_text, meta }
}

fn aborted(mut meta: AgentRunMeta, start: Instant) -> AgentRunResult {
    meta.aborted = true;
    meta.duration_ms = start.elapsed().as_millis() as u64;
    meta.error = Some(AgentRunError {
        kind: AgentErrorKind::ClientGone,
        message: "event consumer disconnected".into(),
    });
    AgentRunResult {
        final_text: None,
        meta,
    }
}

fn failed(mut meta: AgentRunMeta, start: Instant, message: String) -> AgentRunResult {
    meta.duration_ms = start.elapsed().as_millis() as u64;
    meta.error = Some(AgentRunError {
        kind: AgentErrorKind::ProviderError,
        message,
    });
    AgentRunResult {
        final_text: None,
        meta,
    }
}
