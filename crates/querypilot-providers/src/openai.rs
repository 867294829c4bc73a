//! OpenAI Chat Completions API adapter.
//!
//! Also serves OpenAI-compatible gateways (configured by base URL). The
//! wire protocol streams whole-message deltas with indexed tool calls, so
//! this adapter synthesizes the block-granular [`ProviderDelta`] events
//! the reconciler expects.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use querypilot_core::types::{ContentBlock, Role, Turn};

use crate::sse::sse_events;
use crate::{
    BlockKind, CompletionRequest, Credentials, DeltaStream, LlmProvider, ProviderDelta,
    ToolDefinition,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    pub base_url: String,
    provider_id: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(base_url: Option<&str>, connect_timeout_ms: u64, request_timeout_ms: u64) -> Self {
        Self::compatible(
            "openai",
            base_url.unwrap_or(DEFAULT_BASE_URL),
            connect_timeout_ms,
            request_timeout_ms,
        )
    }

    /// An OpenAI-compatible provider under a different id and base URL.
    pub fn compatible(
        id: &str,
        base_url: &str,
        connect_timeout_ms: u64,
        request_timeout_ms: u64,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            provider_id: id.to_string(),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_millis(connect_timeout_ms))
                .timeout(Duration::from_millis(request_timeout_ms))
                .build()
                .expect("reqwest client construction cannot fail with static options"),
        }
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Which block the mapper currently has open on the outbound side.
#[derive(Debug, PartialEq)]
enum OpenBlock {
    None,
    Text,
    Tool(usize),
}

/// Maps raw chunk payloads to block-granular deltas.
#[derive(Debug)]
struct ChunkMapper {
    open: OpenBlock,
    stop_sent: bool,
}

impl ChunkMapper {
    fn new() -> Self {
        Self {
            open: OpenBlock::None,
            stop_sent: false,
        }
    }

    /// Map one `data:` payload. `[DONE]` and unparseable chunks yield nothing.
    fn map(&mut self, data: &str) -> Vec<ProviderDelta> {
        if data == "[DONE]" {
            return self.finish();
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                trace!(%e, data, "Failed to parse OpenAI chunk");
                return Vec::new();
            }
        };

        let mut out = Vec::new();

        if let Some(usage) = chunk.usage {
            out.push(ProviderDelta::Usage {
                input_tokens: Some(usage.prompt_tokens),
                output_tokens: Some(usage.completion_tokens),
            });
        }

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(ref tc_deltas) = choice.delta.tool_calls {
            for tc in tc_deltas {
                if self.open != OpenBlock::Tool(tc.index) {
                    self.close_open(&mut out);
                    out.push(ProviderDelta::BlockStart {
                        kind: BlockKind::ToolInvocation,
                        id: tc.id.clone(),
                        name: tc.function.as_ref().and_then(|f| f.name.clone()),
                    });
                    self.open = OpenBlock::Tool(tc.index);
                }
                if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_ref()) {
                    if !args.is_empty() {
                        out.push(ProviderDelta::ToolArgumentDelta {
                            fragment: args.clone(),
                        });
                    }
                }
            }
        }

        if let Some(ref content) = choice.delta.content {
            if !content.is_empty() {
                if matches!(self.open, OpenBlock::Tool(_)) {
                    self.close_open(&mut out);
                }
                if self.open == OpenBlock::None {
                    out.push(ProviderDelta::BlockStart {
                        kind: BlockKind::Text,
                        id: None,
                        name: None,
                    });
                    self.open = OpenBlock::Text;
                }
                out.push(ProviderDelta::TextDelta {
                    text: content.clone(),
                });
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            self.close_open(&mut out);
            out.push(ProviderDelta::MessageStop {
                reason: Some(reason.clone()),
            });
            self.stop_sent = true;
        }

        out
    }

    /// Close any open block and guarantee a `MessageStop` at stream end.
    fn finish(&mut self) -> Vec<ProviderDelta> {
        let mut out = Vec::new();
        self.close_open(&mut out);
        if !self.stop_sent {
            out.push(ProviderDelta::MessageStop { reason: None });
            self.stop_sent = true;
        }
        out
    }

    fn close_open(&mut self, out: &mut Vec<ProviderDelta>) {
        if self.open != OpenBlock::None {
            out.push(ProviderDelta::BlockStop);
            self.open = OpenBlock::None;
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    fn format_turns(&self, turns: &[Turn]) -> Vec<serde_json::Value> {
        let mut messages: Vec<serde_json::Value> = Vec::new();

        for turn in turns {
            match turn.role {
                Role::User => {
                    // Tool results become individual `tool` role messages;
                    // plain text becomes one user message.
                    let mut text_parts = Vec::new();
                    for block in &turn.content {
                        match block {
                            ContentBlock::Text { text } => text_parts.push(text.as_str()),
                            ContentBlock::ToolResult { invocation_id, payload } => {
                                messages.push(json!({
                                    "role": "tool",
                                    "tool_call_id": invocation_id,
                                    "content": payload.to_string(),
                                }));
                            }
                            ContentBlock::ToolInvocation { .. } => {}
                        }
                    }
                    if !text_parts.is_empty() {
                        messages.push(json!({
                            "role": "user",
                            "content": text_parts.join("\n"),
                        }));
                    }
                }
                Role::Assistant => {
                    let mut text_parts = Vec::new();
                    let mut tool_calls = Vec::new();

                    for block in &turn.content {
                        match block {
                            ContentBlock::Text { text } => text_parts.push(text.clone()),
                            ContentBlock::ToolInvocation { id, name, arguments } => {
                                tool_calls.push(json!({
                                    "id": id,
                                    "type": "function",
                                    "function": {
                                        "name": name,
                                        "arguments": arguments.to_string(),
                                    }
                                }));
                            }
                            ContentBlock::ToolResult { .. } => {}
                        }
                    }

                    let mut msg = json!({ "role": "assistant" });
                    if !text_parts.is_empty() {
                        msg["content"] = json!(text_parts.join("\n"));
                    }
                    if !tool_calls.is_empty() {
                        msg["tool_calls"] = json!(tool_calls);
                    }
                    if msg.get("content").is_some() || msg.get("tool_calls").is_some() {
                        messages.push(msg);
                    }
                }
            }
        }

        messages
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect()
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == "tool_calls"
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<DeltaStream> {
        let api_key = match credentials {
            Credentials::ApiKey { api_key } => api_key.clone(),
            Credentials::Token { token } => token.clone(),
        };

        // Build system message if present
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().cloned());

        let has_tools = request.tools.as_ref().is_some_and(|t| !t.is_empty());
        let body = OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            stream: true,
            temperature: request.temperature,
            tools: request.tools.clone(),
            tool_choice: (has_tools && request.force_tool_use).then(|| "required".to_string()),
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        debug!(model = %body.model, base_url = %self.base_url, "Streaming OpenAI-compatible API");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {status}: {body}");
        }

        let sse = sse_events(response);

        struct State<S> {
            sse: S,
            mapper: ChunkMapper,
            pending: std::collections::VecDeque<ProviderDelta>,
            ended: bool,
        }

        let delta_stream = futures::stream::unfold(
            State {
                sse: Box::pin(sse),
                mapper: ChunkMapper::new(),
                pending: std::collections::VecDeque::new(),
                ended: false,
            },
            |mut state| async move {
                loop {
                    if let Some(delta) = state.pending.pop_front() {
                        return Some((Ok(delta), state));
                    }
                    if state.ended {
                        return None;
                    }
                    match state.sse.next().await {
                        Some(Ok(event)) => {
                            state.pending.extend(state.mapper.map(event.data.trim()));
                        }
                        Some(Err(e)) => return Some((Err(e), state)),
                        None => {
                            state.ended = true;
                            state.pending.extend(state.mapper.finish());
                        }
                    }
                }
            },
        );

        Ok(Box::pin(delta_stream))
    }
}
