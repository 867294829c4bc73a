//! Anthropic Messages API adapter.
//!
//! Streams completions via `POST /v1/messages` with `stream: true` and
//! maps the SSE event families (`content_block_start`, `content_block_delta`,
//! `content_block_stop`, `message_delta`, `message_stop`) onto
//! [`ProviderDelta`]s.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::debug;

use querypilot_core::types::{ContentBlock, Role, Turn};

use crate::sse::{SseEvent, sse_events};
use crate::{
    BlockKind, CompletionRequest, Credentials, DeltaStream, LlmProvider, ProviderDelta,
    ToolDefinition,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(base_url: Option<&str>, connect_timeout_ms: u64, request_timeout_ms: u64) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_millis(connect_timeout_ms))
                .timeout(Duration::from_millis(request_timeout_ms))
                .build()
                .expect("reqwest client construction cannot fail with static options"),
        }
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        let obj = body.as_object_mut().unwrap();
        if let Some(ref system) = request.system {
            obj.insert("system".into(), json!(system));
        }
        if let Some(temperature) = request.temperature {
            obj.insert("temperature".into(), json!(temperature));
        }
        if let Some(ref tools) = request.tools {
            if !tools.is_empty() {
                obj.insert("tools".into(), json!(tools));
                if request.force_tool_use {
                    obj.insert("tool_choice".into(), json!({"type": "any"}));
                }
            }
        }

        body
    }
}

/// Map one SSE event onto zero or more deltas.
///
/// `stop_reason` arrives on `message_delta` but the stream closes on
/// `message_stop`, so it is carried across calls.
fn deltas_from_event(
    event: &SseEvent,
    stop_reason: &mut Option<String>,
) -> anyhow::Result<Vec<ProviderDelta>> {
    let data: serde_json::Value = match serde_json::from_str(&event.data) {
        Ok(v) => v,
        Err(e) => {
            debug!(%e, "Skipping unparseable Anthropic event");
            return Ok(Vec::new());
        }
    };

    let event_type = data.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let deltas = match event_type {
        "message_start" => {
            let input_tokens = data
                .pointer("/message/usage/input_tokens")
                .and_then(|v| v.as_u64());
            vec![ProviderDelta::Usage {
                input_tokens,
                output_tokens: None,
            }]
        }
        "content_block_start" => {
            let block = data.get("content_block").cloned().unwrap_or_default();
            let kind = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
            match kind {
                "tool_use" => vec![ProviderDelta::BlockStart {
                    kind: BlockKind::ToolInvocation,
                    id: block.get("id").and_then(|v| v.as_str()).map(String::from),
                    name: block.get("name").and_then(|v| v.as_str()).map(String::from),
                }],
                "text" => vec![ProviderDelta::BlockStart {
                    kind: BlockKind::Text,
                    id: None,
                    name: None,
                }],
                _ => Vec::new(),
            }
        }
        "content_block_delta" => {
            let delta = data.get("delta").cloned().unwrap_or_default();
            match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                "text_delta" => delta
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(|text| vec![ProviderDelta::TextDelta { text: text.into() }])
                    .unwrap_or_default(),
                "input_json_delta" => delta
                    .get("partial_json")
                    .and_then(|t| t.as_str())
                    .map(|fragment| {
                        vec![ProviderDelta::ToolArgumentDelta {
                            fragment: fragment.into(),
                        }]
                    })
                    .unwrap_or_default(),
                _ => Vec::new(),
            }
        }
        "content_block_stop" => vec![ProviderDelta::BlockStop],
        "message_delta" => {
            if let Some(reason) = data
                .pointer("/delta/stop_reason")
                .and_then(|s| s.as_str())
            {
                *stop_reason = Some(reason.to_string());
            }
            data.pointer("/usage/output_tokens")
                .and_then(|v| v.as_u64())
                .map(|output_tokens| {
                    vec![ProviderDelta::Usage {
                        input_tokens: None,
                        output_tokens: Some(output_tokens),
                    }]
                })
                .unwrap_or_default()
        }
        "message_stop" => vec![ProviderDelta::MessageStop {
            reason: stop_reason.take(),
        }],
        "error" => {
            let message = data
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown provider error");
            anyhow::bail!("Anthropic stream error: {message}");
        }
        // "ping" and anything unrecognized
        _ => Vec::new(),
    };

    Ok(deltas)
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn format_turns(&self, turns: &[Turn]) -> Vec<serde_json::Value> {
        turns
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let blocks: Vec<serde_json::Value> =
                    turn.content.iter().map(content_block_to_json).collect();
                json!({ "role": role, "content": blocks })
            })
            .collect()
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect()
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == "tool_use"
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<DeltaStream> {
        let body = self.build_request_body(request);

        debug!(model = %request.model, base_url = %self.base_url, "Streaming Anthropic Messages API");

        let mut req_builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("content-type", "application/json")
            .header("anthropic-version", API_VERSION);

        req_builder = match credentials {
            Credentials::ApiKey { api_key } => req_builder.header("x-api-key", api_key),
            Credentials::Token { token } => {
                req_builder.header("authorization", format!("Bearer {token}"))
            }
        };

        let response = req_builder.json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error {status}: {body}");
        }

        let sse = sse_events(response);

        struct State<S> {
            sse: S,
            pending: std::collections::VecDeque<ProviderDelta>,
            stop_reason: Option<String>,
        }

        let delta_stream = futures::stream::unfold(
            State {
                sse: Box::pin(sse),
                pending: std::collections::VecDeque::new(),
                stop_reason: None,
            },
            |mut state| async move {
                loop {
                    if let Some(delta) = state.pending.pop_front() {
                        return Some((Ok(delta), state));
                    }
                    match state.sse.next().await {
                        Some(Ok(event)) => {
                            match deltas_from_event(&event, &mut state.stop_reason) {
                                Ok(deltas) => state.pending.extend(deltas),
                                Err(e) => return Some((Err(e), state)),
                            }
                        }
                        Some(Err(e)) => return Some((Err(e), state)),
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(delta_stream))
    }
}

fn content_block_to_json(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text } => json!({
            "type": "text",
            "text": text,
        }),
        ContentBlock::ToolInvocation { id, name, arguments } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": arguments,
        }),
        ContentBlock::ToolResult { invocation_id, payload } => json!({
            "type": "tool_result",
            "tool_use_id": invocation_id,
            "content": payload.to_string(),
            "is_error": payload.get("error").is_some(),
        }),
    }
}
