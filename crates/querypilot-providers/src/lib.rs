//! LLM provider adapters.
//!
//! Each provider implements the [`LlmProvider`] trait: it translates a
//! provider-agnostic conversation into its wire request and its streamed
//! wire events back into [`ProviderDelta`]s. The agent loop never sees
//! provider-specific JSON.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::warn;

use querypilot_core::config::Config;
use querypilot_core::types::Turn;

pub mod anthropic;
pub mod openai;
pub mod sse;

/// Credentials for authenticating with an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
    #[serde(rename = "token")]
    Token { token: String },
}

/// A tool declaration as presented to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A request to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub tools: Option<Vec<serde_json::Value>>,
    /// Force the model to call a tool. Only honored on the first loop
    /// iteration — later iterations let the provider choose freely.
    pub force_tool_use: bool,
}

/// Kind of content block a provider opens mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    ToolInvocation,
}

/// A provider-agnostic incremental event from the model stream.
///
/// Tool-argument fragments are raw string pieces of a JSON document; a
/// valid document is guaranteed only once `BlockStop` fires for the block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderDelta {
    BlockStart {
        kind: BlockKind,
        id: Option<String>,
        name: Option<String>,
    },
    TextDelta {
        text: String,
    },
    ToolArgumentDelta {
        fragment: String,
    },
    BlockStop,
    MessageStop {
        reason: Option<String>,
    },
    Usage {
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
    },
}

/// Boxed stream of deltas from a provider.
pub type DeltaStream = Pin<Box<dyn Stream<Item = anyhow::Result<ProviderDelta>> + Send>>;

/// The core provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "anthropic", "openai").
    fn id(&self) -> &str;

    /// Convert conversation turns to this provider's message format.
    fn format_turns(&self, turns: &[Turn]) -> Vec<serde_json::Value>;

    /// Convert tool definitions to this provider's tool format.
    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value>;

    /// Whether the given stop reason means "the model wants tools run".
    fn is_tool_use_stop(&self, stop_reason: &str) -> bool;

    /// Open a streaming completion and return its delta stream.
    ///
    /// Transport failures (connect, auth, 5xx) surface either as an `Err`
    /// here or as a single terminal `Err` item in the stream.
    async fn send(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<DeltaStream>;
}

/// A registered provider with its configured credentials and default model.
pub struct RegisteredProvider {
    pub provider: Arc<dyn LlmProvider>,
    pub credentials: Option<Credentials>,
    pub default_model: Option<String>,
}

/// Registry of configured providers, keyed by provider id.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        provider: Arc<dyn LlmProvider>,
        credentials: Option<Credentials>,
        default_model: Option<String>,
    ) {
        self.providers.insert(
            provider.id().to_string(),
            RegisteredProvider {
                provider,
                credentials,
                default_model,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredProvider> {
        self.providers.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.keys().map(|k| k.as_str()).collect()
    }

    /// Build the registry from config. Provider ids select the adapter
    /// family: "anthropic" uses the Anthropic Messages protocol, anything
    /// else is treated as OpenAI-compatible against its base URL.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();

        let Some(provider_configs) = config.providers.as_ref() else {
            return registry;
        };

        for pc in provider_configs {
            let credentials = pc
                .resolve_api_key()
                .map(|api_key| Credentials::ApiKey { api_key });

            let provider: Arc<dyn LlmProvider> = match pc.id.as_str() {
                "anthropic" => Arc::new(anthropic::AnthropicProvider::new(
                    pc.base_url.as_deref(),
                    pc.connect_timeout_ms,
                    pc.request_timeout_ms,
                )),
                "openai" => Arc::new(openai::OpenAiProvider::new(
                    pc.base_url.as_deref(),
                    pc.connect_timeout_ms,
                    pc.request_timeout_ms,
                )),
                other => {
                    let Some(base_url) = pc.base_url.as_deref() else {
                        warn!(provider = other, "Unknown provider without base_url, skipping");
                        continue;
                    };
                    Arc::new(openai::OpenAiProvider::compatible(
                        other,
                        base_url,
                        pc.connect_timeout_ms,
                        pc.request_timeout_ms,
                    ))
                }
            };

            registry.register(provider, credentials, pc.default_model.clone());
        }

        registry
    }
}
