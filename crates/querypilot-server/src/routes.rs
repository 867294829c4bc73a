//! Request handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use querypilot_agent::{EventSink, RunOptions, run_agent};
use querypilot_core::types::{QueryRequest, Turn};
use querypilot_providers::Credentials;
use querypilot_tools::{ToolContext, ToolRegistry, register_builtin_tools};

use crate::heartbeat::HeartbeatGuard;
use crate::sse::EventStreamBody;
use crate::state::AppState;

/// Inbound streaming request.
#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub query: String,
    pub provider: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub credentials: Option<InlineCredentials>,
    #[serde(default)]
    pub history: Vec<Turn>,
}

/// Per-request credential override.
#[derive(Debug, Deserialize)]
pub struct InlineCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl InlineCredentials {
    fn into_credentials(self) -> Option<Credentials> {
        if let Some(api_key) = self.api_key {
            return Some(Credentials::ApiKey { api_key });
        }
        self.token.map(|token| Credentials::Token { token })
    }
}

/// POST /v1/stream — run the agent loop, streaming events as SSE frames.
///
/// Resolution failures (unknown provider, no credentials, no model) are
/// plain HTTP errors; once the stream is open every outcome travels as
/// events.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StreamRequest>,
) -> Result<EventStreamBody, (StatusCode, String)> {
    let Some(registered) = state.providers.get(&request.provider) else {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown provider: {}", request.provider),
        ));
    };

    let credentials = request
        .credentials
        .and_then(InlineCredentials::into_credentials)
        .or_else(|| registered.credentials.clone())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("No credentials configured for provider: {}", request.provider),
            )
        })?;

    let model = request
        .model
        .clone()
        .or_else(|| registered.default_model.clone())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("No model given and no default for provider: {}", request.provider),
            )
        })?;

    let options = RunOptions::from_config(&state.config, model);
    let provider = registered.provider.clone();

    let query_request = QueryRequest {
        query: request.query,
        connection_id: request.connection_id.clone(),
        schema: request.schema.clone(),
        tables: request.tables,
        model: request.model,
        history: request.history,
    };

    let tool_context = ToolContext {
        connection_id: request.connection_id,
        schema: request.schema,
        backend: state.backend.clone(),
    };

    let request_id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = EventSink::new(tx);

    tokio::spawn(
        async move {
            // Heartbeat lives exactly as long as the run, whatever path
            // the run exits through.
            let _heartbeat = HeartbeatGuard::start(sink.clone());

            let mut tools = ToolRegistry::new();
            register_builtin_tools(&mut tools);

            let result = run_agent(
                &query_request,
                &options,
                &tools,
                &tool_context,
                provider.as_ref(),
                &credentials,
                &sink,
            )
            .await;

            debug!(
                aborted = result.meta.aborted,
                tool_calls = result.meta.tool_calls,
                "Stream request finished"
            );
        }
        .instrument(info_span!("agent_run", %request_id)),
    );

    Ok(EventStreamBody::new(rx))
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let version = env!("CARGO_PKG_VERSION");
    let providers: Vec<&str> = state.providers.ids();

    Json(json!({
        "status": "ok",
        "version": version,
        "providers": providers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_request_minimal() {
        let request: StreamRequest = serde_json::from_str(
            r#"{"query": "show me 3 users", "provider": "anthropic"}"#,
        )
        .unwrap();
        assert_eq!(request.query, "show me 3 users");
        assert_eq!(request.provider, "anthropic");
        assert!(request.connection_id.is_none());
        assert!(request.history.is_empty());
    }

    #[test]
    fn test_stream_request_full() {
        let request: StreamRequest = serde_json::from_str(
            r#"{
                "query": "top orders by value",
                "provider": "openai",
                "connection_id": "pg-prod",
                "schema": "public",
                "tables": ["orders"],
                "model": "gpt-4o",
                "credentials": {"api_key": "sk-inline"},
                "history": [
                    {"role": "user", "content": [{"type": "text", "text": "hi"}]},
                    {"role": "assistant", "content": [{"type": "text", "text": "hello"}]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(request.tables, vec!["orders"]);
        assert_eq!(request.history.len(), 2);
        let credentials = request.credentials.unwrap().into_credentials().unwrap();
        assert!(matches!(credentials, Credentials::ApiKey { api_key } if api_key == "sk-inline"));
    }

    #[test]
    fn test_inline_credentials_prefer_api_key() {
        let inline = InlineCredentials {
            api_key: Some("key".into()),
            token: Some("tok".into()),
        };
        assert!(matches!(
            inline.into_credentials(),
            Some(Credentials::ApiKey { .. })
        ));

        let inline = InlineCredentials {
            api_key: None,
            token: None,
        };
        assert!(inline.into_credentials().is_none());
    }
}
