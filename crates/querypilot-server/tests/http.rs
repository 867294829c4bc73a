//! Server integration tests — start a real server and interact over HTTP.
//!
//! Run with: `cargo test -p querypilot-server --test http`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use querypilot_core::config::Config;
use querypilot_providers::{
    BlockKind, CompletionRequest, Credentials, DeltaStream, LlmProvider, ProviderDelta,
    ProviderRegistry, ToolDefinition,
};
use querypilot_server::{AppState, router};
use querypilot_tools::{ChartQuery, SelectQuery, StudioBackend};

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Provider stub that replies with one text message.
struct CannedProvider;

#[async_trait]
impl LlmProvider for CannedProvider {
    fn id(&self) -> &str {
        "canned"
    }

    fn format_turns(&self, _turns: &[querypilot_core::types::Turn]) -> Vec<Value> {
        Vec::new()
    }

    fn format_tools(&self, _tools: &[ToolDefinition]) -> Vec<Value> {
        Vec::new()
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == "tool_use"
    }

    async fn send(
        &self,
        _request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> anyhow::Result<DeltaStream> {
        let deltas: Vec<anyhow::Result<ProviderDelta>> = vec![
            Ok(ProviderDelta::BlockStart {
                kind: BlockKind::Text,
                id: None,
                name: None,
            }),
            Ok(ProviderDelta::TextDelta {
                text: "Here are 3 users".into(),
            }),
            Ok(ProviderDelta::BlockStop),
            Ok(ProviderDelta::MessageStop {
                reason: Some("end_turn".into()),
            }),
        ];
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

struct NoopBackend;

#[async_trait]
impl StudioBackend for NoopBackend {
    async fn inspect_schema(
        &self,
        _connection_id: &str,
        _tables: Option<&[String]>,
        _schema: Option<&str>,
    ) -> anyhow::Result<Value> {
        Ok(json!({"tables": []}))
    }

    async fn execute_sql(
        &self,
        _connection_id: &str,
        _sql: &str,
        _database: Option<&str>,
    ) -> anyhow::Result<Value> {
        Ok(json!({"rows": []}))
    }

    async fn select_rows(&self, _connection_id: &str, _query: &SelectQuery) -> anyhow::Result<Value> {
        Ok(json!({"rows": []}))
    }

    async fn list_enums(&self, _connection_id: &str) -> anyhow::Result<Value> {
        Ok(json!({"enums": []}))
    }

    async fn chart_data(&self, _connection_id: &str, _query: &ChartQuery) -> anyhow::Result<Value> {
        Ok(json!({"chart": {}}))
    }
}

async fn start_test_server() -> u16 {
    let port = find_free_port();

    let mut providers = ProviderRegistry::new();
    providers.register(
        Arc::new(CannedProvider),
        Some(Credentials::ApiKey {
            api_key: "test".into(),
        }),
        Some("canned-model".into()),
    );

    let state = Arc::new(AppState::new(
        Arc::new(Config::default()),
        Arc::new(providers),
        Arc::new(NoopBackend),
    ));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Wait for the server to come up
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    port
}

#[tokio::test]
async fn test_health_endpoint() {
    let port = start_test_server().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["providers"][0], "canned");
}

#[tokio::test]
async fn test_unknown_provider_is_bad_request() {
    let port = start_test_server().await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/v1/stream"))
        .json(&json!({"query": "hi", "provider": "bedrock"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(resp.text().await.unwrap().contains("Unknown provider"));
}

#[tokio::test]
async fn test_stream_round_trip() {
    let port = start_test_server().await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/v1/stream"))
        .json(&json!({
            "query": "show me 3 users",
            "provider": "canned",
            "connection_id": "conn-1",
        }))
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    // The body ends when the run finishes and the channel closes.
    let body = resp.text().await.unwrap();
    let events: Vec<Value> = body
        .split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            serde_json::from_str(frame.strip_prefix("data: ").expect("SSE data frame")).unwrap()
        })
        .collect();

    let types: Vec<&str> = events
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["tools", "chunk", "done"]);
    assert_eq!(events[1]["content"], "Here are 3 users");
}
