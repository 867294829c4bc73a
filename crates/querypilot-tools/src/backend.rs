//! The studio query-service collaborator.
//!
//! The agent never generates dialect SQL or opens database connections
//! itself — [`StudioBackend`] is the narrow seam to the service that does.
//! Deployments needing read-only behavior enforce it here (or with a
//! read-only database role), not in the agent loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use querypilot_core::config::BackendConfig;

/// A filtered-select request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectQuery {
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub where_operator: String,
    pub filters: Vec<WhereFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
    pub limit: u32,
    pub offset: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhereFilter {
    pub column: String,
    pub operator: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: String,
}

/// A chart-data request: an aggregation query plus axis/label parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartQuery {
    pub query: String,
    pub x_column: String,
    pub y_column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
}

/// The query-service interface the tools call into.
#[async_trait]
pub trait StudioBackend: Send + Sync {
    async fn inspect_schema(
        &self,
        connection_id: &str,
        tables: Option<&[String]>,
        schema: Option<&str>,
    ) -> anyhow::Result<serde_json::Value>;

    async fn execute_sql(
        &self,
        connection_id: &str,
        sql: &str,
        database: Option<&str>,
    ) -> anyhow::Result<serde_json::Value>;

    async fn select_rows(
        &self,
        connection_id: &str,
        query: &SelectQuery,
    ) -> anyhow::Result<serde_json::Value>;

    async fn list_enums(&self, connection_id: &str) -> anyhow::Result<serde_json::Value>;

    async fn chart_data(
        &self,
        connection_id: &str,
        query: &ChartQuery,
    ) -> anyhow::Result<serde_json::Value>;
}

/// HTTP client for the studio query service.
pub struct HttpStudioBackend {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpStudioBackend {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout_ms: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .expect("reqwest client construction cannot fail with static options"),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(
            &config.base_url,
            config.resolve_auth_token(),
            config.timeout_ms,
        )
    }

    /// POST a body to a backend endpoint; HTTP and transport failures
    /// come back as `{"error": …}` payloads for the model.
    async fn post(&self, path: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        debug!(path, "Studio backend call");

        let mut req = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("content-type", "application/json");
        if let Some(ref token) = self.auth_token {
            req = req.header("authorization", format!("Bearer {token}"));
        }

        let response = match req.json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                return Ok(json!({"error": format!("Backend request failed: {e}")}));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(json!({"error": format!("Backend HTTP {status}: {body}")}));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl StudioBackend for HttpStudioBackend {
    async fn inspect_schema(
        &self,
        connection_id: &str,
        tables: Option<&[String]>,
        schema: Option<&str>,
    ) -> anyhow::Result<serde_json::Value> {
        self.post(
            "/api/schema",
            json!({
                "connection_id": connection_id,
                "tables": tables,
                "schema": schema,
            }),
        )
        .await
    }

    async fn execute_sql(
        &self,
        connection_id: &str,
        sql: &str,
        database: Option<&str>,
    ) -> anyhow::Result<serde_json::Value> {
        self.post(
            "/api/query",
            json!({
                "connection_id": connection_id,
                "query": sql,
                "database": database,
            }),
        )
        .await
    }

    async fn select_rows(
        &self,
        connection_id: &str,
        query: &SelectQuery,
    ) -> anyhow::Result<serde_json::Value> {
        let mut body = serde_json::to_value(query)?;
        body["connection_id"] = json!(connection_id);
        self.post("/api/select", body).await
    }

    async fn list_enums(&self, connection_id: &str) -> anyhow::Result<serde_json::Value> {
        self.post("/api/enums", json!({"connection_id": connection_id}))
            .await
    }

    async fn chart_data(
        &self,
        connection_id: &str,
        query: &ChartQuery,
    ) -> anyhow::Result<serde_json::Value> {
        let mut body = serde_json::to_value(query)?;
        body["connection_id"] = json!(connection_id);
        self.post("/api/chart", body).await
    }
}
