//! execute_sql_query tool — run an arbitrary SQL statement.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{Tool, ToolContext};

pub struct ExecuteSqlTool;

#[derive(Deserialize)]
struct Params {
    query: String,
    #[serde(default)]
    database: Option<String>,
}

#[async_trait]
impl Tool for ExecuteSqlTool {
    fn name(&self) -> &str {
        "execute_sql_query"
    }

    fn description(&self) -> &str {
        "Execute a SQL query against the connected database and return the result rows. The statement runs with the connection's own permissions — INSERT, UPDATE, and DELETE take effect for real, so only mutate data when the user asked for it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The SQL statement to execute"
                },
                "database": {
                    "type": "string",
                    "description": "Database to run against (connection default if omitted)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<serde_json::Value> {
        let p: Params = serde_json::from_value(params)?;
        let connection_id = match context.connection() {
            Ok(id) => id,
            Err(payload) => return Ok(payload),
        };

        if p.query.trim().is_empty() {
            return Ok(json!({"error": "Empty SQL query"}));
        }

        debug!(connection_id, "execute_sql_query");

        context
            .backend
            .execute_sql(connection_id, &p.query, p.database.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_executes_query() {
        let payload = ExecuteSqlTool
            .execute(json!({"query": "SELECT 1"}), &testing::context())
            .await
            .unwrap();
        assert_eq!(payload["rows"][0]["x"], 1);
    }

    #[tokio::test]
    async fn test_backend_sql_error_is_payload() {
        let payload = ExecuteSqlTool
            .execute(json!({"query": "boom"}), &testing::context())
            .await
            .unwrap();
        assert!(payload["error"].as_str().unwrap().contains("syntax error"));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let payload = ExecuteSqlTool
            .execute(json!({"query": "   "}), &testing::context())
            .await
            .unwrap();
        assert_eq!(payload["error"], "Empty SQL query");
    }

    #[tokio::test]
    async fn test_missing_query_is_validation_error() {
        let result = ExecuteSqlTool
            .execute(json!({}), &testing::context())
            .await;
        assert!(result.is_err());
    }
}
