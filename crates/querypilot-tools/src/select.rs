//! select_rows tool — filtered select without writing SQL.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::backend::{OrderBy, SelectQuery, WhereFilter};
use crate::{Tool, ToolContext};

pub struct SelectRowsTool;

#[derive(Deserialize)]
struct Params {
    table: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default = "default_where_operator")]
    where_operator: String,
    #[serde(default)]
    filters: Vec<WhereFilter>,
    #[serde(default)]
    select: Option<Vec<String>>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    order_by: Option<OrderBy>,
}

fn default_where_operator() -> String {
    "and".into()
}

fn default_limit() -> u32 {
    100
}

#[async_trait]
impl Tool for SelectRowsTool {
    fn name(&self) -> &str {
        "select_rows"
    }

    fn description(&self) -> &str {
        "Select rows from a single table with optional filters, column projection, ordering, and pagination. Prefer this over execute_sql_query for simple lookups — it works identically across database dialects."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "table": {
                    "type": "string",
                    "description": "Table to select from"
                },
                "schema": {
                    "type": "string",
                    "description": "Schema containing the table"
                },
                "where_operator": {
                    "type": "string",
                    "enum": ["and", "or"],
                    "description": "How to combine filters (default: and)"
                },
                "filters": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "column": { "type": "string" },
                            "operator": { "type": "string", "description": "e.g. =, !=, >, <, like" },
                            "value": {}
                        },
                        "required": ["column", "operator", "value"]
                    }
                },
                "select": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Columns to return (all if omitted)"
                },
                "limit": { "type": "integer", "description": "Max rows (default: 100)" },
                "offset": { "type": "integer" },
                "order_by": {
                    "type": "object",
                    "properties": {
                        "column": { "type": "string" },
                        "direction": { "type": "string", "enum": ["asc", "desc"] }
                    },
                    "required": ["column", "direction"]
                }
            },
            "required": ["table"]
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

        if !matches!(p.where_operator.as_str(), "and" | "or") {
            return Ok(json!({
                "error": format!("Invalid where_operator: {} (expected \"and\" or \"or\")", p.where_operator)
            }));
        }

        debug!(connection_id, table = %p.table, "select_rows");

        let query = SelectQuery {
            table: p.table,
            schema: p.schema.or_else(|| context.schema.clone()),
            where_operator: p.where_operator,
            filters: p.filters,
            select: p.select,
            limit: p.limit,
            offset: p.offset,
            order_by: p.order_by,
        };

        context.backend.select_rows(connection_id, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_defaults_applied() {
        let payload = SelectRowsTool
            .execute(json!({"table": "users"}), &testing::context())
            .await
            .unwrap();
        assert_eq!(payload["table"], "users");
    }

    #[tokio::test]
    async fn test_invalid_where_operator_rejected() {
        let payload = SelectRowsTool
            .execute(
                json!({"table": "users", "where_operator": "xor"}),
                &testing::context(),
            )
            .await
            .unwrap();
        assert!(payload["error"].as_str().unwrap().contains("where_operator"));
    }

    #[test]
    fn test_params_defaults() {
        let p: Params = serde_json::from_value(json!({"table": "users"})).unwrap();
        assert_eq!(p.where_operator, "and");
        assert_eq!(p.limit, 100);
        assert_eq!(p.offset, 0);
        assert!(p.filters.is_empty());
    }
}
