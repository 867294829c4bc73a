//! get_table_schema tool — describe tables in the connected database.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{Tool, ToolContext};

pub struct InspectSchemaTool;

#[derive(Deserialize)]
struct Params {
    #[serde(default)]
    tables: Option<Vec<String>>,
    #[serde(default)]
    schema: Option<String>,
}

#[async_trait]
impl Tool for InspectSchemaTool {
    fn name(&self) -> &str {
        "get_table_schema"
    }

    fn description(&self) -> &str {
        "Get the schema of tables in the connected database: column names, data types, nullability, and keys. Pass `tables` to restrict the result; omit it to describe everything visible."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tables": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Table names to describe (all tables if omitted)"
                },
                "schema": {
                    "type": "string",
                    "description": "Database schema to inspect (e.g. \"public\")"
                }
            }
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

        debug!(connection_id, "get_table_schema");

        let schema = p.schema.as_deref().or(context.schema.as_deref());
        context
            .backend
            .inspect_schema(connection_id, p.tables.as_deref(), schema)
            .await
    }
}
