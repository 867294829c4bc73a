//! list_enum_values tool — enumerate enum/categorical column values.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::{Tool, ToolContext};

pub struct EnumValuesTool;

#[async_trait]
impl Tool for EnumValuesTool {
    fn name(&self) -> &str {
        "list_enum_values"
    }

    fn description(&self) -> &str {
        "List the enum types defined in the connected database and their allowed values. Use this before filtering on a categorical column so you filter with values that actually exist."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<serde_json::Value> {
        let connection_id = match context.connection() {
            Ok(id) => id,
            Err(payload) => return Ok(payload),
        };

        debug!(connection_id, "list_enum_values");

        context.backend.list_enums(connection_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_lists_enums() {
        let payload = EnumValuesTool
            .execute(json!({}), &testing::context())
            .await
            .unwrap();
        assert_eq!(payload["enums"][0]["name"], "status");
    }

    #[tokio::test]
    async fn test_arguments_ignored() {
        // Degraded `{}` or stray arguments make no difference here.
        let payload = EnumValuesTool
            .execute(json!({"whatever": 1}), &testing::context())
            .await
            .unwrap();
        assert!(payload.get("enums").is_some());
    }
}
