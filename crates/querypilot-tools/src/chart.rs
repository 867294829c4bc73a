//! generate_chart_data tool — aggregation query shaped for charting.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::backend::ChartQuery;
use crate::{Tool, ToolContext};

pub struct ChartDataTool;

#[derive(Deserialize)]
struct Params {
    query: String,
    x_column: String,
    y_column: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    labels: Option<Vec<String>>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    orientation: Option<String>,
}

#[async_trait]
impl Tool for ChartDataTool {
    fn name(&self) -> &str {
        "generate_chart_data"
    }

    fn description(&self) -> &str {
        "Run an aggregation query and return its result shaped for a chart: an x axis column, a y axis column, and optional title/labels/color/orientation. The query should already group and aggregate."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Aggregation SQL producing the chart's data points"
                },
                "x_column": { "type": "string", "description": "Result column for the x axis" },
                "y_column": { "type": "string", "description": "Result column for the y axis" },
                "title": { "type": "string" },
                "labels": { "type": "array", "items": { "type": "string" } },
                "color": { "type": "string" },
                "orientation": { "type": "string", "enum": ["vertical", "horizontal"] }
            },
            "required": ["query", "x_column", "y_column"]
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

        if let Some(ref orientation) = p.orientation {
            if !matches!(orientation.as_str(), "vertical" | "horizontal") {
                return Ok(json!({
                    "error": format!("Invalid orientation: {orientation} (expected \"vertical\" or \"horizontal\")")
                }));
            }
        }

        debug!(connection_id, x = %p.x_column, y = %p.y_column, "generate_chart_data");

        let query = ChartQuery {
            query: p.query,
            x_column: p.x_column,
            y_column: p.y_column,
            title: p.title,
            labels: p.labels,
            color: p.color,
            orientation: p.orientation,
        };

        context.backend.chart_data(connection_id, &query).await
    }
}
