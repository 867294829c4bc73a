//! Database tools exposed to the LLM during agent runs.
//!
//! Tools never talk SQL dialects themselves — they call the studio's
//! query service through the [`StudioBackend`] trait and hand its payloads
//! back to the model. Each tool implements the [`Tool`] trait.
//!
//! Tool failures are data, not exceptions: every failure path resolves to
//! an `{"error": …}` payload so the model can read it and react.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

pub mod backend;
pub mod chart;
pub mod enums;
pub mod schema;
pub mod select;
pub mod sql;

pub use backend::{ChartQuery, HttpStudioBackend, OrderBy, SelectQuery, StudioBackend, WhereFilter};

/// Context provided to tools during execution. The backend binding and
/// connection id come from the request, not from any shared state.
#[derive(Clone)]
pub struct ToolContext {
    pub connection_id: Option<String>,
    pub schema: Option<String>,
    pub backend: Arc<dyn StudioBackend>,
}

impl ToolContext {
    /// The bound connection id, or an error payload for the model.
    pub(crate) fn connection(&self) -> Result<&str, serde_json::Value> {
        self.connection_id
            .as_deref()
            .ok_or_else(|| json!({"error": "No database connection bound to this request"}))
    }
}

/// The core tool trait. Every database tool implements this.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the LLM (e.g., "execute_sql_query").
    fn name(&self) -> &str;

    /// Human-readable description for the LLM.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters. Domain failures are
    /// returned as `{"error": …}` payloads; `Err` is reserved for
    /// unexpected faults and is converted to an error payload upstream.
    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve a tool call to its payload. Never fails: unknown names and
    /// execution faults become error payloads the model can reason about.
    pub async fn resolve(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> serde_json::Value {
        let Some(tool) = self.get(name) else {
            return json!({"error": format!("Unknown tool: {name}")});
        };

        match tool.execute(arguments, context).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%e, tool = name, "Tool execution error");
                json!({"error": format!("Tool error: {e}")})
            }
        }
    }
}

/// Register the built-in database tools.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Box::new(schema::InspectSchemaTool));
    registry.register(Box::new(sql::ExecuteSqlTool));
    registry.register(Box::new(select::SelectRowsTool));
    registry.register(Box::new(enums::EnumValuesTool));
    registry.register(Box::new(chart::ChartDataTool));
}
