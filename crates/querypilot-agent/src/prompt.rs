//! System prompt builder for the SQL assistant.

use querypilot_core::types::QueryRequest;
use querypilot_tools::ToolRegistry;

/// Build the system prompt from the request's database context and the
/// registered tool roster.
pub fn build_system_prompt(request: &QueryRequest, tools: &ToolRegistry) -> String {
    let mut parts = Vec::new();

    parts.push(
        "You are QueryPilot, an expert SQL assistant embedded in a database studio. \
         You answer questions about the connected database by inspecting its schema \
         and running queries with the available tools, then explain the results plainly."
            .to_string(),
    );

    if let Some(ref connection_id) = request.connection_id {
        parts.push(format!("Connected database: {connection_id}"));
    } else {
        parts.push(
            "No database connection is bound to this conversation; say so instead of guessing."
                .to_string(),
        );
    }

    if let Some(ref schema) = request.schema {
        parts.push(format!("Default schema: {schema}"));
    }

    if !request.tables.is_empty() {
        parts.push(format!(
            "Tables the user is currently looking at: {}",
            request.tables.join(", ")
        ));
    }

    let tool_names = tools.list();
    if !tool_names.is_empty() {
        parts.push(format!("Available tools: {}", tool_names.join(", ")));
    }

    parts.push(
        "Check the schema before writing non-trivial SQL. Quote identifiers that need it. \
         If a tool returns an error payload, read it, adjust, and try again rather than \
         apologizing immediately. Results flagged _truncated are partial; tell the user."
            .to_string(),
    );

    parts.join("\n\n")
}
