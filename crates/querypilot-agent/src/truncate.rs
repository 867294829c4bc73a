//! Tool payload truncation and summarization.
//!
//! Truncation is a lossy-but-successful degradation: capped payloads carry
//! `_truncated: true` so the model and the UI can tell the user more data
//! exists. Summaries are the short human-readable strings shown next to a
//! finished tool call.

use serde_json::{Value, json};

/// Ceiling on a serialized tool payload handed back to the model.
pub const MAX_PAYLOAD_BYTES: usize = 50 * 1024;

const SCHEMA_TABLE_CAP: usize = 10;
const SCHEMA_COLUMN_CAP: usize = 20;
const ROW_CAP: usize = 100;
const PREVIEW_ROW_CAP: usize = 10;

/// Cap a tool payload: schema results keep the first 10 tables × 20
/// columns, tabular results keep the first 100 rows, and anything still
/// over the byte ceiling falls back to a clipped string rendering.
pub fn truncate_payload(payload: Value) -> Value {
    let payload = if payload.get("tables").is_some_and(Value::is_array) {
        cap_schema(payload)
    } else if payload.get("rows").is_some_and(Value::is_array) {
        cap_rows(payload)
    } else {
        payload
    };

    let rendered = payload.to_string();
    if rendered.len() <= MAX_PAYLOAD_BYTES {
        return payload;
    }

    // Oversized in some other dimension (huge cells, deep nesting): keep
    // what fits as text rather than dropping the result entirely.
    let mut end = MAX_PAYLOAD_BYTES;
    while !rendered.is_char_boundary(end) {
        end -= 1;
    }
    json!({
        "_truncated": true,
        "content": rendered[..end],
    })
}

fn cap_schema(mut payload: Value) -> Value {
    let mut truncated = false;

    if let Some(tables) = payload.get_mut("tables").and_then(Value::as_array_mut) {
        if tables.len() > SCHEMA_TABLE_CAP {
            tables.truncate(SCHEMA_TABLE_CAP);
            truncated = true;
        }
        for table in tables.iter_mut() {
            if let Some(columns) = table.get_mut("columns").and_then(Value::as_array_mut) {
                if columns.len() > SCHEMA_COLUMN_CAP {
                    columns.truncate(SCHEMA_COLUMN_CAP);
                    truncated = true;
                }
            }
        }
    }

    if truncated {
        payload["_truncated"] = json!(true);
    }
    payload
}

fn cap_rows(mut payload: Value) -> Value {
    if let Some(rows) = payload.get_mut("rows").and_then(Value::as_array_mut) {
        if rows.len() > ROW_CAP {
            rows.truncate(ROW_CAP);
            payload["_truncated"] = json!(true);
        }
    }
    payload
}

/// Short description of a tool result for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSummary {
    pub success: bool,
    pub response: String,
    /// Up to ten preview rows for tabular results.
    pub data: Option<Value>,
}

/// Derive the `tool_response` summary from a payload's shape.
pub fn summarize(payload: &Value) -> ResultSummary {
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        return ResultSummary {
            success: false,
            response: error.to_string(),
            data: None,
        };
    }

    if let Some(rows) = payload.get("rows").and_then(Value::as_array) {
        return summarize_rows(rows);
    }

    if let Some(tables) = payload.get("tables").and_then(Value::as_array) {
        let n = tables.len();
        let noun = if n == 1 { "table" } else { "tables" };
        return ResultSummary {
            success: true,
            response: format!("Schema returned for {n} {noun}"),
            data: None,
        };
    }

    if let Some(enums) = payload.get("enums").and_then(Value::as_array) {
        let n = enums.len();
        let noun = if n == 1 { "enum type" } else { "enum types" };
        return ResultSummary {
            success: true,
            response: format!("{n} {noun} returned"),
            data: None,
        };
    }

    if payload.get("chart").is_some() {
        return ResultSummary {
            success: true,
            response: "Chart data generated".to_string(),
            data: None,
        };
    }

    ResultSummary {
        success: true,
        response: "OK".to_string(),
        data: None,
    }
}

fn summarize_rows(rows: &[Value]) -> ResultSummary {
    match rows {
        [] => ResultSummary {
            success: true,
            response: "No rows returned".to_string(),
            data: None,
        },
        // A single row with a single column reads as a scalar answer.
        [row] if row.as_object().is_some_and(|o| o.len() == 1) => {
            let value = row.as_object().unwrap().values().next().unwrap();
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            ResultSummary {
                success: true,
                response: format!("Result: {rendered}"),
                data: None,
            }
        }
        _ => {
            let n = rows.len();
            let noun = if n == 1 { "row" } else { "rows" };
            ResultSummary {
                success: true,
                response: format!("{n} {noun} returned"),
                data: Some(Value::Array(
                    rows.iter().take(PREVIEW_ROW_CAP).cloned().collect(),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_payload(tables: usize, columns: usize) -> Value {
        json!({
            "tables": (0..tables)
                .map(|t| json!({
                    "name": format!("table_{t}"),
                    "columns": (0..columns)
                        .map(|c| json!({"name": format!("col_{c}"), "type": "text"}))
                        .collect::<Vec<_>>(),
                }))
                .collect::<Vec<_>>()
        })
    }

    fn rows_payload(n: usize) -> Value {
        json!({"rows": (0..n).map(|i| json!({"id": i})).collect::<Vec<_>>()})
    }

    #[test]
    fn test_eleven_tables_truncated_to_ten() {
        let payload = truncate_payload(schema_payload(11, 5));
        assert_eq!(payload["tables"].as_array().unwrap().len(), 10);
        assert_eq!(payload["_truncated"], true);
    }

    #[test]
    fn test_ten_tables_unmodified() {
        let payload = truncate_payload(schema_payload(10, 5));
        assert_eq!(payload["tables"].as_array().unwrap().len(), 10);
        assert!(payload.get("_truncated").is_none());
    }

    #[test]
    fn test_columns_capped_at_twenty() {
        let payload = truncate_payload(schema_payload(2, 25));
        for table in payload["tables"].as_array().unwrap() {
            assert_eq!(table["columns"].as_array().unwrap().len(), 20);
        }
        assert_eq!(payload["_truncated"], true);
    }

    #[test]
    fn test_rows_capped_at_one_hundred() {
        let payload = truncate_payload(rows_payload(101));
        assert_eq!(payload["rows"].as_array().unwrap().len(), 100);
        assert_eq!(payload["_truncated"], true);

        let payload = truncate_payload(rows_payload(100));
        assert!(payload.get("_truncated").is_none());
    }

    #[test]
    fn test_oversized_scalar_payload_clipped() {
        let payload = truncate_payload(json!({"blob": "x".repeat(MAX_PAYLOAD_BYTES * 2)}));
        assert_eq!(payload["_truncated"], true);
        let content = payload["content"].as_str().unwrap();
        assert!(content.len() <= MAX_PAYLOAD_BYTES);
        assert!(content.starts_with("{\"blob\""));
    }

    #[test]
    fn test_summarize_error() {
        let summary = summarize(&json!({"error": "relation \"users\" does not exist"}));
        assert!(!summary.success);
        assert!(summary.response.contains("does not exist"));
        assert!(summary.data.is_none());
    }

    #[test]
    fn test_summarize_scalar_result() {
        let summary = summarize(&json!({"rows": [{"count": 42}]}));
        assert_eq!(summary.response, "Result: 42");
        assert!(summary.data.is_none());
    }

    #[test]
    fn test_summarize_multi_row_with_preview() {
        let summary = summarize(&rows_payload(25));
        assert_eq!(summary.response, "25 rows returned");
        assert_eq!(summary.data.unwrap().as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_summarize_empty_rows() {
        let summary = summarize(&json!({"rows": []}));
        assert_eq!(summary.response, "No rows returned");
    }

    #[test]
    fn test_summarize_single_multi_column_row() {
        let summary = summarize(&json!({"rows": [{"id": 1, "name": "ada"}]}));
        assert_eq!(summary.response, "1 row returned");
        assert!(summary.data.is_some());
    }

    #[test]
    fn test_summarize_schema_and_enums() {
        assert_eq!(
            summarize(&schema_payload(3, 2)).response,
            "Schema returned for 3 tables"
        );
        assert_eq!(
            summarize(&json!({"enums": [{"name": "status"}]})).response,
            "1 enum type returned"
        );
        assert_eq!(
            summarize(&json!({"chart": {}})).response,
            "Chart data generated"
        );
    }
}
