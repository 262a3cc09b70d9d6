//! Coerces the tool service's heterogeneous `tools/call` results into a
//! single value, so workflow steps only ever see the decoded payload.

use rmcp::model::{CallToolResult, RawContent};
use serde_json::{json, Value};

use onepager_core::error::{OnePagerError, Result};

/// Decode a `tools/call` result.
///
/// When the first content item is non-empty text, that text is parsed as
/// JSON, or wrapped as `{"raw": text}` when it is not JSON. Otherwise the
/// structured payload is returned, falling back to the whole result object.
/// A result flagged `isError` fails with the tool's text.
pub fn decode_tool_result(tool: &str, result: CallToolResult) -> Result<Value> {
    let first_text = result
        .content
        .first()
        .and_then(|item| match &item.raw {
            RawContent::Text(t) => {
                let text: &str = &t.text;
                Some(text.to_string())
            }
            _ => None,
        })
        .filter(|t| !t.is_empty());

    if result.is_error == Some(true) {
        let message = first_text.unwrap_or_else(|| "tool reported an error".to_string());
        return Err(OnePagerError::remote(tool, message));
    }

    if let Some(text) = first_text {
        return Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text })));
    }

    match result.structured_content.clone() {
        Some(structured) => Ok(structured),
        None => serde_json::to_value(&result)
            .map_err(|e| OnePagerError::remote(tool, format!("unreadable tool result: {}", e))),
    }
}
