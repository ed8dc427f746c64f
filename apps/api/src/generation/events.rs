//! Events produced by the external workflow engine, in channel order.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    WorkflowStarted {
        workflow_run_id: String,
        task_id: String,
    },
    /// Step label for display only.
    NodeStarted { label: String },
    TextChunk { text: String, is_first: bool },
    NodeFinished { label: String },
    /// `outputs.text` is authoritative when non-empty.
    WorkflowFinished { outputs: Value },
    Error {
        message: String,
        code: Option<String>,
    },
}

/// Extracts a non-blank `text` output, if any.
pub fn output_text(outputs: &Value) -> Option<&str> {
    outputs
        .get("text")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_text_requires_non_blank_string() {
        assert_eq!(output_text(&json!({ "text": "Hello" })), Some("Hello"));
        assert_eq!(output_text(&json!({ "text": "  \n" })), None);
        assert_eq!(output_text(&json!({ "text": 42 })), None);
        assert_eq!(output_text(&json!({})), None);
        assert_eq!(output_text(&Value::Null), None);
    }
}
