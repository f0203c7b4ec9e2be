/// Process status classification of raw plugin responses

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reason code vendors return for checks they do not offer
pub const NOT_IMPLEMENTED_REASON: &str = "NOT_IMPLEMENTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Canceled,
    Error,
    InProgress,
    Completed,
}

/// Map a raw response body to a process status
///
/// A bare acknowledgement means enrichment has started; completion only ever
/// arrives through the asynchronous callback.
pub fn classify(response: &Value) -> ProcessStatus {
    if response.get("reason").and_then(Value::as_str) == Some(NOT_IMPLEMENTED_REASON) {
        return ProcessStatus::Canceled;
    }

    if response.get("error").map(is_present).unwrap_or(false) {
        return ProcessStatus::Error;
    }

    ProcessStatus::InProgress
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Number(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn not_implemented_wins_over_error() {
        assert_eq!(
            classify(&json!({ "reason": "NOT_IMPLEMENTED", "error": "x" })),
            ProcessStatus::Canceled
        );
    }

    #[test]
    fn error_field_classifies_as_error() {
        assert_eq!(classify(&json!({ "error": "x" })), ProcessStatus::Error);
        assert_eq!(classify(&json!({ "error": { "code": 4 } })), ProcessStatus::Error);
    }

    #[test]
    fn empty_error_is_ignored() {
        assert_eq!(classify(&json!({})), ProcessStatus::InProgress);
        assert_eq!(classify(&json!({ "error": "" })), ProcessStatus::InProgress);
        assert_eq!(classify(&json!({ "error": null })), ProcessStatus::InProgress);
        assert_eq!(classify(&json!({ "reason": "OTHER" })), ProcessStatus::InProgress);
    }

    #[test]
    fn status_serializes_screaming_snake() {
        assert_eq!(serde_json::to_value(ProcessStatus::InProgress).unwrap(), json!("IN_PROGRESS"));
    }
}
