/// Request transformers: pure JSONPath reshaping of the context before a plugin call

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Copy the value(s) selected by `source` into the `target` key of the outgoing object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTransformer {
    /// JSONPath expression evaluated against the context (e.g., "$.entity.data.companyName")
    pub source: String,
    /// Top-level key in the transformed object
    pub target: String,
    /// Keep every match as an array instead of the first one
    #[serde(default)]
    pub many: bool,
}

/// Apply transformers in order; no transformers means identity
pub fn apply_transformers(context: &Value, transformers: &[RequestTransformer]) -> Result<Value> {
    if transformers.is_empty() {
        return Ok(context.clone());
    }

    let mut transformed = Map::new();
    for transformer in transformers {
        let matches = jsonpath_lib::select(context, &transformer.source).map_err(|e| {
            anyhow::anyhow!("Invalid transformer path '{}': {:?}", transformer.source, e)
        })?;

        tracing::trace!(
            source = %transformer.source,
            target = %transformer.target,
            matches = matches.len(),
            "Applied request transformer"
        );

        if transformer.many {
            let values = matches.into_iter().cloned().collect();
            transformed.insert(transformer.target.clone(), Value::Array(values));
        } else if let Some(first) = matches.into_iter().next() {
            transformed.insert(transformer.target.clone(), first.clone());
        }
    }

    Ok(Value::Object(transformed))
}
