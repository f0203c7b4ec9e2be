/// The four-stage invocation protocol every enrichment plugin follows
///
/// transform -> whitelist -> validate request -> call -> validate response -> classify.
/// Business failures (invalid request, invalid response, non-OK HTTP) are returned as
/// results with an `ERROR` status; only infrastructure faults come back as `Err`.
/// Every result carries the payload that was (or would have been) sent.

use crate::plugins::status::{classify, ProcessStatus};
use crate::plugins::transform::{apply_transformers, RequestTransformer};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Static configuration of one plugin, declared on a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    /// Unique name within the definition; also the key under `pluginsOutput`
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// States whose entry triggers this plugin
    #[serde(default)]
    pub state_names: Vec<String>,
    /// Event sent to the runtime when the call succeeds
    #[serde(default)]
    pub success_action: Option<String>,
    /// Event sent to the runtime when the call fails
    #[serde(default)]
    pub error_action: Option<String>,
    /// Event sent when the vendor reports completion through the callback
    #[serde(default)]
    pub completion_action: Option<String>,
    /// Top-level keys allowed into the request payload
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub transformers: Vec<RequestTransformer>,
    #[serde(default)]
    pub request_schema: Option<Value>,
    #[serde(default)]
    pub response_schema: Option<Value>,
    /// Overrides the configured default HTTP timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Outcome of one plugin invocation, persisted under `pluginsOutput.<name>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInvocationResult {
    pub request_payload: Value,
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoked_at: Option<String>,
}

impl PluginInvocationResult {
    pub fn failed(request_payload: Value, raw_response: Option<Value>, error: impl Into<String>) -> Self {
        Self {
            request_payload,
            status: ProcessStatus::Error,
            raw_response,
            error: Some(error.into()),
            invoked_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn classified(request_payload: Value, response: Value) -> Self {
        let status = classify(&response);
        let error = match status {
            ProcessStatus::Error => response
                .get("error")
                .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string())),
            _ => None,
        };
        Self {
            request_payload,
            status,
            raw_response: Some(response),
            error,
            invoked_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Result reported by the vendor's asynchronous callback
    ///
    /// Classified like a synchronous response, except that a clean payload means the
    /// enrichment finished rather than started.
    pub fn from_callback(request_payload: Value, payload: Value) -> Self {
        let mut result = Self::classified(request_payload, payload);
        if result.status == ProcessStatus::InProgress {
            result.status = ProcessStatus::Completed;
        }
        result
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, ProcessStatus::Error)
    }
}

/// Which side of the call is being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Request,
    Response,
}

/// Raw HTTP outcome of `make_api_request`
#[derive(Debug, Clone, PartialEq)]
pub struct PluginHttpResponse {
    pub status: u16,
    pub body: Value,
}

impl PluginHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait EnrichmentPlugin: Send + Sync {
    fn config(&self) -> &PluginConfig;

    /// Stage 1: reshape the context; identity without transformers
    fn transform_data(&self, context: &Value) -> Result<Value> {
        apply_transformers(context, &self.config().transformers)
    }

    /// Stage 2: keep whitelisted top-level keys only
    fn generate_request_payload_from_whitelist(&self, transformed: Value) -> Value {
        let Some(whitelist) = &self.config().whitelist else {
            return transformed;
        };

        let mut payload = Map::new();
        if let Value::Object(fields) = transformed {
            for (key, value) in fields {
                if whitelist.iter().any(|allowed| allowed == &key) {
                    payload.insert(key, value);
                }
            }
        }
        Value::Object(payload)
    }

    /// Stage 3: schema validation of the request or response content
    fn validate_content(&self, kind: ContentKind, content: &Value) -> Result<(), Vec<String>> {
        let schema = match kind {
            ContentKind::Request => self.config().request_schema.as_ref(),
            ContentKind::Response => self.config().response_schema.as_ref(),
        };
        match schema {
            Some(schema) => validate_against_schema(schema, content),
            None => Ok(()),
        }
    }

    /// Stage 4: the network call
    async fn make_api_request(&self, payload: &Value) -> Result<PluginHttpResponse>;

    /// Run the full pipeline
    async fn invoke(&self, context: &Value) -> Result<PluginInvocationResult> {
        let name = &self.config().name;
        let transformed = self.transform_data(context)?;
        let payload = self.generate_request_payload_from_whitelist(transformed);

        if let Err(errors) = self.validate_content(ContentKind::Request, &payload) {
            tracing::warn!(plugin = %name, ?errors, "Plugin request failed validation, skipping call");
            return Ok(PluginInvocationResult::failed(
                payload,
                None,
                format!("Invalid request: {}", errors.join("; ")),
            ));
        }

        let response = self.make_api_request(&payload).await?;

        if !response.is_success() {
            tracing::warn!(plugin = %name, status = response.status, "Plugin call returned non-OK status");
            return Ok(PluginInvocationResult::failed(
                payload,
                Some(response.body),
                format!("Request failed with status {}", response.status),
            ));
        }

        if let Err(errors) = self.validate_content(ContentKind::Response, &response.body) {
            tracing::warn!(plugin = %name, ?errors, "Plugin response failed validation");
            return Ok(PluginInvocationResult::failed(
                payload,
                Some(response.body),
                format!("Invalid response: {}", errors.join("; ")),
            ));
        }

        let result = PluginInvocationResult::classified(payload, response.body);
        tracing::info!(plugin = %name, status = ?result.status, "Plugin call classified");
        Ok(result)
    }
}

/// Validate `instance` against a JSON Schema, collecting every violation
pub fn validate_against_schema(schema: &Value, instance: &Value) -> Result<(), Vec<String>> {
    match jsonschema::validator_for(schema) {
        Ok(validator) => {
            let errors: Vec<String> = validator
                .iter_errors(instance)
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect();
            if errors.is_empty() {
                Ok(())
            } else {
                Err(errors)
            }
        }
        Err(e) => Err(vec![format!("Invalid schema: {}", e)]),
    }
}
