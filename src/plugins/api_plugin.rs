/// HTTP enrichment plugin backed by reqwest
///
/// Calls an arbitrary third-party API with the whitelisted payload. GET and DELETE
/// send scalar payload fields as query parameters; other methods send a JSON body.
/// The timeout is applied per request, so plugins can share one pooled client.

use crate::plugins::protocol::{EnrichmentPlugin, PluginConfig, PluginHttpResponse};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ApiPlugin {
    config: PluginConfig,
    client: reqwest::Client,
    timeout: Duration,
}

impl ApiPlugin {
    /// Build a plugin with its own client; `default_timeout` applies unless the config overrides it
    pub fn new(config: PluginConfig, default_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client for plugin '{}': {}", config.name, e))?;

        Ok(Self::with_client(config, client, default_timeout))
    }

    /// Build a plugin on top of an existing (shared) client
    pub fn with_client(config: PluginConfig, client: reqwest::Client, default_timeout: Duration) -> Self {
        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);

        Self {
            config,
            client,
            timeout,
        }
    }

    fn method(&self) -> Result<Method> {
        Method::from_bytes(self.config.method.to_uppercase().as_bytes())
            .map_err(|_| anyhow::anyhow!("Unsupported HTTP method: {}", self.config.method))
    }
}

#[async_trait]
impl EnrichmentPlugin for ApiPlugin {
    fn config(&self) -> &PluginConfig {
        &self.config
    }

    async fn make_api_request(&self, payload: &Value) -> Result<PluginHttpResponse> {
        let method = self.method()?;
        tracing::debug!(plugin = %self.config.name, %method, url = %self.config.url, "Sending plugin request");

        let mut request = self
            .client
            .request(method.clone(), &self.config.url)
            .timeout(self.timeout);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        request = if method == Method::GET || method == Method::DELETE {
            request.query(&query_pairs(payload))
        } else {
            request.json(payload)
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!(
                    "Plugin '{}' timed out after {:?}: {}",
                    self.config.name,
                    self.timeout,
                    e
                )
            } else {
                anyhow::anyhow!("Plugin '{}' request failed: {}", self.config.name, e)
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read plugin '{}' response body: {}", self.config.name, e))?;

        // Parse response body as JSON if possible, otherwise keep the text
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        tracing::debug!(plugin = %self.config.name, status, "Plugin response received");
        Ok(PluginHttpResponse { status, body })
    }
}

/// Flatten scalar top-level fields into query parameters
fn query_pairs(payload: &Value) -> Vec<(String, String)> {
    payload
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .filter_map(|(key, value)| match value {
                    Value::String(text) => Some((key.clone(), text.clone())),
                    Value::Number(number) => Some((key.clone(), number.to_string())),
                    Value::Bool(flag) => Some((key.clone(), flag.to_string())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
