/// Webhook delivery
///
/// Each resolved delivery is POSTed as JSON to its URL. Delivery happens after the
/// triggering transaction has committed, so failures are logged and never undo the
/// state change that produced them.

use crate::subscriptions::resolver::{SystemEvent, WebhookDelivery};
use crate::workflow::types::WorkflowRuntime;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// JSON body sent to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub id: String,
    pub event_name: String,
    pub api_version: u32,
    pub timestamp: String,
    pub environment: String,
    pub workflow_runtime_id: String,
    pub workflow_definition_id: String,
    pub workflow_created_at: String,
    pub workflow_resolved_at: Option<String>,
    pub correlation_id: Option<String>,
    pub state: String,
    pub data: Value,
}

impl WebhookPayload {
    pub fn build(delivery: &WebhookDelivery, event: SystemEvent, runtime: &WorkflowRuntime) -> Result<Self> {
        Ok(Self {
            id: delivery.id.clone(),
            event_name: event.as_str().to_string(),
            api_version: delivery.api_version,
            timestamp: chrono::Utc::now().to_rfc3339(),
            environment: delivery.environment.clone(),
            workflow_runtime_id: runtime.id.clone(),
            workflow_definition_id: runtime.workflow_definition_id.clone(),
            workflow_created_at: runtime.created_at.clone(),
            workflow_resolved_at: runtime.resolved_at.clone(),
            correlation_id: runtime.salesforce_record_id.clone(),
            state: runtime.state.clone(),
            data: runtime.context.to_value()?,
        })
    }
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, delivery: &WebhookDelivery, payload: &WebhookPayload) -> Result<()>;
}

/// reqwest-backed sender
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build webhook HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, delivery: &WebhookDelivery, payload: &WebhookPayload) -> Result<()> {
        let mut request = self.client.post(&delivery.url).json(payload);

        // Subscription-level headers, e.g. a shared secret
        if let Some(headers) = delivery
            .config
            .as_ref()
            .and_then(|config| config.get("headers"))
            .and_then(Value::as_object)
        {
            for (key, value) in headers {
                if let Some(header_value) = value.as_str() {
                    request = request.header(key.as_str(), header_value);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Webhook delivery {} to {} failed: {}", delivery.id, delivery.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "Webhook delivery {} to {} returned {}",
                delivery.id,
                delivery.url,
                status
            ));
        }

        Ok(())
    }
}

/// Deliver every webhook, logging failures; returns the number delivered
pub async fn deliver_all(
    sender: &dyn WebhookSender,
    deliveries: &[WebhookDelivery],
    event: SystemEvent,
    runtime: &WorkflowRuntime,
) -> usize {
    let mut delivered = 0;
    for delivery in deliveries {
        let payload = match WebhookPayload::build(delivery, event, runtime) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(delivery_id = %delivery.id, error = %e, "Failed to build webhook payload");
                continue;
            }
        };

        match sender.send(delivery, &payload).await {
            Ok(()) => {
                delivered += 1;
                tracing::info!(
                    delivery_id = %delivery.id,
                    url = %delivery.url,
                    event = %event,
                    runtime_id = %runtime.id,
                    "Webhook delivered"
                );
            }
            Err(e) => {
                tracing::error!(
                    delivery_id = %delivery.id,
                    url = %delivery.url,
                    event = %event,
                    runtime_id = %runtime.id,
                    error = %e,
                    "Webhook delivery failed"
                );
            }
        }
    }
    delivered
}
