/// Effective subscription resolution
///
/// Workflow-level subscriptions override customer-level ones event by event: a
/// customer subscription loses every event some workflow subscription mentions and
/// disappears once it has none left. Catch-all customer subscriptions (no events)
/// are kept as they are.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Webhook,
    Email,
}

/// A delivery rule for a set of event names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "type")]
    pub kind: SubscriptionKind,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl Subscription {
    pub fn webhook(url: impl Into<String>, events: &[&str]) -> Self {
        Self {
            kind: SubscriptionKind::Webhook,
            url: url.into(),
            events: events.iter().map(|event| event.to_string()).collect(),
            config: None,
        }
    }
}

/// One materialized webhook call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub id: String,
    pub url: String,
    pub environment: String,
    pub api_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Events the orchestrator publishes to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEvent {
    WorkflowStateChanged,
    WorkflowCompleted,
    WorkflowContextChanged,
}

impl SystemEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStateChanged => "workflow.state.changed",
            Self::WorkflowCompleted => "workflow.completed",
            Self::WorkflowContextChanged => "workflow.context.changed",
        }
    }
}

impl fmt::Display for SystemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merge customer defaults with workflow overrides
pub fn merge_subscriptions(customer: &[Subscription], workflow: &[Subscription]) -> Vec<Subscription> {
    if workflow.is_empty() {
        return customer.to_vec();
    }
    if customer.is_empty() {
        return workflow.to_vec();
    }

    let workflow_events: HashSet<&str> = workflow
        .iter()
        .flat_map(|subscription| subscription.events.iter().map(String::as_str))
        .collect();

    let mut merged: Vec<Subscription> = customer
        .iter()
        .filter_map(|subscription| {
            if subscription.events.is_empty() {
                return Some(subscription.clone());
            }

            let remaining: Vec<String> = subscription
                .events
                .iter()
                .filter(|event| !workflow_events.contains(event.as_str()))
                .cloned()
                .collect();

            if remaining.is_empty() {
                None
            } else {
                Some(Subscription {
                    events: remaining,
                    ..subscription.clone()
                })
            }
        })
        .collect();

    merged.extend(workflow.iter().cloned());
    merged
}

/// Webhook deliveries for `event`, one per matching subscription
pub fn get_webhooks(
    subscriptions: &[Subscription],
    environment: &str,
    api_version: u32,
    event: &str,
) -> Vec<WebhookDelivery> {
    subscriptions
        .iter()
        .filter(|subscription| subscription.kind == SubscriptionKind::Webhook)
        .filter(|subscription| subscription.events.iter().any(|name| name == event))
        .map(|subscription| WebhookDelivery {
            id: uuid::Uuid::new_v4().to_string(),
            url: subscription.url.clone(),
            environment: environment.to_string(),
            api_version,
            config: subscription.config.clone(),
        })
        .collect()
}
