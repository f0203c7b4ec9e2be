#![allow(dead_code)]

use async_trait::async_trait;
use caseflow::config::{Config, DatabaseConfig, PluginDefaults, WebhookConfig};
use caseflow::subscriptions::{WebhookDelivery, WebhookPayload, WebhookSender};
use caseflow::{build_orchestrator, CreateWorkflowInput, Orchestrator, ProjectScope, UboInput, WorkflowDefinition};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const PARENT_DEFINITION: &str = "kyb-parent-v1";
pub const CHILD_DEFINITION: &str = "kyc-child-v1";
pub const WORKFLOW_HOOK: &str = "http://hooks.test/workflow";

/// Records webhooks instead of sending them
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, WebhookPayload)>>,
}

impl RecordingSender {
    /// (url, event name) of every delivery so far
    pub fn deliveries(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(url, payload)| (url.clone(), payload.event_name.clone()))
            .collect()
    }

    pub fn payloads(&self) -> Vec<WebhookPayload> {
        self.sent.lock().unwrap().iter().map(|(_, payload)| payload.clone()).collect()
    }
}

#[async_trait]
impl WebhookSender for RecordingSender {
    async fn send(&self, delivery: &WebhookDelivery, payload: &WebhookPayload) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((delivery.url.clone(), payload.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub webhooks: Arc<RecordingSender>,
    _dir: TempDir,
}

pub fn test_config(dir: &TempDir) -> Config {
    Config {
        database: DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("caseflow.db").display()),
            max_connections: 4,
            busy_timeout_ms: 5_000,
        },
        webhooks: WebhookConfig {
            environment: "test".to_string(),
            api_version: 2,
            timeout_ms: 2_000,
            subscription_cache_ttl_secs: 60,
        },
        plugins: PluginDefaults { timeout_ms: 2_000 },
    }
}

/// Fresh store with the parent and child definitions registered
pub async fn harness() -> Harness {
    harness_with(vec![parent_definition(), child_definition()]).await
}

pub async fn harness_with(definitions: Vec<WorkflowDefinition>) -> Harness {
    harness_customized(definitions, |orchestrator| orchestrator).await
}

/// Harness whose orchestrator is adjusted by `customize` before use
pub async fn harness_customized<F>(definitions: Vec<WorkflowDefinition>, customize: F) -> Harness
where
    F: FnOnce(Orchestrator) -> Orchestrator,
{
    let dir = TempDir::new().unwrap();
    let webhooks = Arc::new(RecordingSender::default());
    let orchestrator = build_orchestrator(&test_config(&dir))
        .await
        .unwrap()
        .with_webhook_sender(webhooks.clone());
    let orchestrator = customize(orchestrator);

    for definition in definitions {
        orchestrator.registry().register(definition).await.unwrap();
    }

    Harness {
        orchestrator: Arc::new(orchestrator),
        webhooks,
        _dir: dir,
    }
}

pub fn definition(value: Value) -> WorkflowDefinition {
    serde_json::from_value(value).unwrap()
}

pub fn parent_definition() -> WorkflowDefinition {
    definition(json!({
        "id": PARENT_DEFINITION,
        "name": "kyb_parent",
        "version": 1,
        "definition": {
            "initial": "collecting",
            "states": {
                "collecting": { "on": { "SUBMIT": "review" } },
                "review": { "on": { "APPROVE": "approved", "REJECT": "rejected" } },
                "approved": { "type": "final" },
                "rejected": { "type": "final" }
            }
        },
        "inputSchema": {
            "type": "object",
            "required": ["companyName", "country"],
            "properties": {
                "companyName": { "type": "string" },
                "country": { "type": "string", "minLength": 2 }
            }
        },
        "config": {
            "childEntityDefinitionId": CHILD_DEFINITION,
            "subscriptions": [
                {
                    "type": "webhook",
                    "url": WORKFLOW_HOOK,
                    "events": ["workflow.state.changed", "workflow.completed"]
                }
            ]
        }
    }))
}

pub fn child_definition() -> WorkflowDefinition {
    definition(json!({
        "id": CHILD_DEFINITION,
        "name": "kyc_child",
        "version": 1,
        "definition": {
            "initial": "pending",
            "states": {
                "pending": { "on": { "VERIFY": "verified" } },
                "verified": { "type": "final" }
            }
        }
    }))
}

pub fn business_input(company_name: &str) -> CreateWorkflowInput {
    serde_json::from_value(json!({
        "workflowDefinitionName": "kyb_parent",
        "entity": {
            "type": "business",
            "data": {
                "companyName": company_name,
                "country": "GB",
                "additionalInfo": { "customerCompany": "Example Bank" }
            }
        }
    }))
    .unwrap()
}

pub fn ubo(first_name: &str) -> UboInput {
    serde_json::from_value(json!({
        "firstName": first_name,
        "lastName": "Owner",
        "nationality": "GB",
        "ownershipPercentage": 30.0
    }))
    .unwrap()
}

pub fn scope() -> ProjectScope {
    ProjectScope::single("proj-a")
}
