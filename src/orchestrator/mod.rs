/// Workflow Runtime Orchestrator
///
/// Entry point for every mutation of a workflow runtime:
/// - `create`: start a workflow for a business or individual
/// - `create_child_entity` / `delete_child_entities`: attach or detach beneficial owners
/// - `send_event`: drive the state machine
/// - `handle_plugin_callback`: asynchronous completion signals from enrichment vendors
///
/// Each operation locks its runtime, mutates inside one transaction and commits.
/// Webhooks and plugin calls only happen after the commit.

mod child_entities;
mod create;
mod effects;
mod events;

pub use child_entities::{UboInput, UBO_ROLE};
pub use create::{CreateWorkflowInput, EntityInput};

use crate::config::Config;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::project::ProjectScope;
use crate::subscriptions::{HttpWebhookSender, SubscriptionCache, WebhookSender};
use crate::workflow::{
    CompiledDefinition, DefinitionRegistry, DefinitionStateMachine, StateMachine, WorkflowRuntime, WorkflowStorage,
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub struct Orchestrator {
    storage: WorkflowStorage,
    registry: Arc<DefinitionRegistry>,
    state_machine: Arc<dyn StateMachine>,
    subscription_cache: Arc<SubscriptionCache>,
    webhook_sender: Arc<dyn WebhookSender>,
    /// Pooled client shared by every plugin invocation
    plugin_client: reqwest::Client,
    environment: String,
    api_version: u32,
    plugin_timeout: Duration,
}

impl Orchestrator {
    /// Orchestrator with the default state machine, HTTP webhook sender and a fresh cache
    pub fn new(storage: WorkflowStorage, registry: Arc<DefinitionRegistry>, config: &Config) -> Result<Self> {
        let webhook_sender = HttpWebhookSender::new(Duration::from_millis(config.webhooks.timeout_ms))?;
        let plugin_client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build plugin HTTP client: {}", e))?;
        let subscription_cache = SubscriptionCache::new(Duration::from_secs(config.webhooks.subscription_cache_ttl_secs));

        Ok(Self {
            storage,
            registry,
            state_machine: Arc::new(DefinitionStateMachine),
            subscription_cache: Arc::new(subscription_cache),
            webhook_sender: Arc::new(webhook_sender),
            plugin_client,
            environment: config.webhooks.environment.clone(),
            api_version: config.webhooks.api_version,
            plugin_timeout: Duration::from_millis(config.plugins.timeout_ms),
        })
    }

    pub fn with_state_machine(mut self, state_machine: Arc<dyn StateMachine>) -> Self {
        self.state_machine = state_machine;
        self
    }

    pub fn with_webhook_sender(mut self, webhook_sender: Arc<dyn WebhookSender>) -> Self {
        self.webhook_sender = webhook_sender;
        self
    }

    pub fn with_subscription_cache(mut self, subscription_cache: Arc<SubscriptionCache>) -> Self {
        self.subscription_cache = subscription_cache;
        self
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    /// Read a live runtime visible to the caller
    pub async fn get_runtime(&self, runtime_id: &str, scope: &ProjectScope) -> OrchestratorResult<WorkflowRuntime> {
        self.storage
            .get_runtime(runtime_id, scope)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workflow runtime {}", runtime_id)))
    }

    fn definition_of(&self, runtime: &WorkflowRuntime) -> OrchestratorResult<CompiledDefinition> {
        self.registry.get(&runtime.workflow_definition_id).ok_or_else(|| {
            OrchestratorError::NotFound(format!(
                "workflow definition {} of runtime {}",
                runtime.workflow_definition_id, runtime.id
            ))
        })
    }
}
