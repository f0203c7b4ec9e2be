/// Transition application and post-commit side effects
///
/// Inside a transaction: run the state machine against a locked runtime and persist
/// the outcome. After commit: deliver webhooks, invoke the plugins bound to a newly
/// entered state and work through the follow-up events their outcomes produce.
/// Follow-ups are queued and drained in order, never handled recursively.

use super::Orchestrator;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::plugins::{ApiPlugin, EnrichmentPlugin, FollowUpEvent, PluginConfig, PluginEventKind, PluginInvocationResult};
use crate::project::ProjectScope;
use crate::subscriptions::{dispatcher::deliver_all, get_webhooks, merge_subscriptions, SystemEvent};
use crate::workflow::{
    CompiledDefinition, RuntimeStatus, RuntimeTransaction, WorkflowContext, WorkflowEvent, WorkflowRuntime,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;

/// Upper bound on follow-up events drained after one operation
const MAX_FOLLOW_UP_EVENTS: usize = 32;

/// A transition written inside an open transaction
pub(super) struct AppliedTransition {
    pub runtime: WorkflowRuntime,
    pub previous_state: String,
    pub compiled: CompiledDefinition,
    /// Webhook events owed once the transaction commits
    pub system_events: Vec<SystemEvent>,
}

impl AppliedTransition {
    pub fn entered_new_state(&self) -> bool {
        self.runtime.state != self.previous_state
    }
}

pub(super) type PendingFollowUps = VecDeque<(String, FollowUpEvent)>;

impl Orchestrator {
    /// Run `event` against a runtime locked by `tx` and persist the result
    pub(super) async fn apply_locked(
        &self,
        tx: &mut RuntimeTransaction,
        runtime: WorkflowRuntime,
        event: &WorkflowEvent,
    ) -> OrchestratorResult<AppliedTransition> {
        let compiled = self.definition_of(&runtime)?;
        let transition = self
            .state_machine
            .transition(&compiled.definition, &runtime, event)?;

        let previous_state = runtime.state.clone();
        let mut system_events = Vec::new();
        if transition.changed_state(&previous_state) {
            system_events.push(SystemEvent::WorkflowStateChanged);
        }
        if transition.context != runtime.context {
            system_events.push(SystemEvent::WorkflowContextChanged);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut updated = runtime;
        updated.state = transition.state;
        updated.context = transition.context;
        updated.updated_at = now.clone();
        if transition.reached_final && updated.status == RuntimeStatus::Active {
            updated.status = RuntimeStatus::Completed;
            updated.resolved_at = Some(now);
            system_events.push(SystemEvent::WorkflowCompleted);
        }

        tx.update_runtime(&updated).await?;

        tracing::debug!(
            runtime_id = %updated.id,
            event = %event.name,
            from = %previous_state,
            to = %updated.state,
            "Applied workflow event"
        );

        Ok(AppliedTransition {
            runtime: updated,
            previous_state,
            compiled,
            system_events,
        })
    }

    /// Lock, apply one event and commit
    pub(super) async fn commit_event(
        &self,
        runtime_id: &str,
        event: &WorkflowEvent,
        scope: &ProjectScope,
    ) -> OrchestratorResult<AppliedTransition> {
        let mut tx = self.storage.begin().await?;
        let runtime = lock_or_not_found(&mut tx, runtime_id, scope).await?;
        let applied = self.apply_locked(&mut tx, runtime, event).await?;
        tx.commit().await?;
        Ok(applied)
    }

    /// Lock, mutate the context through `UPDATE_CONTEXT` and commit
    pub(super) async fn commit_context_update<F>(
        &self,
        runtime_id: &str,
        scope: &ProjectScope,
        mutate: F,
    ) -> OrchestratorResult<AppliedTransition>
    where
        F: FnOnce(&mut WorkflowContext),
    {
        let mut tx = self.storage.begin().await?;
        let runtime = lock_or_not_found(&mut tx, runtime_id, scope).await?;
        let mut context = runtime.context.clone();
        mutate(&mut context);
        let applied = self
            .apply_locked(&mut tx, runtime, &WorkflowEvent::update_context(&context)?)
            .await?;
        tx.commit().await?;
        Ok(applied)
    }

    /// Everything owed after a committed transition
    pub(super) async fn after_commit(&self, applied: AppliedTransition, scope: &ProjectScope) {
        self.dispatch_webhooks(&applied.runtime, &applied.compiled, &applied.system_events)
            .await;

        if applied.entered_new_state() {
            self.run_state_plugins(&applied.runtime, &applied.compiled, scope)
                .await;
        }
    }

    /// Invoke the plugins bound to the runtime's current state, then drain follow-ups
    pub(super) async fn run_state_plugins(
        &self,
        runtime: &WorkflowRuntime,
        compiled: &CompiledDefinition,
        scope: &ProjectScope,
    ) {
        let mut pending = PendingFollowUps::new();
        self.invoke_state_plugins(runtime, compiled, scope, &mut pending)
            .await;
        self.drain_follow_ups(pending, scope).await;
    }

    pub(super) async fn drain_follow_ups(&self, mut pending: PendingFollowUps, scope: &ProjectScope) {
        let mut processed = 0;
        while let Some((runtime_id, follow_up)) = pending.pop_front() {
            if processed == MAX_FOLLOW_UP_EVENTS {
                tracing::warn!(
                    runtime_id = %runtime_id,
                    dropped = pending.len() + 1,
                    "Follow-up event limit reached, dropping remaining events"
                );
                break;
            }
            processed += 1;

            let event = WorkflowEvent::new(follow_up.name, follow_up.payload);
            match self.commit_event(&runtime_id, &event, scope).await {
                Ok(applied) => {
                    tracing::info!(
                        runtime_id = %runtime_id,
                        event = %event.name,
                        state = %applied.runtime.state,
                        "Processed plugin follow-up event"
                    );
                    self.dispatch_webhooks(&applied.runtime, &applied.compiled, &applied.system_events)
                        .await;
                    if applied.entered_new_state() {
                        self.invoke_state_plugins(&applied.runtime, &applied.compiled, scope, &mut pending)
                            .await;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        runtime_id = %runtime_id,
                        event = %event.name,
                        error = %e,
                        "Plugin follow-up event failed"
                    );
                }
            }
        }
    }

    async fn invoke_state_plugins(
        &self,
        runtime: &WorkflowRuntime,
        compiled: &CompiledDefinition,
        scope: &ProjectScope,
        pending: &mut PendingFollowUps,
    ) {
        for plugin in compiled.definition.plugins_for_state(&runtime.state) {
            let result = self.invoke_plugin(plugin, runtime).await;
            let kind = PluginEventKind::from_invocation(&result);

            let recorded = result.clone();
            match self
                .commit_context_update(&runtime.id, scope, |context| {
                    context.record_plugin_output(&plugin.name, recorded)
                })
                .await
            {
                Ok(applied) => {
                    self.dispatch_webhooks(&applied.runtime, &applied.compiled, &applied.system_events)
                        .await;
                }
                Err(e) => {
                    tracing::error!(
                        runtime_id = %runtime.id,
                        plugin = %plugin.name,
                        error = %e,
                        "Failed to record plugin output"
                    );
                    continue;
                }
            }

            let follow_up = kind.and_then(|kind| compiled.plugin_events.resolve(&plugin.name, kind, &result));
            if let Some(follow_up) = follow_up {
                pending.push_back((runtime.id.clone(), follow_up));
            }
        }
    }

    /// Call one plugin; infrastructure faults are logged and turned into an `ERROR` result
    async fn invoke_plugin(&self, config: &PluginConfig, runtime: &WorkflowRuntime) -> PluginInvocationResult {
        let context = match runtime.context.to_value() {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(runtime_id = %runtime.id, plugin = %config.name, error = ?e, "Failed to serialize context");
                return PluginInvocationResult::failed(json!({}), None, e.to_string());
            }
        };

        let plugin = ApiPlugin::with_client(config.clone(), self.plugin_client.clone(), self.plugin_timeout);

        match plugin.invoke(&context).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    runtime_id = %runtime.id,
                    workflow_definition_id = %runtime.workflow_definition_id,
                    plugin = %config.name,
                    url = %config.url,
                    error = ?e,
                    "Plugin invocation failed"
                );
                let payload = plugin
                    .transform_data(&context)
                    .map(|transformed| plugin.generate_request_payload_from_whitelist(transformed))
                    .unwrap_or_else(|_| json!({}));
                PluginInvocationResult::failed(payload, None, format!("{:#}", e))
            }
        }
    }

    /// Resolve and deliver webhooks for each event; failures are logged only
    pub(super) async fn dispatch_webhooks(
        &self,
        runtime: &WorkflowRuntime,
        compiled: &CompiledDefinition,
        events: &[SystemEvent],
    ) {
        if events.is_empty() {
            return;
        }

        let customer = match self
            .subscription_cache
            .get_or_load(&runtime.project_id, || {
                self.storage.customer_subscriptions(&runtime.project_id)
            })
            .await
        {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                tracing::error!(project_id = %runtime.project_id, error = ?e, "Failed to load customer subscriptions");
                Arc::new(Vec::new())
            }
        };
        let merged = merge_subscriptions(&customer, &compiled.definition.config.subscriptions);

        for event in events {
            let deliveries = get_webhooks(&merged, &self.environment, self.api_version, event.as_str());
            if deliveries.is_empty() {
                continue;
            }
            deliver_all(self.webhook_sender.as_ref(), &deliveries, *event, runtime).await;
        }
    }
}

pub(super) async fn lock_or_not_found(
    tx: &mut RuntimeTransaction,
    runtime_id: &str,
    scope: &ProjectScope,
) -> OrchestratorResult<WorkflowRuntime> {
    tx.lock_runtime(runtime_id, scope)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("workflow runtime {}", runtime_id)))
}
