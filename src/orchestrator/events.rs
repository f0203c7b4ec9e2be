/// Event entry points: caller-driven transitions and plugin callbacks

use super::effects::lock_or_not_found;
use super::Orchestrator;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::plugins::{PluginEventKind, PluginInvocationResult};
use crate::project::ProjectScope;
use crate::workflow::{WorkflowEvent, WorkflowRuntime};
use serde_json::{json, Value};
use std::collections::VecDeque;

impl Orchestrator {
    /// Send `event` to a runtime and return it as committed
    ///
    /// Emits `workflow.state.changed` when the state moves and `workflow.completed`
    /// when a final state is reached, then invokes the plugins bound to the new state.
    pub async fn send_event(
        &self,
        runtime_id: &str,
        event: &str,
        payload: Option<Value>,
        scope: &ProjectScope,
    ) -> OrchestratorResult<WorkflowRuntime> {
        let event = WorkflowEvent::new(event, payload);
        let applied = self.commit_event(runtime_id, &event, scope).await?;

        tracing::info!(
            runtime_id = %runtime_id,
            event = %event.name,
            from = %applied.previous_state,
            to = %applied.runtime.state,
            status = %applied.runtime.status,
            "Workflow event processed"
        );

        let runtime = applied.runtime.clone();
        self.after_commit(applied, scope).await;
        Ok(runtime)
    }

    /// Record the asynchronous outcome reported by a plugin's vendor
    ///
    /// The result keeps the request payload of the original call. A payload with a
    /// non-empty `error` is recorded as `ERROR` and fires the plugin's error action;
    /// otherwise it is `COMPLETED` and fires the completion action.
    pub async fn handle_plugin_callback(
        &self,
        runtime_id: &str,
        plugin_name: &str,
        payload: Value,
        scope: &ProjectScope,
    ) -> OrchestratorResult<WorkflowRuntime> {
        let mut tx = self.storage.begin().await?;
        let runtime = lock_or_not_found(&mut tx, runtime_id, scope).await?;

        let compiled = self.definition_of(&runtime)?;
        if !compiled
            .definition
            .plugins
            .iter()
            .any(|plugin| plugin.name == plugin_name)
        {
            return Err(OrchestratorError::NotFound(format!(
                "plugin {} on workflow definition {}",
                plugin_name, compiled.definition.id
            )));
        }

        let request_payload = runtime
            .context
            .plugins_output
            .get(plugin_name)
            .map(|previous| previous.request_payload.clone())
            .unwrap_or_else(|| json!({}));
        let result = PluginInvocationResult::from_callback(request_payload, payload);

        let mut context = runtime.context.clone();
        context.record_plugin_output(plugin_name, result.clone());
        let applied = self
            .apply_locked(&mut tx, runtime, &WorkflowEvent::update_context(&context)?)
            .await?;
        tx.commit().await?;

        tracing::info!(
            runtime_id = %runtime_id,
            plugin = %plugin_name,
            status = ?result.status,
            "Recorded plugin callback"
        );

        let runtime = applied.runtime.clone();
        self.dispatch_webhooks(&applied.runtime, &applied.compiled, &applied.system_events)
            .await;

        let mut pending = VecDeque::new();
        let follow_up = PluginEventKind::from_invocation(&result)
            .and_then(|kind| applied.compiled.plugin_events.resolve(plugin_name, kind, &result));
        if let Some(follow_up) = follow_up {
            pending.push_back((runtime.id.clone(), follow_up));
        }
        self.drain_follow_ups(pending, scope).await;

        Ok(runtime)
    }
}
