/// Plugin outcome events
///
/// A plugin outcome maps to one of a closed set of kinds; a small registry maps
/// (plugin name, kind) to the handler deciding which workflow event, if any, follows.

use crate::plugins::protocol::{PluginConfig, PluginInvocationResult};
use crate::plugins::status::ProcessStatus;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginEventKind {
    /// The vendor accepted the request; enrichment is under way
    Acknowledged,
    /// The vendor reported the final result through the callback
    Completed,
    /// Invalid request, invalid response, non-OK HTTP or an error callback
    Failed,
}

impl PluginEventKind {
    /// Kind of a synchronous call result; canceled calls raise nothing
    pub fn from_invocation(result: &PluginInvocationResult) -> Option<Self> {
        match result.status {
            ProcessStatus::Error => Some(Self::Failed),
            ProcessStatus::InProgress => Some(Self::Acknowledged),
            ProcessStatus::Completed => Some(Self::Completed),
            ProcessStatus::Canceled => None,
        }
    }
}

/// Workflow event to send after a plugin outcome
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpEvent {
    pub name: String,
    pub payload: Option<Value>,
}

pub trait PluginEventHandler: Send + Sync + fmt::Debug {
    fn handle(&self, plugin: &str, result: &PluginInvocationResult) -> Option<FollowUpEvent>;
}

/// Sends a fixed workflow event
#[derive(Debug, Clone)]
pub struct SendWorkflowEvent {
    pub event: String,
}

impl PluginEventHandler for SendWorkflowEvent {
    fn handle(&self, _plugin: &str, _result: &PluginInvocationResult) -> Option<FollowUpEvent> {
        Some(FollowUpEvent {
            name: self.event.clone(),
            payload: None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PluginEventRegistry {
    handlers: HashMap<(String, PluginEventKind), Arc<dyn PluginEventHandler>>,
}

impl PluginEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry wired from the actions declared on plugin configs
    pub fn from_plugins(plugins: &[PluginConfig]) -> Self {
        let mut registry = Self::new();
        for plugin in plugins {
            let actions = [
                (PluginEventKind::Acknowledged, &plugin.success_action),
                (PluginEventKind::Completed, &plugin.completion_action),
                (PluginEventKind::Failed, &plugin.error_action),
            ];
            for (kind, action) in actions {
                if let Some(event) = action {
                    registry.register(&plugin.name, kind, Arc::new(SendWorkflowEvent { event: event.clone() }));
                }
            }
        }
        registry
    }

    pub fn register(&mut self, plugin: &str, kind: PluginEventKind, handler: Arc<dyn PluginEventHandler>) {
        self.handlers.insert((plugin.to_string(), kind), handler);
    }

    /// Follow-up event for an outcome, if a handler is registered
    pub fn resolve(
        &self,
        plugin: &str,
        kind: PluginEventKind,
        result: &PluginInvocationResult,
    ) -> Option<FollowUpEvent> {
        self.handlers
            .get(&(plugin.to_string(), kind))
            .and_then(|handler| handler.handle(plugin, result))
    }
}
