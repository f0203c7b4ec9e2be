/// State machine collaborator
///
/// The orchestrator only relies on the narrow contract of [`StateMachine`]: given a
/// runtime, its definition and an event, produce the advanced state and context.
/// Persisting the result is the caller's job, inside its own transaction.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::workflow::context::WorkflowContext;
use crate::workflow::types::{RuntimeStatus, WorkflowDefinition, WorkflowRuntime};
use serde_json::Value;

/// Built-in event replacing the runtime context without changing state
pub const UPDATE_CONTEXT_EVENT: &str = "UPDATE_CONTEXT";

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowEvent {
    pub name: String,
    pub payload: Option<Value>,
}

impl WorkflowEvent {
    pub fn new(name: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// `UPDATE_CONTEXT` carrying a full replacement context
    pub fn update_context(context: &WorkflowContext) -> OrchestratorResult<Self> {
        Ok(Self::new(
            UPDATE_CONTEXT_EVENT,
            Some(serde_json::json!({ "context": context.to_value()? })),
        ))
    }
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: String,
    pub context: WorkflowContext,
    /// The new state is declared final
    pub reached_final: bool,
}

impl Transition {
    pub fn changed_state(&self, previous: &str) -> bool {
        self.state != previous
    }
}

pub trait StateMachine: Send + Sync {
    fn transition(
        &self,
        definition: &WorkflowDefinition,
        runtime: &WorkflowRuntime,
        event: &WorkflowEvent,
    ) -> OrchestratorResult<Transition>;
}

/// Interprets the definition's `states[state].on[event]` table
#[derive(Debug, Clone, Copy, Default)]
pub struct DefinitionStateMachine;

impl StateMachine for DefinitionStateMachine {
    fn transition(
        &self,
        definition: &WorkflowDefinition,
        runtime: &WorkflowRuntime,
        event: &WorkflowEvent,
    ) -> OrchestratorResult<Transition> {
        if event.name == UPDATE_CONTEXT_EVENT {
            let context = event
                .payload
                .as_ref()
                .and_then(|payload| payload.get("context"))
                .cloned()
                .ok_or_else(|| {
                    OrchestratorError::Precondition(format!("{} requires a context payload", UPDATE_CONTEXT_EVENT))
                })?;

            return Ok(Transition {
                state: runtime.state.clone(),
                context: WorkflowContext::from_value(context)?,
                reached_final: definition.is_final(&runtime.state),
            });
        }

        if runtime.status != RuntimeStatus::Active {
            return Err(OrchestratorError::Precondition(format!(
                "runtime {} is {} and accepts no further events",
                runtime.id, runtime.status
            )));
        }

        let target = definition
            .definition
            .states
            .get(&runtime.state)
            .and_then(|node| node.on.get(&event.name))
            .ok_or_else(|| {
                OrchestratorError::Precondition(format!(
                    "event {} is not accepted in state {}",
                    event.name, runtime.state
                ))
            })?;

        Ok(Transition {
            state: target.clone(),
            context: runtime.context.clone(),
            reached_final: definition.is_final(target),
        })
    }
}
