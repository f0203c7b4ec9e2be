/// Workflow Management Layer
///
/// This module handles workflow definitions, runtimes and their persistence:
/// - Type definitions (WorkflowDefinition, WorkflowRuntime)
/// - The typed runtime context and its migrations
/// - SQLite persistence with sqlx, including the locked mutation transaction
/// - Lock-free hot-reload definition registry using ArcSwap
/// - The state machine collaborator contract

pub mod context;
pub mod registry;
pub mod state_machine;
pub mod storage;
pub mod transaction;
pub mod types;

pub use context::{ChildWorkflowSnapshot, EntityKind, EntityRecord, WorkflowContext};
pub use registry::{CompiledDefinition, DefinitionRegistry};
pub use state_machine::{DefinitionStateMachine, StateMachine, Transition, WorkflowEvent, UPDATE_CONTEXT_EVENT};
pub use storage::WorkflowStorage;
pub use transaction::RuntimeTransaction;
pub use types::{RuntimeStatus, WorkflowDefinition, WorkflowRuntime};
