/// Caseflow: workflow orchestration for compliance case management
///
/// This library runs verification workflows (KYB/KYC) as persisted state machine
/// runtimes, links parent and child runtimes, calls third-party enrichment plugins
/// and notifies webhook subscribers.

// Core configuration and setup
pub mod config;

// Error taxonomy surfaced by every public operation
pub mod error;

// Tenant scoping and the shared transactional store
pub mod project;

// Workflow definitions, runtimes, typed context, storage and registry
pub mod workflow;

// Enrichment plugins - invocation protocol, HTTP plugin, status classification
pub mod plugins;

// Webhook subscriptions - resolution, caching and delivery
pub mod subscriptions;

// Public operations over workflow runtimes
pub mod orchestrator;

// Tracing and component wiring
pub mod bootstrap;

// Re-export commonly used types for external consumers
pub use bootstrap::{build_orchestrator, init_tracing};
pub use error::{OrchestratorError, OrchestratorResult, ValidationIssue};
pub use orchestrator::{CreateWorkflowInput, EntityInput, Orchestrator, UboInput};
pub use project::ProjectScope;
pub use workflow::{WorkflowContext, WorkflowDefinition, WorkflowRuntime};
