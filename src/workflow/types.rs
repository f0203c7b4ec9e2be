/// Core workflow type definitions
///
/// Defines workflow definitions (configuration consumed by the orchestrator) and
/// workflow runtimes (persisted state machine instances). Definitions are stored as
/// JSON columns and deserialized into these types.

use crate::plugins::PluginConfig;
use crate::subscriptions::Subscription;
use crate::workflow::context::WorkflowContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A versioned workflow definition
///
/// Several versions may share a `name`; runtimes pin the exact `id` they were created from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Unique definition identifier (e.g., "kyb-parent-v3")
    pub id: String,
    /// Logical name shared by all versions (e.g., "kyb_parent")
    pub name: String,
    /// Monotonic version number within `name`
    pub version: i64,
    /// Owning project; `None` means shared by every project
    #[serde(default)]
    pub project_id: Option<String>,
    /// Transition table
    pub definition: StateChart,
    /// JSON Schema the initial entity payload must satisfy
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub config: DefinitionConfig,
    /// Enrichment plugins bound to states of this definition
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl WorkflowDefinition {
    pub fn initial_state(&self) -> &str {
        &self.definition.initial
    }

    /// Whether `state` is declared final
    pub fn is_final(&self, state: &str) -> bool {
        self.definition
            .states
            .get(state)
            .map(|node| node.kind == StateKind::Final)
            .unwrap_or(false)
    }

    /// Plugins triggered on entering `state`
    pub fn plugins_for_state<'a>(&'a self, state: &'a str) -> impl Iterator<Item = &'a PluginConfig> {
        self.plugins
            .iter()
            .filter(move |plugin| plugin.state_names.iter().any(|name| name == state))
    }
}

/// State nodes keyed by name plus the initial state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChart {
    pub initial: String,
    pub states: BTreeMap<String, StateNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateNode {
    /// Event name -> target state
    #[serde(default)]
    pub on: BTreeMap<String, String>,
    #[serde(default, rename = "type")]
    pub kind: StateKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    #[default]
    Normal,
    Final,
}

/// Definition-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionConfig {
    /// Workflow-level webhook subscriptions (override customer defaults per event)
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    /// Definition used for child runtimes spawned per beneficial owner
    #[serde(default)]
    pub child_entity_definition_id: Option<String>,
}

/// Lifecycle status of a runtime (independent from its state machine state)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Active,
    Completed,
    Failed,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeStatus {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(anyhow::anyhow!("Unknown runtime status: {}", other)),
        }
    }
}

/// A persisted instance of a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRuntime {
    pub id: String,
    pub workflow_definition_id: String,
    pub workflow_definition_version: i64,
    pub project_id: String,
    /// Current state machine state
    pub state: String,
    pub status: RuntimeStatus,
    pub context: WorkflowContext,
    /// Weak link to the parent runtime; deletion of either side is explicit
    pub parent_runtime_id: Option<String>,
    pub business_id: Option<String>,
    pub end_user_id: Option<String>,
    pub salesforce_object_name: Option<String>,
    pub salesforce_record_id: Option<String>,
    /// Incremented by every locked write
    pub lock_version: i64,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
    pub deleted_at: Option<String>,
    pub deleted_by: Option<String>,
}

impl WorkflowRuntime {
    /// Id of the business or end user this runtime is attached to
    pub fn principal_entity_id(&self) -> Option<&str> {
        self.business_id
            .as_deref()
            .or(self.end_user_id.as_deref())
    }
}
