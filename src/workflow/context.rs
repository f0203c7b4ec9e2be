/// Typed workflow context and its migration layer
///
/// The context is persisted as JSON. Reads go through [`WorkflowContext::from_value`],
/// which upgrades older layouts before deserializing; unknown top-level keys survive
/// a read/write cycle untouched.

use crate::plugins::{PluginInvocationResult, ProcessStatus};
use crate::workflow::types::RuntimeStatus;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Layout version written by this crate
pub const CONTEXT_VERSION: u32 = 1;

/// definition id -> runtime id -> snapshot
pub type ChildWorkflowIndex = BTreeMap<String, BTreeMap<String, ChildWorkflowSnapshot>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRecord>,
    #[serde(default)]
    pub documents: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub child_workflows: ChildWorkflowIndex,
    /// Last invocation result per plugin name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins_output: BTreeMap<String, PluginInvocationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_flow: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The principal entity a runtime verifies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Schema-validated entity payload
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Business,
    Individual,
}

/// What the parent remembers about one child runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildWorkflowSnapshot {
    pub entity_id: String,
    pub state: String,
    pub status: RuntimeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowContext {
    /// Fresh context for a newly created runtime
    pub fn for_entity(entity: EntityRecord, documents: Vec<Value>) -> Self {
        Self {
            version: CONTEXT_VERSION,
            entity: Some(entity),
            documents,
            ..Self::default()
        }
    }

    /// Deserialize a stored context, migrating older layouts first
    pub fn from_value(value: Value) -> Result<Self> {
        let migrated = migrate(value)?;
        Ok(serde_json::from_value(migrated)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Read a string field from the entity payload
    pub fn entity_str(&self, key: &str) -> Option<&str> {
        self.entity
            .as_ref()
            .and_then(|entity| entity.data.get(key))
            .and_then(Value::as_str)
    }

    /// Read a string field from the entity's `additionalInfo` object
    pub fn entity_additional_info_str(&self, key: &str) -> Option<&str> {
        self.entity
            .as_ref()
            .and_then(|entity| entity.data.get("additionalInfo"))
            .and_then(|info| info.get(key))
            .and_then(Value::as_str)
    }

    /// Register or refresh a child snapshot
    pub fn upsert_child(&mut self, definition_id: &str, runtime_id: &str, snapshot: ChildWorkflowSnapshot) {
        self.child_workflows
            .entry(definition_id.to_string())
            .or_default()
            .insert(runtime_id.to_string(), snapshot);
    }

    /// Remove the given child runtimes from the index
    ///
    /// Buckets whose definition id is not in `definition_ids` are left untouched.
    /// Inside a targeted bucket only entries keyed by one of `runtime_ids` are dropped;
    /// a bucket emptied by the pruning disappears.
    pub fn prune_children(&mut self, definition_ids: &BTreeSet<String>, runtime_ids: &BTreeSet<String>) {
        let mut pruned = ChildWorkflowIndex::new();
        for (definition_id, children) in std::mem::take(&mut self.child_workflows) {
            if !definition_ids.contains(&definition_id) {
                pruned.insert(definition_id, children);
                continue;
            }
            let before = children.len();
            let kept: BTreeMap<_, _> = children
                .into_iter()
                .filter(|(runtime_id, _)| !runtime_ids.contains(runtime_id))
                .collect();
            if kept.is_empty() && before > 0 {
                continue;
            }
            pruned.insert(definition_id, kept);
        }
        self.child_workflows = pruned;
    }

    /// Store the outcome of a plugin call
    pub fn record_plugin_output(&mut self, plugin_name: &str, result: PluginInvocationResult) {
        self.plugins_output.insert(plugin_name.to_string(), result);
    }
}

/// Upgrade a stored context to [`CONTEXT_VERSION`]
fn migrate(mut value: Value) -> Result<Value> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("Workflow context must be a JSON object"))?;

    let version = object.get("version").and_then(Value::as_u64).unwrap_or(0);
    if version > u64::from(CONTEXT_VERSION) {
        return Err(anyhow::anyhow!(
            "Workflow context version {} is newer than supported version {}",
            version,
            CONTEXT_VERSION
        ));
    }

    if version == 0 {
        migrate_v0_to_v1(object);
    }

    Ok(value)
}

/// v0 contexts stored raw vendor responses under `pluginsOutput` and allowed
/// `documents: null`.
fn migrate_v0_to_v1(object: &mut Map<String, Value>) {
    if object.get("documents").map(Value::is_null).unwrap_or(true) {
        object.insert("documents".to_string(), json!([]));
    }

    if let Some(Value::Object(outputs)) = object.get_mut("pluginsOutput") {
        for output in outputs.values_mut() {
            let already_wrapped = output.get("requestPayload").is_some() && output.get("status").is_some();
            if !already_wrapped {
                let raw = output.take();
                *output = json!({
                    "requestPayload": {},
                    "status": ProcessStatus::Completed,
                    "rawResponse": raw,
                });
            }
        }
    }

    object.insert("version".to_string(), json!(1));
}
