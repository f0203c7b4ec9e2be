/// Hot-reload workflow definition registry using ArcSwap
///
/// Provides lock-free, atomic updates to the in-memory definition registry.
/// Each update swaps the entire map pointer, so lookups running concurrently
/// with a reload keep reading a consistent snapshot.

use crate::plugins::PluginEventRegistry;
use crate::project::ProjectScope;
use crate::workflow::{storage::WorkflowStorage, types::WorkflowDefinition};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug)]
pub struct DefinitionRegistry {
    /// Key: definition id
    definitions: ArcSwap<HashMap<String, CompiledDefinition>>,

    /// Reference to persistent storage for reload operations
    storage: WorkflowStorage,
}

/// Definition with its plugin outcome handlers wired up
#[derive(Debug, Clone)]
pub struct CompiledDefinition {
    pub definition: Arc<WorkflowDefinition>,
    pub plugin_events: Arc<PluginEventRegistry>,
}

impl DefinitionRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            definitions: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Load every stored definition, replacing the in-memory map
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_definitions().await?;
        let mut compiled = HashMap::new();
        for (id, definition) in stored {
            compiled.insert(id, compile_definition(definition)?);
        }

        self.definitions.store(Arc::new(compiled));

        tracing::info!("Initialized definition registry with {} definitions", self.definitions.load().len());

        Ok(())
    }

    /// Validate, persist and publish a definition
    pub async fn register(&self, definition: WorkflowDefinition) -> Result<CompiledDefinition> {
        let compiled = compile_definition(definition)?;
        self.storage
            .save_definition(&compiled.definition)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to save workflow definition {}: {}", compiled.definition.id, e))?;
        self.publish(compiled.clone());
        Ok(compiled)
    }

    /// Hot-reload a single definition from storage
    pub async fn reload_definition(&self, id: &str) -> Result<()> {
        let definition = self
            .storage
            .get_definition(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow definition not found: {}", id))?;

        self.publish(compile_definition(definition)?);

        tracing::info!("Hot-reloaded workflow definition: {}", id);

        Ok(())
    }

    /// Get a definition by id (lock-free read)
    pub fn get(&self, id: &str) -> Option<CompiledDefinition> {
        self.definitions.load().get(id).cloned()
    }

    /// Get a definition by id if it is shared or owned by one of the scope's projects
    pub fn get_visible(&self, id: &str, scope: &ProjectScope) -> Option<CompiledDefinition> {
        self.get(id).filter(|compiled| compiled.is_visible_to(scope))
    }

    /// Highest version of `name` visible to the scope (shared or owned by an allowed project)
    pub fn latest_by_name(&self, name: &str, scope: &ProjectScope) -> Option<CompiledDefinition> {
        self.definitions
            .load()
            .values()
            .filter(|compiled| compiled.definition.name == name)
            .filter(|compiled| compiled.is_visible_to(scope))
            .max_by(|a, b| {
                a.definition
                    .version
                    .cmp(&b.definition.version)
                    // Project-owned beats shared on a version tie
                    .then_with(|| a.definition.project_id.is_some().cmp(&b.definition.project_id.is_some()))
                    .then_with(|| b.definition.id.cmp(&a.definition.id))
            })
            .cloned()
    }

    fn publish(&self, compiled: CompiledDefinition) {
        let current = self.definitions.load();
        let mut next = (**current).clone();
        next.insert(compiled.definition.id.clone(), compiled);
        self.definitions.store(Arc::new(next));
    }
}

impl CompiledDefinition {
    pub fn is_visible_to(&self, scope: &ProjectScope) -> bool {
        match &self.definition.project_id {
            Some(project_id) => scope.allows(project_id),
            None => true,
        }
    }
}

/// Check a definition's internal consistency and build its plugin handlers
///
/// Rejects:
/// - an initial state or transition target missing from `states`
/// - duplicate plugin names
/// - an input schema that does not compile
pub fn compile_definition(definition: WorkflowDefinition) -> Result<CompiledDefinition> {
    let states = &definition.definition.states;

    if !states.contains_key(&definition.definition.initial) {
        return Err(anyhow::anyhow!(
            "Definition {} declares unknown initial state '{}'",
            definition.id,
            definition.definition.initial
        ));
    }

    for (state, node) in states {
        for (event, target) in &node.on {
            if !states.contains_key(target) {
                return Err(anyhow::anyhow!(
                    "Definition {}: transition {} --{}--> targets unknown state '{}'",
                    definition.id,
                    state,
                    event,
                    target
                ));
            }
        }
    }

    let mut plugin_names = HashSet::new();
    for plugin in &definition.plugins {
        if !plugin_names.insert(plugin.name.as_str()) {
            return Err(anyhow::anyhow!(
                "Definition {} declares plugin '{}' twice",
                definition.id,
                plugin.name
            ));
        }
    }

    if let Some(schema) = &definition.input_schema {
        jsonschema::validator_for(schema)
            .map_err(|e| anyhow::anyhow!("Definition {} has an invalid input schema: {}", definition.id, e))?;
    }

    let plugin_events = PluginEventRegistry::from_plugins(&definition.plugins);

    Ok(CompiledDefinition {
        definition: Arc::new(definition),
        plugin_events: Arc::new(plugin_events),
    })
}
