/// Child entity operations (beneficial owners attached to a business workflow)
///
/// Both operations lock the parent runtime first and keep the parent's
/// `childWorkflows` index, the child runtimes and the link rows consistent inside
/// a single transaction.

use super::effects::{lock_or_not_found, AppliedTransition};
use super::Orchestrator;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::project::ProjectScope;
use crate::workflow::transaction::EntityRuntimeRef;
use crate::workflow::{
    ChildWorkflowSnapshot, EntityKind, EntityRecord, RuntimeStatus, RuntimeTransaction, WorkflowContext, WorkflowEvent,
    WorkflowRuntime,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Role tag of the end-user/business link created for a beneficial owner
pub const UBO_ROLE: &str = "ubo";

/// Flat beneficial-owner record as submitted by callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UboInput {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub full_address: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub ownership_percentage: Option<f64>,
    /// Older field name for `ownershipPercentage`
    #[serde(default)]
    pub percentage_of_ownership: Option<f64>,
}

impl UboInput {
    /// Normalized individual entity, enriched with company fields of the parent
    pub fn into_entity(self, id: String, parent_context: &WorkflowContext) -> EntityRecord {
        let ownership = self.ownership_percentage.or(self.percentage_of_ownership);

        let mut additional_info = Map::new();
        insert_some(&mut additional_info, "fullAddress", self.full_address.map(Value::from));
        insert_some(&mut additional_info, "nationality", self.nationality.map(Value::from));
        insert_some(&mut additional_info, "role", self.role.map(Value::from));
        insert_some(&mut additional_info, "ownershipPercentage", ownership.map(Value::from));
        insert_some(
            &mut additional_info,
            "companyName",
            parent_context.entity_str("companyName").map(Value::from),
        );
        insert_some(
            &mut additional_info,
            "customerCompany",
            parent_context
                .entity_additional_info_str("customerCompany")
                .map(Value::from),
        );

        let mut data = Map::new();
        data.insert("firstName".to_string(), json!(self.first_name));
        data.insert("lastName".to_string(), json!(self.last_name));
        insert_some(&mut data, "email", self.email.map(Value::from));
        insert_some(&mut data, "dateOfBirth", self.date_of_birth.map(Value::from));
        data.insert("additionalInfo".to_string(), Value::Object(additional_info));

        EntityRecord {
            id,
            kind: EntityKind::Individual,
            data,
        }
    }
}

fn insert_some(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value);
    }
}

impl Orchestrator {
    /// Attach a beneficial owner to the business of `parent_id`, returning the child runtime
    pub async fn create_child_entity(
        &self,
        parent_id: &str,
        ubo: UboInput,
        scope: &ProjectScope,
    ) -> OrchestratorResult<WorkflowRuntime> {
        let mut tx = self.storage.begin().await?;
        let parent = lock_or_not_found(&mut tx, parent_id, scope).await?;

        let business_id = parent.business_id.clone().ok_or_else(|| {
            OrchestratorError::Precondition(format!("workflow runtime {} has no business attached", parent.id))
        })?;

        let parent_compiled = self.definition_of(&parent)?;
        let child_definition_id = parent_compiled
            .definition
            .config
            .child_entity_definition_id
            .clone()
            .ok_or_else(|| {
                OrchestratorError::Precondition(format!(
                    "workflow definition {} declares no child entity definition",
                    parent_compiled.definition.id
                ))
            })?;
        let child_compiled = self.registry.get_visible(&child_definition_id, scope).ok_or_else(|| {
            OrchestratorError::NotFound(format!("child workflow definition {}", child_definition_id))
        })?;
        let child_definition = &child_compiled.definition;

        let entity = ubo.into_entity(uuid::Uuid::new_v4().to_string(), &parent.context);
        let now = chrono::Utc::now().to_rfc3339();
        let child = WorkflowRuntime {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_definition_id: child_definition.id.clone(),
            workflow_definition_version: child_definition.version,
            project_id: parent.project_id.clone(),
            state: child_definition.initial_state().to_string(),
            status: RuntimeStatus::Active,
            context: WorkflowContext::for_entity(entity.clone(), Vec::new()),
            parent_runtime_id: Some(parent.id.clone()),
            business_id: None,
            end_user_id: Some(entity.id.clone()),
            salesforce_object_name: None,
            salesforce_record_id: None,
            lock_version: 0,
            created_at: now.clone(),
            updated_at: now,
            resolved_at: None,
            deleted_at: None,
            deleted_by: None,
        };

        tx.insert_end_user(&entity, &parent.project_id).await?;
        tx.insert_runtime(&child).await?;
        tx.link_end_user_to_business(&entity.id, &business_id, UBO_ROLE)
            .await?;

        let mut context = parent.context.clone();
        context.upsert_child(
            &child.workflow_definition_id,
            &child.id,
            ChildWorkflowSnapshot {
                entity_id: entity.id.clone(),
                state: child.state.clone(),
                status: child.status,
                result: None,
                extra: Map::new(),
            },
        );
        let applied = self
            .apply_locked(&mut tx, parent, &WorkflowEvent::update_context(&context)?)
            .await?;
        tx.commit().await?;

        tracing::info!(
            parent_id = %applied.runtime.id,
            child_id = %child.id,
            end_user_id = %entity.id,
            business_id = %business_id,
            "Attached child entity"
        );

        self.after_commit(applied, scope).await;
        self.run_state_plugins(&child, &child_compiled, scope).await;

        Ok(child)
    }

    /// Detach child entities from `parent_id` and soft-delete their runtimes, returning the parent
    ///
    /// Every live runtime of the given entities is soft-deleted. Runtimes indexed by
    /// some other parent are pruned from that parent's `childWorkflows` in the same
    /// transaction, so no index keeps pointing at a deleted runtime.
    pub async fn delete_child_entities(
        &self,
        parent_id: &str,
        entity_ids: &[String],
        deleted_by: &str,
        scope: &ProjectScope,
    ) -> OrchestratorResult<WorkflowRuntime> {
        let mut tx = self.storage.begin().await?;
        let parent = lock_or_not_found(&mut tx, parent_id, scope).await?;

        // Key: parent runtime id
        let mut by_parent: BTreeMap<String, Vec<EntityRuntimeRef>> = BTreeMap::new();
        for found in tx.find_runtimes_by_entity(entity_ids, scope).await? {
            if let Some(owner) = found.parent_runtime_id.clone() {
                by_parent.entry(owner).or_default().push(found);
            }
        }

        let own_children = by_parent.remove(&parent.id).unwrap_or_default();
        let mut applied = vec![self.prune_locked(&mut tx, parent, &own_children).await?];

        for (other_parent_id, children) in &by_parent {
            let Some(other_parent) = tx.lock_runtime(other_parent_id, scope).await? else {
                tracing::debug!(parent_id = %other_parent_id, "Skipping index of a parent that is gone");
                continue;
            };
            applied.push(self.prune_locked(&mut tx, other_parent, children).await?);
        }

        let deleted = tx
            .soft_delete_runtimes_by_entity(entity_ids, deleted_by, scope)
            .await?;
        tx.commit().await?;

        let parent = applied[0].runtime.clone();
        tracing::info!(
            parent_id = %parent.id,
            children = own_children.len(),
            other_parents = applied.len() - 1,
            deleted_runtimes = deleted,
            deleted_by,
            "Detached child entities"
        );

        for transition in applied {
            self.after_commit(transition, scope).await;
        }

        Ok(parent)
    }

    /// Drop `children` from a locked parent's index through `UPDATE_CONTEXT`
    async fn prune_locked(
        &self,
        tx: &mut RuntimeTransaction,
        parent: WorkflowRuntime,
        children: &[EntityRuntimeRef],
    ) -> OrchestratorResult<AppliedTransition> {
        let definition_ids: BTreeSet<String> = children
            .iter()
            .map(|child| child.workflow_definition_id.clone())
            .collect();
        let runtime_ids: BTreeSet<String> = children
            .iter()
            .map(|child| child.runtime_id.clone())
            .collect();

        let mut context = parent.context.clone();
        context.prune_children(&definition_ids, &runtime_ids);
        self.apply_locked(tx, parent, &WorkflowEvent::update_context(&context)?)
            .await
    }
}
