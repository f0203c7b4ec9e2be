/// Workflow creation
///
/// Resolves the latest visible definition by name, validates the entity payload
/// against the definition's input schema, then writes the principal entity and the
/// runtime in one transaction. Plugins bound to the initial state run after commit.

use super::Orchestrator;
use crate::error::{OrchestratorError, OrchestratorResult, ValidationIssue};
use crate::project::ProjectScope;
use crate::workflow::{EntityKind, EntityRecord, RuntimeStatus, WorkflowContext, WorkflowRuntime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request to start a workflow for one business or individual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowInput {
    pub workflow_definition_name: String,
    pub entity: EntityInput,
    #[serde(default)]
    pub documents: Vec<Value>,
    #[serde(default)]
    pub salesforce_object_name: Option<String>,
    #[serde(default)]
    pub salesforce_record_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInput {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Orchestrator {
    pub async fn create(&self, input: CreateWorkflowInput, scope: &ProjectScope) -> OrchestratorResult<WorkflowRuntime> {
        if !scope.allows(&scope.current) {
            return Err(OrchestratorError::Precondition(format!(
                "project {} is outside the caller's allowed projects",
                scope.current
            )));
        }

        let compiled = self
            .registry
            .latest_by_name(&input.workflow_definition_name, scope)
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("workflow definition {}", input.workflow_definition_name))
            })?;
        let definition = &compiled.definition;

        let mut issues = Vec::new();
        if let Some(schema) = &definition.input_schema {
            issues.extend(validate_entity(schema, &input.entity.data)?);
        }
        issues.extend(validate_crm_linkage(&input));
        if !issues.is_empty() {
            tracing::info!(
                definition = %definition.id,
                issues = issues.len(),
                "Rejected workflow creation input"
            );
            return Err(OrchestratorError::Validation(issues));
        }

        let entity = EntityRecord {
            id: input
                .entity
                .id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            kind: input.entity.kind,
            data: input.entity.data,
        };
        let (business_id, end_user_id) = match entity.kind {
            EntityKind::Business => (Some(entity.id.clone()), None),
            EntityKind::Individual => (None, Some(entity.id.clone())),
        };

        let now = chrono::Utc::now().to_rfc3339();
        let runtime = WorkflowRuntime {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_definition_id: definition.id.clone(),
            workflow_definition_version: definition.version,
            project_id: scope.current.clone(),
            state: definition.initial_state().to_string(),
            status: RuntimeStatus::Active,
            context: WorkflowContext::for_entity(entity.clone(), input.documents),
            parent_runtime_id: None,
            business_id,
            end_user_id,
            salesforce_object_name: input.salesforce_object_name,
            salesforce_record_id: input.salesforce_record_id,
            lock_version: 0,
            created_at: now.clone(),
            updated_at: now,
            resolved_at: None,
            deleted_at: None,
            deleted_by: None,
        };

        let mut tx = self.storage.begin().await?;
        match entity.kind {
            EntityKind::Business => tx.insert_business(&entity, &scope.current).await?,
            EntityKind::Individual => tx.insert_end_user(&entity, &scope.current).await?,
        }
        tx.insert_runtime(&runtime).await?;
        tx.commit().await?;

        tracing::info!(
            runtime_id = %runtime.id,
            definition = %definition.id,
            entity_id = %entity.id,
            project_id = %runtime.project_id,
            "Created workflow runtime"
        );

        self.run_state_plugins(&runtime, &compiled, scope).await;

        Ok(runtime)
    }
}

/// Every schema violation of the entity payload
fn validate_entity(schema: &Value, data: &Map<String, Value>) -> OrchestratorResult<Vec<ValidationIssue>> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| anyhow::anyhow!("Definition input schema does not compile: {}", e))?;

    let instance = Value::Object(data.clone());
    Ok(validator
        .iter_errors(&instance)
        .map(|e| ValidationIssue::new(e.instance_path.to_string(), e.to_string()))
        .collect())
}

/// CRM object name and record id come together or not at all
fn validate_crm_linkage(input: &CreateWorkflowInput) -> Option<ValidationIssue> {
    match (&input.salesforce_object_name, &input.salesforce_record_id) {
        (Some(_), None) => Some(ValidationIssue::new(
            "/salesforceRecordId",
            "salesforceRecordId is required when salesforceObjectName is set",
        )),
        (None, Some(_)) => Some(ValidationIssue::new(
            "/salesforceObjectName",
            "salesforceObjectName is required when salesforceRecordId is set",
        )),
        _ => None,
    }
}
