/// Transactional unit for runtime mutations
///
/// The first statement of every mutation is [`RuntimeTransaction::lock_runtime`], an
/// UPDATE ... RETURNING on the target row. Being the first write of the transaction it
/// takes SQLite's write lock, queueing concurrent writers behind the busy timeout until
/// commit, the SQLite equivalent of SELECT ... FOR UPDATE. Dropping the transaction
/// without [`RuntimeTransaction::commit`] rolls everything back.

use crate::project::ProjectScope;
use crate::workflow::context::{EntityRecord, WorkflowContext};
use crate::workflow::types::WorkflowRuntime;
use anyhow::Result;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

pub(crate) const RUNTIME_COLUMNS: &str = "id, workflow_definition_id, workflow_definition_version, \
     project_id, state, status, context, parent_runtime_id, business_id, end_user_id, \
     salesforce_object_name, salesforce_record_id, lock_version, created_at, updated_at, \
     resolved_at, deleted_at, deleted_by";

/// Live runtime matched for deletion by its principal entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRuntimeRef {
    pub runtime_id: String,
    pub workflow_definition_id: String,
    pub parent_runtime_id: Option<String>,
}

pub struct RuntimeTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl RuntimeTransaction {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    /// Lock and read a live runtime within the caller's projects
    pub async fn lock_runtime(&mut self, id: &str, scope: &ProjectScope) -> Result<Option<WorkflowRuntime>> {
        let query = format!(
            "UPDATE workflow_runtimes SET lock_version = lock_version + 1 \
             WHERE id = ? AND deleted_at IS NULL \
             AND project_id IN (SELECT value FROM json_each(?)) \
             RETURNING {}",
            RUNTIME_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(scope.allowed_json())
            .fetch_optional(&mut *self.tx)
            .await?;

        let runtime = row.map(|row| runtime_from_row(&row)).transpose()?;
        if let Some(runtime) = &runtime {
            tracing::debug!(runtime_id = %runtime.id, lock_version = runtime.lock_version, "Locked runtime");
        }
        Ok(runtime)
    }

    pub async fn insert_business(&mut self, entity: &EntityRecord, project_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO businesses (id, project_id, company_name, data, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entity.id)
        .bind(project_id)
        .bind(entity.data.get("companyName").and_then(Value::as_str))
        .bind(serde_json::to_string(&entity.data)?)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn insert_end_user(&mut self, entity: &EntityRecord, project_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO end_users (id, project_id, first_name, last_name, email, data, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entity.id)
        .bind(project_id)
        .bind(entity.data.get("firstName").and_then(Value::as_str))
        .bind(entity.data.get("lastName").and_then(Value::as_str))
        .bind(entity.data.get("email").and_then(Value::as_str))
        .bind(serde_json::to_string(&entity.data)?)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Associate an end user with a business under a role tag
    pub async fn link_end_user_to_business(&mut self, end_user_id: &str, business_id: &str, role: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO end_users_on_businesses (end_user_id, business_id, role, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(end_user_id)
        .bind(business_id)
        .bind(role)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn insert_runtime(&mut self, runtime: &WorkflowRuntime) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runtimes (
                id, workflow_definition_id, workflow_definition_version, project_id, state, status,
                context, parent_runtime_id, business_id, end_user_id, salesforce_object_name,
                salesforce_record_id, lock_version, created_at, updated_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&runtime.id)
        .bind(&runtime.workflow_definition_id)
        .bind(runtime.workflow_definition_version)
        .bind(&runtime.project_id)
        .bind(&runtime.state)
        .bind(runtime.status.as_str())
        .bind(serde_json::to_string(&runtime.context)?)
        .bind(&runtime.parent_runtime_id)
        .bind(&runtime.business_id)
        .bind(&runtime.end_user_id)
        .bind(&runtime.salesforce_object_name)
        .bind(&runtime.salesforce_record_id)
        .bind(runtime.lock_version)
        .bind(&runtime.created_at)
        .bind(&runtime.updated_at)
        .bind(&runtime.resolved_at)
        .execute(&mut *self.tx)
        .await?;

        tracing::debug!(runtime_id = %runtime.id, parent = ?runtime.parent_runtime_id, "Inserted runtime");
        Ok(())
    }

    /// Persist state, status and context of a locked runtime
    pub async fn update_runtime(&mut self, runtime: &WorkflowRuntime) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runtimes
            SET state = ?, status = ?, context = ?, updated_at = ?, resolved_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&runtime.state)
        .bind(runtime.status.as_str())
        .bind(serde_json::to_string(&runtime.context)?)
        .bind(&runtime.updated_at)
        .bind(&runtime.resolved_at)
        .bind(&runtime.id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("Runtime {} vanished while locked", runtime.id));
        }
        Ok(())
    }

    /// Live runtimes whose principal entity is one of `entity_ids`, with their parent links
    pub async fn find_runtimes_by_entity(
        &mut self,
        entity_ids: &[String],
        scope: &ProjectScope,
    ) -> Result<Vec<EntityRuntimeRef>> {
        let ids_json = serde_json::to_string(entity_ids)?;
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_definition_id, parent_runtime_id FROM workflow_runtimes
            WHERE deleted_at IS NULL
              AND (end_user_id IN (SELECT value FROM json_each(?))
                   OR business_id IN (SELECT value FROM json_each(?)))
              AND project_id IN (SELECT value FROM json_each(?))
            ORDER BY id
            "#,
        )
        .bind(&ids_json)
        .bind(&ids_json)
        .bind(scope.allowed_json())
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .iter()
            .map(|row| EntityRuntimeRef {
                runtime_id: row.get("id"),
                workflow_definition_id: row.get("workflow_definition_id"),
                parent_runtime_id: row.get("parent_runtime_id"),
            })
            .collect())
    }

    /// Soft-delete every live runtime attached to one of `entity_ids`
    pub async fn soft_delete_runtimes_by_entity(
        &mut self,
        entity_ids: &[String],
        deleted_by: &str,
        scope: &ProjectScope,
    ) -> Result<u64> {
        let ids_json = serde_json::to_string(entity_ids)?;
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE workflow_runtimes
            SET deleted_at = ?, deleted_by = ?, updated_at = ?
            WHERE deleted_at IS NULL
              AND (end_user_id IN (SELECT value FROM json_each(?))
                   OR business_id IN (SELECT value FROM json_each(?)))
              AND project_id IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(&now)
        .bind(deleted_by)
        .bind(&now)
        .bind(&ids_json)
        .bind(&ids_json)
        .bind(scope.allowed_json())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

pub(crate) fn runtime_from_row(row: &SqliteRow) -> Result<WorkflowRuntime> {
    let context_json: String = row.get("context");
    let status: String = row.get("status");

    Ok(WorkflowRuntime {
        id: row.get("id"),
        workflow_definition_id: row.get("workflow_definition_id"),
        workflow_definition_version: row.get("workflow_definition_version"),
        project_id: row.get("project_id"),
        state: row.get("state"),
        status: status.parse()?,
        context: WorkflowContext::from_value(serde_json::from_str(&context_json)?)?,
        parent_runtime_id: row.get("parent_runtime_id"),
        business_id: row.get("business_id"),
        end_user_id: row.get("end_user_id"),
        salesforce_object_name: row.get("salesforce_object_name"),
        salesforce_record_id: row.get("salesforce_record_id"),
        lock_version: row.get("lock_version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        resolved_at: row.get("resolved_at"),
        deleted_at: row.get("deleted_at"),
        deleted_by: row.get("deleted_by"),
    })
}
