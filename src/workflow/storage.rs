/// SQLite persistence layer for definitions, customers and runtime reads
///
/// Definitions and customer subscriptions are stored as JSON columns next to indexed
/// lookup fields. Runtime mutations go through [`RuntimeTransaction`], opened with
/// [`WorkflowStorage::begin`].

use crate::project::ProjectScope;
use crate::subscriptions::Subscription;
use crate::workflow::transaction::{runtime_from_row, RuntimeTransaction, RUNTIME_COLUMNS};
use crate::workflow::types::{DefinitionConfig, StateChart, WorkflowDefinition, WorkflowRuntime};
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

/// SQLite-based storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a transaction for a context mutation
    pub async fn begin(&self) -> Result<RuntimeTransaction> {
        Ok(RuntimeTransaction::new(self.pool.begin().await?))
    }

    /// Store a new definition version or replace an existing one
    pub async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<()> {
        let states_json = serde_json::to_string(&definition.definition)?;
        let schema_json = definition
            .input_schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let config_json = serde_json::to_string(&definition.config)?;
        let plugins_json = serde_json::to_string(&definition.plugins)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions
                (id, name, version, project_id, definition, input_schema, config, plugins, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                project_id = excluded.project_id,
                definition = excluded.definition,
                input_schema = excluded.input_schema,
                config = excluded.config,
                plugins = excluded.plugins
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.name)
        .bind(definition.version)
        .bind(&definition.project_id)
        .bind(&states_json)
        .bind(&schema_json)
        .bind(&config_json)
        .bind(&plugins_json)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a definition by id
    pub async fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        let row = sqlx::query(
            "SELECT id, name, version, project_id, definition, input_schema, config, plugins \
             FROM workflow_definitions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| definition_from_row(&row)).transpose()
    }

    /// Load all definitions for registry initialization
    pub async fn load_all_definitions(&self) -> Result<HashMap<String, WorkflowDefinition>> {
        let rows = sqlx::query(
            "SELECT id, name, version, project_id, definition, input_schema, config, plugins \
             FROM workflow_definitions",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut definitions = HashMap::new();
        for row in rows {
            let definition = definition_from_row(&row)?;
            definitions.insert(definition.id.clone(), definition);
        }

        Ok(definitions)
    }

    /// Replace a customer's default subscription list
    pub async fn save_customer(&self, project_id: &str, name: &str, subscriptions: &[Subscription]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (project_id, name, subscriptions, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                name = excluded.name,
                subscriptions = excluded.subscriptions,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(name)
        .bind(serde_json::to_string(subscriptions)?)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Customer-level subscriptions of a project (empty when the customer has none)
    pub async fn customer_subscriptions(&self, project_id: &str) -> Result<Vec<Subscription>> {
        let row = sqlx::query("SELECT subscriptions FROM customers WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let subscriptions_json: String = row.get("subscriptions");
                Ok(serde_json::from_str(&subscriptions_json)?)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Read a live runtime without locking it
    pub async fn get_runtime(&self, id: &str, scope: &ProjectScope) -> Result<Option<WorkflowRuntime>> {
        let query = format!(
            "SELECT {} FROM workflow_runtimes \
             WHERE id = ? AND deleted_at IS NULL \
             AND project_id IN (SELECT value FROM json_each(?))",
            RUNTIME_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(scope.allowed_json())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| runtime_from_row(&row)).transpose()
    }

    /// Live child runtimes of a parent
    pub async fn list_children(&self, parent_id: &str, scope: &ProjectScope) -> Result<Vec<WorkflowRuntime>> {
        let query = format!(
            "SELECT {} FROM workflow_runtimes \
             WHERE parent_runtime_id = ? AND deleted_at IS NULL \
             AND project_id IN (SELECT value FROM json_each(?)) \
             ORDER BY created_at",
            RUNTIME_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(parent_id)
            .bind(scope.allowed_json())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(runtime_from_row).collect()
    }

    /// Business ids an end user is linked to under `role`
    pub async fn linked_businesses(&self, end_user_id: &str, role: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT business_id FROM end_users_on_businesses WHERE end_user_id = ? AND role = ?",
        )
        .bind(end_user_id)
        .bind(role)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("business_id")).collect())
    }
}

fn definition_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowDefinition> {
    let states_json: String = row.get("definition");
    let schema_json: Option<String> = row.get("input_schema");
    let config_json: String = row.get("config");
    let plugins_json: String = row.get("plugins");

    let definition: StateChart = serde_json::from_str(&states_json)?;
    let config: DefinitionConfig = serde_json::from_str(&config_json)?;

    Ok(WorkflowDefinition {
        id: row.get("id"),
        name: row.get("name"),
        version: row.get("version"),
        project_id: row.get("project_id"),
        definition,
        input_schema: schema_json.map(|raw| serde_json::from_str(&raw)).transpose()?,
        config,
        plugins: serde_json::from_str(&plugins_json)?,
    })
}
