/// Transactional store connection manager
///
/// Owns the SQLite pool shared by every project and creates the schema on first use:
/// - workflow_definitions: versioned definitions (transition table, input schema, plugins)
/// - workflow_runtimes: runtime rows with context, parent link and soft-delete columns
/// - businesses / end_users: principal entities
/// - end_users_on_businesses: child-entity link rows
/// - customers: tenant-level webhook subscriptions

use crate::config::DatabaseConfig;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Connection manager for the shared store
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Connect using the given configuration and ensure the schema exists
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        tracing::info!(url = %config.url, "Opening case store");

        // WAL lets readers proceed while a locked mutation is in flight; the busy
        // timeout is how long a second writer queues behind the row lock.
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| anyhow::anyhow!("Invalid database url '{}': {}", config.url, e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let manager = Self { pool };
        manager.init_schema().await?;

        tracing::info!("Case store ready");
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all tables and indexes
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_definitions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                project_id TEXT,
                definition JSON NOT NULL,
                input_schema JSON,
                config JSON NOT NULL,
                plugins JSON NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS customers (
                project_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                subscriptions JSON NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS businesses (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                company_name TEXT,
                data JSON NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS end_users (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                first_name TEXT,
                last_name TEXT,
                email TEXT,
                data JSON NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS end_users_on_businesses (
                end_user_id TEXT NOT NULL REFERENCES end_users(id),
                business_id TEXT NOT NULL REFERENCES businesses(id),
                role TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (end_user_id, business_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_runtimes (
                id TEXT PRIMARY KEY,
                workflow_definition_id TEXT NOT NULL REFERENCES workflow_definitions(id),
                workflow_definition_version INTEGER NOT NULL,
                project_id TEXT NOT NULL,
                state TEXT NOT NULL,
                status TEXT NOT NULL,
                context JSON NOT NULL,
                parent_runtime_id TEXT REFERENCES workflow_runtimes(id),
                business_id TEXT REFERENCES businesses(id),
                end_user_id TEXT REFERENCES end_users(id),
                salesforce_object_name TEXT,
                salesforce_record_id TEXT,
                lock_version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                resolved_at TEXT,
                deleted_at TEXT,
                deleted_by TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes for parent/child and principal lookups
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_runtimes_parent ON workflow_runtimes(parent_runtime_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_runtimes_end_user ON workflow_runtimes(end_user_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_runtimes_business ON workflow_runtimes(business_id)",
        )
        .execute(&self.pool)
        .await?;

        // One (name, version) per owner; shared definitions (NULL project) count as one owner
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_definitions_name_version \
             ON workflow_definitions(name, version, COALESCE(project_id, ''))",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
