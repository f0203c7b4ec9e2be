/// Configuration management for the Caseflow orchestrator
///
/// Handles store connection settings, webhook metadata and outbound HTTP timeouts.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Webhook delivery configuration
    pub webhooks: WebhookConfig,
    /// Enrichment plugin configuration
    pub plugins: PluginDefaults,
}

/// Transactional store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection url (e.g., "sqlite://data/caseflow.db")
    pub url: String,
    /// Upper bound of pooled connections
    pub max_connections: u32,
    /// How long a writer waits for the row lock before failing, in milliseconds
    pub busy_timeout_ms: u64,
}

/// Metadata attached to every webhook delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Deployment environment name (e.g., "production", "sandbox")
    pub environment: String,
    /// Payload contract version advertised to subscribers
    pub api_version: u32,
    /// Per-delivery HTTP timeout in milliseconds
    pub timeout_ms: u64,
    /// Lifetime of cached customer-level subscription lists in seconds
    pub subscription_cache_ttl_secs: u64,
}

/// Defaults applied to plugins that do not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDefaults {
    /// Default HTTP timeout for plugin calls in milliseconds
    pub timeout_ms: u64,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: std::env::var("CASEFLOW_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/caseflow.db".to_string()),
                max_connections: env_or("CASEFLOW_DB_MAX_CONNECTIONS", 8),
                busy_timeout_ms: env_or("CASEFLOW_DB_BUSY_TIMEOUT_MS", 10_000),
            },
            webhooks: WebhookConfig {
                environment: std::env::var("CASEFLOW_ENVIRONMENT")
                    .unwrap_or_else(|_| "development".to_string()),
                api_version: env_or("CASEFLOW_WEBHOOK_API_VERSION", 1),
                timeout_ms: env_or("CASEFLOW_WEBHOOK_TIMEOUT_MS", 15_000),
                subscription_cache_ttl_secs: env_or("CASEFLOW_SUBSCRIPTION_CACHE_TTL_SECS", 60),
            },
            plugins: PluginDefaults {
                timeout_ms: env_or("CASEFLOW_PLUGIN_TIMEOUT_MS", 60_000),
            },
        }
    }
}

/// Read a numeric environment variable, falling back on absence or parse failure
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
