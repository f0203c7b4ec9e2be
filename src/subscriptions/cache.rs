/// TTL cache for customer-level subscription lists
///
/// Owned by whoever builds the orchestrator and passed in explicitly. Entries expire
/// after the configured TTL and can be invalidated per project when a customer's
/// subscriptions change.

use crate::subscriptions::Subscription;
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug)]
pub struct SubscriptionCache {
    ttl: Duration,
    /// Key: project id
    entries: RwLock<HashMap<String, CachedSubscriptions>>,
}

#[derive(Debug, Clone)]
struct CachedSubscriptions {
    subscriptions: Arc<Vec<Subscription>>,
    fetched_at: Instant,
}

impl SubscriptionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached list for `project_id`, loading it when missing or expired
    pub async fn get_or_load<F, Fut>(&self, project_id: &str, load: F) -> Result<Arc<Vec<Subscription>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Subscription>>>,
    {
        // Fast path under the read lock
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(project_id) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&entry.subscriptions));
                }
            }
        }

        let subscriptions = Arc::new(load().await?);
        tracing::debug!(
            project_id,
            count = subscriptions.len(),
            "Loaded customer subscriptions"
        );

        let mut entries = self.entries.write().await;
        entries.insert(
            project_id.to_string(),
            CachedSubscriptions {
                subscriptions: Arc::clone(&subscriptions),
                fetched_at: Instant::now(),
            },
        );

        Ok(subscriptions)
    }

    pub async fn invalidate(&self, project_id: &str) {
        if self.entries.write().await.remove(project_id).is_some() {
            tracing::debug!(project_id, "Invalidated cached customer subscriptions");
        }
    }
}
