// Bounded DAG cache keyed by workflow id
//
// Workflows are immutable after submit, so a cached DAG is never wrong for
// its id; the bound and TTL only cap memory and keep restarts cheap.
// Losing a put race is harmless - both writers insert an equivalent value.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use flowmill_core::Dag;

#[derive(Clone)]
pub struct DagCache {
    cache: Cache<String, Arc<Dag>>,
}

impl DagCache {
    pub fn new(max_size: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_size)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, workflow_id: &str) -> Option<Arc<Dag>> {
        self.cache.get(workflow_id).await
    }

    pub async fn insert(&self, workflow_id: impl Into<String>, dag: Arc<Dag>) {
        self.cache.insert(workflow_id.into(), dag).await;
    }

    /// Entries currently resident (after flushing pending maintenance)
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}
