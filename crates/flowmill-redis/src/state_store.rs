// Redis hot state store
//
// Key scheme, all bounded by TTL:
//   execution:<id>:status           hash node_id -> status
//   execution:<id>:output           hash node_id -> JSON
//   execution:<id>:metadata         JSON string
//   execution:<id>:aggregate_status string
//   execution:<id>:processed_tasks  set of observed task ids
//   task_retry:<exec>:<node>        counter
//   lock:<key>                      SET NX EX mutex

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use flowmill_core::{
    ExecutionMetadata, NodeStatus, Result, Settings, StateStore, WorkflowError,
};

const RETRY_TTL_SECONDS: i64 = 86_400;

/// Hot state over a shared Redis connection
#[derive(Clone)]
pub struct RedisStateStore {
    conn: ConnectionManager,
    metadata_ttl_seconds: u64,
    idempotency_ttl_seconds: u64,
}

impl RedisStateStore {
    pub fn new(conn: ConnectionManager, settings: &Settings) -> Self {
        Self {
            conn,
            metadata_ttl_seconds: settings.execution_metadata_ttl_seconds,
            idempotency_ttl_seconds: settings.idempotency_ttl_seconds,
        }
    }

    fn status_key(execution_id: &str) -> String {
        format!("execution:{execution_id}:status")
    }

    fn output_key(execution_id: &str) -> String {
        format!("execution:{execution_id}:output")
    }

    fn metadata_key(execution_id: &str) -> String {
        format!("execution:{execution_id}:metadata")
    }

    fn aggregate_key(execution_id: &str) -> String {
        format!("execution:{execution_id}:aggregate_status")
    }

    fn processed_key(execution_id: &str) -> String {
        format!("execution:{execution_id}:processed_tasks")
    }

    fn retry_key(execution_id: &str, node_id: &str) -> String {
        format!("task_retry:{execution_id}:{node_id}")
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn set_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::status_key(execution_id);
        let _: () = conn
            .hset(&key, node_id, status.as_str())
            .await
            .map_err(WorkflowError::store)?;
        let _: bool = conn
            .expire(&key, self.metadata_ttl_seconds as i64)
            .await
            .map_err(WorkflowError::store)?;
        Ok(())
    }

    async fn node_status(&self, execution_id: &str, node_id: &str) -> Result<Option<NodeStatus>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .hget(Self::status_key(execution_id), node_id)
            .await
            .map_err(WorkflowError::store)?;
        value
            .map(|v| v.parse().map_err(WorkflowError::Store))
            .transpose()
    }

    async fn all_node_statuses(&self, execution_id: &str) -> Result<HashMap<String, NodeStatus>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(Self::status_key(execution_id))
            .await
            .map_err(WorkflowError::store)?;
        raw.into_iter()
            .map(|(node_id, status)| {
                status
                    .parse()
                    .map(|s| (node_id, s))
                    .map_err(WorkflowError::Store)
            })
            .collect()
    }

    async fn set_node_output(
        &self,
        execution_id: &str,
        node_id: &str,
        output: &Value,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::output_key(execution_id);
        let _: () = conn
            .hset(&key, node_id, serde_json::to_string(output)?)
            .await
            .map_err(WorkflowError::store)?;
        let _: bool = conn
            .expire(&key, self.metadata_ttl_seconds as i64)
            .await
            .map_err(WorkflowError::store)?;
        Ok(())
    }

    async fn node_output(&self, execution_id: &str, node_id: &str) -> Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .hget(Self::output_key(execution_id), node_id)
            .await
            .map_err(WorkflowError::store)?;
        Ok(value.and_then(|v| serde_json::from_str(&v).ok()))
    }

    async fn all_outputs(&self, execution_id: &str) -> Result<HashMap<String, Value>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(Self::output_key(execution_id))
            .await
            .map_err(WorkflowError::store)?;
        Ok(raw
            .into_iter()
            .filter_map(|(node_id, output)| {
                serde_json::from_str(&output).ok().map(|v| (node_id, v))
            })
            .collect())
    }

    async fn set_execution_metadata(
        &self,
        execution_id: &str,
        metadata: &ExecutionMetadata,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                Self::metadata_key(execution_id),
                serde_json::to_string(metadata)?,
                self.metadata_ttl_seconds,
            )
            .await
            .map_err(WorkflowError::store)?;
        Ok(())
    }

    async fn execution_metadata(&self, execution_id: &str) -> Result<Option<ExecutionMetadata>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(Self::metadata_key(execution_id))
            .await
            .map_err(WorkflowError::store)?;
        Ok(value.and_then(|v| serde_json::from_str(&v).ok()))
    }

    async fn set_aggregate_status(&self, execution_id: &str, status: NodeStatus) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                Self::aggregate_key(execution_id),
                status.as_str(),
                self.metadata_ttl_seconds,
            )
            .await
            .map_err(WorkflowError::store)?;
        Ok(())
    }

    async fn aggregate_status(&self, execution_id: &str) -> Result<Option<NodeStatus>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(Self::aggregate_key(execution_id))
            .await
            .map_err(WorkflowError::store)?;
        value
            .map(|v| v.parse().map_err(WorkflowError::Store))
            .transpose()
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(format!("lock:{key}"))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(WorkflowError::store)?;
        Ok(acquired.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn
            .del(format!("lock:{key}"))
            .await
            .map_err(WorkflowError::store)?;
        Ok(())
    }

    async fn increment_retry(&self, execution_id: &str, node_id: &str) -> Result<u32> {
        let mut conn = self.conn.clone();
        let key = Self::retry_key(execution_id, node_id);
        let count: u32 = conn.incr(&key, 1).await.map_err(WorkflowError::store)?;
        let _: bool = conn
            .expire(&key, RETRY_TTL_SECONDS)
            .await
            .map_err(WorkflowError::store)?;
        Ok(count)
    }

    async fn is_task_processed(&self, execution_id: &str, task_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let member: bool = conn
            .sismember(Self::processed_key(execution_id), task_id)
            .await
            .map_err(WorkflowError::store)?;
        Ok(member)
    }

    async fn mark_task_processed(&self, execution_id: &str, task_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::processed_key(execution_id);
        let _: usize = conn.sadd(&key, task_id).await.map_err(WorkflowError::store)?;
        let _: bool = conn
            .expire(&key, self.idempotency_ttl_seconds as i64)
            .await
            .map_err(WorkflowError::store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_scheme() {
        assert_eq!(
            RedisStateStore::status_key("e1"),
            "execution:e1:status"
        );
        assert_eq!(
            RedisStateStore::output_key("e1"),
            "execution:e1:output"
        );
        assert_eq!(
            RedisStateStore::metadata_key("e1"),
            "execution:e1:metadata"
        );
        assert_eq!(
            RedisStateStore::aggregate_key("e1"),
            "execution:e1:aggregate_status"
        );
        assert_eq!(
            RedisStateStore::processed_key("e1"),
            "execution:e1:processed_tasks"
        );
        assert_eq!(
            RedisStateStore::retry_key("e1", "n1"),
            "task_retry:e1:n1"
        );
    }
}
