// Ports for pluggable backends
//
// These traits decouple the engine from concrete infrastructure:
// - Redis implementations for production (flowmill-redis)
// - Postgres implementations for the record of truth (flowmill-storage)
// - In-memory implementations for tests and examples (memory module)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::dlq::DeadLetterEntry;
use crate::error::Result;
use crate::execution::Execution;
use crate::message::{CompletionMessage, TaskMessage};
use crate::status::NodeStatus;
use crate::workflow::Workflow;

// ============================================================================
// MessageBroker - streams with consumer groups, at-least-once delivery
// ============================================================================

/// Contract for the event bus (stream semantics with consumer groups)
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Append a task to the task stream; returns the broker stream id
    async fn publish_task(&self, task: &TaskMessage) -> Result<String>;

    /// Append a completion to the completion stream; returns the stream id
    async fn publish_completion(&self, completion: &CompletionMessage) -> Result<String>;

    /// Blocking group read from the task stream
    async fn consume_tasks(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<TaskMessage>>;

    /// Blocking group read from the completion stream
    async fn consume_completions(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<CompletionMessage>>;

    /// Ack a task delivery by stream id
    async fn ack_task(&self, stream_id: &str) -> Result<()>;

    /// Ack a completion delivery by stream id
    async fn ack_completion(&self, stream_id: &str) -> Result<()>;

    /// Create both consumer groups, tolerating pre-existing ones
    async fn create_consumer_groups(&self) -> Result<()>;

    /// Transfer ownership of task-stream entries idle longer than `min_idle`
    /// to `new_consumer`. Returns (original stream id, task) pairs.
    async fn claim_stalled_tasks(
        &self,
        group: &str,
        new_consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<(String, TaskMessage)>>;
}

// ============================================================================
// StateStore - hot operational state
// ============================================================================

/// Hot metadata cached per execution so the orchestrator can run without
/// touching the cold store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
}

impl ExecutionMetadata {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            started_at: None,
            timeout_seconds: None,
            timeout_at: None,
        }
    }
}

/// Contract for the low-latency state store.
///
/// Handles ephemeral node status, data passing between nodes, distributed
/// locking for fan-in dispatch, retry counters, and idempotency sets. All
/// entries are TTL-bounded by the implementation.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn set_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
    ) -> Result<()>;

    async fn node_status(&self, execution_id: &str, node_id: &str) -> Result<Option<NodeStatus>>;

    async fn all_node_statuses(&self, execution_id: &str) -> Result<HashMap<String, NodeStatus>>;

    async fn set_node_output(&self, execution_id: &str, node_id: &str, output: &Value)
        -> Result<()>;

    async fn node_output(&self, execution_id: &str, node_id: &str) -> Result<Option<Value>>;

    async fn all_outputs(&self, execution_id: &str) -> Result<HashMap<String, Value>>;

    async fn set_execution_metadata(
        &self,
        execution_id: &str,
        metadata: &ExecutionMetadata,
    ) -> Result<()>;

    async fn execution_metadata(&self, execution_id: &str) -> Result<Option<ExecutionMetadata>>;

    /// Execution-level aggregate status mirror
    async fn set_aggregate_status(&self, execution_id: &str, status: NodeStatus) -> Result<()>;

    async fn aggregate_status(&self, execution_id: &str) -> Result<Option<NodeStatus>>;

    /// SET-if-not-exists with TTL. Returns true when the lock was acquired.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Best-effort delete; the TTL bounds liveness after a crash
    async fn release_lock(&self, key: &str) -> Result<()>;

    /// Atomic per-node retry counter; returns the incremented value
    async fn increment_retry(&self, execution_id: &str, node_id: &str) -> Result<u32>;

    /// Membership check against the execution's processed-task set
    async fn is_task_processed(&self, execution_id: &str, task_id: &str) -> Result<bool>;

    /// Record a task id as processed (idempotency, TTL-bounded)
    async fn mark_task_processed(&self, execution_id: &str, task_id: &str) -> Result<()>;
}

// ============================================================================
// Repositories - cold store (record of truth)
// ============================================================================

/// Persistence of immutable workflow definitions
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn save(&self, workflow: &Workflow) -> Result<()>;

    async fn get_by_id(&self, workflow_id: &str) -> Result<Option<Workflow>>;
}

/// Long-term persistence of executions. Top-level status and timestamps only;
/// high-frequency node state lives in the StateStore.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn save(&self, execution: &Execution) -> Result<()>;

    async fn get_by_id(&self, execution_id: &str) -> Result<Option<Execution>>;

    async fn update(&self, execution: &Execution) -> Result<()>;

    /// Executions currently RUNNING, for the timeout sweeper
    async fn list_running(&self) -> Result<Vec<Execution>>;
}

// ============================================================================
// DlqRepository - dead letters
// ============================================================================

#[async_trait]
pub trait DlqRepository: Send + Sync {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<()>;

    /// Remove and return an entry by id (operator retry flow)
    async fn pop(&self, entry_id: &str) -> Result<Option<DeadLetterEntry>>;

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>>;

    async fn count(&self) -> Result<usize>;

    async fn delete(&self, entry_id: &str) -> Result<bool>;
}
