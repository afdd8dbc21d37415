// In-memory implementations for examples and testing
//
// These keep all state in memory so the engine, worker, and reaper can be
// integration-tested without Redis or Postgres. The broker models stream
// semantics faithfully enough for recovery tests: entries carry a delivery
// timestamp (tokio virtual-time aware) and stay in the pending-entry list
// until acked, so idle-based claiming behaves like the real auto-claim.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::dlq::DeadLetterEntry;
use crate::error::{Result, WorkflowError};
use crate::execution::Execution;
use crate::message::{CompletionMessage, TaskMessage};
use crate::status::NodeStatus;
use crate::traits::{
    DlqRepository, ExecutionMetadata, ExecutionRepository, MessageBroker, StateStore,
    WorkflowRepository,
};
use crate::workflow::Workflow;

// ============================================================================
// InMemoryBroker
// ============================================================================

#[derive(Debug, Clone)]
struct StreamEntry<T> {
    stream_id: String,
    message: T,
    delivered_at: Option<Instant>,
    acked: bool,
}

#[derive(Debug)]
struct Stream<T> {
    entries: Vec<StreamEntry<T>>,
    next_id: u64,
}

impl<T> Default for Stream<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T: Clone> Stream<T> {
    fn append(&mut self, message: T) -> String {
        self.next_id += 1;
        let stream_id = format!("{}-0", self.next_id);
        self.entries.push(StreamEntry {
            stream_id: stream_id.clone(),
            message,
            delivered_at: None,
            acked: false,
        });
        stream_id
    }

    fn consume(&mut self, count: usize) -> Vec<(String, T)> {
        let now = Instant::now();
        self.entries
            .iter_mut()
            .filter(|e| e.delivered_at.is_none() && !e.acked)
            .take(count)
            .map(|e| {
                e.delivered_at = Some(now);
                (e.stream_id.clone(), e.message.clone())
            })
            .collect()
    }

    fn ack(&mut self, stream_id: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.stream_id == stream_id) {
            entry.acked = true;
        }
    }

    fn claim_idle(&mut self, min_idle: Duration, count: usize) -> Vec<(String, T)> {
        let now = Instant::now();
        self.entries
            .iter_mut()
            .filter(|e| {
                !e.acked
                    && e.delivered_at
                        .map(|at| now.duration_since(at) >= min_idle)
                        .unwrap_or(false)
            })
            .take(count)
            .map(|e| {
                e.delivered_at = Some(now);
                (e.stream_id.clone(), e.message.clone())
            })
            .collect()
    }

    fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.delivered_at.is_some() && !e.acked)
            .count()
    }
}

/// In-memory message broker with stream semantics
///
/// Exposes publication logs so tests can assert on dispatch counts.
#[derive(Default)]
pub struct InMemoryBroker {
    tasks: RwLock<Stream<TaskMessage>>,
    completions: RwLock<Stream<CompletionMessage>>,
    task_log: RwLock<Vec<TaskMessage>>,
    completion_log: RwLock<Vec<CompletionMessage>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task ever published, in publish order
    pub async fn published_tasks(&self) -> Vec<TaskMessage> {
        self.task_log.read().await.clone()
    }

    /// Every completion ever published, in publish order
    pub async fn published_completions(&self) -> Vec<CompletionMessage> {
        self.completion_log.read().await.clone()
    }

    /// Delivered-but-unacked task entries (the pending-entry list)
    pub async fn pending_task_count(&self) -> usize {
        self.tasks.read().await.pending_count()
    }

    /// Delivered-but-unacked completion entries
    pub async fn pending_completion_count(&self) -> usize {
        self.completions.read().await.pending_count()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish_task(&self, task: &TaskMessage) -> Result<String> {
        let mut published = task.clone();
        published.stream_id = None;
        let stream_id = self.tasks.write().await.append(published.clone());
        self.task_log.write().await.push(published);
        Ok(stream_id)
    }

    async fn publish_completion(&self, completion: &CompletionMessage) -> Result<String> {
        let mut published = completion.clone();
        published.stream_id = None;
        let stream_id = self.completions.write().await.append(published.clone());
        self.completion_log.write().await.push(published);
        Ok(stream_id)
    }

    async fn consume_tasks(
        &self,
        _group: &str,
        _consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<TaskMessage>> {
        let mut batch = self.tasks.write().await.consume(count);
        if batch.is_empty() && block_ms > 0 {
            // Model the broker's blocking read: wait once, then re-check
            tokio::time::sleep(Duration::from_millis(block_ms)).await;
            batch = self.tasks.write().await.consume(count);
        }
        Ok(batch
            .into_iter()
            .map(|(stream_id, mut task)| {
                task.stream_id = Some(stream_id);
                task
            })
            .collect())
    }

    async fn consume_completions(
        &self,
        _group: &str,
        _consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<CompletionMessage>> {
        let mut batch = self.completions.write().await.consume(count);
        if batch.is_empty() && block_ms > 0 {
            tokio::time::sleep(Duration::from_millis(block_ms)).await;
            batch = self.completions.write().await.consume(count);
        }
        Ok(batch
            .into_iter()
            .map(|(stream_id, mut completion)| {
                completion.stream_id = Some(stream_id);
                completion
            })
            .collect())
    }

    async fn ack_task(&self, stream_id: &str) -> Result<()> {
        self.tasks.write().await.ack(stream_id);
        Ok(())
    }

    async fn ack_completion(&self, stream_id: &str) -> Result<()> {
        self.completions.write().await.ack(stream_id);
        Ok(())
    }

    async fn create_consumer_groups(&self) -> Result<()> {
        Ok(())
    }

    async fn claim_stalled_tasks(
        &self,
        _group: &str,
        _new_consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<(String, TaskMessage)>> {
        Ok(self
            .tasks
            .write()
            .await
            .claim_idle(min_idle, count)
            .into_iter()
            .map(|(stream_id, mut task)| {
                task.stream_id = Some(stream_id.clone());
                (stream_id, task)
            })
            .collect())
    }
}

// ============================================================================
// InMemoryStateStore
// ============================================================================

#[derive(Default)]
struct StateInner {
    node_statuses: HashMap<String, HashMap<String, NodeStatus>>,
    outputs: HashMap<String, HashMap<String, Value>>,
    metadata: HashMap<String, ExecutionMetadata>,
    aggregate: HashMap<String, NodeStatus>,
    locks: HashSet<String>,
    retries: HashMap<String, u32>,
    processed: HashMap<String, HashSet<String>>,
}

/// In-memory hot state store. TTLs are not modeled; tests that need expiry
/// clear state explicitly.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: RwLock<StateInner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all hot state for an execution (models TTL expiry in tests)
    pub async fn expire_execution(&self, execution_id: &str) {
        let mut inner = self.inner.write().await;
        inner.node_statuses.remove(execution_id);
        inner.outputs.remove(execution_id);
        inner.metadata.remove(execution_id);
        inner.aggregate.remove(execution_id);
        inner.processed.remove(execution_id);
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn set_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
    ) -> Result<()> {
        self.inner
            .write()
            .await
            .node_statuses
            .entry(execution_id.to_string())
            .or_default()
            .insert(node_id.to_string(), status);
        Ok(())
    }

    async fn node_status(&self, execution_id: &str, node_id: &str) -> Result<Option<NodeStatus>> {
        Ok(self
            .inner
            .read()
            .await
            .node_statuses
            .get(execution_id)
            .and_then(|m| m.get(node_id))
            .copied())
    }

    async fn all_node_statuses(&self, execution_id: &str) -> Result<HashMap<String, NodeStatus>> {
        Ok(self
            .inner
            .read()
            .await
            .node_statuses
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_node_output(
        &self,
        execution_id: &str,
        node_id: &str,
        output: &Value,
    ) -> Result<()> {
        self.inner
            .write()
            .await
            .outputs
            .entry(execution_id.to_string())
            .or_default()
            .insert(node_id.to_string(), output.clone());
        Ok(())
    }

    async fn node_output(&self, execution_id: &str, node_id: &str) -> Result<Option<Value>> {
        Ok(self
            .inner
            .read()
            .await
            .outputs
            .get(execution_id)
            .and_then(|m| m.get(node_id))
            .cloned())
    }

    async fn all_outputs(&self, execution_id: &str) -> Result<HashMap<String, Value>> {
        Ok(self
            .inner
            .read()
            .await
            .outputs
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_execution_metadata(
        &self,
        execution_id: &str,
        metadata: &ExecutionMetadata,
    ) -> Result<()> {
        self.inner
            .write()
            .await
            .metadata
            .insert(execution_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn execution_metadata(&self, execution_id: &str) -> Result<Option<ExecutionMetadata>> {
        Ok(self.inner.read().await.metadata.get(execution_id).cloned())
    }

    async fn set_aggregate_status(&self, execution_id: &str, status: NodeStatus) -> Result<()> {
        self.inner
            .write()
            .await
            .aggregate
            .insert(execution_id.to_string(), status);
        Ok(())
    }

    async fn aggregate_status(&self, execution_id: &str) -> Result<Option<NodeStatus>> {
        Ok(self.inner.read().await.aggregate.get(execution_id).copied())
    }

    async fn acquire_lock(&self, key: &str, _ttl: Duration) -> Result<bool> {
        Ok(self.inner.write().await.locks.insert(key.to_string()))
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        self.inner.write().await.locks.remove(key);
        Ok(())
    }

    async fn increment_retry(&self, execution_id: &str, node_id: &str) -> Result<u32> {
        let mut inner = self.inner.write().await;
        let counter = inner
            .retries
            .entry(format!("{execution_id}:{node_id}"))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn is_task_processed(&self, execution_id: &str, task_id: &str) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .await
            .processed
            .get(execution_id)
            .map(|s| s.contains(task_id))
            .unwrap_or(false))
    }

    async fn mark_task_processed(&self, execution_id: &str, task_id: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .processed
            .entry(execution_id.to_string())
            .or_default()
            .insert(task_id.to_string());
        Ok(())
    }
}

// ============================================================================
// InMemory repositories
// ============================================================================

/// In-memory workflow definitions, keyed by id
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.workflows.read().await.len()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn get_by_id(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(workflow_id).cloned())
    }
}

/// In-memory execution records, keyed by id
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: RwLock<HashMap<String, Execution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &Execution) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_by_id(&self, execution_id: &str) -> Result<Option<Execution>> {
        Ok(self.executions.read().await.get(execution_id).cloned())
    }

    async fn update(&self, execution: &Execution) -> Result<()> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some(existing) => {
                existing.status = execution.status;
                existing.started_at = execution.started_at;
                existing.completed_at = execution.completed_at;
                Ok(())
            }
            None => Err(WorkflowError::ExecutionNotFound(execution.id.clone())),
        }
    }

    async fn list_running(&self) -> Result<Vec<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.status == NodeStatus::Running)
            .cloned()
            .collect())
    }
}

/// In-memory dead-letter queue
#[derive(Default)]
pub struct InMemoryDlqRepository {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl InMemoryDlqRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqRepository for InMemoryDlqRepository {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn pop(&self, entry_id: &str) -> Result<Option<DeadLetterEntry>> {
        let mut entries = self.entries.write().await;
        match entries.iter().position(|e| e.id == entry_id) {
            Some(index) => Ok(Some(entries.remove(index))),
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>> {
        Ok(self.entries.read().await.iter().take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn delete(&self, entry_id: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != entry_id);
        Ok(entries.len() < before)
    }
}

/// Shorthand for wiring a full in-memory backend in tests
pub struct InMemoryBackend {
    pub broker: Arc<InMemoryBroker>,
    pub state: Arc<InMemoryStateStore>,
    pub workflows: Arc<InMemoryWorkflowRepository>,
    pub executions: Arc<InMemoryExecutionRepository>,
    pub dlq: Arc<InMemoryDlqRepository>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            broker: Arc::new(InMemoryBroker::new()),
            state: Arc::new(InMemoryStateStore::new()),
            workflows: Arc::new(InMemoryWorkflowRepository::new()),
            executions: Arc::new(InMemoryExecutionRepository::new()),
            dlq: Arc::new(InMemoryDlqRepository::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}
