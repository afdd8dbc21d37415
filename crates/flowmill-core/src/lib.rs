// Flowmill core domain
//
// This crate holds everything the four processes (orchestrator, workers,
// reaper, submission surface) agree on:
// - The DAG model with cycle detection and deterministic topological order
// - The node/execution status state machine
// - Template resolution for data passing between nodes
// - Broker/state-store/repository ports (traits) with in-memory adapters
// - Wire messages, DLQ entries, settings, and the handler contract
//
// Key design decisions:
// - Orchestration state is split hot/cold: the StateStore port carries all
//   high-frequency node state, repositories only the record of truth
// - Task ids are deterministic so at-least-once delivery plus a per-execution
//   processed set gives effective idempotency
// - Readiness is a pure function of the persisted status map, so completion
//   events may arrive in any order

pub mod config;
pub mod dag;
pub mod dlq;
pub mod error;
pub mod execution;
pub mod handler;
pub mod message;
pub mod status;
pub mod template;
pub mod traits;
pub mod workflow;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use config::Settings;
pub use dag::{Dag, NodeDefinition};
pub use dlq::{DeadLetterEntry, ErrorCategory, ErrorDetail};
pub use error::{Result, WorkflowError};
pub use execution::{Execution, NodeExecution};
pub use handler::{Handler, HandlerRegistry, HandlerRegistryBuilder};
pub use message::{CompletionMessage, TaskMessage, SCHEMA_VERSION};
pub use status::NodeStatus;
pub use template::TemplateResolver;
pub use traits::{
    DlqRepository, ExecutionMetadata, ExecutionRepository, MessageBroker, StateStore,
    WorkflowRepository,
};
pub use workflow::Workflow;
