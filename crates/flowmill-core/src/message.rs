// Broker message types
//
// Task ids are deterministic (`<execution_id>:<node_id>`) so a republished
// task keeps the same id and worker-side idempotency holds across reaper
// resurrection. `stream_id` is the broker-assigned delivery id and is only
// present on consumed messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire schema version stamped on every stream entry
pub const SCHEMA_VERSION: &str = "1";

fn schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// A unit of work published to the task stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub handler: String,
    pub config: Value,
    #[serde(default = "schema_version")]
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

impl TaskMessage {
    pub fn new(
        execution_id: impl Into<String>,
        node_id: impl Into<String>,
        handler: impl Into<String>,
        config: Value,
    ) -> Self {
        let execution_id = execution_id.into();
        let node_id = node_id.into();
        Self {
            id: format!("{execution_id}:{node_id}"),
            execution_id,
            node_id,
            handler: handler.into(),
            config,
            schema_version: schema_version(),
            stream_id: None,
        }
    }

    /// Copy for republication: same task id, no delivery id
    pub fn for_republish(&self) -> Self {
        Self {
            stream_id: None,
            ..self.clone()
        }
    }
}

/// Outcome of a task, published to the completion stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "schema_version")]
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

impl CompletionMessage {
    pub fn success(
        execution_id: impl Into<String>,
        node_id: impl Into<String>,
        output: Option<Value>,
    ) -> Self {
        let execution_id = execution_id.into();
        let node_id = node_id.into();
        Self {
            id: format!("{execution_id}:{node_id}"),
            execution_id,
            node_id,
            success: true,
            output,
            error: None,
            schema_version: schema_version(),
            stream_id: None,
        }
    }

    pub fn failure(
        execution_id: impl Into<String>,
        node_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let execution_id = execution_id.into();
        let node_id = node_id.into();
        Self {
            id: format!("{execution_id}:{node_id}"),
            execution_id,
            node_id,
            success: false,
            output: None,
            error: Some(error.into()),
            schema_version: schema_version(),
            stream_id: None,
        }
    }
}
