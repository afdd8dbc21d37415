// Database row models (internal, distinct from domain entities)

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

use flowmill_core::{Execution, NodeStatus, Result, Workflow, WorkflowError};

/// Workflow row from database
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: String,
    pub name: String,
    pub dag_json: String,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRow {
    pub fn into_entity(self) -> Result<Workflow> {
        let dag_json: Value = serde_json::from_str(&self.dag_json)?;
        Ok(Workflow {
            id: self.id,
            name: self.name,
            dag_json,
            created_at: self.created_at,
        })
    }
}

/// Execution row from database
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub id: String,
    pub workflow_id: String,
    pub status: String,
    pub params: String,
    pub timeout_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRow {
    pub fn into_entity(self) -> Result<Execution> {
        let status: NodeStatus = self
            .status
            .parse()
            .map_err(|e: String| WorkflowError::Repository(e))?;
        let params: Value = serde_json::from_str(&self.params)?;
        Ok(Execution {
            id: self.id,
            workflow_id: self.workflow_id,
            status,
            node_states: Default::default(),
            params,
            timeout_seconds: self.timeout_seconds,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
