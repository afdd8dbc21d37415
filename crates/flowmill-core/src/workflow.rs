// Workflow definition entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Root aggregate for a workflow definition. Immutable after submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub dag_json: Value,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, dag_json: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            dag_json,
            created_at: Utc::now(),
        }
    }
}
