// Dead-letter entries and structured error details
//
// Entries carry everything needed to retry a task by hand: the original
// message fields, the retry count, and a classified error payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::message::TaskMessage;

/// Classification of DLQ errors for automated retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Network timeouts, temporary unavailability
    Transient,
    /// Bad input, schema mismatch
    Validation,
    /// Rate limits, quota exceeded
    Resource,
    /// Database or Redis failure
    Infrastructure,
    /// Handler bug / unhandled error
    Handler,
    Unknown,
}

/// Structured error payload for DLQ entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub error_code: String,
    pub category: ErrorCategory,
    pub traceback_hash: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorDetail {
    /// Build from an error's display chain, auto-classifying by message
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push_str("\ncaused by: ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            error_code: "UNCLASSIFIED".to_string(),
            category: classify_message(&chain),
            traceback_hash: fingerprint(&chain),
            timestamp: Utc::now(),
        }
    }

    /// Build from a plain message
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_code: "UNCLASSIFIED".to_string(),
            category: classify_message(&message),
            traceback_hash: fingerprint(&message),
            timestamp: Utc::now(),
            message,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = code.into();
        self
    }
}

/// Stable 12-hex-char fingerprint of the error text, for grouping repeats
fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..6])
}

/// Best-effort category from message patterns
fn classify_message(message: &str) -> ErrorCategory {
    let lowered = message.to_lowercase();

    const TRANSIENT: &[&str] = &["timeout", "connection", "temporary", "unavailable", "retry"];
    if TRANSIENT.iter().any(|p| lowered.contains(p)) {
        return ErrorCategory::Transient;
    }

    const VALIDATION: &[&str] = &["validation", "invalid", "schema", "parsing", "value"];
    if VALIDATION.iter().any(|p| lowered.contains(p)) {
        return ErrorCategory::Validation;
    }

    const RESOURCE: &[&str] = &["ratelimit", "rate_limit", "rate limit", "quota", "throttl"];
    if RESOURCE.iter().any(|p| lowered.contains(p)) {
        return ErrorCategory::Resource;
    }

    const INFRA: &[&str] = &["redis", "postgres", "database", "sql"];
    if INFRA.iter().any(|p| lowered.contains(p)) {
        return ErrorCategory::Infrastructure;
    }

    ErrorCategory::Unknown
}

/// A task that exhausted its retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: String,
    pub task_id: String,
    pub execution_id: String,
    pub node_id: String,
    pub handler: String,
    pub config: Value,
    pub error_message: String,
    pub retry_count: u32,
    pub original_timestamp: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

impl DeadLetterEntry {
    pub fn from_task(task: &TaskMessage, error_message: impl Into<String>, retry_count: u32) -> Self {
        let error_message = error_message.into();
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            execution_id: task.execution_id.clone(),
            node_id: task.node_id.clone(),
            handler: task.handler.clone(),
            config: task.config.clone(),
            error_detail: Some(ErrorDetail::from_message(&error_message)),
            error_message,
            retry_count,
            original_timestamp: Utc::now(),
            failed_at: Utc::now(),
        }
    }
}
