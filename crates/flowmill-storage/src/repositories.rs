// Repository layer for cold-store operations
//
// Each completion handler gets its own short transaction scope implicitly:
// updates are single statements against the pool, and the caller only acks
// its stream message after these commits return.

use async_trait::async_trait;
use sqlx::PgPool;

use flowmill_core::{
    Execution, ExecutionRepository, NodeStatus, Result, Workflow, WorkflowError,
    WorkflowRepository,
};

use crate::models::{ExecutionRow, WorkflowRow};

/// Shared Postgres connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(WorkflowError::repository)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(WorkflowError::repository)?;
        Ok(())
    }

    pub fn workflows(&self) -> PgWorkflowRepository {
        PgWorkflowRepository {
            pool: self.pool.clone(),
        }
    }

    pub fn executions(&self) -> PgExecutionRepository {
        PgExecutionRepository {
            pool: self.pool.clone(),
        }
    }
}

/// Postgres persistence of workflow definitions
#[derive(Clone)]
pub struct PgWorkflowRepository {
    pool: PgPool,
}

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<()> {
        let dag_json = serde_json::to_string(&workflow.dag_json)?;
        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, dag_json, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&dag_json)
        .bind(workflow.created_at)
        .execute(&self.pool)
        .await
        .map_err(WorkflowError::repository)?;
        Ok(())
    }

    async fn get_by_id(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, name, dag_json, created_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(WorkflowError::repository)?;

        row.map(WorkflowRow::into_entity).transpose()
    }
}

/// Postgres persistence of execution records
#[derive(Clone)]
pub struct PgExecutionRepository {
    pool: PgPool,
}

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    async fn save(&self, execution: &Execution) -> Result<()> {
        let params = serde_json::to_string(&execution.params)?;
        sqlx::query(
            r#"
            INSERT INTO executions
                (id, workflow_id, status, params, timeout_seconds, created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(&params)
        .bind(execution.timeout_seconds)
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await
        .map_err(WorkflowError::repository)?;
        Ok(())
    }

    async fn get_by_id(&self, execution_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, workflow_id, status, params, timeout_seconds, created_at, started_at, completed_at
            FROM executions
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(WorkflowError::repository)?;

        row.map(ExecutionRow::into_entity).transpose()
    }

    async fn update(&self, execution: &Execution) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, started_at = $3, completed_at = $4
            WHERE id = $1
            "#,
        )
        .bind(&execution.id)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await
        .map_err(WorkflowError::repository)?;
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<Execution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, workflow_id, status, params, timeout_seconds, created_at, started_at, completed_at
            FROM executions
            WHERE status = $1
            "#,
        )
        .bind(NodeStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(WorkflowError::repository)?;

        rows.into_iter().map(ExecutionRow::into_entity).collect()
    }
}
