// Flowmill cold store (Postgres)
//
// Workflows and executions persist here forever; their hot-state shadow in
// Redis expires on TTL. Repositories implement the ports from flowmill-core.

pub mod models;
pub mod repositories;

pub use repositories::{Database, PgExecutionRepository, PgWorkflowRepository};
