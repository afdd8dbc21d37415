// Flowmill hot path (Redis)
//
// Stream broker, operational state store, and dead-letter queue. All adapters
// share one ConnectionManager; cloning it is cheap and reconnects survive.

pub mod broker;
pub mod dlq;
pub mod state_store;

pub use broker::RedisMessageBroker;
pub use dlq::RedisDlqRepository;
pub use state_store::RedisStateStore;

use flowmill_core::{Result, WorkflowError};
use redis::aio::ConnectionManager;

/// Open a managed connection to Redis
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url).map_err(WorkflowError::store)?;
    ConnectionManager::new(client)
        .await
        .map_err(WorkflowError::store)
}
