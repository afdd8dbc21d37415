use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowmill_core::Settings;
use flowmill_engine::{Orchestrator, OrchestratorConfig};
use flowmill_orchestrator::OrchestratorRunner;
use flowmill_redis::{connect, RedisMessageBroker, RedisStateStore};
use flowmill_storage::Database;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowmill_orchestrator=info,flowmill_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("flowmill-orchestrator starting...");

    let settings = Arc::new(Settings::from_env());

    let db = Database::from_url(&settings.database_url).await?;
    db.migrate().await?;
    tracing::info!("database connection established");

    let conn = connect(&settings.redis_url).await?;
    tracing::info!("redis connection established");

    let broker = Arc::new(RedisMessageBroker::new(conn.clone(), &settings));
    let state = Arc::new(RedisStateStore::new(conn, &settings));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(db.workflows()),
        Arc::new(db.executions()),
        state,
        broker.clone(),
        OrchestratorConfig {
            lock_ttl: settings.lock_ttl(),
            dag_cache_max_size: settings.dag_cache_max_size,
            dag_cache_ttl: std::time::Duration::from_secs(settings.dag_cache_ttl_seconds),
        },
    ));

    let runner = OrchestratorRunner::new(broker, orchestrator, settings);
    runner.run(shutdown_signal()).await?;

    Ok(())
}

/// Watch channel that flips on SIGTERM/SIGINT
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}
