use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowmill_core::Settings;
use flowmill_reaper::Reaper;
use flowmill_redis::{connect, RedisMessageBroker};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowmill_reaper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("flowmill-reaper starting...");

    let settings = Settings::from_env();
    let conn = connect(&settings.redis_url).await?;
    tracing::info!("redis connection established");

    let broker = Arc::new(RedisMessageBroker::new(conn, &settings));
    let reaper = Reaper::new(broker, &settings);
    reaper.run(shutdown_signal()).await?;

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
