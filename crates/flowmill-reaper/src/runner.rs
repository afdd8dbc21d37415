// Reaper: resurrect-and-bury for stranded task deliveries
//
// A worker that crashes mid-task leaves its delivery in the consumer group's
// pending-entry list forever. The reaper periodically claims entries idle
// beyond a threshold, republishes each task (same task id, new stream id),
// and acks the original. Worker idempotency makes the republish safe: if the
// original worker actually finished, the duplicate is dropped on arrival.
//
// The reaper never consults the hot store or the orchestrator; it only needs
// the broker.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use flowmill_core::{MessageBroker, Result, Settings};

pub struct Reaper {
    broker: Arc<dyn MessageBroker>,
    task_group: String,
    check_interval: Duration,
    min_idle: Duration,
    batch_size: usize,
    consumer_name: String,
}

impl Reaper {
    pub fn new(broker: Arc<dyn MessageBroker>, settings: &Settings) -> Arc<Self> {
        Arc::new(Self {
            broker,
            task_group: settings.task_group.clone(),
            check_interval: Duration::from_secs(settings.reaper_check_interval_seconds),
            min_idle: settings.reaper_min_idle(),
            batch_size: settings.reaper_batch_size,
            consumer_name: format!("reaper-{}", &Uuid::new_v4().simple().to_string()[..8]),
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            consumer_name = %self.consumer_name,
            min_idle_seconds = self.min_idle.as_secs(),
            "reaper starting"
        );
        self.broker.create_consumer_groups().await?;

        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "reaper cycle error");
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.check_interval) => {}
            }
        }

        info!("reaper shutdown complete");
        Ok(())
    }

    /// One claim cycle; returns how many tasks were resurrected
    pub async fn run_once(&self) -> Result<usize> {
        let claimed = self
            .broker
            .claim_stalled_tasks(
                &self.task_group,
                &self.consumer_name,
                self.min_idle,
                self.batch_size,
            )
            .await?;

        if claimed.is_empty() {
            return Ok(0);
        }

        info!(count = claimed.len(), "reclaimed zombie tasks");
        let mut resurrected = 0;
        for (original_stream_id, task) in claimed {
            // Resurrect first, then bury: losing the ack re-runs this cycle,
            // losing the republish would lose the task
            self.broker.publish_task(&task.for_republish()).await?;
            self.broker.ack_task(&original_stream_id).await?;
            resurrected += 1;
            info!(
                execution_id = %task.execution_id,
                node_id = %task.node_id,
                "task resurrected"
            );
        }
        Ok(resurrected)
    }
}
