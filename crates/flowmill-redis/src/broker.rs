// Redis Streams message broker
//
// Two streams with consumer groups give at-least-once delivery: entries stay
// in a consumer's pending-entry list until XACK, and XAUTOCLAIM lets the
// reaper take over entries whose consumer died mid-task.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::time::Duration;

use flowmill_core::{
    CompletionMessage, MessageBroker, Result, Settings, TaskMessage, WorkflowError,
    SCHEMA_VERSION,
};

/// Stream broker over a shared Redis connection
#[derive(Clone)]
pub struct RedisMessageBroker {
    conn: ConnectionManager,
    task_stream: String,
    completion_stream: String,
    task_group: String,
    completion_group: String,
}

impl RedisMessageBroker {
    pub fn new(conn: ConnectionManager, settings: &Settings) -> Self {
        Self {
            conn,
            task_stream: settings.task_stream.clone(),
            completion_stream: settings.completion_stream.clone(),
            task_group: settings.task_group.clone(),
            completion_group: settings.completion_group.clone(),
        }
    }

    fn is_busygroup(err: &redis::RedisError) -> bool {
        err.to_string().contains("BUSYGROUP")
    }

    fn is_nogroup(err: &redis::RedisError) -> bool {
        err.to_string().contains("NOGROUP")
    }

    fn parse_task(entry: &StreamId) -> Option<TaskMessage> {
        let config: String = entry.get("config")?;
        Some(TaskMessage {
            id: entry.get("id")?,
            execution_id: entry.get("execution_id")?,
            node_id: entry.get("node_id")?,
            handler: entry.get("handler")?,
            config: serde_json::from_str(&config).ok()?,
            schema_version: entry
                .get("schema_version")
                .unwrap_or_else(|| SCHEMA_VERSION.to_string()),
            stream_id: Some(entry.id.clone()),
        })
    }

    fn parse_completion(entry: &StreamId) -> Option<CompletionMessage> {
        let success: String = entry.get("success")?;
        let output: String = entry.get("output").unwrap_or_default();
        let error: String = entry.get("error").unwrap_or_default();
        Some(CompletionMessage {
            id: entry.get("id")?,
            execution_id: entry.get("execution_id")?,
            node_id: entry.get("node_id")?,
            success: success == "1",
            output: if output.is_empty() {
                None
            } else {
                serde_json::from_str(&output).ok()
            },
            error: if error.is_empty() { None } else { Some(error) },
            schema_version: entry
                .get("schema_version")
                .unwrap_or_else(|| SCHEMA_VERSION.to_string()),
            stream_id: Some(entry.id.clone()),
        })
    }
}

#[async_trait]
impl MessageBroker for RedisMessageBroker {
    async fn publish_task(&self, task: &TaskMessage) -> Result<String> {
        let mut conn = self.conn.clone();
        let config = serde_json::to_string(&task.config)?;
        let fields = [
            ("id", task.id.clone()),
            ("execution_id", task.execution_id.clone()),
            ("node_id", task.node_id.clone()),
            ("handler", task.handler.clone()),
            ("config", config),
            ("schema_version", task.schema_version.clone()),
        ];
        let stream_id: String = conn
            .xadd(&self.task_stream, "*", &fields)
            .await
            .map_err(WorkflowError::broker)?;
        Ok(stream_id)
    }

    async fn publish_completion(&self, completion: &CompletionMessage) -> Result<String> {
        let mut conn = self.conn.clone();
        let output = match &completion.output {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };
        let fields = [
            ("id", completion.id.clone()),
            ("execution_id", completion.execution_id.clone()),
            ("node_id", completion.node_id.clone()),
            (
                "success",
                if completion.success { "1" } else { "0" }.to_string(),
            ),
            ("output", output),
            ("error", completion.error.clone().unwrap_or_default()),
            ("schema_version", completion.schema_version.clone()),
        ];
        let stream_id: String = conn
            .xadd(&self.completion_stream, "*", &fields)
            .await
            .map_err(WorkflowError::broker)?;
        Ok(stream_id)
    }

    async fn consume_tasks(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<TaskMessage>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: StreamReadReply = match conn
            .xread_options(&[&self.task_stream], &[">"], &options)
            .await
        {
            Ok(reply) => reply,
            Err(e) if Self::is_nogroup(&e) => {
                self.create_consumer_groups().await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(WorkflowError::broker(e)),
        };

        Ok(reply
            .keys
            .iter()
            .flat_map(|key| key.ids.iter())
            .filter_map(Self::parse_task)
            .collect())
    }

    async fn consume_completions(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<CompletionMessage>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: StreamReadReply = match conn
            .xread_options(&[&self.completion_stream], &[">"], &options)
            .await
        {
            Ok(reply) => reply,
            Err(e) if Self::is_nogroup(&e) => {
                self.create_consumer_groups().await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(WorkflowError::broker(e)),
        };

        Ok(reply
            .keys
            .iter()
            .flat_map(|key| key.ids.iter())
            .filter_map(Self::parse_completion)
            .collect())
    }

    async fn ack_task(&self, stream_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn
            .xack(&self.task_stream, &self.task_group, &[stream_id])
            .await
            .map_err(WorkflowError::broker)?;
        Ok(())
    }

    async fn ack_completion(&self, stream_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: usize = conn
            .xack(
                &self.completion_stream,
                &self.completion_group,
                &[stream_id],
            )
            .await
            .map_err(WorkflowError::broker)?;
        Ok(())
    }

    async fn create_consumer_groups(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        for (stream, group) in [
            (&self.task_stream, &self.task_group),
            (&self.completion_stream, &self.completion_group),
        ] {
            let created: std::result::Result<String, redis::RedisError> =
                conn.xgroup_create_mkstream(stream, group, "0").await;
            match created {
                Ok(_) => {}
                Err(e) if Self::is_busygroup(&e) => {}
                Err(e) => return Err(WorkflowError::broker(e)),
            }
        }
        Ok(())
    }

    async fn claim_stalled_tasks(
        &self,
        group: &str,
        new_consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<(String, TaskMessage)>> {
        let mut conn = self.conn.clone();
        let options = StreamAutoClaimOptions::default().count(count);
        let reply: StreamAutoClaimReply = match conn
            .xautoclaim_options(
                &self.task_stream,
                group,
                new_consumer,
                min_idle.as_millis() as u64,
                "0-0",
                options,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) if Self::is_nogroup(&e) => return Ok(Vec::new()),
            Err(e) => return Err(WorkflowError::broker(e)),
        };

        Ok(reply
            .claimed
            .iter()
            .filter(|entry| !entry.map.is_empty())
            .filter_map(|entry| Self::parse_task(entry).map(|task| (entry.id.clone(), task)))
            .collect())
    }
}
