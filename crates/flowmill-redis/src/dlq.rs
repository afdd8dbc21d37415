// Redis dead-letter queue
//
// An append-only stream of serialized entries plus an index hash for cheap
// membership checks. Entries persist until an operator retries or deletes.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamRangeReply};
use redis::AsyncCommands;

use flowmill_core::{DeadLetterEntry, DlqRepository, Result, Settings, WorkflowError};

// Upper bound when scanning the stream for a specific entry id
const SCAN_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct RedisDlqRepository {
    conn: ConnectionManager,
    stream: String,
    index: String,
}

impl RedisDlqRepository {
    pub fn new(conn: ConnectionManager, settings: &Settings) -> Self {
        Self {
            conn,
            stream: settings.dlq_stream.clone(),
            index: settings.dlq_index.clone(),
        }
    }

    fn parse_entry(entry: &StreamId) -> Option<DeadLetterEntry> {
        let data: String = entry.get("data")?;
        serde_json::from_str(&data).ok()
    }
}

#[async_trait]
impl DlqRepository for RedisDlqRepository {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<()> {
        let mut conn = self.conn.clone();
        let fields = [
            ("id", entry.id.clone()),
            ("data", serde_json::to_string(entry)?),
        ];
        let _: String = conn
            .xadd(&self.stream, "*", &fields)
            .await
            .map_err(WorkflowError::store)?;
        let _: () = conn
            .hset(&self.index, &entry.id, "1")
            .await
            .map_err(WorkflowError::store)?;
        Ok(())
    }

    async fn pop(&self, entry_id: &str) -> Result<Option<DeadLetterEntry>> {
        let entries = self.list(SCAN_LIMIT).await?;
        for entry in entries {
            if entry.id == entry_id {
                self.delete(entry_id).await?;
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrange_count(&self.stream, "-", "+", limit)
            .await
            .map_err(WorkflowError::store)?;
        Ok(reply.ids.iter().filter_map(Self::parse_entry).collect())
    }

    async fn count(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let length: usize = conn.xlen(&self.stream).await.map_err(WorkflowError::store)?;
        Ok(length)
    }

    async fn delete(&self, entry_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrange_count(&self.stream, "-", "+", SCAN_LIMIT)
            .await
            .map_err(WorkflowError::store)?;

        for entry in &reply.ids {
            let id: Option<String> = entry.get("id");
            if id.as_deref() == Some(entry_id) {
                let _: usize = conn
                    .xdel(&self.stream, &[&entry.id])
                    .await
                    .map_err(WorkflowError::store)?;
                let _: usize = conn
                    .hdel(&self.index, entry_id)
                    .await
                    .map_err(WorkflowError::store)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
