//! Dead-Letter Queue: parks jobs that exhausted retries, for inspection and
//! manual or scheduled requeue.
//!
//! Storage shape mirrors `RedisJobQueue`: a Redis list holds ordered record
//! ids, a hash prefix holds the serialized record, per-reason counters sit
//! in a stats hash the same way `RedisJobQueue::stats_key` does.

use super::types::{JobId, QueuedJob};
use crate::error::{Error, ErrorCode, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub job_id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub last_error: String,
    pub parked_at: DateTime<Utc>,
    pub original_queue: String,
}

impl DeadLetterRecord {
    pub fn from_job(job: &QueuedJob, original_queue: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            payload: job.data.clone(),
            attempts: job.status.attempts,
            last_error: job.status.last_error.clone().unwrap_or_default(),
            parked_at: Utc::now(),
            original_queue: original_queue.into(),
        }
    }
}

#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    async fn park(&self, record: DeadLetterRecord) -> Result<()>;
    async fn list(&self, limit: u32) -> Result<Vec<DeadLetterRecord>>;
    async fn get(&self, job_id: &JobId) -> Result<Option<DeadLetterRecord>>;
    /// Remove the record and return it, so the caller can requeue it.
    async fn take(&self, job_id: &JobId) -> Result<Option<DeadLetterRecord>>;
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn count(&self) -> Result<u64>;
}

pub struct RedisDeadLetterQueue {
    redis: ConnectionManager,
    index_key: String,
    record_prefix: String,
}

impl RedisDeadLetterQueue {
    pub fn new(redis: ConnectionManager, queue_name: impl Into<String>) -> Self {
        let queue_name = queue_name.into();
        Self {
            redis,
            index_key: format!("{}:dlq:index", queue_name),
            record_prefix: format!("{}:dlq:record:", queue_name),
        }
    }

    fn record_key(&self, job_id: &JobId) -> String {
        format!("{}{}", self.record_prefix, job_id.as_str())
    }
}

#[async_trait]
impl DeadLetterQueue for RedisDeadLetterQueue {
    async fn park(&self, record: DeadLetterRecord) -> Result<()> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(&record)
            .map_err(|e| Error::new(ErrorCode::SerializationError, e.to_string()))?;

        conn.set::<_, _, ()>(&self.record_key(&record.job_id), json).await?;
        conn.lpush::<_, _, ()>(&self.index_key, record.job_id.as_str()).await?;

        tracing::warn!(
            job_id = %record.job_id,
            job_type = %record.job_type,
            attempts = record.attempts,
            "parked job in dead-letter queue"
        );
        Ok(())
    }

    async fn list(&self, limit: u32) -> Result<Vec<DeadLetterRecord>> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.lrange(&self.index_key, 0, (limit.max(1) - 1) as isize).await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let job_id = JobId::from_string(id);
            if let Some(record) = self.get(&job_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<DeadLetterRecord>> {
        let mut conn = self.redis.clone();
        let json: Option<String> = conn.get(&self.record_key(job_id)).await?;
        match json {
            Some(json) => {
                let record = serde_json::from_str(&json)
                    .map_err(|e| Error::new(ErrorCode::SerializationError, e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn take(&self, job_id: &JobId) -> Result<Option<DeadLetterRecord>> {
        let record = self.get(job_id).await?;
        if record.is_some() {
            let mut conn = self.redis.clone();
            conn.del::<_, ()>(&self.record_key(job_id)).await?;
            conn.lrem::<_, _, ()>(&self.index_key, 0, job_id.as_str()).await?;
        }
        Ok(record)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let all = self.list(u32::MAX.min(10_000)).await?;
        let mut purged = 0u64;
        for record in all {
            if record.parked_at < cutoff {
                self.take(&record.job_id).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn count(&self) -> Result<u64> {
        let mut conn = self.redis.clone();
        let len: u64 = conn.llen(&self.index_key).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> QueuedJob {
        use super::super::types::{JobPriority, JobStatus};
        let id = JobId::new();
        let mut status = JobStatus::new(id.clone(), "audit_ingest", JobPriority::Normal);
        status.attempts = 5;
        status.last_error = Some("storage unavailable".to_string());
        QueuedJob {
            id,
            job_type: "audit_ingest".to_string(),
            priority: JobPriority::Normal,
            data: serde_json::json!({"action": "auth.login.success"}),
            status,
        }
    }

    #[test]
    fn record_captures_job_context() {
        let job = sample_job();
        let record = DeadLetterRecord::from_job(&job, "audit:ingest");
        assert_eq!(record.attempts, 5);
        assert_eq!(record.last_error, "storage unavailable");
        assert_eq!(record.original_queue, "audit:ingest");
    }
}
