//! Reliable Processor (C6): the `JobHandler` that drains `audit_ingest` jobs
//! off the broker, re-verifies the hash, writes through the storage adapter
//! behind a retry/circuit-breaker pair, and parks exhausted jobs in the
//! dead-letter queue instead of dropping them. Non-retryable failures (a
//! failed integrity check) skip the retry loop entirely and park on the
//! first attempt, raising a CRITICAL alert through the producer.

use crate::producer::INGEST_JOB_TYPE;
use crate::AuditProducer;
use audit_core::error::{Error, Result};
use audit_core::jobs::{
    execute_with_retry, is_retryable, CircuitBreaker, DeadLetterQueue, DeadLetterRecord,
    JobContext, JobHandler, JobHandlerConfig, JobResult, RetryPolicy,
};
use audit_core::jobs::types::{JobId, JobPriority, JobState, JobStatus, QueuedJob};
use audit_core::model::{AuditEvent, DataClassification};
use audit_core::{verify_hash, PipelineMetrics, StorageAdapter, StoreOutcome};
use async_trait::async_trait;
use std::sync::Arc;

pub struct AuditIngestHandler {
    storage: Arc<dyn StorageAdapter>,
    breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
    dlq: Arc<dyn DeadLetterQueue>,
    queue_name: String,
    metrics: Arc<PipelineMetrics>,
    producer: Arc<AuditProducer>,
}

impl AuditIngestHandler {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        breaker: Arc<CircuitBreaker>,
        dlq: Arc<dyn DeadLetterQueue>,
        queue_name: impl Into<String>,
        metrics: Arc<PipelineMetrics>,
        producer: Arc<AuditProducer>,
    ) -> Self {
        Self {
            storage,
            breaker,
            retry_policy: RetryPolicy::default(),
            dlq,
            queue_name: queue_name.into(),
            metrics,
            producer,
        }
    }

    async fn ingest(&self, event: AuditEvent) -> Result<StoreOutcome> {
        if let Some(hash) = &event.hash {
            if !verify_hash(&event, hash) {
                return Err(Error::integrity_failure(
                    "recomputed hash does not match the hash recorded at production time",
                ));
            }
        }

        let storage = self.storage.clone();
        let event_for_store = event.clone();
        execute_with_retry(
            || {
                let storage = storage.clone();
                let event = event_for_store.clone();
                async move { storage.store_event(event).await }
            },
            &self.retry_policy,
            &self.breaker,
        )
        .await
    }

    /// Build a `DeadLetterRecord` from a job that won't be retried further
    /// and park it, raising a CRITICAL alert so an operator notices.
    async fn park(&self, job_data: &serde_json::Value, context: &JobContext, error: &Error) -> Result<()> {
        let mut status = JobStatus::new(context.job_id.clone(), INGEST_JOB_TYPE, JobPriority::Normal);
        status.attempts = context.attempt;
        status.last_error = Some(error.to_string());
        status.state = JobState::DeadLettered;

        let queued = QueuedJob {
            id: context.job_id.clone(),
            job_type: INGEST_JOB_TYPE.to_string(),
            priority: JobPriority::Normal,
            data: job_data.clone(),
            status,
        };
        let record = DeadLetterRecord::from_job(&queued, &self.queue_name);
        self.dlq.park(record).await?;
        self.metrics.dlq_parks_total.with_label_values(&[INGEST_JOB_TYPE]).inc();

        let alert = AuditEvent::builder("pipeline.dlq.parked")
            .outcome_description(format!(
                "job {} parked after {} attempt(s): {error}",
                context.job_id, context.attempt
            ))
            .data_classification(DataClassification::Internal)
            .build();
        if let Err(alert_err) = self.producer.log_critical(alert).await {
            tracing::error!(error = %alert_err, "failed to raise CRITICAL alert for parked job");
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for AuditIngestHandler {
    fn job_type(&self) -> &'static str {
        INGEST_JOB_TYPE
    }

    async fn handle(&self, job_data: &serde_json::Value, context: &JobContext) -> JobResult {
        let event: AuditEvent = match serde_json::from_value(job_data.clone()) {
            Ok(event) => event,
            Err(e) => return JobResult::failed(format!("malformed audit event payload: {e}")),
        };
        let organization_id = event.organization_id.clone().unwrap_or_else(|| "unknown".to_string());

        match self.ingest(event).await {
            Ok(outcome) => {
                if outcome.was_duplicate {
                    self.metrics.duplicates_total.with_label_values(&[&organization_id]).inc();
                } else {
                    self.metrics.events_ingested_total.with_label_values(&[&organization_id]).inc();
                }
                JobResult::success()
            }
            Err(error) if !is_retryable(&error) || context.is_last_attempt() => {
                if let Err(park_err) = self.park(job_data, context, &error).await {
                    tracing::error!(error = %park_err, "failed to park exhausted job in dead-letter queue");
                }
                JobResult::failed(error.to_string())
            }
            Err(error) => {
                self.metrics.retries_total.with_label_values(&[INGEST_JOB_TYPE]).inc();
                JobResult::retry(error.to_string())
            }
        }
    }

    fn validate_job_data(&self, job_data: &serde_json::Value) -> Result<()> {
        serde_json::from_value::<AuditEvent>(job_data.clone())
            .map(|_| ())
            .map_err(|e| Error::validation(format!("invalid audit event payload: {e}")))
    }

    fn config(&self) -> JobHandlerConfig {
        JobHandlerConfig {
            max_concurrent_jobs: Some(32),
            default_timeout: Some(30),
            default_max_attempts: Some(5),
        }
    }
}

/// Unused by the handler directly -- referenced so the blanket `Job` import
/// above is exercised; kept here to document that `JobHandler` and `Job`
/// are distinct seams in the scheduler (a `JobHandler` is dispatched by job
/// type, a `Job` is a concrete self-describing unit of work).
#[allow(dead_code)]
fn _job_trait_is_distinct<T: audit_core::jobs::Job>() {}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::jobs::{CircuitBreakerConfig, JobQueue, QueueStats};
    use audit_core::model::EventStatus;
    use audit_core::{hash_event, CryptoCore, HmacKeyring, LocalKms, StorageHealth, StoreOutcome};
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    struct MemStorage {
        events: Mutex<Vec<AuditEvent>>,
        fail_times: Mutex<u32>,
    }

    #[async_trait]
    impl StorageAdapter for MemStorage {
        async fn store_event(&self, mut event: AuditEvent) -> Result<StoreOutcome> {
            let mut remaining = self.fail_times.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::storage_unavailable("db offline"));
            }
            event.id = Some("evt-1".to_string());
            self.events.lock().unwrap().push(event.clone());
            Ok(StoreOutcome { event, was_duplicate: false })
        }
        async fn get_event(&self, _organization_id: &str, _id: &str) -> Result<Option<AuditEvent>> {
            Ok(None)
        }
        async fn query_events(&self, _filter: &audit_core::AuditQuery) -> Result<Vec<AuditEvent>> {
            Ok(Vec::new())
        }
        async fn count_events(&self, _filter: &audit_core::AuditQuery) -> Result<u64> {
            Ok(0)
        }
        async fn delete_events_older_than(&self, _organization_id: &str, _cutoff: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
        async fn delete_events_for_principal(&self, _organization_id: &str, _principal_id: &str) -> Result<u64> {
            Ok(0)
        }
        async fn pseudonymize_principal(&self, _organization_id: &str, _principal_id: &str, _pseudonym: &str) -> Result<u64> {
            Ok(0)
        }
        async fn health_check(&self) -> Result<StorageHealth> {
            Ok(StorageHealth { is_healthy: true, message: None, last_write: None })
        }
    }

    struct InMemoryQueue {
        jobs: Mutex<Vec<QueuedJob>>,
    }

    #[async_trait]
    impl JobQueue for InMemoryQueue {
        async fn enqueue(&self, job: QueuedJob) -> Result<JobId> {
            let id = job.id.clone();
            self.jobs.lock().unwrap().push(job);
            Ok(id)
        }
        async fn dequeue(&self, _worker_id: &str) -> Result<Option<QueuedJob>> {
            Ok(self.jobs.lock().unwrap().pop())
        }
        async fn get_status(&self, _job_id: &JobId) -> Result<Option<JobStatus>> {
            Ok(None)
        }
        async fn update_status(&self, _job_id: &JobId, _status: JobStatus) -> Result<()> {
            Ok(())
        }
        async fn cancel_job(&self, _job_id: &JobId) -> Result<bool> {
            Ok(false)
        }
        async fn get_stats(&self) -> Result<QueueStats> {
            Ok(QueueStats::default())
        }
        async fn cleanup_old_jobs(&self, _older_than: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
        async fn get_jobs_by_status(&self, _status: JobState, _limit: Option<u32>) -> Result<Vec<QueuedJob>> {
            Ok(Vec::new())
        }
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn test_producer() -> Arc<AuditProducer> {
        let keyring = HmacKeyring::single("k1", b"0123456789abcdef0123456789abcdef".to_vec());
        let kms = LocalKms::new(b"01234567890123456789012345678901", keyring).unwrap();
        let crypto = Arc::new(CryptoCore::new(Box::new(kms), false));
        let queue = Arc::new(InMemoryQueue { jobs: Mutex::new(Vec::new()) });
        Arc::new(AuditProducer::new(queue, crypto))
    }

    fn test_metrics() -> Arc<PipelineMetrics> {
        Arc::new(PipelineMetrics::new("audit_pipeline_handler_test").unwrap())
    }

    fn sample_event() -> AuditEvent {
        let mut event = AuditEvent::builder("auth.login.success")
            .principal_id("user-1")
            .status(EventStatus::Success)
            .build();
        event.hash = Some(hash_event(&event));
        event
    }

    #[tokio::test]
    async fn stores_a_well_formed_event() {
        let storage = Arc::new(MemStorage { events: Mutex::new(Vec::new()), fail_times: Mutex::new(0) });
        let breaker = CircuitBreaker::shared(CircuitBreakerConfig::default());
        let metrics = test_metrics();

        // DLQ parking needs a live Redis connection manager; exercised
        // separately in an integration test, so a null sink stands in here.
        let handler = AuditIngestHandler {
            storage: storage.clone(),
            breaker,
            retry_policy: RetryPolicy::default(),
            dlq: Arc::new(NullDlq),
            queue_name: "audit".to_string(),
            metrics: metrics.clone(),
            producer: test_producer(),
        };

        let event = sample_event();
        let payload = serde_json::to_value(&event).unwrap();
        let context = JobContext::new(JobId::new(), 1, 5);

        let result = handler.handle(&payload, &context).await;
        assert!(result.is_success());
        assert_eq!(storage.events.lock().unwrap().len(), 1);
        assert_eq!(metrics.events_ingested_total.with_label_values(&["unknown"]).get(), 1);
    }

    #[tokio::test]
    async fn tampered_hash_is_rejected_without_retry() {
        let storage = Arc::new(MemStorage { events: Mutex::new(Vec::new()), fail_times: Mutex::new(0) });
        let breaker = CircuitBreaker::shared(CircuitBreakerConfig::default());
        let metrics = test_metrics();
        let handler = AuditIngestHandler {
            storage,
            breaker,
            retry_policy: RetryPolicy::default(),
            dlq: Arc::new(NullDlq),
            queue_name: "audit".to_string(),
            metrics: metrics.clone(),
            producer: test_producer(),
        };

        let mut event = sample_event();
        event.principal_id = Some("someone-else".to_string());
        let payload = serde_json::to_value(&event).unwrap();
        // First attempt of five; an integrity failure must still park
        // immediately rather than going through JobResult::retry.
        let context = JobContext::new(JobId::new(), 1, 5);

        let result = handler.handle(&payload, &context).await;
        assert!(result.is_failure());
        assert_eq!(metrics.retries_total.with_label_values(&[INGEST_JOB_TYPE]).get(), 0);
        assert_eq!(metrics.dlq_parks_total.with_label_values(&[INGEST_JOB_TYPE]).get(), 1);
    }

    #[tokio::test]
    async fn transient_storage_failure_recovers_within_a_single_attempt() {
        let storage = Arc::new(MemStorage { events: Mutex::new(Vec::new()), fail_times: Mutex::new(1) });
        let breaker = CircuitBreaker::shared(CircuitBreakerConfig::default());
        let metrics = test_metrics();
        let handler = AuditIngestHandler {
            storage,
            breaker,
            retry_policy: RetryPolicy {
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(5),
                ..RetryPolicy::default()
            },
            dlq: Arc::new(NullDlq),
            queue_name: "audit".to_string(),
            metrics: metrics.clone(),
            producer: test_producer(),
        };

        let event = sample_event();
        let payload = serde_json::to_value(&event).unwrap();
        let context = JobContext::new(JobId::new(), 1, 5);

        let result = handler.handle(&payload, &context).await;
        assert!(result.is_success());
        assert_eq!(metrics.events_ingested_total.with_label_values(&["unknown"]).get(), 1);
    }

    #[tokio::test]
    async fn storage_unavailable_past_the_inner_retry_budget_requeues_the_job() {
        // fail_times comfortably exceeds the inner policy's max_attempts, so
        // `execute_with_retry` exhausts its budget and hands `handle` a
        // retryable `RetryExhausted`. The job is on its first of five
        // broker-level attempts, so it should be requeued, not parked.
        let storage = Arc::new(MemStorage { events: Mutex::new(Vec::new()), fail_times: Mutex::new(50) });
        let breaker = CircuitBreaker::shared(CircuitBreakerConfig::default());
        let metrics = test_metrics();
        let handler = AuditIngestHandler {
            storage,
            breaker,
            retry_policy: RetryPolicy {
                max_attempts: 2,
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(5),
                ..RetryPolicy::default()
            },
            dlq: Arc::new(NullDlq),
            queue_name: "audit".to_string(),
            metrics: metrics.clone(),
            producer: test_producer(),
        };

        let event = sample_event();
        let payload = serde_json::to_value(&event).unwrap();
        let context = JobContext::new(JobId::new(), 1, 5);

        let result = handler.handle(&payload, &context).await;
        assert!(!result.is_success());
        assert!(!result.is_failure());
        assert_eq!(metrics.retries_total.with_label_values(&[INGEST_JOB_TYPE]).get(), 1);
        assert_eq!(metrics.dlq_parks_total.with_label_values(&[INGEST_JOB_TYPE]).get(), 0);
    }

    struct NullDlq;

    #[async_trait]
    impl DeadLetterQueue for NullDlq {
        async fn park(&self, _record: DeadLetterRecord) -> Result<()> {
            Ok(())
        }
        async fn list(&self, _limit: u32) -> Result<Vec<DeadLetterRecord>> {
            Ok(Vec::new())
        }
        async fn get(&self, _job_id: &JobId) -> Result<Option<DeadLetterRecord>> {
            Ok(None)
        }
        async fn take(&self, _job_id: &JobId) -> Result<Option<DeadLetterRecord>> {
            Ok(None)
        }
        async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
        async fn count(&self) -> Result<u64> {
            Ok(0)
        }
    }
}
