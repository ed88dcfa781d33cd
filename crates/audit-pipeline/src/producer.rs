//! Audit Producer (C7): the call-site API applications use to emit events.
//! Fills defaults, merges the preset, attaches `correlationId`, runs the
//! Validator/Sanitizer (C2) unless told to skip it, lets the Crypto Core
//! stamp a hash (and, optionally, a signature), then enqueues the job onto
//! the broker for the Reliable Processor. Never blocks on storage -- callers
//! get control back once the job is durably queued.

use audit_core::jobs::{JobPriority, JobQueue, QueuedJob, SerializableJob};
use audit_core::model::{AuditEvent, AuditEventBuilder, AuditPreset, EventStatus};
use audit_core::CryptoCore;
use audit_core::error::{Error, Result};
use audit_validator::{validate_and_sanitize, ValidatorConfig};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const INGEST_JOB_TYPE: &str = "audit_ingest";

/// Per-call overrides for [`AuditProducer::log_with_options`]. Defaults mirror
/// the call-site convenience methods: hash generated, no signature, no
/// validation skip.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub priority: Option<JobPriority>,
    pub delay: Option<Duration>,
    pub durability_guarantees: bool,
    pub generate_hash: bool,
    pub generate_signature: bool,
    pub correlation_id: Option<String>,
    pub skip_validation: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            priority: None,
            delay: None,
            durability_guarantees: false,
            generate_hash: true,
            generate_signature: false,
            correlation_id: None,
            skip_validation: false,
        }
    }
}

impl LogOptions {
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_durability_guarantees(mut self, durability_guarantees: bool) -> Self {
        self.durability_guarantees = durability_guarantees;
        self
    }

    pub fn without_validation(mut self) -> Self {
        self.skip_validation = true;
        self
    }

    pub fn without_hash(mut self) -> Self {
        self.generate_hash = false;
        self
    }

    pub fn with_signature(mut self) -> Self {
        self.generate_signature = true;
        self
    }
}

/// Wraps an `AuditEvent` so it satisfies `SerializableJob` without teaching
/// the generic job system anything about audit semantics.
struct IngestJob {
    event: AuditEvent,
    priority: JobPriority,
    scheduled_for: Option<DateTime<Utc>>,
    durability_guarantees: bool,
}

impl SerializableJob for IngestJob {
    fn job_type(&self) -> &'static str {
        INGEST_JOB_TYPE
    }

    fn serialize(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.event)
    }

    fn deserialize(data: &serde_json::Value) -> std::result::Result<Box<dyn SerializableJob>, serde_json::Error> {
        let event: AuditEvent = serde_json::from_value(data.clone())?;
        let priority = if event.is_compliance_critical() { JobPriority::Critical } else { JobPriority::Normal };
        Ok(Box::new(IngestJob { event, priority, scheduled_for: None, durability_guarantees: false }))
    }

    fn priority(&self) -> JobPriority {
        self.priority
    }

    fn max_attempts(&self) -> u32 {
        5
    }

    fn scheduled_for(&self) -> Option<DateTime<Utc>> {
        self.scheduled_for
    }

    fn metadata(&self) -> HashMap<String, serde_json::Value> {
        let mut meta = HashMap::new();
        if let Some(org) = &self.event.organization_id {
            meta.insert("organization_id".to_string(), serde_json::json!(org));
        }
        if let Some(correlation_id) = &self.event.correlation_id {
            meta.insert("correlation_id".to_string(), serde_json::json!(correlation_id));
        }
        if self.durability_guarantees {
            meta.insert("durability_guarantees".to_string(), serde_json::json!(true));
        }
        meta
    }
}

pub struct AuditProducer {
    queue: Arc<dyn JobQueue>,
    crypto: Arc<CryptoCore>,
    presets: HashMap<String, AuditPreset>,
    validator_config: ValidatorConfig,
}

impl AuditProducer {
    pub fn new(queue: Arc<dyn JobQueue>, crypto: Arc<CryptoCore>) -> Self {
        Self {
            queue,
            crypto,
            presets: HashMap::new(),
            validator_config: ValidatorConfig::default(),
        }
    }

    pub fn with_preset(mut self, preset: AuditPreset) -> Self {
        self.presets.insert(preset.name.clone(), preset);
        self
    }

    pub fn with_validator_config(mut self, config: ValidatorConfig) -> Self {
        self.validator_config = config;
        self
    }

    /// Run the full `log` algorithm: attach correlation id, validate/sanitize
    /// unless skipped, hash unless skipped, sign if requested, then enqueue.
    async fn submit(&self, mut event: AuditEvent, options: LogOptions) -> Result<String> {
        if let Some(correlation_id) = &options.correlation_id {
            event.correlation_id = Some(correlation_id.clone());
        }

        if !options.skip_validation {
            let (sanitized, report) = validate_and_sanitize(&event, &self.validator_config);
            if !report.is_valid {
                let detail = report
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(Error::validation(format!("event failed validation: {detail}")));
            }
            event = sanitized;
        }

        if options.generate_hash {
            event.hash = Some(self.crypto.hash(&event));
        }

        if options.generate_signature {
            let hash = event.hash.as_deref().ok_or_else(|| {
                Error::validation("generateSignature requires a hash; do not pass without_hash() alongside with_signature()")
            })?;
            if let Some(sig) = self.crypto.sign(hash).await? {
                event.signature = Some(sig.value);
                event.signature_algorithm = Some(sig.algorithm);
            }
        }

        let priority = options.priority.unwrap_or_else(|| {
            if event.is_compliance_critical() { JobPriority::Critical } else { JobPriority::Normal }
        });
        let scheduled_for = options.delay.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());

        let job = IngestJob { event, priority, scheduled_for, durability_guarantees: options.durability_guarantees };
        let queued = QueuedJob::new(&job).map_err(|e| Error::new(
            audit_core::ErrorCode::SerializationError,
            e.to_string(),
        ))?;
        let job_id = self.queue.enqueue(queued).await?;
        Ok(job_id.to_string())
    }

    /// Log an event as-is, with the default options (validated, hashed, no
    /// signature).
    pub async fn log(&self, event: AuditEvent) -> Result<String> {
        self.submit(event, LogOptions::default()).await
    }

    /// Log an event with explicit per-call options.
    pub async fn log_with_options(&self, event: AuditEvent, options: LogOptions) -> Result<String> {
        self.submit(event, options).await
    }

    /// Log through a named preset, filling any field the caller left unset.
    pub async fn log_with_enhancements(
        &self,
        action: impl Into<String>,
        preset_name: &str,
        configure: impl FnOnce(AuditEventBuilder) -> AuditEventBuilder,
    ) -> Result<String> {
        let mut builder = AuditEventBuilder::new(action);
        builder = configure(builder);
        if let Some(preset) = self.presets.get(preset_name) {
            builder = builder.preset(preset);
        }
        self.submit(builder.build(), LogOptions::default()).await
    }

    pub async fn log_auth(
        &self,
        action: impl Into<String>,
        principal_id: impl Into<String>,
        status: EventStatus,
    ) -> Result<String> {
        let event = AuditEvent::builder(action)
            .principal_id(principal_id)
            .status(status)
            .build();
        self.submit(event, LogOptions::default()).await
    }

    pub async fn log_data(
        &self,
        action: impl Into<String>,
        principal_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Result<String> {
        let event = AuditEvent::builder(action)
            .principal_id(principal_id)
            .target(resource_type, resource_id)
            .status(EventStatus::Success)
            .build();
        self.submit(event, LogOptions::default()).await
    }

    pub async fn log_system(&self, action: impl Into<String>, outcome: impl Into<String>) -> Result<String> {
        let event = AuditEvent::builder(action)
            .status(EventStatus::Success)
            .outcome_description(outcome)
            .build();
        self.submit(event, LogOptions::default()).await
    }

    /// FHIR/PHI-flavored resource access; `target` forces the PHI
    /// classification via `AuditEventBuilder::build`'s resource-type check.
    pub async fn log_fhir(
        &self,
        action: impl Into<String>,
        principal_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Result<String> {
        let event = AuditEvent::builder(action)
            .principal_id(principal_id)
            .target(resource_type, resource_id)
            .status(EventStatus::Success)
            .build();
        self.submit(event, LogOptions::default()).await
    }

    /// Compliance-critical events that must never be dropped; signature is
    /// mandatory for this call regardless of `crypto.signature_required`.
    /// Bypasses the configurable options path entirely -- these events are
    /// never validation-skipped or left unhashed.
    pub async fn log_critical(&self, event: AuditEvent) -> Result<String> {
        let (sanitized, report) = validate_and_sanitize(&event, &self.validator_config);
        let mut event = if report.is_valid { sanitized } else { event };

        let hash = self.crypto.hash(&event);
        event.hash = Some(hash.clone());
        let sig = self.crypto.sign(&hash).await?.ok_or_else(|| {
            Error::crypto_unavailable("critical event requires a signature but none was produced")
        })?;
        event.signature = Some(sig.value);
        event.signature_algorithm = Some(sig.algorithm);

        let priority = JobPriority::Critical;
        let job = IngestJob { event, priority, scheduled_for: None, durability_guarantees: true };
        let queued = QueuedJob::new(&job).map_err(|e| Error::new(
            audit_core::ErrorCode::SerializationError,
            e.to_string(),
        ))?;
        let job_id = self.queue.enqueue(queued).await?;
        Ok(job_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::jobs::{CircuitBreaker, CircuitBreakerConfig, QueueStats};
    use audit_core::jobs::types::{JobId, JobState, JobStatus};
    use audit_core::{HmacKeyring, LocalKms};
    use std::sync::Mutex;

    struct InMemoryQueue {
        jobs: Mutex<Vec<QueuedJob>>,
    }

    #[async_trait::async_trait]
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

    fn crypto() -> Arc<CryptoCore> {
        let keyring = HmacKeyring::single("k1", b"0123456789abcdef0123456789abcdef".to_vec());
        let kms = LocalKms::new(b"01234567890123456789012345678901", keyring).unwrap();
        Arc::new(CryptoCore::new(Box::new(kms), false))
    }

    #[tokio::test]
    async fn log_enqueues_a_hashed_event() {
        let queue = Arc::new(InMemoryQueue { jobs: Mutex::new(Vec::new()) });
        let producer = AuditProducer::new(queue.clone(), crypto());

        producer
            .log_auth("auth.login.success", "user-1", EventStatus::Success)
            .await
            .unwrap();

        let jobs = queue.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        let event: AuditEvent = serde_json::from_value(jobs[0].data.clone()).unwrap();
        assert!(event.hash.is_some());
        assert!(event.signature.is_none());
    }

    #[tokio::test]
    async fn critical_events_force_signature() {
        let _ = CircuitBreaker::new(CircuitBreakerConfig::default());
        let queue = Arc::new(InMemoryQueue { jobs: Mutex::new(Vec::new()) });
        let producer = AuditProducer::new(queue, crypto());

        let event = AuditEvent::builder("gdpr.erase").principal_id("user-1").build();
        producer.log_critical(event).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_invalid_event() {
        let queue = Arc::new(InMemoryQueue { jobs: Mutex::new(Vec::new()) });
        let producer = AuditProducer::new(queue, crypto());

        let event = AuditEvent::builder("").principal_id("user-1").build();
        let result = producer.log(event).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn skip_validation_bypasses_the_check() {
        let queue = Arc::new(InMemoryQueue { jobs: Mutex::new(Vec::new()) });
        let producer = AuditProducer::new(queue.clone(), crypto());

        let event = AuditEvent::builder("").principal_id("user-1").build();
        producer
            .log_with_options(event, LogOptions::default().without_validation())
            .await
            .unwrap();

        assert_eq!(queue.jobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn correlation_id_is_attached_to_the_queued_event() {
        let queue = Arc::new(InMemoryQueue { jobs: Mutex::new(Vec::new()) });
        let producer = AuditProducer::new(queue.clone(), crypto());

        let event = AuditEvent::builder("auth.login.success").principal_id("user-1").build();
        producer
            .log_with_options(event, LogOptions::default().with_correlation_id("corr-123"))
            .await
            .unwrap();

        let jobs = queue.jobs.lock().unwrap();
        let event: AuditEvent = serde_json::from_value(jobs[0].data.clone()).unwrap();
        assert_eq!(event.correlation_id.as_deref(), Some("corr-123"));
    }
}
