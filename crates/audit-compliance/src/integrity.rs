//! Integrity Verifier (C8): streams stored events in primary-key order,
//! recomputes the hash, validates the signature if present, and reports --
//! it never repairs. Tampered records raise a CRITICAL alert per record.

use audit_core::error::Result;
use audit_core::model::AuditEvent;
use audit_core::{verify_hash, AuditQuery, CryptoCore, PipelineMetrics, StorageAdapter};
use audit_pipeline::AuditProducer;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub total_checked: u64,
    pub valid: u64,
    pub tampered: Vec<String>,
    pub missing_hash: Vec<String>,
    pub signature_invalid: Vec<String>,
}

pub struct IntegrityVerifier {
    storage: Arc<dyn StorageAdapter>,
    crypto: Arc<CryptoCore>,
    producer: Arc<AuditProducer>,
    metrics: Arc<PipelineMetrics>,
}

impl IntegrityVerifier {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        crypto: Arc<CryptoCore>,
        producer: Arc<AuditProducer>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self { storage, crypto, producer, metrics }
    }

    pub async fn verify(
        &self,
        organization_id: &str,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> Result<VerificationReport> {
        let query = AuditQuery::builder(organization_id).time_range(from, to).build();
        let events = self.storage.query_events(&query).await?;

        let mut report = VerificationReport::default();

        for event in &events {
            report.total_checked += 1;
            let id = event.id.clone().unwrap_or_else(|| "<unassigned>".to_string());

            match &event.hash {
                None => {
                    report.missing_hash.push(id.clone());
                    self.raise_failure(organization_id, &id, "missing hash").await?;
                    continue;
                }
                Some(hash) if !verify_hash(event, hash) => {
                    report.tampered.push(id.clone());
                    self.raise_failure(organization_id, &id, "hash mismatch").await?;
                    continue;
                }
                _ => {}
            }

            if let Some(signature) = &event.signature {
                let valid = match self
                    .crypto
                    .verify_signature(event.hash.as_deref().unwrap_or_default(), signature, event.signature_algorithm.as_deref())
                    .await
                {
                    Ok(valid) => valid,
                    Err(_) => false,
                };
                if !valid {
                    report.signature_invalid.push(id.clone());
                    self.raise_failure(organization_id, &id, "signature invalid").await?;
                    continue;
                }
            }

            report.valid += 1;
        }

        Ok(report)
    }

    async fn raise_failure(&self, organization_id: &str, event_id: &str, reason: &str) -> Result<()> {
        self.metrics.integrity_failures_total.with_label_values(&[organization_id, reason]).inc();
        let alert = AuditEvent::builder("security.integrity.failure")
            .organization_id(organization_id)
            .outcome_description(format!("event {event_id} failed integrity check: {reason}"))
            .build();
        self.producer.log_critical(alert).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use audit_core::jobs::{JobId, JobQueue, JobState, JobStatus, QueueStats, QueuedJob};
    use audit_core::model::EventStatus;
    use audit_core::{hash_event, HmacKeyring, LocalKms, StorageHealth};
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    struct FixedStorage {
        events: Vec<AuditEvent>,
    }

    #[async_trait]
    impl StorageAdapter for FixedStorage {
        async fn store_event(&self, event: AuditEvent) -> Result<audit_core::StoreOutcome> {
            Ok(audit_core::StoreOutcome { event, was_duplicate: false })
        }
        async fn get_event(&self, _o: &str, _id: &str) -> Result<Option<AuditEvent>> {
            Ok(None)
        }
        async fn query_events(&self, _filter: &AuditQuery) -> Result<Vec<AuditEvent>> {
            Ok(self.events.clone())
        }
        async fn count_events(&self, _filter: &AuditQuery) -> Result<u64> {
            Ok(self.events.len() as u64)
        }
        async fn delete_events_older_than(&self, _o: &str, _cutoff: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
        async fn delete_events_for_principal(&self, _o: &str, _p: &str) -> Result<u64> {
            Ok(0)
        }
        async fn pseudonymize_principal(&self, _o: &str, _p: &str, _pseudo: &str) -> Result<u64> {
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
            Ok(None)
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

    fn producer(crypto: Arc<CryptoCore>) -> Arc<AuditProducer> {
        let queue = Arc::new(InMemoryQueue { jobs: Mutex::new(Vec::new()) });
        Arc::new(AuditProducer::new(queue, crypto))
    }

    #[tokio::test]
    async fn flags_tampered_event() {
        let crypto = crypto();
        let mut good = AuditEvent::builder("auth.login.success").status(EventStatus::Success).build();
        good.id = Some("evt-1".to_string());
        good.hash = Some(hash_event(&good));

        let mut tampered = good.clone();
        tampered.id = Some("evt-2".to_string());
        tampered.principal_id = Some("someone-else".to_string());

        let storage = Arc::new(FixedStorage { events: vec![good, tampered] });
        let metrics = Arc::new(PipelineMetrics::new("audit_pipeline_itest").unwrap());
        let verifier = IntegrityVerifier::new(storage, crypto.clone(), producer(crypto), metrics);

        let report = verifier
            .verify("org-1", Utc::now() - chrono::Duration::days(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.total_checked, 2);
        assert_eq!(report.valid, 1);
        assert_eq!(report.tampered, vec!["evt-2".to_string()]);
    }
}
