//! Alerting & Metrics (C12): health probes over storage/broker/KMS and the
//! ACTIVE/RESOLVED alert state machine. Alert transitions are themselves
//! audited, the same way a circuit breaker opening would be logged.

use audit_core::error::Result;
use audit_core::jobs::JobQueue;
use audit_core::model::AuditEvent;
use audit_core::{KmsClient, PipelineMetrics, StorageAdapter};
use audit_pipeline::AuditProducer;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertState {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeTarget {
    Database,
    Broker,
    Kms,
}

impl ProbeTarget {
    fn label(&self) -> &'static str {
        match self {
            ProbeTarget::Database => "database",
            ProbeTarget::Broker => "broker",
            ProbeTarget::Kms => "kms",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub target: ProbeTarget,
    pub state: AlertState,
    pub message: String,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

pub struct AlertManager {
    storage: Arc<dyn StorageAdapter>,
    queue: Arc<dyn JobQueue>,
    kms: Arc<dyn KmsClient>,
    producer: Arc<AuditProducer>,
    metrics: Arc<PipelineMetrics>,
    alerts: DashMap<ProbeTarget, Alert>,
}

impl AlertManager {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        queue: Arc<dyn JobQueue>,
        kms: Arc<dyn KmsClient>,
        producer: Arc<AuditProducer>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self { storage, queue, kms, producer, metrics, alerts: DashMap::new() }
    }

    /// Probe every dependency once. An unhealthy probe opens an ACTIVE
    /// alert (idempotent if one is already open); a healthy probe resolves
    /// any previously ACTIVE alert for that target.
    pub async fn run_probes(&self) -> Result<Vec<Alert>> {
        let mut transitions = Vec::new();

        let db_healthy = self.storage.health_check().await.map(|h| h.is_healthy).unwrap_or(false);
        if let Some(alert) = self.record_probe(ProbeTarget::Database, db_healthy, "storage health check failed").await? {
            transitions.push(alert);
        }

        let broker_healthy = self.queue.health_check().await.unwrap_or(false);
        if let Some(alert) = self.record_probe(ProbeTarget::Broker, broker_healthy, "broker health check failed").await? {
            transitions.push(alert);
        }

        let kms_healthy = self.kms.sign(b"healthcheck").await.is_ok();
        if let Some(alert) = self.record_probe(ProbeTarget::Kms, kms_healthy, "KMS health check failed").await? {
            transitions.push(alert);
        }

        Ok(transitions)
    }

    async fn record_probe(&self, target: ProbeTarget, healthy: bool, failure_message: &str) -> Result<Option<Alert>> {
        let was_active = self.alerts.get(&target).map(|a| a.state == AlertState::Active).unwrap_or(false);

        if !healthy && !was_active {
            let alert = Alert {
                target,
                state: AlertState::Active,
                message: failure_message.to_string(),
                opened_at: Utc::now(),
                resolved_at: None,
            };
            self.alerts.insert(target, alert.clone());
            self.audit_transition(&alert).await?;
            return Ok(Some(alert));
        }

        if healthy && was_active {
            let mut alert = self.alerts.get(&target).unwrap().value().clone();
            alert.state = AlertState::Resolved;
            alert.resolved_at = Some(Utc::now());
            self.alerts.insert(target, alert.clone());
            self.audit_transition(&alert).await?;
            return Ok(Some(alert));
        }

        Ok(None)
    }

    async fn audit_transition(&self, alert: &Alert) -> Result<()> {
        let action = match alert.state {
            AlertState::Active => "security.alert.opened",
            AlertState::Resolved => "security.alert.resolved",
        };
        let event = AuditEvent::builder(action)
            .outcome_description(format!("{}: {}", alert.target.label(), alert.message))
            .build();
        self.producer.log_critical(event).await?;
        Ok(())
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.iter().filter(|entry| entry.value().state == AlertState::Active).map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use audit_core::jobs::{JobId, JobState, JobStatus, QueueStats, QueuedJob};
    use audit_core::{CryptoCore, HmacKeyring, LocalKms, StorageHealth};
    use audit_core::AuditQuery;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyStorage {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl StorageAdapter for FlakyStorage {
        async fn store_event(&self, event: AuditEvent) -> Result<audit_core::StoreOutcome> {
            Ok(audit_core::StoreOutcome { event, was_duplicate: false })
        }
        async fn get_event(&self, _o: &str, _id: &str) -> Result<Option<AuditEvent>> {
            Ok(None)
        }
        async fn query_events(&self, _filter: &AuditQuery) -> Result<Vec<AuditEvent>> {
            Ok(Vec::new())
        }
        async fn count_events(&self, _filter: &AuditQuery) -> Result<u64> {
            Ok(0)
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
            Ok(StorageHealth { is_healthy: self.healthy.load(Ordering::SeqCst), message: None, last_write: None })
        }
    }

    struct AlwaysHealthyQueue;

    #[async_trait]
    impl JobQueue for AlwaysHealthyQueue {
        async fn enqueue(&self, job: QueuedJob) -> Result<JobId> {
            Ok(job.id)
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

    fn crypto_kms() -> Arc<dyn KmsClient> {
        let keyring = HmacKeyring::single("k1", b"0123456789abcdef0123456789abcdef".to_vec());
        Arc::new(LocalKms::new(b"01234567890123456789012345678901", keyring).unwrap())
    }

    fn producer() -> Arc<AuditProducer> {
        let keyring = HmacKeyring::single("k1", b"0123456789abcdef0123456789abcdef".to_vec());
        let kms = LocalKms::new(b"01234567890123456789012345678901", keyring).unwrap();
        let crypto = Arc::new(CryptoCore::new(Box::new(kms), false));
        let queue = Arc::new(AlwaysHealthyQueue);
        Arc::new(AuditProducer::new(queue, crypto))
    }

    #[tokio::test]
    async fn unhealthy_storage_opens_then_resolves_an_alert() {
        let storage = Arc::new(FlakyStorage { healthy: AtomicBool::new(false) });
        let metrics = Arc::new(PipelineMetrics::new("audit_pipeline_test").unwrap());
        let manager = AlertManager::new(storage.clone(), Arc::new(AlwaysHealthyQueue), crypto_kms(), producer(), metrics);

        let opened = manager.run_probes().await.unwrap();
        assert!(opened.iter().any(|a| a.target == ProbeTarget::Database && a.state == AlertState::Active));
        assert_eq!(manager.active_alerts().len(), 1);

        storage.healthy.store(true, Ordering::SeqCst);
        let resolved = manager.run_probes().await.unwrap();
        assert!(resolved.iter().any(|a| a.target == ProbeTarget::Database && a.state == AlertState::Resolved));
        assert!(manager.active_alerts().is_empty());
    }
}
