//! Report Engine (C11): HIPAA/GDPR compliance reports as pure summaries of
//! Storage Adapter queries, plus a scheduled-report executor. Delivery is a
//! boundary this core doesn't implement -- `NoopDelivery` stands in, the
//! same way the pipeline leaves email/webhook dispatch out of scope.

use audit_core::error::Result;
use audit_core::model::{AuditEvent, DataClassification};
use audit_core::{AuditQuery, StorageAdapter};
use audit_pipeline::AuditProducer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportKind {
    Hipaa,
    Gdpr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub kind: ReportKind,
    pub organization_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_events: u64,
    pub verified_events: u64,
    pub failed_verifications: u64,
    pub compliance_score: f64,
    pub violations: Vec<String>,
    pub recommendations: Vec<String>,
    pub risk_assessment: String,
    /// GDPR-only: counts of events grouped by `extensions.gdprContext.legalBasis`.
    pub legal_basis_breakdown: Option<std::collections::HashMap<String, u64>>,
    /// GDPR-only: count of `data.*`/`consent.*` data-subject-rights actions.
    pub data_subject_rights_count: Option<u64>,
}

pub struct ReportEngine {
    storage: Arc<dyn StorageAdapter>,
    producer: Arc<AuditProducer>,
}

impl ReportEngine {
    pub fn new(storage: Arc<dyn StorageAdapter>, producer: Arc<AuditProducer>) -> Self {
        Self { storage, producer }
    }

    pub async fn generate(
        &self,
        kind: ReportKind,
        organization_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<ComplianceReport> {
        let query = AuditQuery::builder(organization_id).time_range(period_start, period_end).build();
        let events = self.storage.query_events(&query).await?;

        let total_events = events.len() as u64;
        let verified_events = events.iter().filter(|e| e.hash.is_some()).count() as u64;
        let failed_verifications = events
            .iter()
            .filter(|e| e.hash.as_deref().map(|h| !audit_core::verify_hash(e, h)).unwrap_or(false))
            .count() as u64;

        let compliance_score = if total_events == 0 {
            100.0
        } else {
            100.0 * (verified_events.saturating_sub(failed_verifications)) as f64 / total_events as f64
        };

        let mut violations = Vec::new();
        if failed_verifications > 0 {
            violations.push(format!("{failed_verifications} event(s) failed hash verification"));
        }
        let unclassified_phi = events
            .iter()
            .filter(|e| e.requires_phi_classification() && e.data_classification != DataClassification::Phi)
            .count();
        if unclassified_phi > 0 {
            violations.push(format!("{unclassified_phi} event(s) target PHI resources without PHI classification"));
        }

        let recommendations = if violations.is_empty() {
            vec!["No action required.".to_string()]
        } else {
            vec!["Investigate flagged events and re-run the integrity verifier.".to_string()]
        };

        let risk_assessment = match compliance_score {
            s if s >= 99.0 => "low",
            s if s >= 90.0 => "moderate",
            _ => "high",
        }
        .to_string();

        let (legal_basis_breakdown, data_subject_rights_count) = if kind == ReportKind::Gdpr {
            let mut breakdown = std::collections::HashMap::new();
            let mut rights_count = 0u64;
            for event in &events {
                if event.is_data_subject_rights_action() {
                    rights_count += 1;
                }
                if let Some(audit_core::ExtensionValue::Map(ctx)) = event.extensions.get("gdprContext") {
                    if let Some(audit_core::ExtensionValue::String(basis)) = ctx.get("legalBasis") {
                        *breakdown.entry(basis.clone()).or_insert(0u64) += 1;
                    }
                }
            }
            (Some(breakdown), Some(rights_count))
        } else {
            (None, None)
        };

        let report = ComplianceReport {
            kind,
            organization_id: organization_id.to_string(),
            period_start,
            period_end,
            total_events,
            verified_events,
            failed_verifications,
            compliance_score,
            violations,
            recommendations,
            risk_assessment,
            legal_basis_breakdown,
            data_subject_rights_count,
        };

        let event = AuditEvent::builder("compliance.report.generated")
            .organization_id(organization_id)
            .outcome_description(format!("{:?} report covering {total_events} events, score {compliance_score:.1}", report.kind))
            .build();
        self.producer.log(event).await?;

        Ok(report)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub id: String,
    pub kind: ReportKind,
    pub organization_id: String,
    /// Cron-like expression; interpretation is the caller's responsibility
    /// (the executor only claims and runs schedules, it doesn't parse cron).
    pub cron_expression: String,
    pub next_run_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReportDelivery: Send + Sync {
    async fn deliver(&self, report: &ComplianceReport) -> Result<()>;
}

pub struct NoopDelivery;

#[async_trait]
impl ReportDelivery for NoopDelivery {
    async fn deliver(&self, _report: &ComplianceReport) -> Result<()> {
        Ok(())
    }
}

pub struct ScheduledReportExecutor {
    engine: Arc<ReportEngine>,
    delivery: Arc<dyn ReportDelivery>,
}

impl ScheduledReportExecutor {
    pub fn new(engine: Arc<ReportEngine>, delivery: Arc<dyn ReportDelivery>) -> Self {
        Self { engine, delivery }
    }

    /// Claims a schedule, runs the report over the trailing 30-day window,
    /// stores nothing itself (the storage adapter already holds the source
    /// events; the artifact is whatever `delivery` does with it), and
    /// records the execution as its own audit event.
    pub async fn execute(&self, schedule: &ReportSchedule) -> Result<ComplianceReport> {
        let period_end = Utc::now();
        let period_start = period_end - chrono::Duration::days(30);
        let report = self
            .engine
            .generate(schedule.kind, &schedule.organization_id, period_start, period_end)
            .await?;

        self.delivery.deliver(&report).await?;

        let event = AuditEvent::builder("compliance.report.scheduled_execution")
            .organization_id(&schedule.organization_id)
            .outcome_description(format!("executed schedule {}", schedule.id))
            .build();
        self.engine.producer.log(event).await?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use audit_core::jobs::{JobId, JobQueue, JobState, JobStatus, QueueStats, QueuedJob};
    use audit_core::{CryptoCore, HmacKeyring, LocalKms, StorageHealth};
    use std::sync::Mutex;

    struct MemStorage {
        events: Vec<AuditEvent>,
    }

    #[async_trait]
    impl StorageAdapter for MemStorage {
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

    fn producer() -> Arc<AuditProducer> {
        let keyring = HmacKeyring::single("k1", b"0123456789abcdef0123456789abcdef".to_vec());
        let kms = LocalKms::new(b"01234567890123456789012345678901", keyring).unwrap();
        let crypto = Arc::new(CryptoCore::new(Box::new(kms), false));
        let queue = Arc::new(InMemoryQueue { jobs: Mutex::new(Vec::new()) });
        Arc::new(AuditProducer::new(queue, crypto))
    }

    #[tokio::test]
    async fn empty_period_scores_perfectly() {
        let storage = Arc::new(MemStorage { events: Vec::new() });
        let engine = ReportEngine::new(storage, producer());
        let report = engine
            .generate(ReportKind::Hipaa, "org-1", Utc::now() - chrono::Duration::days(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.compliance_score, 100.0);
        assert!(report.violations.is_empty());
    }
}
