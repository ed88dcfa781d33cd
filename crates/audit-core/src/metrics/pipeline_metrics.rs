use prometheus::{IntCounterVec, Opts};

/// Pipeline-wide counters, registered into the shared `MetricsRegistry`
/// under the `audit_pipeline` namespace.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub events_ingested_total: IntCounterVec,
    pub validation_failures_total: IntCounterVec,
    pub retries_total: IntCounterVec,
    pub dlq_parks_total: IntCounterVec,
    pub integrity_failures_total: IntCounterVec,
    pub report_executions_total: IntCounterVec,
    pub pseudonymizations_total: IntCounterVec,
    /// Events dropped by the storage adapter's idempotent upsert because an
    /// event with the same `(organization_id, hash)` was already stored.
    pub duplicates_total: IntCounterVec,
}

impl PipelineMetrics {
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let events_ingested_total = IntCounterVec::new(
            Opts::new(format!("{namespace}_events_ingested_total"), "Total audit events ingested"),
            &["organization_id"],
        )?;

        let validation_failures_total = IntCounterVec::new(
            Opts::new(format!("{namespace}_validation_failures_total"), "Total validation failures"),
            &["organization_id"],
        )?;

        let retries_total = IntCounterVec::new(
            Opts::new(format!("{namespace}_retries_total"), "Total job retry attempts"),
            &["job_type"],
        )?;

        let dlq_parks_total = IntCounterVec::new(
            Opts::new(format!("{namespace}_dlq_parks_total"), "Total jobs parked in the dead-letter queue"),
            &["job_type"],
        )?;

        let integrity_failures_total = IntCounterVec::new(
            Opts::new(format!("{namespace}_integrity_failures_total"), "Total integrity verification failures"),
            &["organization_id", "kind"],
        )?;

        let report_executions_total = IntCounterVec::new(
            Opts::new(format!("{namespace}_report_executions_total"), "Total scheduled report executions"),
            &["report_type", "status"],
        )?;

        let pseudonymizations_total = IntCounterVec::new(
            Opts::new(format!("{namespace}_pseudonymizations_total"), "Total principal pseudonymization operations"),
            &["organization_id", "mode"],
        )?;

        let duplicates_total = IntCounterVec::new(
            Opts::new(format!("{namespace}_duplicates_total"), "Total events dropped as duplicates of an already-stored event"),
            &["organization_id"],
        )?;

        Ok(Self {
            events_ingested_total,
            validation_failures_total,
            retries_total,
            dlq_parks_total,
            integrity_failures_total,
            report_executions_total,
            pseudonymizations_total,
            duplicates_total,
        })
    }

    /// Register every collector with the shared registry. A caller should
    /// construct this once at startup and hold onto it for the metrics to
    /// keep incrementing across the process lifetime.
    pub fn register_with(&self, registry: &super::MetricsRegistry) -> Result<(), prometheus::Error> {
        registry.register(self.events_ingested_total.clone())?;
        registry.register(self.validation_failures_total.clone())?;
        registry.register(self.retries_total.clone())?;
        registry.register(self.dlq_parks_total.clone())?;
        registry.register(self.integrity_failures_total.clone())?;
        registry.register(self.report_executions_total.clone())?;
        registry.register(self.pseudonymizations_total.clone())?;
        registry.register(self.duplicates_total.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::MetricsRegistry;

    #[test]
    fn registers_without_error() {
        let metrics = PipelineMetrics::new("audit_pipeline").unwrap();
        let registry = MetricsRegistry::new(MetricsConfig {
            enabled: true,
            port: 9100,
            path: "/metrics".to_string(),
            namespace: "audit".to_string(),
        });
        metrics.register_with(&registry).unwrap();
        metrics.events_ingested_total.with_label_values(&["org-1"]).inc();
        assert!(registry.metrics_text().contains("audit_pipeline_events_ingested_total"));
    }
}
