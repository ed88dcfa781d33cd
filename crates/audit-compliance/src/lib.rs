pub mod alerting;
pub mod gdpr;
pub mod integrity;
pub mod reports;
pub mod retention;

pub use alerting::{Alert, AlertManager, AlertState, ProbeTarget};
pub use gdpr::{ExportFormat, GdprEngine, PseudonymizationMode, SubjectExport};
pub use integrity::{IntegrityVerifier, VerificationReport};
pub use reports::{ComplianceReport, NoopDelivery, ReportDelivery, ReportEngine, ReportKind, ReportSchedule, ScheduledReportExecutor};
pub use retention::{RetentionPolicy, RetentionSweeper, SweepReport};
