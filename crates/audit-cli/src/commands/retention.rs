//! `retention-apply [--dry-run]`: runs the daily retention sweep for one
//! organization on demand, using the configured default retention window.

use crate::runtime::Runtime;
use anyhow::Result;
use audit_compliance::RetentionPolicy;
use audit_core::{AuditQuery, Config};
use chrono::{Duration, Utc};
use colored::*;
use std::process::ExitCode;

pub async fn execute(runtime: &Runtime, config: &Config, org: &str, dry_run: bool) -> Result<ExitCode> {
    let policy = RetentionPolicy {
        id: "default".to_string(),
        retention_days: config.retention.default_days,
    };

    if dry_run {
        let cutoff = Utc::now() - Duration::days(policy.retention_days);
        let epoch = chrono::DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now);
        let query = AuditQuery::builder(org).time_range(epoch, cutoff).build();
        let eligible = runtime.storage.count_events(&query).await?;
        println!(
            "{} {eligible} event(s) in {org} are past the {}-day retention window (no changes made)",
            "dry run:".yellow().bold(),
            policy.retention_days
        );
        return Ok(ExitCode::SUCCESS);
    }

    let report = runtime.sweeper.sweep(org, &policy, Utc::now()).await?;
    println!(
        "{} {org}: deleted {}, pseudonymized {}",
        "retention applied:".green().bold(),
        report.deleted,
        report.pseudonymized
    );
    Ok(ExitCode::SUCCESS)
}
