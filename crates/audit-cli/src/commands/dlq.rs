//! `dlq list|requeue|purge`: inspection and manual recovery for jobs parked
//! by the reliable processor after exhausting retries.

use crate::runtime::Runtime;
use anyhow::{Context, Result};
use audit_core::jobs::{JobId, JobPriority, JobStatus, QueuedJob};
use chrono::{Duration, Utc};
use colored::*;
use std::process::ExitCode;

pub async fn list(runtime: &Runtime, limit: u32) -> Result<ExitCode> {
    let records = runtime.dlq.list(limit).await?;
    if records.is_empty() {
        println!("{}", "dead-letter queue is empty".green());
        return Ok(ExitCode::SUCCESS);
    }

    for record in &records {
        println!(
            "{}  type={}  attempts={}  parked_at={}  error={}",
            record.job_id.to_string().bold(),
            record.job_type,
            record.attempts,
            record.parked_at.to_rfc3339(),
            record.last_error
        );
    }
    println!("{} record(s)", records.len());
    Ok(ExitCode::SUCCESS)
}

pub async fn requeue(runtime: &Runtime, job_id: &str) -> Result<ExitCode> {
    let id = JobId::from_string(job_id);
    let Some(record) = runtime.dlq.take(&id).await? else {
        eprintln!("{} no dead-letter record for job {job_id}", "input error:".red().bold());
        return Ok(ExitCode::from(2));
    };

    let status = JobStatus::new(record.job_id.clone(), record.job_type.clone(), JobPriority::Normal);
    let job = QueuedJob {
        id: record.job_id.clone(),
        job_type: record.job_type.clone(),
        priority: JobPriority::Normal,
        data: record.payload.clone(),
        status,
    };

    runtime
        .queue
        .enqueue(job)
        .await
        .context("failed to requeue job onto the primary queue")?;

    println!("{} {job_id}", "requeued:".green().bold());
    Ok(ExitCode::SUCCESS)
}

pub async fn purge(runtime: &Runtime, older_than_days: i64) -> Result<ExitCode> {
    let cutoff = Utc::now() - Duration::days(older_than_days);
    let purged = runtime.dlq.purge_older_than(cutoff).await?;
    println!("{} {purged} record(s) older than {older_than_days} day(s)", "purged:".green().bold());
    Ok(ExitCode::SUCCESS)
}
