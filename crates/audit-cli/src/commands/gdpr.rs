//! `gdpr export|erase|pseudonymize --subject ID`: data-subject rights
//! operations, each itself producing an auditable `gdpr.*` event.

use crate::runtime::Runtime;
use anyhow::Result;
use audit_compliance::{ExportFormat, PseudonymizationMode};
use colored::*;
use std::process::ExitCode;

pub async fn export(runtime: &Runtime, org: &str, subject: &str, format: &str) -> Result<ExitCode> {
    let format = match format.to_lowercase().as_str() {
        "json" => ExportFormat::Json,
        "csv" => ExportFormat::Csv,
        "xml" => ExportFormat::Xml,
        other => {
            eprintln!("{} unknown export format '{other}' (expected json, csv, xml)", "input error:".red().bold());
            return Ok(ExitCode::from(2));
        }
    };

    let export = runtime.gdpr.export(org, subject, format).await?;
    println!("{}", export.payload);
    eprintln!("{} {} event(s) exported for {subject}", "export complete:".green().bold(), export.event_count);
    Ok(ExitCode::SUCCESS)
}

pub async fn erase(runtime: &Runtime, org: &str, subject: &str) -> Result<ExitCode> {
    let affected = runtime.gdpr.erase(org, subject).await?;
    println!("{} {affected} event(s) affected for {subject}", "erasure complete:".green().bold());
    Ok(ExitCode::SUCCESS)
}

pub async fn pseudonymize(runtime: &Runtime, subject: &str, random: bool) -> Result<ExitCode> {
    let mode = if random { PseudonymizationMode::Random } else { PseudonymizationMode::Deterministic };
    let pseudonym = runtime.gdpr.pseudonymize(subject, mode).await?;
    println!("{} {subject} -> {pseudonym}", "pseudonymized:".green().bold());
    Ok(ExitCode::SUCCESS)
}
