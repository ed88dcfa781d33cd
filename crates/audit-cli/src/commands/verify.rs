//! `verify --from T1 --to T2 [--org ID]`: runs the integrity verifier over
//! a time range and reports tampered/missing-hash/signature-invalid rows.

use crate::runtime::Runtime;
use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::*;
use std::process::ExitCode;

pub async fn execute(runtime: &Runtime, org: Option<&str>, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<ExitCode> {
    let Some(organization_id) = org else {
        eprintln!(
            "{} --org is required: integrity verification has no cross-tenant scan",
            "input error:".red().bold()
        );
        return Ok(ExitCode::from(2));
    };

    if from > to {
        eprintln!("{} --from must not be after --to", "input error:".red().bold());
        return Ok(ExitCode::from(2));
    }

    let report = runtime.verifier.verify(organization_id, from, to).await?;

    println!("{}", format!("verification report for {organization_id}").bold());
    println!("  checked:            {}", report.total_checked);
    println!("  valid:              {}", report.valid.to_string().green());
    println!("  missing hash:       {}", report.missing_hash.len());
    println!("  tampered:           {}", report.tampered.len());
    println!("  signature invalid:  {}", report.signature_invalid.len());

    for id in &report.tampered {
        println!("    {} {id}", "tampered:".red());
    }
    for id in &report.missing_hash {
        println!("    {} {id}", "missing hash:".yellow());
    }
    for id in &report.signature_invalid {
        println!("    {} {id}", "bad signature:".red());
    }

    if !report.tampered.is_empty() || !report.signature_invalid.is_empty() {
        Ok(ExitCode::from(3))
    } else if !report.missing_hash.is_empty() {
        Ok(ExitCode::from(4))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
