//! Operator CLI for the audit ingestion and compliance pipeline.
//!
//! Exit codes: 0 success, 2 input error, 3 integrity failure, 4 partial
//! success, 1 unexpected.

use audit_cli::commands::{dlq, gdpr, retention, verify};
use audit_cli::Runtime;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audit-cli")]
#[command(version)]
#[command(about = "Operator CLI for the audit ingestion and compliance pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute hashes/signatures for stored events and report tampering
    Verify {
        #[arg(long)]
        from: DateTime<Utc>,

        #[arg(long)]
        to: DateTime<Utc>,

        #[arg(long)]
        org: Option<String>,
    },

    /// Run the retention sweep for one organization
    RetentionApply {
        #[arg(long)]
        org: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Dead-letter queue inspection and recovery
    #[command(subcommand)]
    Dlq(DlqCommand),

    /// Data-subject rights operations
    #[command(subcommand)]
    Gdpr(GdprCommand),
}

#[derive(Subcommand)]
enum DlqCommand {
    /// List parked jobs
    List {
        #[arg(long, default_value = "50")]
        limit: u32,
    },
    /// Requeue a parked job onto the primary queue
    Requeue {
        #[arg(long)]
        job_id: String,
    },
    /// Permanently remove parked records older than the given age
    Purge {
        #[arg(long, default_value = "90")]
        older_than_days: i64,
    },
}

#[derive(Subcommand)]
enum GdprCommand {
    /// Export a data subject's events, stripped of internal fields
    Export {
        #[arg(long)]
        org: String,

        #[arg(long)]
        subject: String,

        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Erase or pseudonymize a data subject's events
    Erase {
        #[arg(long)]
        org: String,

        #[arg(long)]
        subject: String,
    },
    /// Mint or fetch a pseudonym for a data subject, without touching storage
    Pseudonymize {
        #[arg(long)]
        subject: String,

        /// Use a fresh random pseudonym instead of the deterministic one
        #[arg(long)]
        random: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    let config = match audit_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e}", "configuration error:".red().bold());
            return ExitCode::from(2);
        }
    };

    let runtime = match Runtime::bootstrap(config.clone()).await {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} {e:#}", "failed to initialize:".red().bold());
            return ExitCode::from(1);
        }
    };

    match dispatch(cli.command, &runtime, &config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::from(1)
        }
    }
}

async fn dispatch(command: Commands, runtime: &Runtime, config: &audit_core::Config) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Verify { from, to, org } => verify::execute(runtime, org.as_deref(), from, to).await,

        Commands::RetentionApply { org, dry_run } => retention::execute(runtime, config, &org, dry_run).await,

        Commands::Dlq(DlqCommand::List { limit }) => dlq::list(runtime, limit).await,
        Commands::Dlq(DlqCommand::Requeue { job_id }) => dlq::requeue(runtime, &job_id).await,
        Commands::Dlq(DlqCommand::Purge { older_than_days }) => dlq::purge(runtime, older_than_days).await,

        Commands::Gdpr(GdprCommand::Export { org, subject, format }) => {
            gdpr::export(runtime, &org, &subject, &format).await
        }
        Commands::Gdpr(GdprCommand::Erase { org, subject }) => gdpr::erase(runtime, &org, &subject).await,
        Commands::Gdpr(GdprCommand::Pseudonymize { subject, random }) => {
            gdpr::pseudonymize(runtime, &subject, random).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "audit_cli=info".into()))
        .init();
}
