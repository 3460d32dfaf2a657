//! csvflow - CSV ingestion tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use csvflow_common::logging::{init_logging, LogConfig, LogLevel};
use csvflow_common::parse_date;
use csvflow_ingest::{
    ArchiveNaming, BatchOrchestrator, BatchReport, Collaborators, FilePipeline, FileStatus,
    JsonSchemaResolver, PgWarehouse, PipelineConfig, ReplayMessage, ReplayTrigger, S3ObjectStore,
    SqlFileResolver, StorageConfig, TriggerOutcome, UploadEvent, UploadTrigger, WarehouseConfig,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "csvflow")]
#[command(author, version, about = "Date-stamped CSV ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "CSVFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every file waiting in the upload bucket
    RunAll,

    /// Import the files of one business day
    RunDay {
        /// Business date (YYYY-MM-DD)
        #[arg(short, long)]
        date: String,
    },

    /// Import a single uploaded object
    File {
        /// Object name, e.g. 2024-01-02-sales.csv
        name: String,

        /// Keep the temporary table after a successful import
        #[arg(long)]
        keep_table: bool,
    },

    /// Handle an upload-finished event read from a JSON file
    UploadEvent {
        path: PathBuf,
    },

    /// Handle a replay message read from a JSON file
    Replay {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("csvflow")
        .build()
        // Environment variables take precedence
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = Arc::new(PipelineConfig::load(cli.config.as_deref())?);
    let orchestrator = Arc::new(BatchOrchestrator::new(build_pipeline(config.clone()).await?));

    let ok = match cli.command {
        Command::RunAll => summarize(&orchestrator.run_all().await),
        Command::RunDay { date } => {
            let date = parse_date(&date)?;
            summarize(&orchestrator.run_for_day(date).await)
        },
        Command::File { name, keep_table } => {
            let ok = orchestrator
                .pipeline()
                .ingest_name(&name, &config.locations(), !keep_table)
                .await;
            println!("{}: {}", name, if ok { "imported" } else { "failed" });
            ok
        },
        Command::UploadEvent { path } => {
            let event: UploadEvent = read_json(&path)?;
            let trigger = UploadTrigger::new(orchestrator.clone(), &config);
            dispatched(trigger.handle(&event).await)
        },
        Command::Replay { path } => {
            let content = read_file(&path)?;
            match serde_json::from_str::<ReplayMessage>(&content) {
                Ok(message) => {
                    let trigger = ReplayTrigger::new(orchestrator.clone(), &config);
                    dispatched(trigger.handle(&message).await)
                },
                Err(e) => {
                    debug!("Ignoring malformed replay message in {}: {}", path.display(), e);
                    dispatched(TriggerOutcome::Ignored)
                },
            }
        },
    };

    info!("csvflow finished");

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn build_pipeline(config: Arc<PipelineConfig>) -> Result<FilePipeline> {
    let store = Arc::new(S3ObjectStore::new(StorageConfig::from_env()?).await?);
    let warehouse = PgWarehouse::connect(&WarehouseConfig::from_env()?, store.clone()).await?;

    let services = Collaborators {
        store: store.clone(),
        warehouse: Arc::new(warehouse),
        schemas: Arc::new(JsonSchemaResolver::new(&config.files.json)),
        transforms: Arc::new(SqlFileResolver::new(&config.files.sql)),
        naming: Arc::new(ArchiveNaming::new(store)),
    };

    Ok(FilePipeline::new(config, services))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = read_file(path)?;
    serde_json::from_str(&content).with_context(|| format!("Invalid event in {}", path.display()))
}

fn dispatched(outcome: TriggerOutcome) -> bool {
    match outcome {
        TriggerOutcome::Dispatched(report) => summarize(&report),
        TriggerOutcome::Ignored => {
            println!("Event ignored");
            true
        },
    }
}

/// Print the batch report; true when every file went through
fn summarize(report: &BatchReport) -> bool {
    println!("Batch {} (archive folder {})", report.batch_id, report.archive_folder);

    if let Some(error) = &report.discovery_error {
        println!("  listing failed: {}", error);
    }

    for result in &report.files {
        let status = match &result.status {
            FileStatus::Succeeded => "✓ imported".to_string(),
            FileStatus::Skipped => "- skipped".to_string(),
            FileStatus::Failed { stage, message, .. } => {
                format!("✗ failed after {:?}: {}", stage, message)
            },
            FileStatus::NotAttempted => "· not attempted".to_string(),
        };
        println!("  {} {}", result.file, status);
    }

    println!(
        "{} succeeded, {} skipped, {} failed, {} not attempted",
        report.succeeded(),
        report.skipped(),
        report.failed(),
        report.not_attempted()
    );

    report.is_success()
}
