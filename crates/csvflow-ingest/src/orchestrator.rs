//! Batch orchestrator
//!
//! Lists the upload bucket, keeps the ingestable names, orders them and runs
//! the file pipeline on each one in turn. Files are never processed
//! concurrently: a later file's transform may depend on an earlier file's
//! rows.

use chrono::{DateTime, NaiveDate, Utc};
use csvflow_common::{day_prefix, FileDescriptor};
use std::collections::HashSet;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::config::{FailurePolicy, PipelineConfig};
use crate::error::{self, IngestError, Result};
use crate::ordering::OrderingEngine;
use crate::pipeline::{archive_folder, Cleanup, FilePipeline, Locations, Outcome, PipelineRun, Stage};

/// State of one batch invocation
///
/// `now` is taken once so every file of the batch archives into the same
/// folder.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub id: Uuid,
    pub now: DateTime<Utc>,
    pub files: Vec<FileDescriptor>,
    pub cursor: usize,
}

impl BatchRun {
    pub fn new(now: DateTime<Utc>, files: Vec<FileDescriptor>) -> Self {
        Self {
            id: Uuid::new_v4(),
            now,
            files,
            cursor: 0,
        }
    }

    pub fn archive_folder(&self) -> String {
        archive_folder(self.now)
    }

    /// Next file to process, advancing the cursor
    pub fn next_file(&mut self) -> Option<FileDescriptor> {
        let file = self.files.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(file)
    }

    /// Files the cursor has not reached
    pub fn remaining(&self) -> &[FileDescriptor] {
        self.files.get(self.cursor..).unwrap_or_default()
    }
}

/// Per-file result inside a batch report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Succeeded,
    Skipped,
    Failed {
        /// Last stage reached before the failing step
        stage: Stage,
        error_kind: &'static str,
        message: String,
    },
    /// Batch stopped before reaching this file
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    pub file: String,
    pub status: FileStatus,
}

impl From<&PipelineRun> for FileResult {
    fn from(run: &PipelineRun) -> Self {
        let status = match run.outcome {
            Some(Outcome::Succeeded) => FileStatus::Succeeded,
            Some(Outcome::Skipped) => FileStatus::Skipped,
            Some(Outcome::Failed) | None => FileStatus::Failed {
                stage: run.stage,
                error_kind: run.error.as_ref().map(IngestError::kind).unwrap_or("unknown"),
                message: run
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            },
        };

        Self {
            file: run.file.full_name(),
            status,
        }
    }
}

/// Summary of one batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub archive_folder: String,
    pub files: Vec<FileResult>,
    /// Listing the source bucket failed; nothing was processed
    pub discovery_error: Option<String>,
}

impl BatchReport {
    fn new(batch: &BatchRun) -> Self {
        Self {
            batch_id: batch.id,
            archive_folder: batch.archive_folder(),
            files: Vec::with_capacity(batch.files.len()),
            discovery_error: None,
        }
    }

    fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|r| pred(&r.status)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Succeeded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Failed { .. }))
    }

    pub fn not_attempted(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::NotAttempted))
    }

    /// No failed, unattempted or undiscoverable files
    pub fn is_success(&self) -> bool {
        self.discovery_error.is_none() && self.failed() == 0 && self.not_attempted() == 0
    }
}

/// Runs batches of file pipelines
pub struct BatchOrchestrator {
    pipeline: FilePipeline,
    ordering: OrderingEngine,
}

impl BatchOrchestrator {
    pub fn new(pipeline: FilePipeline) -> Self {
        let ordering = OrderingEngine::from_config(pipeline.config());
        Self { pipeline, ordering }
    }

    fn config(&self) -> &PipelineConfig {
        self.pipeline.config()
    }

    pub fn pipeline(&self) -> &FilePipeline {
        &self.pipeline
    }

    /// Ingest everything waiting in the upload bucket
    pub async fn run_all(&self) -> BatchReport {
        self.run_batch(&self.config().locations(), None).await
    }

    /// Ingest the files of one business day
    pub async fn run_for_day(&self, date: NaiveDate) -> BatchReport {
        self.run_batch(&self.config().locations(), Some(date)).await
    }

    pub async fn run_batch(&self, locations: &Locations, date: Option<NaiveDate>) -> BatchReport {
        self.run_batch_at(locations, date, Utc::now()).await
    }

    /// Run a batch whose archive folder is derived from `now`
    pub async fn run_batch_at(
        &self,
        locations: &Locations,
        date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> BatchReport {
        let mut batch = BatchRun::new(now, Vec::new());
        let span = tracing::info_span!("batch", batch_id = %batch.id);

        async move {
            let discovered = match self.discover(locations, date).await {
                Ok(files) => files,
                Err(err) => {
                    error::report(&err, &locations.source);
                    let mut report = BatchReport::new(&batch);
                    report.discovery_error = Some(err.to_string());
                    return report;
                },
            };

            batch.files = self.ordering.order(discovered);
            self.process(batch, locations).await
        }
        .instrument(span)
        .await
    }

    async fn process(&self, mut batch: BatchRun, locations: &Locations) -> BatchReport {
        let folder = batch.archive_folder();
        let mut report = BatchReport::new(&batch);

        info!(
            "Starting batch import of {} files into {}/{}",
            batch.files.len(),
            locations.destination,
            folder
        );

        // (name, date) pairs whose temporary table a failed run left behind
        let mut held: HashSet<(String, NaiveDate)> = HashSet::new();

        while let Some(file) = batch.next_file() {
            if held.contains(&(file.name.clone(), file.date)) {
                warn!(
                    "Holding back {}: table {} from an earlier failure is still in place",
                    file,
                    file.temporary_table_name(&self.config().dataset.temporary.prefix)
                );
                report.files.push(FileResult {
                    file: file.full_name(),
                    status: FileStatus::NotAttempted,
                });
                continue;
            }

            let run = self
                .pipeline
                .run(&file, locations, &folder, Cleanup::DropTable)
                .await;

            if run.succeeded() {
                info!("✓ Imported {}", file);
            }

            let stop = self.config().failure_policy == FailurePolicy::StopOnFirstFailure
                && run.outcome == Some(Outcome::Failed)
                && !run.error.as_ref().is_some_and(IngestError::is_benign);

            if run.kept_table() {
                held.insert((file.name.clone(), file.date));
            }

            report.files.push(FileResult::from(&run));

            if stop {
                warn!(
                    remaining = batch.remaining().len(),
                    "Stopping batch after {} failed",
                    file
                );
                report.files.extend(batch.remaining().iter().map(|f| FileResult {
                    file: f.full_name(),
                    status: FileStatus::NotAttempted,
                }));
                break;
            }
        }

        info!(
            "Batch completed: {} succeeded, {} skipped, {} failed, {} not attempted",
            report.succeeded(),
            report.skipped(),
            report.failed(),
            report.not_attempted()
        );

        report
    }

    /// List the source bucket and keep parsable names with a transform unit
    async fn discover(
        &self,
        locations: &Locations,
        date: Option<NaiveDate>,
    ) -> Result<Vec<FileDescriptor>> {
        let prefix = date.map(day_prefix);
        let services = self.pipeline.services();

        let objects = services
            .store
            .list(&locations.source, prefix.as_deref())
            .await
            .map_err(IngestError::Storage)?;

        let files = objects
            .into_iter()
            .filter_map(|object| match FileDescriptor::parse(&object.key) {
                Ok(file) => Some(file),
                Err(e) => {
                    debug!("Ignoring {}: {}", object.key, e);
                    None
                },
            })
            .filter(|file| date.is_none_or(|d| file.date == d))
            .filter(|file| {
                let known = services.transforms.has_unit(&file.name);
                if !known {
                    debug!("Ignoring {}: no transform unit", file);
                }
                known
            })
            .collect();

        Ok(files)
    }
}
