//! Single-file ingestion state machine
//!
//! ```text
//! Discovered -> StagedToTemp -> LoadedToTable -> Transformed -> Archived -> Cleaned
//! ```
//!
//! Each stage boundary is a single awaited step. A failed step ends the run in
//! [`Outcome::Failed`] and leaves every earlier side effect in place, so the
//! staged object (and, after a failed archive, the temporary table) can be
//! inspected or retried by hand. Files that are not ingestable end in
//! [`Outcome::Skipped`] before any side effect.

use chrono::{DateTime, Utc};
use csvflow_common::FileDescriptor;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{self, IngestError, Result};
use crate::naming::{archive_key, NamingResolver};
use crate::resolver::{SchemaResolver, TransformResolver};
use crate::storage::{ObjectRef, ObjectStore};
use crate::warehouse::{TableRef, TransformParams, Warehouse};

/// Folder name format for one batch under the archive bucket
pub const ARCHIVE_FOLDER_FORMAT: &str = "%Y-%m-%d";

/// Archive folder for a batch started at `now`
pub fn archive_folder(now: DateTime<Utc>) -> String {
    now.format(ARCHIVE_FOLDER_FORMAT).to_string()
}

/// Buckets a file moves through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locations {
    pub source: String,
    pub temporary: String,
    pub destination: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovered,
    StagedToTemp,
    LoadedToTable,
    Transformed,
    Archived,
    Cleaned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Skipped,
    Failed,
}

/// Whether the temporary table survives a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    DropTable,
    KeepTable,
}

impl From<bool> for Cleanup {
    fn from(clean: bool) -> Self {
        if clean {
            Cleanup::DropTable
        } else {
            Cleanup::KeepTable
        }
    }
}

/// Progress of one file through the state machine
///
/// `stage` is the last stage reached. On failure it names the stage the file
/// was in when the next step failed.
#[derive(Debug)]
pub struct PipelineRun {
    pub file: FileDescriptor,
    pub stage: Stage,
    pub staged: Option<ObjectRef>,
    pub table: Option<TableRef>,
    pub archived: Option<ObjectRef>,
    pub outcome: Option<Outcome>,
    pub error: Option<IngestError>,
}

impl PipelineRun {
    pub fn new(file: FileDescriptor) -> Self {
        Self {
            file,
            stage: Stage::Discovered,
            staged: None,
            table: None,
            archived: None,
            outcome: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Some(Outcome::Succeeded)
    }

    /// Failed after loading, so its temporary table was left in place
    pub fn kept_table(&self) -> bool {
        self.outcome == Some(Outcome::Failed)
            && matches!(self.stage, Stage::LoadedToTable | Stage::Transformed)
    }

    fn finish(&mut self, outcome: Outcome, error: Option<IngestError>) {
        if let Some(err) = &error {
            error::report(err, &self.file.full_name());
        }
        self.outcome = Some(outcome);
        self.error = error;
    }

    fn staged_object(&self) -> Result<ObjectRef> {
        self.staged
            .clone()
            .ok_or_else(|| IngestError::InvalidState(format!("{} was never staged", self.file)))
    }

    fn loaded_table(&self) -> Result<TableRef> {
        self.table
            .clone()
            .ok_or_else(|| IngestError::InvalidState(format!("{} was never loaded", self.file)))
    }
}

/// Services a pipeline run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ObjectStore>,
    pub warehouse: Arc<dyn Warehouse>,
    pub schemas: Arc<dyn SchemaResolver>,
    pub transforms: Arc<dyn TransformResolver>,
    pub naming: Arc<dyn NamingResolver>,
}

/// Drives one file from upload to archive
#[derive(Clone)]
pub struct FilePipeline {
    config: Arc<PipelineConfig>,
    services: Collaborators,
}

impl FilePipeline {
    pub fn new(config: Arc<PipelineConfig>, services: Collaborators) -> Self {
        Self { config, services }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn services(&self) -> &Collaborators {
        &self.services
    }

    /// Ingest one file outside a batch
    ///
    /// Never fails: errors are reported and turned into `false`. The archive
    /// folder is derived from the current time.
    pub async fn ingest(&self, file: &FileDescriptor, locations: &Locations, clean: bool) -> bool {
        let folder = archive_folder(Utc::now());
        self.run(file, locations, &folder, Cleanup::from(clean))
            .await
            .succeeded()
    }

    /// Parse an object name and ingest it
    pub async fn ingest_name(&self, object_name: &str, locations: &Locations, clean: bool) -> bool {
        match FileDescriptor::parse(object_name) {
            Ok(file) => self.ingest(&file, locations, clean).await,
            Err(e) => {
                error::report(&IngestError::from(e), object_name);
                false
            },
        }
    }

    /// Run the state machine for one file, archiving under `folder`
    #[instrument(skip(self, locations, file), fields(file = %file))]
    pub async fn run(
        &self,
        file: &FileDescriptor,
        locations: &Locations,
        folder: &str,
        cleanup: Cleanup,
    ) -> PipelineRun {
        let mut run = PipelineRun::new(file.clone());

        if let Err(err) = self.check_ingestable(file) {
            run.finish(Outcome::Skipped, Some(err));
            return run;
        }

        while run.stage != Stage::Cleaned {
            let from = run.stage;
            match self.step(&mut run, locations, folder, cleanup).await {
                Ok(to) => {
                    debug!(?from, ?to, "Stage complete");
                    run.stage = to;
                },
                Err(err) => {
                    warn!(stage = ?from, "Stopping {} after failed step", file);
                    run.finish(Outcome::Failed, Some(err));
                    return run;
                },
            }
        }

        run.finish(Outcome::Succeeded, None);
        run
    }

    /// Advance one stage
    async fn step(
        &self,
        run: &mut PipelineRun,
        locations: &Locations,
        folder: &str,
        cleanup: Cleanup,
    ) -> Result<Stage> {
        match run.stage {
            Stage::Discovered => {
                let staged = self.stage_to_temp(&run.file, locations).await?;
                run.staged = Some(staged);
                Ok(Stage::StagedToTemp)
            },
            Stage::StagedToTemp => {
                let staged = run.staged_object()?;
                let table = self.load_to_table(&run.file, &staged).await?;
                run.table = Some(table);
                Ok(Stage::LoadedToTable)
            },
            Stage::LoadedToTable => {
                self.transform(&run.file).await?;
                Ok(Stage::Transformed)
            },
            Stage::Transformed => {
                let staged = run.staged_object()?;
                let archived = self.archive(&run.file, &staged, locations, folder).await?;
                run.archived = Some(archived);
                Ok(Stage::Archived)
            },
            Stage::Archived => {
                let staged = run.staged_object()?;
                let table = run.loaded_table()?;
                self.clean(&staged, &table, cleanup).await?;
                Ok(Stage::Cleaned)
            },
            Stage::Cleaned => Ok(Stage::Cleaned),
        }
    }

    /// CSV extension, a schema and a transform unit
    fn check_ingestable(&self, file: &FileDescriptor) -> Result<()> {
        if file.is_csv()
            && self.services.schemas.has_schema(&file.name)
            && self.services.transforms.has_unit(&file.name)
        {
            Ok(())
        } else {
            Err(IngestError::UnrecognizedFile(file.full_name()))
        }
    }

    /// Move the upload into the temporary bucket
    async fn stage_to_temp(&self, file: &FileDescriptor, locations: &Locations) -> Result<ObjectRef> {
        let store = &self.services.store;
        let source = ObjectRef::new(&locations.source, file.full_name());

        if !store.exists(&source).await.map_err(IngestError::Storage)? {
            return Err(IngestError::NotFound(source.to_string()));
        }

        let staged = ObjectRef::new(&locations.temporary, file.full_name());
        let copy = store
            .copy(&source, &staged)
            .await
            .map_err(IngestError::Storage)?;

        if !copy.confirmed {
            return Err(IngestError::CopyFailure {
                from: source.to_string(),
                to: staged.to_string(),
            });
        }

        store.delete(&source).await.map_err(IngestError::Storage)?;
        debug!("Moved {} to {}", source, staged);

        Ok(staged)
    }

    async fn load_to_table(&self, file: &FileDescriptor, staged: &ObjectRef) -> Result<TableRef> {
        let dataset_config = &self.config.dataset.temporary;

        let dataset = self
            .services
            .warehouse
            .dataset(&dataset_config.name, &dataset_config.location)
            .await
            .map_err(IngestError::Warehouse)?;
        let table = dataset.table(file.temporary_table_name(&dataset_config.prefix));

        let metadata = self
            .services
            .schemas
            .job_metadata(&file.name)
            .map_err(IngestError::Schema)?;

        let result = self
            .services
            .warehouse
            .load(&table, staged, &metadata)
            .await
            .map_err(IngestError::Warehouse)?;

        if !result.done {
            return Err(IngestError::LoadFailure {
                table: table.to_string(),
                reason: result.errors.join("; "),
            });
        }

        debug!(rows = result.rows, "Loaded {} into {}", staged, table);
        Ok(table)
    }

    async fn transform(&self, file: &FileDescriptor) -> Result<()> {
        let unit = self.services.transforms.unit_for(&file.name);
        let params = TransformParams {
            table_suffix: file.table_suffix(),
        };

        let ok = self
            .services
            .warehouse
            .execute_transform(&unit, &params)
            .await
            .map_err(IngestError::Warehouse)?;

        if !ok {
            return Err(IngestError::TransformFailure {
                unit: unit.path.display().to_string(),
            });
        }

        Ok(())
    }

    /// Copy the staged object into the batch folder of the archive bucket
    async fn archive(
        &self,
        file: &FileDescriptor,
        staged: &ObjectRef,
        locations: &Locations,
        folder: &str,
    ) -> Result<ObjectRef> {
        let name = self
            .services
            .naming
            .safe_archive_name(&locations.destination, folder, file)
            .await
            .map_err(IngestError::Storage)?;
        let archived = ObjectRef::new(&locations.destination, archive_key(folder, &name));

        let copy = self
            .services
            .store
            .copy(staged, &archived)
            .await
            .map_err(IngestError::Storage)?;

        if !copy.confirmed {
            return Err(IngestError::CopyFailure {
                from: staged.to_string(),
                to: archived.to_string(),
            });
        }

        info!("Archived {} as {}", file, archived);
        Ok(archived)
    }

    async fn clean(&self, staged: &ObjectRef, table: &TableRef, cleanup: Cleanup) -> Result<()> {
        self.services
            .store
            .delete(staged)
            .await
            .map_err(IngestError::Storage)?;

        if cleanup == Cleanup::DropTable {
            self.services
                .warehouse
                .delete_table(table)
                .await
                .map_err(IngestError::Warehouse)?;
        }

        Ok(())
    }
}
