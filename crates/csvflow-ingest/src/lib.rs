//! csvflow ingest library
//!
//! Moves date-stamped CSV uploads into the warehouse, one file at a time and
//! in a deterministic order.
//!
//! # Flow
//!
//! - **trigger**: upload and replay events start a batch
//! - **orchestrator**: lists the upload bucket, orders the files and runs them
//!   sequentially
//! - **ordering**: configured name order, then date, then version
//! - **pipeline**: per-file state machine (stage, load, transform, archive,
//!   clean)
//!
//! Collaborators live behind traits: [`storage::ObjectStore`],
//! [`warehouse::Warehouse`], [`resolver::SchemaResolver`],
//! [`resolver::TransformResolver`] and [`naming::NamingResolver`].
//!
//! # Example
//!
//! ```no_run
//! use csvflow_ingest::{
//!     ArchiveNaming, BatchOrchestrator, Collaborators, FilePipeline, JsonSchemaResolver,
//!     PgWarehouse, PipelineConfig, S3ObjectStore, SqlFileResolver, StorageConfig,
//!     WarehouseConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(PipelineConfig::load(None)?);
//!     let store = Arc::new(S3ObjectStore::new(StorageConfig::from_env()?).await?);
//!     let warehouse = PgWarehouse::connect(&WarehouseConfig::from_env()?, store.clone()).await?;
//!
//!     let pipeline = FilePipeline::new(
//!         config.clone(),
//!         Collaborators {
//!             store: store.clone(),
//!             warehouse: Arc::new(warehouse),
//!             schemas: Arc::new(JsonSchemaResolver::new(&config.files.json)),
//!             transforms: Arc::new(SqlFileResolver::new(&config.files.sql)),
//!             naming: Arc::new(ArchiveNaming::new(store)),
//!         },
//!     );
//!
//!     let report = BatchOrchestrator::new(pipeline).run_all().await;
//!     println!("{} files imported", report.succeeded());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod naming;
pub mod orchestrator;
pub mod ordering;
pub mod pipeline;
pub mod resolver;
pub mod storage;
pub mod trigger;
pub mod warehouse;

pub use config::{FailurePolicy, PipelineConfig, WarehouseConfig};
pub use error::{IngestError, Result};
pub use naming::{ArchiveNaming, NamingResolver};
pub use orchestrator::{BatchOrchestrator, BatchReport, BatchRun, FileResult, FileStatus};
pub use ordering::OrderingEngine;
pub use pipeline::{Cleanup, Collaborators, FilePipeline, Locations, Outcome, PipelineRun, Stage};
pub use resolver::{JsonSchemaResolver, SchemaResolver, SqlFileResolver, TransformResolver};
pub use storage::{config::StorageConfig, ObjectStore, S3ObjectStore};
pub use trigger::{
    DayCompletePredicate, ReplayMessage, ReplayTrigger, SentinelFile, TriggerOutcome,
    UploadEvent, UploadTrigger,
};
pub use warehouse::{PgWarehouse, Warehouse};
