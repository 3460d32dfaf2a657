//! Warehouse façade
//!
//! A dataset is a namespace of tables; the pipeline loads each staged CSV into
//! a temporary table of the temporary dataset and then runs the file's
//! transform unit against it.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::storage::ObjectRef;

pub mod postgres;

pub use postgres::PgWarehouse;

/// Handle on a dataset (table namespace)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub name: String,
    pub location: String,
}

impl DatasetRef {
    pub fn table(&self, name: impl Into<String>) -> TableRef {
        TableRef {
            dataset: self.name.clone(),
            name: name.into(),
        }
    }
}

/// Handle on a table inside a dataset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub name: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.name)
    }
}

/// Column declared by a schema file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "NULLABLE".to_string()
}

impl ColumnSchema {
    pub fn is_required(&self) -> bool {
        self.mode.eq_ignore_ascii_case("required")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Replace any existing rows
    WriteTruncate,
    WriteAppend,
}

/// Load job settings for one logical file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLoadMetadata {
    pub schema: Vec<ColumnSchema>,
    pub skip_leading_rows: u32,
    pub field_delimiter: char,
    pub write_disposition: WriteDisposition,
}

impl JobLoadMetadata {
    /// CSV with one header row, comma separated, replacing existing rows
    pub fn csv(schema: Vec<ColumnSchema>) -> Self {
        Self {
            schema,
            skip_leading_rows: 1,
            field_delimiter: ',',
            write_disposition: WriteDisposition::WriteTruncate,
        }
    }
}

/// Outcome of a load job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    /// The job finished without errors
    pub done: bool,
    pub rows: u64,
    pub errors: Vec<String>,
}

impl LoadResult {
    pub fn done(rows: u64) -> Self {
        Self {
            done: true,
            rows,
            errors: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            done: false,
            rows: 0,
            errors: vec![error.into()],
        }
    }
}

/// A parametrized transform resolved from a file's logical name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformUnit {
    pub name: String,
    pub path: PathBuf,
}

/// Parameters bound into a transform unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformParams {
    pub table_suffix: String,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Resolve (and create if needed) a dataset
    async fn dataset(&self, name: &str, location: &str) -> Result<DatasetRef>;

    /// Load a staged object into `table`
    async fn load(
        &self,
        table: &TableRef,
        staged: &ObjectRef,
        metadata: &JobLoadMetadata,
    ) -> Result<LoadResult>;

    async fn delete_table(&self, table: &TableRef) -> Result<()>;

    /// Run a transform unit; `Ok(false)` when the unit reports failure
    async fn execute_transform(&self, unit: &TransformUnit, params: &TransformParams)
        -> Result<bool>;
}
