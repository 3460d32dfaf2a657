//! Pipeline configuration
//!
//! Built once at startup and shared read-only (`Arc<PipelineConfig>`) by the
//! orchestrator, the state machine and the trigger adapters.
//!
//! Sources, later ones win:
//! 1. built-in defaults
//! 2. an optional TOML file (`--config csvflow.toml`)
//! 3. `CSVFLOW__*` environment variables, `__` separating nested keys, e.g.
//!    `CSVFLOW__BUCKET__UPLOAD=landing` or `CSVFLOW__ORDER=customers,sales`
//!
//! A `.env` file in the working directory is read first.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::pipeline::Locations;

/// Environment prefix for pipeline settings
pub const ENV_PREFIX: &str = "CSVFLOW";

pub const DEFAULT_UPLOAD_BUCKET: &str = "upload";
pub const DEFAULT_TEMPORARY_BUCKET: &str = "temp";
pub const DEFAULT_ARCHIVE_BUCKET: &str = "archive";
pub const DEFAULT_REPLAY_MESSAGE: &str = "upload";
pub const DEFAULT_TEMPORARY_DATASET: &str = "tmp";
pub const DEFAULT_TEMPORARY_TABLE_PREFIX: &str = "tmp_csv_";
pub const DEFAULT_DATASET_LOCATION: &str = "us-central1";
pub const DEFAULT_SCHEMA_DIR: &str = "json";
pub const DEFAULT_TRANSFORM_DIR: &str = "sql";

/// Upload that marks a business day as complete
pub const DEFAULT_SENTINEL: &str = "till_status";

/// Main pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub bucket: BucketConfig,
    pub pub_sub: PubSubConfig,
    pub dataset: DatasetConfig,
    pub files: FilesConfig,
    /// Logical file names, earlier entries are processed first
    pub order: Vec<String>,
    pub trigger: TriggerConfig,
    pub failure_policy: FailurePolicy,
}

/// The three storage locations a file moves through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub upload: String,
    pub temporary: String,
    pub archive: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            upload: DEFAULT_UPLOAD_BUCKET.to_string(),
            temporary: DEFAULT_TEMPORARY_BUCKET.to_string(),
            archive: DEFAULT_ARCHIVE_BUCKET.to_string(),
        }
    }
}

/// Replay trigger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Token a replay message must carry to start a full run
    pub message: String,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            message: DEFAULT_REPLAY_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub temporary: TemporaryDatasetConfig,
}

/// Namespace of the per-file temporary tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporaryDatasetConfig {
    pub name: String,
    pub prefix: String,
    pub location: String,
}

impl Default for TemporaryDatasetConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_TEMPORARY_DATASET.to_string(),
            prefix: DEFAULT_TEMPORARY_TABLE_PREFIX.to_string(),
            location: DEFAULT_DATASET_LOCATION.to_string(),
        }
    }
}

/// Where schema files (`<name>.json`) and transform units (`<name>.sql`) live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub json: PathBuf,
    pub sql: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            json: PathBuf::from(DEFAULT_SCHEMA_DIR),
            sql: PathBuf::from(DEFAULT_TRANSFORM_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Logical name whose upload starts the day's batch
    pub sentinel: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }
}

/// What a batch does after a file fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and move on to the next file
    #[default]
    ContinueOnError,
    /// Leave the remaining files in the source bucket
    StopOnFirstFailure,
}

impl PipelineConfig {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("order")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| IngestError::Config(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let buckets = [
            ("bucket.upload", &self.bucket.upload),
            ("bucket.temporary", &self.bucket.temporary),
            ("bucket.archive", &self.bucket.archive),
        ];

        for (key, value) in buckets {
            if value.trim().is_empty() {
                return Err(IngestError::Config(format!("{} cannot be empty", key)));
            }
        }

        if self.bucket.upload == self.bucket.temporary
            || self.bucket.upload == self.bucket.archive
            || self.bucket.temporary == self.bucket.archive
        {
            return Err(IngestError::Config(
                "upload, temporary and archive buckets must be distinct".to_string(),
            ));
        }

        if self.dataset.temporary.name.trim().is_empty() {
            return Err(IngestError::Config(
                "dataset.temporary.name cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &self.order {
            if !seen.insert(name) {
                return Err(IngestError::Config(format!(
                    "order lists '{}' more than once",
                    name
                )));
            }
        }

        if self.trigger.sentinel.trim().is_empty() {
            tracing::warn!("No sentinel configured - upload events will never start a day import");
        }

        Ok(())
    }

    /// Upload, temporary and archive buckets as pipeline locations
    pub fn locations(&self) -> Locations {
        Locations {
            source: self.bucket.upload.clone(),
            temporary: self.bucket.temporary.clone(),
            destination: self.bucket.archive.clone(),
        }
    }
}

/// Postgres warehouse connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Default database URL for local development
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/warehouse";

impl WarehouseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        };

        if config.url.is_empty() {
            anyhow::bail!("DATABASE_URL cannot be empty");
        }

        if config.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }

        Ok(config)
    }
}
