//! Test helpers for csvflow-ingest integration tests
//!
//! In-memory collaborators that record every call into one shared
//! [`CallLog`], so tests can assert both side effects and their order.
//!
//! - [`MemoryStore`]: buckets as a key map, copy confirmation can be withheld
//!   per destination bucket
//! - [`MemoryWarehouse`]: tracks temporary tables, loads and transforms can be
//!   failed per logical name
//! - [`Harness`]: wires both into a pipeline with static resolvers

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use csvflow_ingest::storage::{CopyResult, ObjectMeta, ObjectRef, ObjectStore};
use csvflow_ingest::warehouse::{
    ColumnSchema, DatasetRef, JobLoadMetadata, LoadResult, TableRef, TransformParams,
    TransformUnit, Warehouse,
};
use csvflow_ingest::{
    ArchiveNaming, BatchOrchestrator, Collaborators, FilePipeline, Locations, PipelineConfig,
    SchemaResolver, TransformResolver,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,csvflow_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// One collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List { bucket: String },
    Exists(String),
    Copy { from: String, to: String },
    Delete(String),
    Download(String),
    Dataset(String),
    Load { table: String, staged: String },
    Transform { unit: String, table_suffix: String },
    DropTable(String),
}

impl Call {
    /// Whether the call changes storage or warehouse state
    pub fn is_side_effect(&self) -> bool {
        matches!(
            self,
            Call::Copy { .. }
                | Call::Delete(_)
                | Call::Load { .. }
                | Call::Transform { .. }
                | Call::DropTable(_)
        )
    }
}

/// Ordered record of calls across all doubles
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<Call>>,
}

impl CallLog {
    pub fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Sequence number of the first call matching `pred`
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(pred)
    }

    /// Tables loaded, in call order
    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Load { table, .. } => Some(table),
                _ => None,
            })
            .collect()
    }

    pub fn side_effects(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_side_effect).collect()
    }
}

fn path(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, key)
}

pub struct MemoryStore {
    log: Arc<CallLog>,
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    unconfirmed_buckets: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
}

impl MemoryStore {
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            objects: Mutex::new(BTreeMap::new()),
            unconfirmed_buckets: Mutex::new(HashSet::new()),
            fail_list: AtomicBool::new(false),
        }
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Copies into `bucket` are acknowledged without the object appearing
    pub fn withhold_copies_to(&self, bucket: &str) {
        self.unconfirmed_buckets
            .lock()
            .unwrap()
            .insert(bucket.to_string());
    }

    pub fn fail_listing(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectMeta>> {
        self.log.record(Call::List {
            bucket: bucket.to_string(),
        });

        if self.fail_list.load(Ordering::SeqCst) {
            bail!("listing {} refused", bucket);
        }

        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, k), _)| b == bucket && prefix.is_none_or(|p| k.starts_with(p)))
            .map(|((_, k), data)| ObjectMeta {
                key: k.clone(),
                size: data.len() as i64,
            })
            .collect())
    }

    async fn copy(&self, source: &ObjectRef, destination: &ObjectRef) -> Result<CopyResult> {
        self.log.record(Call::Copy {
            from: source.to_string(),
            to: destination.to_string(),
        });

        if self
            .unconfirmed_buckets
            .lock()
            .unwrap()
            .contains(&destination.bucket)
        {
            return Ok(CopyResult::unconfirmed());
        }

        let mut objects = self.objects.lock().unwrap();
        let data = objects
            .get(&(source.bucket.clone(), source.key.clone()))
            .cloned()
            .ok_or_else(|| anyhow!("no such object {}", source))?;
        objects.insert((destination.bucket.clone(), destination.key.clone()), data);

        Ok(CopyResult::confirmed())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        self.log.record(Call::Delete(object.to_string()));
        self.objects
            .lock()
            .unwrap()
            .remove(&(object.bucket.clone(), object.key.clone()));
        Ok(())
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool> {
        self.log.record(Call::Exists(object.to_string()));
        Ok(self.contains(&object.bucket, &object.key))
    }

    async fn download(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        self.log.record(Call::Download(object.to_string()));
        self.objects
            .lock()
            .unwrap()
            .get(&(object.bucket.clone(), object.key.clone()))
            .cloned()
            .ok_or_else(|| anyhow!("no such object {}", object))
    }
}

pub struct MemoryWarehouse {
    log: Arc<CallLog>,
    tables: Mutex<BTreeSet<String>>,
    failing_loads: Mutex<HashSet<String>>,
    failing_transforms: Mutex<HashSet<String>>,
}

impl MemoryWarehouse {
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            tables: Mutex::new(BTreeSet::new()),
            failing_loads: Mutex::new(HashSet::new()),
            failing_transforms: Mutex::new(HashSet::new()),
        }
    }

    /// Live temporary tables as `dataset.table`
    pub fn tables(&self) -> Vec<String> {
        self.tables.lock().unwrap().iter().cloned().collect()
    }

    /// Loads into tables whose name contains `name` report failure
    pub fn fail_load_for(&self, name: &str) {
        self.failing_loads.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_transform_for(&self, name: &str) {
        self.failing_transforms
            .lock()
            .unwrap()
            .insert(name.to_string());
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn dataset(&self, name: &str, location: &str) -> Result<DatasetRef> {
        self.log.record(Call::Dataset(name.to_string()));
        Ok(DatasetRef {
            name: name.to_string(),
            location: location.to_string(),
        })
    }

    async fn load(
        &self,
        table: &TableRef,
        staged: &ObjectRef,
        _metadata: &JobLoadMetadata,
    ) -> Result<LoadResult> {
        self.log.record(Call::Load {
            table: table.to_string(),
            staged: staged.to_string(),
        });

        let failing = self
            .failing_loads
            .lock()
            .unwrap()
            .iter()
            .any(|name| table.name.contains(name.as_str()));
        if failing {
            return Ok(LoadResult::failed("row 2: too many columns"));
        }

        self.tables.lock().unwrap().insert(table.to_string());
        Ok(LoadResult::done(1))
    }

    async fn delete_table(&self, table: &TableRef) -> Result<()> {
        self.log.record(Call::DropTable(table.to_string()));
        self.tables.lock().unwrap().remove(&table.to_string());
        Ok(())
    }

    async fn execute_transform(
        &self,
        unit: &TransformUnit,
        params: &TransformParams,
    ) -> Result<bool> {
        self.log.record(Call::Transform {
            unit: unit.name.clone(),
            table_suffix: params.table_suffix.clone(),
        });

        Ok(!self.failing_transforms.lock().unwrap().contains(&unit.name))
    }
}

/// Resolvers that know a fixed set of logical names
pub struct StaticResolvers {
    names: HashSet<String>,
}

impl StaticResolvers {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl SchemaResolver for StaticResolvers {
    fn has_schema(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn job_metadata(&self, name: &str) -> Result<JobLoadMetadata> {
        if !self.has_schema(name) {
            bail!("no schema for {}", name);
        }
        Ok(JobLoadMetadata::csv(vec![ColumnSchema {
            name: "value".to_string(),
            data_type: "STRING".to_string(),
            mode: "NULLABLE".to_string(),
        }]))
    }
}

impl TransformResolver for StaticResolvers {
    fn has_unit(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn unit_for(&self, name: &str) -> TransformUnit {
        TransformUnit {
            name: name.to_string(),
            path: PathBuf::from(format!("sql/{}.sql", name)),
        }
    }
}

/// In-memory pipeline wiring
pub struct Harness {
    pub log: Arc<CallLog>,
    pub store: Arc<MemoryStore>,
    pub warehouse: Arc<MemoryWarehouse>,
    pub config: Arc<PipelineConfig>,
    resolvers: Arc<StaticResolvers>,
}

impl Harness {
    /// Default configuration, `names` known to the resolvers
    pub fn new(names: &[&str]) -> Self {
        Self::with_config(PipelineConfig::default(), names)
    }

    pub fn with_config(config: PipelineConfig, names: &[&str]) -> Self {
        let log = Arc::new(CallLog::default());
        Self {
            store: Arc::new(MemoryStore::new(log.clone())),
            warehouse: Arc::new(MemoryWarehouse::new(log.clone())),
            config: Arc::new(config),
            resolvers: Arc::new(StaticResolvers::new(names)),
            log,
        }
    }

    pub fn locations(&self) -> Locations {
        self.config.locations()
    }

    /// Place an object in the upload bucket
    pub fn upload(&self, key: &str) {
        self.store
            .put(&self.config.bucket.upload, key, b"value\nhello\n");
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.store.keys(&self.config.bucket.upload)
    }

    pub fn staged(&self) -> Vec<String> {
        self.store.keys(&self.config.bucket.temporary)
    }

    pub fn archived(&self) -> Vec<String> {
        self.store.keys(&self.config.bucket.archive)
    }

    pub fn pipeline(&self) -> FilePipeline {
        FilePipeline::new(
            self.config.clone(),
            Collaborators {
                store: self.store.clone(),
                warehouse: self.warehouse.clone(),
                schemas: self.resolvers.clone(),
                transforms: self.resolvers.clone(),
                naming: Arc::new(ArchiveNaming::new(self.store.clone())),
            },
        )
    }

    pub fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::new(self.pipeline())
    }
}

pub fn object(bucket: &str, key: &str) -> String {
    path(bucket, key)
}
