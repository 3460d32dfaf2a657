//! Collision-free archive names

use anyhow::Result;
use async_trait::async_trait;
use csvflow_common::FileDescriptor;
use std::sync::Arc;
use tracing::debug;

use crate::storage::{ObjectRef, ObjectStore};

/// Upper bound on version bumps before giving up
pub const MAX_ARCHIVE_VERSIONS: u32 = 1000;

#[async_trait]
pub trait NamingResolver: Send + Sync {
    /// Pick a file name under `folder` in `bucket` that does not overwrite an
    /// archived object
    async fn safe_archive_name(
        &self,
        bucket: &str,
        folder: &str,
        file: &FileDescriptor,
    ) -> Result<String>;
}

/// Archive key for a file name inside a batch folder
pub fn archive_key(folder: &str, file_name: &str) -> String {
    format!("{}/{}", folder, file_name)
}

/// Probes the archive bucket and bumps the version until the name is free
///
/// Probing is not atomic: two batches racing on the same folder can still pick
/// the same name.
pub struct ArchiveNaming {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveNaming {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NamingResolver for ArchiveNaming {
    async fn safe_archive_name(
        &self,
        bucket: &str,
        folder: &str,
        file: &FileDescriptor,
    ) -> Result<String> {
        let mut candidate = file.clone();

        for _ in 0..MAX_ARCHIVE_VERSIONS {
            let name = candidate.full_name();
            let object = ObjectRef::new(bucket, archive_key(folder, &name));

            if !self.store.exists(&object).await? {
                return Ok(name);
            }

            debug!("Archive name {} taken, bumping version", object);
            candidate = candidate.with_version(candidate.version + 1);
        }

        anyhow::bail!(
            "No free archive name for {} under {}/{} after {} attempts",
            file,
            bucket,
            folder,
            MAX_ARCHIVE_VERSIONS
        )
    }
}
