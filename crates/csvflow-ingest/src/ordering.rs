//! Deterministic processing order for a discovered file set
//!
//! Files are compared by, in order:
//! 1. position of their logical name in the configured order list
//! 2. business date, ascending
//! 3. version, ascending
//!
//! A name missing from the order list gets position -1 and therefore sorts
//! *before* every listed name. This is deliberate: unknown datasets have no
//! dependencies on the listed ones and are loaded first.
//!
//! The sort is stable, so exact ties keep their discovery order.

use csvflow_common::FileDescriptor;
use std::cmp::Ordering;

use crate::config::PipelineConfig;

/// Position given to names absent from the order list
pub const UNLISTED_POSITION: i64 = -1;

#[derive(Debug, Clone, Default)]
pub struct OrderingEngine {
    order: Vec<String>,
}

impl OrderingEngine {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.order.clone())
    }

    pub fn position(&self, name: &str) -> i64 {
        self.order
            .iter()
            .position(|entry| entry == name)
            .map(|p| p as i64)
            .unwrap_or(UNLISTED_POSITION)
    }

    pub fn compare(&self, a: &FileDescriptor, b: &FileDescriptor) -> Ordering {
        self.position(&a.name)
            .cmp(&self.position(&b.name))
            .then_with(|| a.date.cmp(&b.date))
            .then_with(|| a.version.cmp(&b.version))
    }

    /// Return the files in processing order
    pub fn order(&self, files: impl IntoIterator<Item = FileDescriptor>) -> Vec<FileDescriptor> {
        let mut files: Vec<FileDescriptor> = files.into_iter().collect();
        files.sort_by(|a, b| self.compare(a, b));
        files
    }
}
