//! Trigger adapters
//!
//! Translate delivered events into orchestrator calls:
//!
//! - [`UploadTrigger`]: an object-finalized event for the upload bucket whose
//!   file passes a [`DayCompletePredicate`] starts that day's batch
//! - [`ReplayTrigger`]: a replay message carrying the configured token starts
//!   a batch over everything in the upload bucket
//!
//! Anything else is ignored without error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use csvflow_common::FileDescriptor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::orchestrator::{BatchOrchestrator, BatchReport};

/// CloudEvent type emitted when an upload completes
pub const OBJECT_FINALIZED: &str = "google.cloud.storage.object.v1.finalized";

/// Upload-finished event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: UploadEventData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEventData {
    pub bucket: String,
    pub name: String,
}

/// Replay event, a CloudEvent wrapping a pub/sub message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayMessage {
    #[serde(default)]
    pub data: ReplayEventData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEventData {
    #[serde(default)]
    pub message: PubSubMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubMessage {
    /// Base64 payload
    #[serde(default)]
    pub data: Option<String>,
}

impl ReplayMessage {
    /// Envelope carrying `payload`, base64 encoded
    pub fn with_payload(payload: &str) -> Self {
        Self {
            data: ReplayEventData {
                message: PubSubMessage {
                    data: Some(STANDARD.encode(payload)),
                },
            },
        }
    }

    /// Decoded payload, `None` when absent or not base64 UTF-8
    pub fn payload(&self) -> Option<String> {
        let data = self.data.message.data.as_deref()?;
        let bytes = STANDARD.decode(data.trim()).ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Ignored,
    Dispatched(BatchReport),
}

impl TriggerOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, TriggerOutcome::Dispatched(_))
    }

    pub fn report(&self) -> Option<&BatchReport> {
        match self {
            TriggerOutcome::Dispatched(report) => Some(report),
            TriggerOutcome::Ignored => None,
        }
    }
}

/// Decides whether an uploaded file completes its business day
pub trait DayCompletePredicate: Send + Sync {
    fn is_day_complete(&self, file: &FileDescriptor) -> bool;
}

impl<F> DayCompletePredicate for F
where
    F: Fn(&FileDescriptor) -> bool + Send + Sync,
{
    fn is_day_complete(&self, file: &FileDescriptor) -> bool {
        self(file)
    }
}

/// The day is complete once a file with this logical name lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelFile {
    name: String,
}

impl SentinelFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl DayCompletePredicate for SentinelFile {
    fn is_day_complete(&self, file: &FileDescriptor) -> bool {
        !self.name.is_empty() && file.name == self.name
    }
}

pub struct UploadTrigger {
    orchestrator: Arc<BatchOrchestrator>,
    upload_bucket: String,
    predicate: Box<dyn DayCompletePredicate>,
}

impl UploadTrigger {
    /// Trigger using the configured sentinel file
    pub fn new(orchestrator: Arc<BatchOrchestrator>, config: &PipelineConfig) -> Self {
        Self::with_predicate(
            orchestrator,
            config,
            SentinelFile::new(config.trigger.sentinel.clone()),
        )
    }

    pub fn with_predicate(
        orchestrator: Arc<BatchOrchestrator>,
        config: &PipelineConfig,
        predicate: impl DayCompletePredicate + 'static,
    ) -> Self {
        Self {
            orchestrator,
            upload_bucket: config.bucket.upload.clone(),
            predicate: Box::new(predicate),
        }
    }

    /// The day whose batch `event` starts, if any
    pub fn day_for(&self, event: &UploadEvent) -> Option<FileDescriptor> {
        if event.event_type != OBJECT_FINALIZED {
            debug!(event_type = %event.event_type, "Ignoring event type");
            return None;
        }

        if event.data.bucket != self.upload_bucket {
            debug!(bucket = %event.data.bucket, "Ignoring upload to another bucket");
            return None;
        }

        let file = match FileDescriptor::parse(&event.data.name) {
            Ok(file) => file,
            Err(e) => {
                debug!("Ignoring upload {}: {}", event.data.name, e);
                return None;
            },
        };

        if !self.predicate.is_day_complete(&file) {
            debug!("Upload {} does not complete its day", file);
            return None;
        }

        Some(file)
    }

    pub async fn handle(&self, event: &UploadEvent) -> TriggerOutcome {
        match self.day_for(event) {
            Some(file) => {
                info!("Day {} complete after {}, starting import", file.date, file);
                TriggerOutcome::Dispatched(self.orchestrator.run_for_day(file.date).await)
            },
            None => TriggerOutcome::Ignored,
        }
    }
}

pub struct ReplayTrigger {
    orchestrator: Arc<BatchOrchestrator>,
    token: String,
}

impl ReplayTrigger {
    pub fn new(orchestrator: Arc<BatchOrchestrator>, config: &PipelineConfig) -> Self {
        Self {
            orchestrator,
            token: config.pub_sub.message.clone(),
        }
    }

    pub fn matches(&self, message: &ReplayMessage) -> bool {
        message.payload().is_some_and(|payload| payload == self.token)
    }

    pub async fn handle(&self, message: &ReplayMessage) -> TriggerOutcome {
        if !self.matches(message) {
            debug!("Replay message does not carry the replay token, ignoring");
            return TriggerOutcome::Ignored;
        }

        info!("Replay requested, importing every uploaded file");
        TriggerOutcome::Dispatched(self.orchestrator.run_all().await)
    }
}
