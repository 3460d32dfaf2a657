//! Pipeline error taxonomy and the central error reporter

use thiserror::Error;
use tracing::error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that end a file's run or a batch step
#[derive(Error, Debug)]
pub enum IngestError {
    /// Source object missing at stage entry
    #[error("Source object not found: {0}")]
    NotFound(String),

    /// Warehouse load job did not complete successfully
    #[error("Load job failed for table {table}: {reason}")]
    LoadFailure { table: String, reason: String },

    /// Transform unit returned failure
    #[error("Transform unit {unit} failed")]
    TransformFailure { unit: String },

    /// Staging or archive copy was not confirmed
    #[error("Copy not confirmed: {from} -> {to}")]
    CopyFailure { from: String, to: String },

    /// Not an ingestable data file
    #[error("Unrecognized file: {0}")]
    UnrecognizedFile(String),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("Warehouse error: {0:#}")]
    Warehouse(anyhow::Error),

    #[error("Schema error: {0:#}")]
    Schema(anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pipeline state: {0}")]
    InvalidState(String),
}

impl IngestError {
    /// Stable label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::NotFound(_) => "not_found",
            IngestError::LoadFailure { .. } => "load_failure",
            IngestError::TransformFailure { .. } => "transform_failure",
            IngestError::CopyFailure { .. } => "copy_failure",
            IngestError::UnrecognizedFile(_) => "unrecognized_file",
            IngestError::Storage(_) => "storage",
            IngestError::Warehouse(_) => "warehouse",
            IngestError::Schema(_) => "schema",
            IngestError::Config(_) => "config",
            IngestError::InvalidState(_) => "invalid_state",
        }
    }

    /// Whether the error leaves the surrounding batch untouched
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            IngestError::NotFound(_) | IngestError::UnrecognizedFile(_)
        )
    }
}

impl From<csvflow_common::CommonError> for IngestError {
    fn from(err: csvflow_common::CommonError) -> Self {
        match err {
            csvflow_common::CommonError::InvalidName(name) => IngestError::UnrecognizedFile(name),
            csvflow_common::CommonError::InvalidDate { value, .. } => {
                IngestError::UnrecognizedFile(value)
            },
            other => IngestError::Config(other.to_string()),
        }
    }
}

/// Central error reporter: every pipeline failure is logged here
pub fn report(err: &IngestError, file: &str) {
    error!(
        error_kind = err.kind(),
        file = %file,
        benign = err.is_benign(),
        error = %err,
        "Pipeline error"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(IngestError::NotFound("a".into()).kind(), "not_found");
        assert_eq!(
            IngestError::TransformFailure { unit: "sql/a.sql".into() }.kind(),
            "transform_failure"
        );
        assert_eq!(
            IngestError::Storage(anyhow::anyhow!("boom")).kind(),
            "storage"
        );
    }

    #[test]
    fn test_benign_errors() {
        assert!(IngestError::NotFound("a".into()).is_benign());
        assert!(IngestError::UnrecognizedFile("a".into()).is_benign());
        assert!(!IngestError::CopyFailure {
            from: "a".into(),
            to: "b".into()
        }
        .is_benign());
    }

    #[test]
    fn test_invalid_name_maps_to_unrecognized() {
        let err: IngestError =
            csvflow_common::CommonError::InvalidName("notes.txt".to_string()).into();
        assert!(matches!(err, IngestError::UnrecognizedFile(name) if name == "notes.txt"));
    }
}
