use thiserror::Error;

use crate::ERROR_COLUMN_NAME;

/// Errors raised by the storage seam.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("table `{0}` does not exist or has no columns")]
    UnknownTable(String),

    #[error("{0}")]
    Rejected(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised by the artifact seam (template and report files).
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read spreadsheet {path}: {message}")]
    Read { path: String, message: String },

    #[error("cannot write spreadsheet {path}: {message}")]
    Write { path: String, message: String },
}

pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

/// Request- and process-level failures.
///
/// Per-row problems are never reported through this type: they are collected
/// as [`crate::RejectedRow`] values and end up in the error report.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Template file not found at {0}")]
    TemplateMissing(String),

    #[error("Template is malformed: {0}")]
    TemplateMalformed(String),

    #[error("Failed to build validation map: {0}")]
    ValidationMapBuildFailed(String),

    #[error("File validation failed: {0}")]
    FileInvalid(String),

    #[error(
        "The uploaded file contains an '{}' column. Please remove it and re-upload.",
        ERROR_COLUMN_NAME
    )]
    ReservedColumnPresent,

    #[error("Uploaded file columns do not match template: expected {expected:?}, got {received:?}")]
    ColumnMismatch {
        expected: Vec<String>,
        received: Vec<String>,
    },

    #[error("Schema synchronisation failed at `{statement}`: {source}")]
    SchemaSyncFailed {
        statement: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl IngestError {
    /// Stable reason code reported to callers alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::TemplateMissing(_) => "TEMPLATE_MISSING",
            IngestError::TemplateMalformed(_) => "TEMPLATE_MALFORMED",
            IngestError::ValidationMapBuildFailed(_) => "VALIDATION_MAP_BUILD_FAILED",
            IngestError::FileInvalid(_) => "FILE_INVALID",
            IngestError::ReservedColumnPresent => "ERROR_COLUMN_DETECTED",
            IngestError::ColumnMismatch { .. } => "COLUMN_MISMATCH",
            IngestError::SchemaSyncFailed { .. } => "SCHEMA_SYNC_FAILED",
            IngestError::Storage(_) => "STORAGE_ERROR",
            IngestError::Artifact(_) => "PROCESSING_ERROR",
            IngestError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_column_message_names_the_column() {
        let message = IngestError::ReservedColumnPresent.to_string();
        assert!(message.contains("'Error' column"));
        assert_eq!(IngestError::ReservedColumnPresent.code(), "ERROR_COLUMN_DETECTED");
    }

    #[test]
    fn test_column_mismatch_lists_both_sides() {
        let err = IngestError::ColumnMismatch {
            expected: vec!["Name".to_string(), "Age".to_string()],
            received: vec!["Age".to_string(), "Name".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("expected [\"Name\", \"Age\"]"));
        assert!(message.contains("got [\"Age\", \"Name\"]"));
        assert_eq!(err.code(), "COLUMN_MISMATCH");
    }

    #[test]
    fn test_schema_sync_failure_names_statement() {
        let err = IngestError::SchemaSyncFailed {
            statement: "ALTER TABLE `t` DROP COLUMN `x`".to_string(),
            source: StorageError::Rejected("locked".to_string()),
        };
        assert!(err.to_string().contains("DROP COLUMN `x`"));
        assert!(err.to_string().contains("locked"));
    }
}
