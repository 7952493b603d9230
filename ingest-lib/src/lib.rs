#![allow(clippy::needless_return)]

pub mod artifacts;
pub mod config;
pub mod error;
pub mod ingest;
pub mod report;
pub mod sanitize;
pub mod schema;
pub mod storage;
pub mod template;
pub mod utils;
pub mod validation_cache;

// Test utilities - only compiled when testing or with test feature
// #[cfg(test)] alone doesn't work for integration tests (they're external crates)
// The feature flag makes it available to integration tests via dev-dependencies
#[cfg(any(test, feature = "test"))]
pub mod test_utils;

pub use artifacts::{ArtifactStore, FsArtifactStore, SheetRows};
pub use config::IngestConfig;
pub use error::{ArtifactError, IngestError, Result, StorageError};
pub use ingest::{
    IngestionPipeline, IngestionResult, IngestionStatus, RejectedRow, RowOutcome, UploadSummary,
    UploadedFile,
};
pub use report::ReportArtifact;
pub use sanitize::SqlValue;
pub use schema::{SchemaChange, SchemaReconciler, SchemaSyncReport, StoredColumn, TemplateWatcher};
pub use storage::{MySqlStorage, Storage};
pub use template::{ColumnDescriptor, ColumnType, TemplateDefinition, TemplateStore};
pub use validation_cache::{AllowedValueCache, AllowedValueMap};

pub const ERRORS_LOG_FILE: &str = "errors.log";

/// Reserved column that carries rejection reasons in error reports.
pub const ERROR_COLUMN_NAME: &str = "Error";
