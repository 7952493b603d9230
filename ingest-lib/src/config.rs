use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IngestError, Result};

/// MySQL caps a prepared statement at 65 535 placeholders.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Default upload size limit (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Settings shared by the reconciler and the ingestion pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct IngestConfig {
    /// Table that receives uploaded rows.
    pub table: String,
    pub template_path: PathBuf,
    pub reports_dir: PathBuf,
    /// Public prefix under which report files are served.
    pub reports_url_prefix: String,
    pub batch_size: usize,
    pub max_file_size: u64,
    /// Lower-case extensions including the dot.
    pub allowed_extensions: Vec<String>,
    pub watch_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            table: "uploaded_data".to_string(),
            template_path: PathBuf::from("template.xlsx"),
            reports_dir: PathBuf::from("reports"),
            reports_url_prefix: "/reports".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: vec![".xlsx".to_string(), ".xls".to_string()],
            watch_interval: Duration::from_secs(1),
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty()
            || !self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(IngestError::Config(format!(
                "table name '{}' must be non-empty and contain only [A-Za-z0-9_]",
                self.table
            )));
        }
        if self.batch_size == 0 {
            return Err(IngestError::Config("batch size must be at least 1".to_string()));
        }
        if self.max_file_size == 0 {
            return Err(IngestError::Config("max file size must be at least 1 byte".to_string()));
        }
        if self.allowed_extensions.is_empty() {
            return Err(IngestError::Config("no upload extensions are allowed".to_string()));
        }
        if self.watch_interval.is_zero() {
            return Err(IngestError::Config("watch interval must be positive".to_string()));
        }
        Ok(())
    }

    /// Rows per insert statement for a template of `column_count` columns,
    /// bounded by the placeholder limit.
    pub fn effective_batch_size(&self, column_count: usize) -> usize {
        let by_params = MAX_BIND_PARAMS / column_count.max(1);
        self.batch_size.min(by_params).max(1)
    }
}
