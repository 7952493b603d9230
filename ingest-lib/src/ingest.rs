//! Ingestion Pipeline: validate an uploaded spreadsheet against the template,
//! insert the rows that pass, and report the rest.

use calamine::Data;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ERROR_COLUMN_NAME;
use crate::artifacts::{ArtifactStore, SheetRows};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::report::{ReportArtifact, ReportWriter, format_rejection_summary};
use crate::sanitize::{SqlValue, sanitize_cell};
use crate::schema::quote_ident;
use crate::storage::Storage;
use crate::template::{TemplateDefinition, TemplateStore};
use crate::utils::{is_safe_file_name, sanitize_column_name, write_error_to_log};
use crate::validation_cache::{AllowedValueCache, AllowedValueMap, is_implicitly_allowed};

/// A spreadsheet already received from the upload transport.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: PathBuf,
    /// Name the client gave the file; used for the extension and name checks.
    pub original_name: String,
    pub size: u64,
}

impl UploadedFile {
    pub fn new(path: impl Into<PathBuf>, original_name: impl Into<String>, size: u64) -> Self {
        UploadedFile {
            path: path.into(),
            original_name: original_name.into(),
            size,
        }
    }

    /// Describe a local file, taking the name and size from the filesystem.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            IngestError::FileInvalid(format!("cannot stat {}: {}", path.display(), e))
        })?;
        let original_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::FileInvalid(format!("{} has no file name", path.display())))?
            .to_string();

        Ok(UploadedFile::new(path, original_name, metadata.len()))
    }

    /// Lower-case extension including the dot, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
    }
}

/// Checks made before the workbook is opened.
pub fn validate_upload(file: &UploadedFile, config: &IngestConfig) -> Result<()> {
    if !is_safe_file_name(&file.original_name) {
        return Err(IngestError::FileInvalid(format!(
            "Invalid file name '{}'",
            file.original_name
        )));
    }

    match file.extension() {
        Some(ext) if config.allowed_extensions.iter().any(|allowed| *allowed == ext) => {}
        _ => {
            return Err(IngestError::FileInvalid(format!(
                "Only {} files are allowed",
                config.allowed_extensions.join(", ")
            )));
        }
    }

    if file.size > config.max_file_size {
        return Err(IngestError::FileInvalid(format!(
            "File is {} bytes, the limit is {} bytes",
            file.size, config.max_file_size
        )));
    }

    Ok(())
}

/// A row that will not be inserted, with its spreadsheet row number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    pub row_number: usize,
    pub values: Vec<SqlValue>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Accepted(Vec<SqlValue>),
    Rejected(RejectedRow),
}

impl RowOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RowOutcome::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Success,
    ProcessedWithErrors,
}

#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub inserted_count: u64,
    pub rejected_rows: Vec<RejectedRow>,
    pub report: Option<ReportArtifact>,
}

impl IngestionResult {
    pub fn status(&self) -> IngestionStatus {
        if self.rejected_rows.is_empty() {
            IngestionStatus::Success
        } else {
            IngestionStatus::ProcessedWithErrors
        }
    }

    pub fn summary(&self) -> UploadSummary {
        let status = self.status();
        let message = match status {
            IngestionStatus::Success => {
                format!("Successfully inserted {} rows", self.inserted_count)
            }
            IngestionStatus::ProcessedWithErrors => format!(
                "Inserted {} rows, {} rows had errors",
                self.inserted_count,
                self.rejected_rows.len()
            ),
        };

        UploadSummary {
            success: true,
            status: Some(status),
            code: None,
            message,
            rows_inserted: self.inserted_count,
            rows_failed: self.rejected_rows.len(),
            report_url: self.report.as_ref().map(|r| r.url.clone()),
        }
    }
}

/// Caller-facing outcome of one upload, success or failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IngestionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub message: String,
    pub rows_inserted: u64,
    pub rows_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

impl UploadSummary {
    pub fn failure(error: &IngestError) -> Self {
        UploadSummary {
            success: false,
            status: None,
            code: Some(error.code()),
            message: error.to_string(),
            rows_inserted: 0,
            rows_failed: 0,
            report_url: None,
        }
    }
}

/// Sanitized names of the header row, up to its last non-blank cell.
pub fn sanitize_header(header: &[Data]) -> Vec<String> {
    trim_trailing_empty(header)
        .iter()
        .map(|cell| sanitize_column_name(cell.to_string().trim()))
        .collect()
}

/// Structural checks on the header: no reserved column, and exactly the template's names.
pub fn check_header(received: &[String], template: &TemplateDefinition) -> Result<()> {
    if received.iter().any(|name| name == ERROR_COLUMN_NAME) {
        tracing::warn!("Upload contains the reserved error column");
        return Err(IngestError::ReservedColumnPresent);
    }

    let expected = template.names();
    if received != expected.as_slice() {
        tracing::warn!(?expected, ?received, "Upload columns do not match template");
        return Err(IngestError::ColumnMismatch {
            expected,
            received: received.to_vec(),
        });
    }

    Ok(())
}

fn trim_trailing_empty(row: &[Data]) -> &[Data] {
    let len = row
        .iter()
        .rposition(|cell| !matches!(cell, Data::Empty))
        .map_or(0, |last| last + 1);
    &row[..len]
}

/// Data rows with their 1-based spreadsheet row numbers, normalized to `width` cells.
///
/// Each row ends at its last non-empty cell, so its length is the number of
/// columns it actually fills. Blank rows after the last row with content are not
/// part of the upload.
pub fn data_rows(rows: &SheetRows) -> Vec<(usize, Vec<Data>)> {
    let last_with_content = rows
        .iter()
        .rposition(|row| !trim_trailing_empty(row).is_empty())
        .unwrap_or(0);

    rows.iter()
        .enumerate()
        .take(last_with_content + 1)
        .skip(1)
        .map(|(index, row)| (index + 1, trim_trailing_empty(row).to_vec()))
        .collect()
}

fn raw_values(row: &[Data]) -> Vec<SqlValue> {
    row.iter()
        .map(|cell| match cell {
            Data::Empty => SqlValue::Null,
            other => SqlValue::Text(other.to_string()),
        })
        .collect()
}

/// Validate one data row against the template and its allowed values.
///
/// Shape problems skip the value checks. The first disallowed value rejects the
/// row; the remaining cells are still sanitized so the report shows the full row.
pub fn validate_row(
    row: &[Data],
    row_number: usize,
    template: &TemplateDefinition,
    allowed: &AllowedValueMap,
) -> RowOutcome {
    if row.is_empty() {
        return RowOutcome::Rejected(RejectedRow {
            row_number,
            values: Vec::new(),
            reasons: vec!["Row is empty".to_string()],
        });
    }

    if row.len() != template.len() {
        return RowOutcome::Rejected(RejectedRow {
            row_number,
            values: raw_values(row),
            reasons: vec![format!(
                "Expected {} columns, got {}",
                template.len(),
                row.len()
            )],
        });
    }

    let mut values = Vec::with_capacity(template.len());
    let mut violation = None;

    for (column, cell) in template.iter().zip(row) {
        let value = sanitize_cell(cell, column.column_type);

        if violation.is_none() {
            if let Some(permitted) = allowed.get(&column.name) {
                let normalized = value.normalized();
                if !normalized.is_empty()
                    && !is_implicitly_allowed(&normalized)
                    && !permitted.contains(&normalized)
                {
                    let listed: Vec<&str> = permitted.iter().map(String::as_str).collect();
                    violation = Some(format!(
                        "Invalid value \"{}\" for column \"{}\". Allowed: {}",
                        value,
                        column.name,
                        listed.join(", ")
                    ));
                }
            }
        }

        values.push(value);
    }

    match violation {
        Some(reason) => RowOutcome::Rejected(RejectedRow {
            row_number,
            values,
            reasons: vec![reason],
        }),
        None => RowOutcome::Accepted(values),
    }
}

/// Multi-row insert with `?` placeholders. Column names come from the template only.
pub fn build_insert_query(table: &str, columns: &[String], row_count: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(",");
    let tuple = format!("({})", vec!["?"; columns.len()].join(","));
    let values = vec![tuple.as_str(); row_count].join(",");

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        column_list,
        values
    )
}

pub struct IngestionPipeline {
    storage: Arc<dyn Storage>,
    artifacts: Arc<dyn ArtifactStore>,
    templates: TemplateStore,
    cache: Arc<AllowedValueCache>,
    reports: ReportWriter,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(
        storage: Arc<dyn Storage>,
        artifacts: Arc<dyn ArtifactStore>,
        cache: Arc<AllowedValueCache>,
        config: IngestConfig,
    ) -> Self {
        let templates = TemplateStore::new(artifacts.clone(), config.template_path.clone());
        let reports = ReportWriter::new(
            artifacts.clone(),
            config.reports_dir.clone(),
            config.reports_url_prefix.clone(),
        );
        IngestionPipeline {
            storage,
            artifacts,
            templates,
            cache,
            reports,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Process one upload end to end.
    ///
    /// Invalid rows are part of a successful result; only structural problems
    /// with the file, the template or the allowed-value map return an error.
    pub async fn ingest(&self, file: &UploadedFile) -> Result<IngestionResult> {
        tracing::info!(file = %file.original_name, size = file.size, "Processing upload");

        validate_upload(file, &self.config)?;
        if !self.artifacts.exists(&file.path) {
            return Err(IngestError::FileInvalid(format!(
                "{} does not exist",
                file.path.display()
            )));
        }

        let rows = self
            .artifacts
            .read_first_sheet(&file.path)
            .map_err(|e| IngestError::FileInvalid(e.to_string()))?;

        let header = sanitize_header(rows.first().map(Vec::as_slice).unwrap_or_default());
        if header.iter().any(|name| name == ERROR_COLUMN_NAME) {
            tracing::warn!(file = %file.original_name, "Upload contains the reserved error column");
            return Err(IngestError::ReservedColumnPresent);
        }

        let template = self.templates.get_template_definition()?;
        check_header(&header, &template)?;

        let snapshot = self.cache.get_validation_map()?;

        let mut accepted: Vec<(usize, Vec<SqlValue>)> = Vec::new();
        let mut rejected: Vec<RejectedRow> = Vec::new();
        for (row_number, cells) in data_rows(&rows) {
            match validate_row(&cells, row_number, &template, &snapshot.allowed) {
                RowOutcome::Accepted(values) => accepted.push((row_number, values)),
                RowOutcome::Rejected(row) => {
                    tracing::debug!(row = row.row_number, reasons = ?row.reasons, "Row rejected");
                    rejected.push(row);
                }
            }
        }

        let inserted_count = self.insert_batches(&template, accepted, &mut rejected).await;
        rejected.sort_by_key(|row| row.row_number);

        let report = if rejected.is_empty() {
            None
        } else {
            write_error_to_log(
                "Upload Validation Errors",
                &format_rejection_summary(&file.original_name, &rejected),
            );
            Some(self.reports.write(&template, &rejected).inspect_err(|e| {
                tracing::error!(error = %e, inserted_count, "Failed to write error report");
            })?)
        };

        tracing::info!(
            file = %file.original_name,
            inserted = inserted_count,
            rejected = rejected.len(),
            "Upload processed"
        );

        Ok(IngestionResult {
            inserted_count,
            rejected_rows: rejected,
            report,
        })
    }

    /// Insert accepted rows batch by batch. A failed batch turns its rows into
    /// rejections and does not undo earlier batches.
    async fn insert_batches(
        &self,
        template: &TemplateDefinition,
        accepted: Vec<(usize, Vec<SqlValue>)>,
        rejected: &mut Vec<RejectedRow>,
    ) -> u64 {
        let columns = template.names();
        let batch_size = self.config.effective_batch_size(columns.len());
        let mut inserted = 0u64;

        for (batch_index, batch) in accepted.chunks(batch_size).enumerate() {
            let sql = build_insert_query(&self.config.table, &columns, batch.len());
            let params: Vec<SqlValue> = batch
                .iter()
                .flat_map(|(_, values)| values.iter().cloned())
                .collect();

            match self.storage.execute(&sql, &params).await {
                Ok(_) => {
                    inserted += batch.len() as u64;
                    tracing::debug!(batch = batch_index + 1, rows = batch.len(), "Batch inserted");
                }
                Err(e) => {
                    tracing::error!(batch = batch_index + 1, error = %e, "Batch insert failed");
                    let reason = format!("Database error during batch insert: {}", e);
                    rejected.extend(batch.iter().map(|(row_number, values)| RejectedRow {
                        row_number: *row_number,
                        values: values.clone(),
                        reasons: vec![reason.clone()],
                    }));
                }
            }
        }

        inserted
    }
}
