//! Error report: one spreadsheet row per rejected upload row, with the reason
//! in the reserved `Error` column so users can fix and re-upload.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::ERROR_COLUMN_NAME;
use crate::artifacts::ArtifactStore;
use crate::error::Result;
use crate::ingest::RejectedRow;
use crate::sanitize::SqlValue;
use crate::template::TemplateDefinition;
use crate::utils::{get_local_datetime_with_format, get_utc_iso_datetime};

pub const REPORT_SHEET_NAME: &str = "Errors";
pub const ROW_NUMBER_COLUMN: &str = "Row Number";
pub const REUPLOAD_HINT: &str =
    "-- Please remove this error column before re-uploading your file, otherwise it will give an error.";

/// Where a written report can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub url: String,
}

/// Template columns, then the row number, then the reserved error column.
pub fn report_headers(template: &TemplateDefinition) -> Vec<String> {
    let mut headers = template.names();
    headers.push(ROW_NUMBER_COLUMN.to_string());
    headers.push(ERROR_COLUMN_NAME.to_string());
    headers
}

/// Text placed in the error column for a rejected row.
pub fn error_cell_text(row: &RejectedRow) -> String {
    format!("{} {}", row.reasons.join("; "), REUPLOAD_HINT)
}

pub fn report_rows(template: &TemplateDefinition, rejected: &[RejectedRow]) -> Vec<Vec<SqlValue>> {
    let width = template.len();
    rejected
        .iter()
        .map(|row| {
            let mut values: Vec<SqlValue> = row.values.iter().take(width).cloned().collect();
            values.resize(width, SqlValue::Null);
            values.push(SqlValue::Number(row.row_number as f64));
            values.push(SqlValue::Text(error_cell_text(row)));
            values
        })
        .collect()
}

pub fn unique_report_name() -> String {
    let timestamp = get_local_datetime_with_format("%Y-%m-%d_%H-%M-%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("error-report-{}-{}.xlsx", timestamp, &suffix[..8])
}

/// Plain-text summary of the rejected rows for the errors log.
pub fn format_rejection_summary(file_name: &str, rejected: &[RejectedRow]) -> String {
    let mut report = String::new();

    report.push_str("=============================\n");
    report.push_str(&format!("Generated at: {}\n", get_utc_iso_datetime()));
    report.push_str(&format!("File: {}\n\n", file_name));
    report.push_str(&format!("Total rows with errors: {}\n\n", rejected.len()));

    for row in rejected {
        report.push_str(&format!("Row {}:\n", row.row_number));
        for reason in &row.reasons {
            report.push_str(&format!("  - {}\n", reason));
        }
    }

    report
}

/// Writes error reports into the reports directory.
pub struct ReportWriter {
    artifacts: Arc<dyn ArtifactStore>,
    reports_dir: PathBuf,
    url_prefix: String,
}

impl ReportWriter {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        reports_dir: impl Into<PathBuf>,
        url_prefix: impl Into<String>,
    ) -> Self {
        ReportWriter {
            artifacts,
            reports_dir: reports_dir.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn write(
        &self,
        template: &TemplateDefinition,
        rejected: &[RejectedRow],
    ) -> Result<ReportArtifact> {
        let file_name = unique_report_name();
        let path = self.artifacts.write_sheet(
            &self.reports_dir.join(&file_name),
            REPORT_SHEET_NAME,
            &report_headers(template),
            &report_rows(template, rejected),
        )?;

        let url = format!("{}/{}", self.url_prefix.trim_end_matches('/'), file_name);
        tracing::info!(path = %path.display(), rows = rejected.len(), "Error report written");
        Ok(ReportArtifact { path, url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ColumnType;

    fn template() -> TemplateDefinition {
        TemplateDefinition::new([("Name", ColumnType::Text), ("Age", ColumnType::Int)])
    }

    #[test]
    fn test_headers_append_row_number_and_error() {
        assert_eq!(report_headers(&template()), vec!["Name", "Age", "Row Number", "Error"]);
    }

    #[test]
    fn test_rows_are_padded_to_template_width() {
        let rejected = vec![RejectedRow {
            row_number: 4,
            values: vec![SqlValue::Text("Ana".to_string())],
            reasons: vec!["Expected 2 columns, got 1".to_string()],
        }];
        let rows = report_rows(&template(), &rejected);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 4);
        assert_eq!(rows[0][1], SqlValue::Null);
        assert_eq!(rows[0][2], SqlValue::Number(4.0));
        match &rows[0][3] {
            SqlValue::Text(text) => {
                assert!(text.starts_with("Expected 2 columns, got 1 -- Please remove"));
            }
            other => panic!("expected error text, got {other:?}"),
        }
    }

    #[test]
    fn test_report_names_are_unique() {
        let a = unique_report_name();
        let b = unique_report_name();
        assert!(a.starts_with("error-report-"));
        assert!(a.ends_with(".xlsx"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejection_summary_lists_rows() {
        let rejected = vec![RejectedRow {
            row_number: 3,
            values: Vec::new(),
            reasons: vec!["Row is empty".to_string()],
        }];
        let summary = format_rejection_summary("upload.xlsx", &rejected);
        assert!(summary.contains("Total rows with errors: 1"));
        assert!(summary.contains("Row 3:\n  - Row is empty"));
    }
}
