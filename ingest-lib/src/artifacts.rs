//! File-backed access to spreadsheet artifacts (the template and generated reports).

use calamine::{Data, Reader, open_workbook_auto};
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{ArtifactError, ArtifactResult};
use crate::sanitize::SqlValue;

/// Cells of the first worksheet, row-major, anchored at cell A1.
pub type SheetRows = Vec<Vec<Data>>;

/// The operations the core needs from wherever spreadsheets live.
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Read the first worksheet of a workbook.
    fn read_first_sheet(&self, path: &Path) -> ArtifactResult<SheetRows>;

    fn modified_time(&self, path: &Path) -> ArtifactResult<SystemTime>;

    /// Write a single-sheet workbook and return the path it was written to.
    fn write_sheet(
        &self,
        path: &Path,
        sheet_name: &str,
        headers: &[String],
        rows: &[Vec<SqlValue>],
    ) -> ArtifactResult<PathBuf>;

    fn copy(&self, from: &Path, to: &Path) -> ArtifactResult<()>;
}

/// [`ArtifactStore`] on the local filesystem, reading with calamine and writing
/// with rust_xlsxwriter.
#[derive(Debug, Default, Clone)]
pub struct FsArtifactStore;

impl FsArtifactStore {
    pub fn new() -> Self {
        FsArtifactStore
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_first_sheet(&self, path: &Path) -> ArtifactResult<SheetRows> {
        if !path.is_file() {
            return Err(ArtifactError::NotFound(path.display().to_string()));
        }

        let read_error = |message: String| ArtifactError::Read {
            path: path.display().to_string(),
            message,
        };

        let mut workbook = open_workbook_auto(path).map_err(|e| read_error(e.to_string()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| read_error("workbook has no worksheets".to_string()))?
            .map_err(|e| read_error(e.to_string()))?;

        // calamine trims the range to the first used cell; re-anchor at A1 so
        // row and column indexes match what the user sees in the sheet.
        let (first_row, first_col) = match range.start() {
            Some(start) => start,
            None => return Ok(Vec::new()),
        };

        let mut rows: SheetRows = (0..first_row).map(|_| Vec::new()).collect();
        for row in range.rows() {
            let mut cells = vec![Data::Empty; first_col as usize];
            cells.extend(row.iter().cloned());
            rows.push(cells);
        }

        Ok(rows)
    }

    fn modified_time(&self, path: &Path) -> ArtifactResult<SystemTime> {
        let io_error = |source: std::io::Error| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ArtifactError::NotFound(path.display().to_string())
            } else {
                ArtifactError::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        };
        std::fs::metadata(path)
            .and_then(|metadata| metadata.modified())
            .map_err(io_error)
    }

    fn write_sheet(
        &self,
        path: &Path,
        sheet_name: &str,
        headers: &[String],
        rows: &[Vec<SqlValue>],
    ) -> ArtifactResult<PathBuf> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let write_error = |e: XlsxError| ArtifactError::Write {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet_name).map_err(write_error)?;

        for (col, header) in headers.iter().enumerate() {
            worksheet
                .write_string(0, col as u16, header.as_str())
                .map_err(write_error)?;
        }

        for (row_idx, values) in rows.iter().enumerate() {
            let row = (row_idx + 1) as u32;
            for (col, value) in values.iter().enumerate() {
                write_value(worksheet, row, col as u16, value).map_err(write_error)?;
            }
        }

        workbook.save(path).map_err(write_error)?;
        Ok(path.to_path_buf())
    }

    fn copy(&self, from: &Path, to: &Path) -> ArtifactResult<()> {
        std::fs::copy(from, to).map_err(|source| ArtifactError::Io {
            path: from.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

fn write_value(ws: &mut Worksheet, row: u32, col: u16, value: &SqlValue) -> Result<(), XlsxError> {
    match value {
        SqlValue::Null => { /* Leave cell empty */ }
        SqlValue::Number(n) => {
            ws.write_number(row, col, *n)?;
        }
        SqlValue::Date(d) => {
            ws.write_string(row, col, d.format("%Y-%m-%d").to_string())?;
        }
        SqlValue::Text(s) => {
            ws.write_string(row, col, s.as_str())?;
        }
    }
    Ok(())
}
