// Test utilities available to both unit and integration tests
// Only compiled when testing or with the `test` feature

use async_trait::async_trait;
use calamine::Data;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use crate::artifacts::{ArtifactStore, SheetRows};
use crate::error::{ArtifactError, ArtifactResult, StorageError, StorageResult};
use crate::sanitize::SqlValue;
use crate::schema::{SchemaChange, StoredColumn};
use crate::storage::Storage;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory [`Storage`] that records every statement.
///
/// Schema changes are applied to the stored column lists; inserts are split
/// back into rows so tests can inspect what would have been written.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<HashMap<String, Vec<StoredColumn>>>,
    statements: Mutex<Vec<String>>,
    inserted_rows: Mutex<Vec<Vec<SqlValue>>>,
    insert_calls: AtomicUsize,
    failing_inserts: Mutex<HashSet<usize>>,
    failing_statement: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: &str, columns: &[(&str, &str)]) -> Self {
        let storage = Self::new();
        storage.set_columns(table, columns);
        storage
    }

    pub fn set_columns(&self, table: &str, columns: &[(&str, &str)]) {
        lock(&self.tables).insert(
            table.to_string(),
            columns
                .iter()
                .map(|(name, sql_type)| StoredColumn::new(*name, *sql_type))
                .collect(),
        );
    }

    pub fn columns(&self, table: &str) -> Vec<StoredColumn> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.columns(table).into_iter().map(|c| c.name).collect()
    }

    /// Make the n-th insert statement (1-based) fail.
    pub fn fail_insert_call(&self, call: usize) {
        lock(&self.failing_inserts).insert(call);
    }

    /// Make any statement containing `fragment` fail.
    pub fn fail_statements_containing(&self, fragment: &str) {
        *lock(&self.failing_statement) = Some(fragment.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    pub fn ddl_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with("ALTER TABLE"))
            .collect()
    }

    pub fn insert_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with("INSERT INTO"))
            .collect()
    }

    pub fn inserted_rows(&self) -> Vec<Vec<SqlValue>> {
        lock(&self.inserted_rows).clone()
    }

    fn check_failure(&self, sql: &str) -> StorageResult<()> {
        match lock(&self.failing_statement).as_deref() {
            Some(fragment) if sql.contains(fragment) => {
                Err(StorageError::Rejected(format!("simulated failure for `{}`", sql)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> StorageResult<u64> {
        lock(&self.statements).push(sql.to_string());
        self.check_failure(sql)?;

        if !sql.starts_with("INSERT INTO") {
            return Ok(0);
        }

        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if lock(&self.failing_inserts).contains(&call) {
            return Err(StorageError::Rejected(format!("insert {} refused", call)));
        }

        let row_count = sql.matches("(?").count();
        if row_count == 0 || params.is_empty() || params.len() % row_count != 0 {
            return Err(StorageError::Rejected(format!(
                "{} parameters do not fill {} rows",
                params.len(),
                row_count
            )));
        }
        let width = params.len() / row_count;
        lock(&self.inserted_rows).extend(params.chunks(width).map(<[SqlValue]>::to_vec));
        Ok(row_count as u64)
    }

    async fn describe_columns(&self, table: &str) -> StorageResult<Vec<StoredColumn>> {
        lock(&self.tables)
            .get(table)
            .cloned()
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }

    async fn apply_schema_change(&self, table: &str, change: &SchemaChange) -> StorageResult<()> {
        let sql = change.to_sql(table);
        lock(&self.statements).push(sql.clone());
        self.check_failure(&sql)?;

        let mut tables = lock(&self.tables);
        let columns = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;

        match change {
            SchemaChange::Add { column, sql_type } => {
                columns.push(StoredColumn::new(column.clone(), sql_type.clone()));
            }
            SchemaChange::Modify { column, sql_type } => {
                if let Some(existing) = columns.iter_mut().find(|c| &c.name == column) {
                    existing.sql_type = sql_type.clone();
                }
            }
            SchemaChange::Drop { column } => columns.retain(|c| &c.name != column),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSheet {
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// In-memory [`ArtifactStore`] with a controllable modification clock.
#[derive(Default)]
pub struct MemoryArtifacts {
    sheets: Mutex<HashMap<PathBuf, SheetRows>>,
    modified: Mutex<HashMap<PathBuf, SystemTime>>,
    written: Mutex<Vec<(PathBuf, WrittenSheet)>>,
    unreadable: Mutex<HashSet<PathBuf>>,
    clock: AtomicU64,
    reads: AtomicUsize,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> SystemTime {
        let seconds = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(seconds)
    }

    /// Store a sheet and give it a fresh modification time.
    pub fn put_sheet(&self, path: impl AsRef<Path>, rows: SheetRows) {
        let path = path.as_ref().to_path_buf();
        lock(&self.sheets).insert(path.clone(), rows);
        let now = self.tick();
        lock(&self.modified).insert(path, now);
    }

    /// Bump the modification time without changing contents.
    pub fn touch(&self, path: impl AsRef<Path>) {
        let now = self.tick();
        lock(&self.modified).insert(path.as_ref().to_path_buf(), now);
    }

    /// Make stat calls fail while reads still succeed.
    pub fn forget_modified(&self, path: impl AsRef<Path>) {
        lock(&self.modified).remove(path.as_ref());
    }

    /// Keep the file visible but make reads fail.
    pub fn set_unreadable(&self, path: impl AsRef<Path>, unreadable: bool) {
        let path = path.as_ref().to_path_buf();
        let mut set = lock(&self.unreadable);
        if unreadable {
            set.insert(path);
        } else {
            set.remove(&path);
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<(PathBuf, WrittenSheet)> {
        lock(&self.written).clone()
    }
}

impl ArtifactStore for MemoryArtifacts {
    fn exists(&self, path: &Path) -> bool {
        lock(&self.sheets).contains_key(path)
    }

    fn read_first_sheet(&self, path: &Path) -> ArtifactResult<SheetRows> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if lock(&self.unreadable).contains(path) {
            return Err(ArtifactError::Read {
                path: path.display().to_string(),
                message: "simulated corrupt workbook".to_string(),
            });
        }
        lock(&self.sheets)
            .get(path)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(path.display().to_string()))
    }

    fn modified_time(&self, path: &Path) -> ArtifactResult<SystemTime> {
        lock(&self.modified)
            .get(path)
            .copied()
            .ok_or_else(|| ArtifactError::NotFound(path.display().to_string()))
    }

    fn write_sheet(
        &self,
        path: &Path,
        sheet_name: &str,
        headers: &[String],
        rows: &[Vec<SqlValue>],
    ) -> ArtifactResult<PathBuf> {
        lock(&self.written).push((
            path.to_path_buf(),
            WrittenSheet {
                sheet_name: sheet_name.to_string(),
                headers: headers.to_vec(),
                rows: rows.to_vec(),
            },
        ));
        Ok(path.to_path_buf())
    }

    fn copy(&self, from: &Path, to: &Path) -> ArtifactResult<()> {
        let rows = self.read_first_sheet(from)?;
        self.put_sheet(to, rows);
        Ok(())
    }
}

/// String cell; an empty string becomes an empty cell.
pub fn cell(value: &str) -> Data {
    if value.is_empty() {
        Data::Empty
    } else {
        Data::String(value.to_string())
    }
}

pub fn sheet(rows: &[&[&str]]) -> SheetRows {
    rows.iter()
        .map(|row| row.iter().map(|value| cell(value)).collect())
        .collect()
}

/// `Name:TEXT, Age:INT, Country:TEXT` with Country limited to India and USA.
pub fn sample_template_rows() -> SheetRows {
    sheet(&[
        &["Name", "Age", "Country"],
        &["TEXT", "INT", "TEXT"],
        &["", "", "India, USA"],
    ])
}
