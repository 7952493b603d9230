//! Schema Reconciler: converges the live data table onto the template.
//!
//! The diff is computed by [`plan_schema_changes`] over two plain column lists,
//! then applied one statement per column. There is no transaction around the
//! statements (MySQL DDL commits implicitly anyway), so a failure part way
//! leaves the table partially converged until the next run.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::{IngestError, Result};
use crate::storage::Storage;
use crate::template::{ColumnType, TemplateDefinition, TemplateStore};
use crate::utils::write_error_to_log;

/// SQL type used for every column that is not numeric or a date.
pub const STRING_SQL_TYPE: &str = "VARCHAR(255)";

/// Map a template type to the column type it is stored as.
pub fn map_sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Int => "INT",
        ColumnType::Date => "DATE",
        ColumnType::Float | ColumnType::Double => "DOUBLE",
        ColumnType::Text => STRING_SQL_TYPE,
    }
}

/// Quote an identifier for MySQL.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// A column as it exists in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredColumn {
    pub name: String,
    pub sql_type: String,
}

impl StoredColumn {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        StoredColumn {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SchemaChange {
    Add { column: String, sql_type: String },
    Modify { column: String, sql_type: String },
    Drop { column: String },
}

impl SchemaChange {
    pub fn column(&self) -> &str {
        match self {
            SchemaChange::Add { column, .. }
            | SchemaChange::Modify { column, .. }
            | SchemaChange::Drop { column } => column,
        }
    }

    pub fn to_sql(&self, table: &str) -> String {
        let table = quote_ident(table);
        match self {
            SchemaChange::Add { column, sql_type } => format!(
                "ALTER TABLE {} ADD COLUMN {} {} NULL",
                table,
                quote_ident(column),
                sql_type
            ),
            SchemaChange::Modify { column, sql_type } => format!(
                "ALTER TABLE {} MODIFY COLUMN {} {} NULL",
                table,
                quote_ident(column),
                sql_type
            ),
            SchemaChange::Drop { column } => {
                format!("ALTER TABLE {} DROP COLUMN {}", table, quote_ident(column))
            }
        }
    }
}

/// Diff the template against the live columns.
///
/// Adds and modifies come first, in template order; drops follow in live-table
/// order. Live types are compared by containment so `INT(11)` satisfies `INT`.
pub fn plan_schema_changes(
    desired: &TemplateDefinition,
    actual: &[StoredColumn],
) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    for column in desired.iter() {
        let sql_type = map_sql_type(column.column_type);
        match actual.iter().find(|c| c.name == column.name) {
            None => changes.push(SchemaChange::Add {
                column: column.name.clone(),
                sql_type: sql_type.to_string(),
            }),
            Some(existing) if !existing.sql_type.to_uppercase().contains(sql_type) => {
                changes.push(SchemaChange::Modify {
                    column: column.name.clone(),
                    sql_type: sql_type.to_string(),
                })
            }
            Some(_) => {}
        }
    }

    for existing in actual {
        if !desired.contains(&existing.name) {
            changes.push(SchemaChange::Drop {
                column: existing.name.clone(),
            });
        }
    }

    changes
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaSyncReport {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub dropped: Vec<String>,
}

impl SchemaSyncReport {
    pub fn statement_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.dropped.len()
    }

    pub fn is_noop(&self) -> bool {
        self.statement_count() == 0
    }

    fn record(&mut self, change: &SchemaChange) {
        let column = change.column().to_string();
        match change {
            SchemaChange::Add { .. } => self.added.push(column),
            SchemaChange::Modify { .. } => self.modified.push(column),
            SchemaChange::Drop { .. } => self.dropped.push(column),
        }
    }
}

pub struct SchemaReconciler {
    storage: Arc<dyn Storage>,
    templates: TemplateStore,
    table: String,
}

impl SchemaReconciler {
    pub fn new(storage: Arc<dyn Storage>, templates: TemplateStore, table: impl Into<String>) -> Self {
        SchemaReconciler {
            storage,
            templates,
            table: table.into(),
        }
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Bring the data table in line with the current template.
    ///
    /// Running it twice without a template change issues no statements the second time.
    pub async fn sync_schema(&self) -> Result<SchemaSyncReport> {
        let definition = self.templates.get_template_definition()?;

        let actual = self
            .storage
            .describe_columns(&self.table)
            .await
            .map_err(|source| IngestError::SchemaSyncFailed {
                statement: format!("describe columns of {}", quote_ident(&self.table)),
                source,
            })?;

        let changes = plan_schema_changes(&definition, &actual);
        let mut report = SchemaSyncReport::default();

        for change in &changes {
            tracing::info!(table = %self.table, change = ?change, "Applying schema change");
            self.storage
                .apply_schema_change(&self.table, change)
                .await
                .map_err(|source| IngestError::SchemaSyncFailed {
                    statement: change.to_sql(&self.table),
                    source,
                })?;
            report.record(change);
        }

        tracing::info!(
            table = %self.table,
            added = report.added.len(),
            modified = report.modified.len(),
            dropped = report.dropped.len(),
            "Database schema synchronized with template"
        );
        Ok(report)
    }
}

/// Polls the template's modification time and re-runs schema reconciliation when it changes.
///
/// Failures are logged and left for the next detected change to retry.
pub struct TemplateWatcher {
    reconciler: Arc<SchemaReconciler>,
    interval: Duration,
    last_seen: Option<SystemTime>,
}

impl TemplateWatcher {
    pub fn new(reconciler: Arc<SchemaReconciler>, interval: Duration) -> Self {
        let last_seen = Self::current_modified(&reconciler);
        TemplateWatcher {
            reconciler,
            interval,
            last_seen,
        }
    }

    fn current_modified(reconciler: &SchemaReconciler) -> Option<SystemTime> {
        let templates = reconciler.templates();
        templates.artifacts().modified_time(templates.path()).ok()
    }

    /// Startup sync. The modification time was captured in [`TemplateWatcher::new`],
    /// so a template replaced while this runs is synced again by the next poll.
    pub async fn initial_sync(&self) -> Result<SchemaSyncReport> {
        self.reconciler.sync_schema().await
    }

    /// Check once. Returns `None` when nothing changed, otherwise the sync outcome.
    pub async fn poll_once(&mut self) -> Option<Result<SchemaSyncReport>> {
        let current = Self::current_modified(&self.reconciler)?;
        if self.last_seen == Some(current) {
            return None;
        }
        self.last_seen = Some(current);

        tracing::info!("Template file changed, syncing database schema");
        let outcome = self.reconciler.sync_schema().await;
        if let Err(e) = &outcome {
            tracing::error!(error = %e, "Failed to synchronize database schema");
            write_error_to_log("Schema Sync Error", &e.to_string());
        }
        Some(outcome)
    }

    /// Poll until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Template watcher stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let _ = self.poll_once().await;
                }
            }
        }
    }
}
