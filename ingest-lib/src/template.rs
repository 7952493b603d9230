//! Template Store: turns the operator-supplied template workbook into an
//! ordered column list.
//!
//! Row 0 of the first sheet names the columns, row 1 (optional) carries a type
//! tag per column. Later rows hold allowed values and are read by
//! [`crate::validation_cache`].

use calamine::Data;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ERROR_COLUMN_NAME;
use crate::artifacts::{ArtifactStore, SheetRows};
use crate::error::{ArtifactError, IngestError, Result};
use crate::utils::{sanitize_column_name, write_error_to_log};

/// Sheet row holding the type tags, whatever they contain.
pub const TYPE_ROW: usize = 1;

/// First sheet row listing allowed values.
pub const FIRST_VALUE_ROW: usize = TYPE_ROW + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Int,
    Float,
    Double,
    Date,
    Text,
}

impl ColumnType {
    /// Parse a template type tag. Unknown or missing tags are `Text`.
    pub fn from_tag(tag: Option<&str>) -> Self {
        tag.and_then(Self::parse_tag).unwrap_or(ColumnType::Text)
    }

    /// Strict form of [`ColumnType::from_tag`]: `None` for anything unrecognized.
    pub fn parse_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_uppercase().as_str() {
            "INT" => Some(ColumnType::Int),
            "FLOAT" => Some(ColumnType::Float),
            "DOUBLE" => Some(ColumnType::Double),
            "DATE" => Some(ColumnType::Date),
            "TEXT" => Some(ColumnType::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "INT",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Date => "DATE",
            ColumnType::Text => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub position: usize,
}

/// Ordered column list derived from one snapshot of the template.
///
/// Two definitions are equal when their ordered `(name, type)` sequences are equal.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct TemplateDefinition {
    columns: Vec<ColumnDescriptor>,
}

impl PartialEq for TemplateDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name == b.name && a.column_type == b.column_type)
    }
}

impl Eq for TemplateDefinition {}

impl TemplateDefinition {
    /// Build a definition from `(name, type)` pairs, assigning positions in order.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        TemplateDefinition {
            columns: columns
                .into_iter()
                .enumerate()
                .map(|(position, (name, column_type))| ColumnDescriptor {
                    name: name.into(),
                    column_type,
                    position,
                })
                .collect(),
        }
    }

    /// Parse the header and type rows of a template sheet.
    pub fn from_rows(rows: &SheetRows) -> Result<Self> {
        let header_row = rows
            .first()
            .ok_or_else(|| IngestError::TemplateMalformed("the first sheet is empty".to_string()))?;

        let header_len = header_row
            .iter()
            .rposition(|cell| !is_blank(cell))
            .map(|last| last + 1)
            .ok_or_else(|| IngestError::TemplateMalformed("the header row is empty".to_string()))?;

        let type_row = rows.get(TYPE_ROW);
        let mut columns = Vec::with_capacity(header_len);

        for (position, cell) in header_row.iter().take(header_len).enumerate() {
            let raw = cell.to_string();
            let name = sanitize_column_name(raw.trim());
            if name.is_empty() {
                return Err(IngestError::TemplateMalformed(format!(
                    "column {} has no usable name (got \"{}\")",
                    position + 1,
                    raw
                )));
            }
            if name == ERROR_COLUMN_NAME {
                return Err(IngestError::ReservedColumnPresent);
            }

            let tag = type_row
                .and_then(|row| row.get(position))
                .and_then(|cell| match cell {
                    Data::String(s) => Some(s.as_str()),
                    _ => None,
                });

            columns.push(ColumnDescriptor {
                name,
                column_type: ColumnType::from_tag(tag),
                position,
            });
        }

        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        check_duplicate_names(&names)?;

        Ok(TemplateDefinition { columns })
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnDescriptor> {
        self.columns.iter()
    }

    pub fn column(&self, position: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(position)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Reject templates whose sanitized column names collide.
fn check_duplicate_names(names: &[String]) -> Result<()> {
    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, name) in names.iter().enumerate() {
        positions.entry(name.as_str()).or_default().push(index);
    }

    let mut duplicates: Vec<(&str, Vec<usize>)> = positions
        .into_iter()
        .filter(|(_, cols)| cols.len() > 1)
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    duplicates.sort_by_key(|(_, cols)| cols[0]);

    let message = format!(
        "duplicate column names:\n{}",
        duplicates
            .into_iter()
            .map(|(name, cols)| {
                let columns_str = cols
                    .iter()
                    .map(|p| format!("column {}", p + 1))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("  • '{}' appears in: {}", name, columns_str)
            })
            .collect::<Vec<_>>()
            .join("\n")
    );

    write_error_to_log("Template Duplicate Column Error", &message);
    Err(IngestError::TemplateMalformed(message))
}

/// Reads the template artifact. No caching: every call re-reads the file.
#[derive(Clone)]
pub struct TemplateStore {
    artifacts: Arc<dyn ArtifactStore>,
    path: PathBuf,
}

impl TemplateStore {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, path: impl Into<PathBuf>) -> Self {
        TemplateStore {
            artifacts,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// Read the raw rows of the template's first sheet.
    pub fn read_rows(&self) -> Result<SheetRows> {
        if !self.artifacts.exists(&self.path) {
            return Err(IngestError::TemplateMissing(self.path.display().to_string()));
        }

        self.artifacts
            .read_first_sheet(&self.path)
            .map_err(|e| match e {
                ArtifactError::NotFound(path) => IngestError::TemplateMissing(path),
                other => IngestError::TemplateMalformed(other.to_string()),
            })
    }

    pub fn get_template_definition(&self) -> Result<TemplateDefinition> {
        let rows = self.read_rows()?;
        TemplateDefinition::from_rows(&rows)
    }

    /// Replace the live template with `candidate` after checking that it parses.
    ///
    /// Returns the definition of the new template. The caller is responsible for
    /// reconciling the schema afterwards.
    pub fn replace_template(&self, candidate: &Path) -> Result<TemplateDefinition> {
        let is_xlsx = candidate
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
        if !is_xlsx {
            return Err(IngestError::FileInvalid(
                "Only .xlsx files are allowed as templates".to_string(),
            ));
        }

        let rows = self
            .artifacts
            .read_first_sheet(candidate)
            .map_err(|e| IngestError::FileInvalid(e.to_string()))?;
        let definition = TemplateDefinition::from_rows(&rows)?;

        self.artifacts.copy(candidate, &self.path)?;
        tracing::info!(
            template = %self.path.display(),
            columns = definition.len(),
            "Template replaced"
        );
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryArtifacts, sample_template_rows, sheet};

    fn text(s: &str) -> Data {
        Data::String(s.to_string())
    }

    #[test]
    fn test_header_and_type_rows() {
        let rows = vec![
            vec![text("Name"), text("Age"), text("Joined"), text("Score")],
            vec![text("text"), text("int"), text(" date "), text("Double")],
        ];
        let definition = TemplateDefinition::from_rows(&rows).unwrap();

        assert_eq!(definition.names(), vec!["Name", "Age", "Joined", "Score"]);
        let types: Vec<ColumnType> = definition.iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![ColumnType::Text, ColumnType::Int, ColumnType::Date, ColumnType::Double]
        );
        let positions: Vec<usize> = definition.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_missing_or_unknown_type_tags_default_to_text() {
        let rows = vec![
            vec![text("A"), text("B"), text("C")],
            vec![text("BLOB"), Data::Float(3.0)],
        ];
        let definition = TemplateDefinition::from_rows(&rows).unwrap();
        assert!(definition.iter().all(|c| c.column_type == ColumnType::Text));

        let header_only = vec![vec![text("A"), text("B")]];
        let definition = TemplateDefinition::from_rows(&header_only).unwrap();
        assert_eq!(definition.len(), 2);
        assert!(definition.iter().all(|c| c.column_type == ColumnType::Text));
    }

    #[test]
    fn test_header_names_are_sanitized() {
        let rows = vec![vec![text("Customer Name"), text("SAP-ID"), Data::Empty]];
        let definition = TemplateDefinition::from_rows(&rows).unwrap();
        assert_eq!(definition.names(), vec!["CustomerName", "SAPID"]);
    }

    #[test]
    fn test_empty_sheet_is_malformed() {
        let err = TemplateDefinition::from_rows(&Vec::new()).unwrap_err();
        assert!(matches!(err, IngestError::TemplateMalformed(_)));

        let err = TemplateDefinition::from_rows(&vec![vec![Data::Empty, text("  ")]]).unwrap_err();
        assert!(matches!(err, IngestError::TemplateMalformed(_)));
    }

    #[test]
    fn test_unusable_header_is_malformed() {
        let rows = vec![vec![text("Name"), text("(%)")]];
        let err = TemplateDefinition::from_rows(&rows).unwrap_err();
        assert!(err.to_string().contains("column 2"));
    }

    #[test]
    fn test_duplicate_names_are_malformed() {
        let rows = vec![vec![text("Name"), text("Age"), text("Na me")]];
        let err = TemplateDefinition::from_rows(&rows).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'Name' appears in: column 1, column 3"));
    }

    #[test]
    fn test_reserved_error_column_is_rejected() {
        let rows = vec![vec![text("Name"), text("Error")]];
        let err = TemplateDefinition::from_rows(&rows).unwrap_err();
        assert!(matches!(err, IngestError::ReservedColumnPresent));
    }

    #[test]
    fn test_equality_ignores_positions_but_not_order() {
        let a = TemplateDefinition::new([("Name", ColumnType::Text), ("Age", ColumnType::Int)]);
        let b = TemplateDefinition::new([("Name", ColumnType::Text), ("Age", ColumnType::Int)]);
        let reordered =
            TemplateDefinition::new([("Age", ColumnType::Int), ("Name", ColumnType::Text)]);
        let retyped = TemplateDefinition::new([("Name", ColumnType::Text), ("Age", ColumnType::Text)]);

        assert_eq!(a, b);
        assert_ne!(a, reordered);
        assert_ne!(a, retyped);
    }

    fn memory_store() -> (Arc<MemoryArtifacts>, TemplateStore) {
        let artifacts = Arc::new(MemoryArtifacts::new());
        artifacts.put_sheet("template.xlsx", sample_template_rows());
        let store = TemplateStore::new(artifacts.clone(), "template.xlsx");
        (artifacts, store)
    }

    #[test]
    fn test_definition_is_stable_and_read_fresh_each_call() {
        let (artifacts, store) = memory_store();
        let before = artifacts.read_count();

        let first = store.get_template_definition().unwrap();
        let second = store.get_template_definition().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.names(), vec!["Name", "Age", "Country"]);
        assert_eq!(artifacts.read_count(), before + 2);

        artifacts.put_sheet(
            "template.xlsx",
            sheet(&[&["Name", "Region"], &["TEXT", "TEXT"]]),
        );
        let third = store.get_template_definition().unwrap();
        assert_eq!(third.names(), vec!["Name", "Region"]);
    }

    #[test]
    fn test_unreadable_template_is_malformed() {
        let (artifacts, store) = memory_store();
        artifacts.set_unreadable("template.xlsx", true);

        let err = store.read_rows().unwrap_err();
        assert!(matches!(err, IngestError::TemplateMalformed(_)));
        assert!(matches!(
            store.get_template_definition(),
            Err(IngestError::TemplateMalformed(_))
        ));
    }

    #[test]
    fn test_absent_template_is_missing() {
        let artifacts = Arc::new(MemoryArtifacts::new());
        let store = TemplateStore::new(artifacts, "template.xlsx");
        assert!(matches!(
            store.get_template_definition(),
            Err(IngestError::TemplateMissing(_))
        ));
    }

    #[test]
    fn test_column_type_tags() {
        assert_eq!(ColumnType::from_tag(Some("int")), ColumnType::Int);
        assert_eq!(ColumnType::from_tag(Some("FLOAT")), ColumnType::Float);
        assert_eq!(ColumnType::from_tag(Some("varchar")), ColumnType::Text);
        assert_eq!(ColumnType::from_tag(None), ColumnType::Text);
    }
}
