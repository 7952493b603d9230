//! Allowed-Value Cache.
//!
//! The data rows of the template list, per column, the values an upload may
//! use (comma separated within a cell). Building that map means parsing the
//! whole workbook, so the result is kept until the template's modification
//! time changes.

use calamine::Data;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use crate::artifacts::{ArtifactStore, SheetRows};
use crate::error::{IngestError, Result};
use crate::template::FIRST_VALUE_ROW;
use crate::utils::{normalize_token, sanitize_column_name, system_time_to_utc};

/// Column name to permitted normalized values. A column that is absent is unconstrained.
pub type AllowedValueMap = HashMap<String, BTreeSet<String>>;

/// Tokens that are accepted in every constrained column and never stored in a set.
pub const IMPLICIT_ALLOWED: [&str; 2] = ["optional", "none"];

pub fn is_implicitly_allowed(normalized: &str) -> bool {
    IMPLICIT_ALLOWED.contains(&normalized)
}

/// One build of the allowed-value map together with the template version it came from.
#[derive(Debug, Clone)]
pub struct ValidationSnapshot {
    pub allowed: AllowedValueMap,
    pub header: Vec<String>,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cached: bool,
    pub last_modified: Option<DateTime<Utc>>,
    pub build_count: u64,
}

/// Scan every data row of the template and collect the allowed values per column.
///
/// Row 1 is the type row and never constrains a column, even when its tags are unknown.
pub fn build_allowed_values(rows: &SheetRows) -> Result<(AllowedValueMap, Vec<String>)> {
    let header: Vec<String> = rows
        .first()
        .map(|row| {
            row.iter()
                .map(|cell| sanitize_column_name(cell.to_string().trim()))
                .collect()
        })
        .unwrap_or_default();

    if header.iter().all(|name| name.is_empty()) {
        return Err(IngestError::ValidationMapBuildFailed(
            "the template has no header row".to_string(),
        ));
    }

    let mut allowed = AllowedValueMap::new();
    for (col_idx, name) in header.iter().enumerate() {
        if name.is_empty() {
            continue;
        }

        let mut values = BTreeSet::new();
        for row in rows.iter().skip(FIRST_VALUE_ROW) {
            if let Some(Data::String(cell)) = row.get(col_idx) {
                values.extend(
                    cell.split(',')
                        .map(normalize_token)
                        .filter(|v| !v.is_empty() && !is_implicitly_allowed(v)),
                );
            }
        }

        if !values.is_empty() {
            allowed.insert(name.clone(), values);
        }
    }

    Ok((allowed, header))
}

/// Shared cache of the allowed-value map, keyed by the template's modification time.
///
/// Readers never wait for a rebuild: concurrent rebuilds race and the last one
/// to finish wins, which is fine because they all read the same file version.
pub struct AllowedValueCache {
    artifacts: Arc<dyn ArtifactStore>,
    path: PathBuf,
    snapshot: RwLock<Option<Arc<ValidationSnapshot>>>,
    build_count: AtomicU64,
}

impl AllowedValueCache {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, path: impl Into<PathBuf>) -> Self {
        AllowedValueCache {
            artifacts,
            path: path.into(),
            snapshot: RwLock::new(None),
            build_count: AtomicU64::new(0),
        }
    }

    /// Return the allowed-value map for the current template version, rebuilding it
    /// if the template changed since the last build.
    pub fn get_validation_map(&self) -> Result<Arc<ValidationSnapshot>> {
        let modified = self
            .artifacts
            .modified_time(&self.path)
            .map_err(|e| IngestError::ValidationMapBuildFailed(e.to_string()))?;

        if let Some(cached) = self.cached() {
            if cached.modified == modified {
                tracing::debug!("Using cached validation map");
                return Ok(cached);
            }
        }

        tracing::info!(template = %self.path.display(), "Building new validation map");
        let snapshot = Arc::new(self.build(modified).inspect_err(|e| {
            tracing::error!(error = %e, "Failed to build validation map");
        })?);

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Drop the cached map; the next lookup rebuilds it.
    pub fn invalidate(&self) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!("Validation cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let cached = self.cached();
        CacheStats {
            cached: cached.is_some(),
            last_modified: cached.map(|s| system_time_to_utc(s.modified)),
            build_count: self.build_count.load(Ordering::Relaxed),
        }
    }

    fn cached(&self) -> Option<Arc<ValidationSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn build(&self, modified: SystemTime) -> Result<ValidationSnapshot> {
        let rows = self
            .artifacts
            .read_first_sheet(&self.path)
            .map_err(|e| IngestError::ValidationMapBuildFailed(e.to_string()))?;
        let (allowed, header) = build_allowed_values(&rows)?;

        self.build_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            constrained_columns = allowed.len(),
            "Validation map built"
        );

        Ok(ValidationSnapshot {
            allowed,
            header,
            modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Data {
        Data::String(s.to_string())
    }

    #[test]
    fn test_values_are_split_trimmed_and_lowercased() {
        let rows = vec![
            vec![text("Name"), text("Country"), text("Channel")],
            vec![text("TEXT"), text("TEXT"), text("TEXT")],
            vec![Data::Empty, text("India, USA"), text("Retail,optional")],
            vec![Data::Empty, text(" usa ,Germany"), text("NONE")],
        ];
        let (allowed, header) = build_allowed_values(&rows).unwrap();

        assert_eq!(header, vec!["Name", "Country", "Channel"]);
        let country: Vec<&str> = allowed["Country"].iter().map(String::as_str).collect();
        assert_eq!(country, vec!["germany", "india", "usa"]);
        let channel: Vec<&str> = allowed["Channel"].iter().map(String::as_str).collect();
        assert_eq!(channel, vec!["retail"]);
        assert!(!allowed.contains_key("Name"));
    }

    #[test]
    fn test_type_row_is_not_scanned() {
        let rows = vec![
            vec![text("Name"), text("Age"), text("Country")],
            vec![text("TEXT"), text("INT"), text("TEXT")],
            vec![Data::Empty, Data::Empty, text("India, USA")],
        ];
        let (allowed, _) = build_allowed_values(&rows).unwrap();

        assert_eq!(allowed.len(), 1);
        let country: Vec<&str> = allowed["Country"].iter().map(String::as_str).collect();
        assert_eq!(country, vec!["india", "usa"]);
    }

    #[test]
    fn test_unknown_type_tags_are_not_scanned() {
        let rows = vec![
            vec![text("Name"), text("Age"), text("Country")],
            vec![text("TEXT"), text("INT"), text("STRING")],
            vec![Data::Empty, Data::Empty, text("India, USA")],
        ];
        let (allowed, _) = build_allowed_values(&rows).unwrap();

        assert!(!allowed.contains_key("Name"));
        assert!(!allowed.contains_key("Age"));
        let country: Vec<&str> = allowed["Country"].iter().map(String::as_str).collect();
        assert_eq!(country, vec!["india", "usa"]);
    }

    #[test]
    fn test_columns_without_values_are_unconstrained() {
        let rows = vec![
            vec![text("Name"), text("Age")],
            vec![text("TEXT"), text("INT")],
            vec![Data::Empty, Data::Float(30.0)],
            vec![text("optional"), text(" , ")],
        ];
        let (allowed, _) = build_allowed_values(&rows).unwrap();
        assert!(allowed.is_empty());
    }

    #[test]
    fn test_missing_header_fails() {
        let err = build_allowed_values(&Vec::new()).unwrap_err();
        assert!(matches!(err, IngestError::ValidationMapBuildFailed(_)));
    }

    #[test]
    fn test_implicit_tokens() {
        assert!(is_implicitly_allowed("optional"));
        assert!(is_implicitly_allowed("none"));
        assert!(!is_implicitly_allowed("None"));
        assert!(!is_implicitly_allowed(""));
    }
}
