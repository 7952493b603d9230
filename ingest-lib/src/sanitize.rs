//! Per-type cell sanitation.
//!
//! Every cell of an accepted row passes through [`sanitize_cell`] before it is
//! compared against the allowed values or bound into an insert statement.
//! Values that do not fit their declared type become `NULL` rather than an
//! error; constraints on the column decide whether that matters.

use calamine::Data;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::fmt;

use crate::template::ColumnType;
use crate::utils::truncate_chars;

/// Maximum stored length of a text cell; matches the `VARCHAR(255)` column type.
pub const MAX_TEXT_LEN: usize = 255;

/// Latest Excel serial date (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y", "%d.%m.%Y"];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// A sanitized cell value, ready to be bound as a query parameter or written to a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Trimmed, lower-cased string form used for allowed-value comparisons.
    /// `Null` normalizes to the empty string.
    pub fn normalized(&self) -> String {
        self.to_string().trim().to_lowercase()
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Number(n) => write!(f, "{}", n),
            SqlValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            SqlValue::Text(s) => f.write_str(s),
        }
    }
}

/// Convert a raw spreadsheet cell into the value stored for a column of `column_type`.
pub fn sanitize_cell(cell: &Data, column_type: ColumnType) -> SqlValue {
    if matches!(cell, Data::Empty) {
        return SqlValue::Null;
    }

    match column_type {
        ColumnType::Int | ColumnType::Float | ColumnType::Double => sanitize_number(cell),
        ColumnType::Date => sanitize_date(cell),
        ColumnType::Text => sanitize_text(cell),
    }
}

fn sanitize_number(cell: &Data) -> SqlValue {
    let number = match cell {
        Data::Int(i) => Some(*i as f64),
        Data::Float(f) => Some(*f),
        Data::DateTime(dt) => Some(dt.as_f64()),
        Data::String(s) | Data::DateTimeIso(s) => s.trim().parse::<f64>().ok(),
        Data::Bool(_) | Data::DurationIso(_) | Data::Error(_) | Data::Empty => None,
    };

    match number {
        Some(n) if n.is_finite() => SqlValue::Number(n),
        _ => SqlValue::Null,
    }
}

fn sanitize_date(cell: &Data) -> SqlValue {
    let date = match cell {
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64()).map(|dt| dt.date()),
        Data::Float(f) => excel_serial_to_datetime(*f).map(|dt| dt.date()),
        Data::Int(i) => excel_serial_to_datetime(*i as f64).map(|dt| dt.date()),
        Data::String(s) | Data::DateTimeIso(s) => parse_date_str(s),
        _ => None,
    };

    date.map(SqlValue::Date).unwrap_or(SqlValue::Null)
}

fn sanitize_text(cell: &Data) -> SqlValue {
    let text = match cell {
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::DateTime(dt) => match excel_serial_to_datetime(dt.as_f64()) {
            Some(parsed) => parsed.to_string(),
            None => return SqlValue::Null,
        },
        Data::Error(_) | Data::Empty => return SqlValue::Null,
        other => other.to_string(),
    };

    SqlValue::Text(truncate_chars(text.trim(), MAX_TEXT_LEN))
}

/// Parse the date formats users commonly type into spreadsheets.
pub fn parse_date_str(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.date_naive());
    }

    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.date());
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Excel stores dates as days since 1899-12-30 with the time as the fraction.
///
/// Excel counts a 1900-02-29 that never existed (serial 60), so serials below it
/// are shifted by a day and serial 60 itself has no date.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || !(0.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }

    let excel_base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let seconds = ((serial - days as f64) * 86400.0).round() as i64;
    let offset = match days {
        60 => return None,
        0..60 => days + 1,
        _ => days,
    };
    excel_base
        .checked_add_signed(TimeDelta::try_days(offset)?)?
        .checked_add_signed(TimeDelta::try_seconds(seconds)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_columns_parse_or_null() {
        assert_eq!(
            sanitize_cell(&Data::String(" 30 ".to_string()), ColumnType::Int),
            SqlValue::Number(30.0)
        );
        assert_eq!(
            sanitize_cell(&Data::String("thirty".to_string()), ColumnType::Int),
            SqlValue::Null
        );
        assert_eq!(
            sanitize_cell(&Data::Float(2.5), ColumnType::Double),
            SqlValue::Number(2.5)
        );
        assert_eq!(sanitize_cell(&Data::Int(7), ColumnType::Float), SqlValue::Number(7.0));
        assert_eq!(
            sanitize_cell(&Data::String("NaN".to_string()), ColumnType::Float),
            SqlValue::Null
        );
        assert_eq!(sanitize_cell(&Data::Bool(true), ColumnType::Int), SqlValue::Null);
    }

    #[test]
    fn test_empty_cell_is_null_for_every_type() {
        for column_type in [
            ColumnType::Int,
            ColumnType::Float,
            ColumnType::Double,
            ColumnType::Date,
            ColumnType::Text,
        ] {
            assert_eq!(sanitize_cell(&Data::Empty, column_type), SqlValue::Null);
        }
    }

    #[test]
    fn test_date_columns_accept_strings_and_serials() {
        let expected = NaiveDate::from_ymd_opt(2024, 9, 15).unwrap();
        assert_eq!(
            sanitize_cell(&Data::String("2024-09-15".to_string()), ColumnType::Date),
            SqlValue::Date(expected)
        );
        assert_eq!(
            sanitize_cell(&Data::String("09/15/2024".to_string()), ColumnType::Date),
            SqlValue::Date(expected)
        );
        assert_eq!(
            sanitize_cell(&Data::String("2024-09-15T10:30:00Z".to_string()), ColumnType::Date),
            SqlValue::Date(expected)
        );
        // Excel serial 45550 is 2024-09-15
        assert_eq!(
            sanitize_cell(&Data::Float(45550.5), ColumnType::Date),
            SqlValue::Date(expected)
        );
        assert_eq!(
            sanitize_cell(&Data::String("not a date".to_string()), ColumnType::Date),
            SqlValue::Null
        );
    }

    #[test]
    fn test_excel_serial_bounds() {
        assert!(excel_serial_to_datetime(-1.0).is_none());
        assert!(excel_serial_to_datetime(f64::INFINITY).is_none());
        assert!(excel_serial_to_datetime(1e12).is_none());
        let noon = excel_serial_to_datetime(45550.5).unwrap();
        assert_eq!(noon.to_string(), "2024-09-15 12:00:00");
    }

    #[test]
    fn test_excel_serials_around_the_1900_leap_day() {
        let date = |serial: f64| excel_serial_to_datetime(serial).map(|dt| dt.date().to_string());
        assert_eq!(date(1.0).as_deref(), Some("1900-01-01"));
        assert_eq!(date(59.0).as_deref(), Some("1900-02-28"));
        assert_eq!(date(60.0), None);
        assert_eq!(date(61.0).as_deref(), Some("1900-03-01"));
        assert_eq!(
            sanitize_cell(&Data::Float(32.0), ColumnType::Date),
            SqlValue::Date(NaiveDate::from_ymd_opt(1900, 2, 1).unwrap())
        );
    }

    #[test]
    fn test_text_is_trimmed_and_bounded() {
        assert_eq!(
            sanitize_cell(&Data::String("  India ".to_string()), ColumnType::Text),
            SqlValue::Text("India".to_string())
        );
        let long = "x".repeat(MAX_TEXT_LEN + 50);
        match sanitize_cell(&Data::String(long), ColumnType::Text) {
            SqlValue::Text(s) => assert_eq!(s.chars().count(), MAX_TEXT_LEN),
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(
            sanitize_cell(&Data::Float(123.0), ColumnType::Text),
            SqlValue::Text("123".to_string())
        );
    }

    #[test]
    fn test_normalized_forms() {
        assert_eq!(SqlValue::Null.normalized(), "");
        assert_eq!(SqlValue::Number(30.0).normalized(), "30");
        assert_eq!(SqlValue::Number(1.5).normalized(), "1.5");
        assert_eq!(SqlValue::Text(" USA ".to_string()).normalized(), "usa");
        assert_eq!(
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).normalized(),
            "2024-01-02"
        );
    }
}
