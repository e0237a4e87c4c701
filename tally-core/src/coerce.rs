//! Column coercions applied after fetch.
//!
//! The API returns display text ("$1,234.50", "2024-01-05T00:00:00.000+08:00"),
//! so numeric and date columns have to be parsed explicitly.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::table::Table;
use crate::value::Value;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoerceError {
    #[error("column not found: {column}")]
    MissingColumn { column: String },

    #[error("row {row}: '{raw}' in column {column} is not a number")]
    InvalidNumber {
        column: String,
        row: usize,
        raw: String,
    },

    #[error("row {row}: '{raw}' in column {column} is not a date")]
    InvalidDate {
        column: String,
        row: usize,
        raw: String,
    },
}

/// Parse a currency cell: `$` and `,` are stripped, `(x)` means `-x`.
pub fn parse_currency(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let (negative, s) = match s.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, s),
    };
    let cleaned: String = s.chars().filter(|c| *c != '$' && *c != ',').collect();
    let amount: f64 = cleaned.trim().parse().ok().filter(|v: &f64| v.is_finite())?;
    Some(if negative { -amount } else { amount })
}

/// Parse the date spellings the API and spreadsheets produce.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        // local calendar date of the cell, not the UTC date
        return Some(dt.date_naive());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ndt.date());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.date());
    }
    NaiveDate::parse_from_str(s, "%m/%d/%Y").ok()
}

pub fn coerce_currency(table: &mut Table, column: &str) -> Result<(), CoerceError> {
    table.map_column(column, |row, v| match v {
        Value::Null => Ok(Value::Null),
        Value::Integer(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Text(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::Text(s) => parse_currency(s)
            .map(Value::Float)
            .ok_or_else(|| CoerceError::InvalidNumber {
                column: column.to_string(),
                row,
                raw: s.clone(),
            }),
        other => Err(CoerceError::InvalidNumber {
            column: column.to_string(),
            row,
            raw: other.to_string(),
        }),
    })
}

pub fn coerce_date(table: &mut Table, column: &str) -> Result<(), CoerceError> {
    table.map_column(column, |row, v| match v {
        Value::Null => Ok(Value::Null),
        Value::Date(d) => Ok(Value::Date(*d)),
        Value::Text(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::Text(s) => parse_date(s)
            .map(Value::Date)
            .ok_or_else(|| CoerceError::InvalidDate {
                column: column.to_string(),
                row,
                raw: s.clone(),
            }),
        other => Err(CoerceError::InvalidDate {
            column: column.to_string(),
            row,
            raw: other.to_string(),
        }),
    })
}

/// Normalize an identity column to one representation.
///
/// If every non-null key is integral the column becomes `Integer`, if every
/// key is numeric it becomes `Float`, otherwise trimmed `Text`.
pub fn coerce_identity(table: &mut Table, column: &str) -> Result<(), CoerceError> {
    if !table.has_column(column) {
        return Err(CoerceError::MissingColumn {
            column: column.to_string(),
        });
    }

    let keys: Vec<Option<String>> = table
        .column_values(column)
        .map(Value::identity_key)
        .collect();
    let present = || keys.iter().flatten();
    let all_int = present().all(|k| k.parse::<i64>().is_ok());
    // integer keys past i64 stay text; f64 would round them
    let all_num = present()
        .all(|k| k.parse::<i64>().is_ok() || (k.contains('.') && k.parse::<f64>().is_ok()));

    let mut keys = keys.into_iter();
    table.map_column(column, |_, _| {
        let key = keys.next().flatten();
        Ok(match key {
            None => Value::Null,
            Some(k) if all_int => k.parse().map(Value::Integer).unwrap_or(Value::Text(k)),
            Some(k) if all_num => k.parse().map(Value::Float).unwrap_or(Value::Text(k)),
            Some(k) => Value::Text(k),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::row;

    fn one_col(name: &str, cells: &[&str]) -> Table {
        Table::with_rows(
            vec![name.to_string()],
            cells.iter().map(|c| row([(name, *c)])),
        )
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("$1,234.50"), Some(1234.50));
        assert_eq!(parse_currency("-$14.05"), Some(-14.05));
        assert_eq!(parse_currency("($5.00)"), Some(-5.0));
        assert_eq!(parse_currency(" 12 "), Some(12.0));
        assert_eq!(parse_currency("abc"), None);
    }

    #[test]
    fn test_parse_date_spellings() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(parse_date("2024-01-05"), Some(d));
        assert_eq!(parse_date("2024-01-05T00:00:00.000+08:00"), Some(d));
        assert_eq!(parse_date("2024-01-05T13:45:00"), Some(d));
        assert_eq!(parse_date("01/05/2024"), Some(d));
        assert_eq!(parse_date("Jan 5"), None);
    }

    #[test]
    fn test_coerce_currency_column() {
        let mut t = one_col("Value", &["$1,000.00", "", "$2.5"]);
        coerce_currency(&mut t, "Value").unwrap();
        let vals: Vec<_> = t.column_values("Value").cloned().collect();
        assert_eq!(vals, vec![Value::Float(1000.0), Value::Null, Value::Float(2.5)]);
    }

    #[test]
    fn test_coerce_currency_reports_row() {
        let mut t = one_col("Value", &["$1", "n/a"]);
        let err = coerce_currency(&mut t, "Value").unwrap_err();
        assert_eq!(
            err,
            CoerceError::InvalidNumber {
                column: "Value".to_string(),
                row: 1,
                raw: "n/a".to_string()
            }
        );
    }

    #[test]
    fn test_coerce_date_missing_column() {
        let mut t = one_col("Value", &["$1"]);
        assert!(matches!(
            coerce_date(&mut t, "Date"),
            Err(CoerceError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_coerce_identity_numeric() {
        let mut t = Table::with_rows(
            vec!["UUID".to_string()],
            [
                row([("UUID", Value::text("17"))]),
                row([("UUID", Value::Float(18.0))]),
                row([("UUID", Value::Null)]),
            ],
        );
        coerce_identity(&mut t, "UUID").unwrap();
        let vals: Vec<_> = t.column_values("UUID").cloned().collect();
        assert_eq!(vals, vec![Value::Integer(17), Value::Integer(18), Value::Null]);
    }

    #[test]
    fn test_coerce_identity_keeps_wide_integers_exact() {
        let mut t = one_col("id", &["12345678901234567890123", "1.5"]);
        coerce_identity(&mut t, "id").unwrap();
        let vals: Vec<_> = t.column_values("id").cloned().collect();
        assert_eq!(
            vals,
            vec![Value::text("12345678901234567890123"), Value::text("1.5")]
        );
    }

    #[test]
    fn test_coerce_identity_mixed_falls_back_to_text() {
        let mut t = one_col("id", &["17", " abc "]);
        coerce_identity(&mut t, "id").unwrap();
        let vals: Vec<_> = t.column_values("id").cloned().collect();
        assert_eq!(vals, vec![Value::text("17"), Value::text("abc")]);
    }
}
