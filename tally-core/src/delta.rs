//! Incremental diff: which fresh rows are new relative to a persisted table.
//!
//! Rows are matched on one identity column only. A fresh row whose key is
//! already stored is never part of the delta, even if its other values
//! changed: this detects new rows, it does not reconcile edits.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sink::{Selector, Sink, SinkError};
use crate::table::Table;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Persisted,
    Fresh,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Persisted => f.write_str("persisted"),
            Side::Fresh => f.write_str("fresh"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    #[error("identity column '{column}' is missing from the {side} table")]
    MissingIdentity { side: Side, column: String },
}

#[derive(Error, Debug)]
pub enum UpsertError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Delta(#[from] DeltaError),
}

/// Rows of `fresh` whose identity key does not occur in `persisted`.
///
/// The result has exactly `fresh`'s columns. Fresh rows without a key are
/// skipped since they can never be matched later.
pub fn delta(persisted: &Table, fresh: &Table, identity_column: &str) -> Result<Table, DeltaError> {
    let mut out = Table::new(fresh.columns().to_vec());
    if fresh.is_empty() {
        return Ok(out);
    }
    if !fresh.has_column(identity_column) {
        return Err(DeltaError::MissingIdentity {
            side: Side::Fresh,
            column: identity_column.to_string(),
        });
    }
    if !persisted.is_empty() && !persisted.has_column(identity_column) {
        return Err(DeltaError::MissingIdentity {
            side: Side::Persisted,
            column: identity_column.to_string(),
        });
    }

    let known: HashSet<String> = persisted
        .column_values(identity_column)
        .filter_map(Value::identity_key)
        .collect();

    let mut skipped = 0usize;
    for row in fresh.rows() {
        match row.get(identity_column).and_then(Value::identity_key) {
            Some(key) if known.contains(&key) => {}
            Some(_) => out.push(row.clone()),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(column = identity_column, skipped, "fresh rows without identity key left out of delta");
    }
    debug!(
        persisted = persisted.len(),
        fresh = fresh.len(),
        new = out.len(),
        "computed delta"
    );
    Ok(out)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub fresh: usize,
    pub persisted: usize,
    pub appended: usize,
}

/// Read everything the sink holds and return the rows that would be appended.
pub async fn plan<S: Sink>(
    sink: &S,
    fresh: &Table,
    identity_column: &str,
    selector: Option<&Selector>,
) -> Result<(Table, UpsertReport), UpsertError> {
    let persisted = sink.read_all(selector).await?;
    let new_rows = delta(&persisted, fresh, identity_column)?;
    let report = UpsertReport {
        fresh: fresh.len(),
        persisted: persisted.len(),
        appended: 0,
    };
    Ok((new_rows, report))
}

/// One bulk read, one diff, one bulk append.
pub async fn upsert<S: Sink>(
    sink: &S,
    fresh: &Table,
    identity_column: &str,
    selector: Option<&Selector>,
) -> Result<UpsertReport, UpsertError> {
    let (new_rows, mut report) = plan(sink, fresh, identity_column, selector).await?;
    report.appended = sink.append(&new_rows).await?;
    info!(
        fresh = report.fresh,
        persisted = report.persisted,
        appended = report.appended,
        "upsert complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{row, Row};
    use std::cell::RefCell;

    fn table(columns: &[&str], rows: Vec<Row>) -> Table {
        Table::with_rows(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    fn ids(t: &Table) -> Vec<String> {
        t.column_values("id").filter_map(Value::identity_key).collect()
    }

    fn numbered(range: std::ops::Range<i64>) -> Table {
        table(
            &["id", "v"],
            range.map(|i| row([("id", Value::Integer(i)), ("v", Value::text(format!("r{i}")))])).collect(),
        )
    }

    #[derive(Default)]
    struct MemorySink {
        rows: RefCell<Table>,
        appends: RefCell<usize>,
    }

    impl Sink for MemorySink {
        async fn read_all(&self, selector: Option<&Selector>) -> Result<Table, SinkError> {
            let t = self.rows.borrow().clone();
            Ok(match selector {
                Some(s) => s.apply(&t),
                None => t,
            })
        }

        async fn append(&self, rows: &Table) -> Result<usize, SinkError> {
            if rows.is_empty() {
                return Ok(0);
            }
            *self.appends.borrow_mut() += 1;
            let mut stored = self.rows.borrow_mut();
            if stored.columns().is_empty() {
                *stored = Table::new(rows.columns().to_vec());
            }
            stored.extend(rows.clone());
            Ok(rows.len())
        }
    }

    #[test]
    fn test_changed_values_are_not_surfaced() {
        let persisted = table(&["id", "v"], vec![row([("id", Value::Integer(1)), ("v", Value::text("a"))])]);
        let fresh = table(
            &["id", "v"],
            vec![
                row([("id", Value::Integer(1)), ("v", Value::text("b"))]),
                row([("id", Value::Integer(2)), ("v", Value::text("c"))]),
            ],
        );

        let d = delta(&persisted, &fresh, "id").unwrap();
        assert_eq!(d.rows(), &[row([("id", Value::Integer(2)), ("v", Value::text("c"))])]);
    }

    #[test]
    fn test_empty_persisted_yields_all_of_fresh() {
        let fresh = table(&["id"], vec![row([("id", 1i64)]), row([("id", 2i64)])]);
        let d = delta(&Table::default(), &fresh, "id").unwrap();
        assert_eq!(d, fresh);
    }

    #[test]
    fn test_empty_fresh_yields_empty_delta() {
        let persisted = numbered(0..3);
        let fresh = Table::new(vec!["id".to_string(), "v".to_string()]);
        let d = delta(&persisted, &fresh, "id").unwrap();
        assert!(d.is_empty());
        assert_eq!(d.columns(), fresh.columns());
    }

    #[test]
    fn test_disjoint_tables_delta_is_fresh() {
        let a = numbered(0..10);
        let b = numbered(10..25);
        assert_eq!(delta(&a, &b, "id").unwrap(), b);
    }

    #[test]
    fn test_self_delta_is_empty() {
        let a = numbered(0..40);
        assert!(delta(&a, &a, "id").unwrap().is_empty());
    }

    #[test]
    fn test_delta_is_subset_with_fresh_columns() {
        let persisted = table(
            &["id", "v", "stale"],
            vec![row([("id", 3i64), ("v", 0), ("stale", 9)])],
        );
        let fresh = numbered(0..6);
        let d = delta(&persisted, &fresh, "id").unwrap();

        assert_eq!(d.columns(), fresh.columns());
        assert_eq!(ids(&d), vec!["0", "1", "2", "4", "5"]);
        for r in d.rows() {
            assert!(fresh.rows().contains(r));
        }
    }

    #[test]
    fn test_key_type_drift_does_not_create_new_rows() {
        let persisted = table(&["id"], vec![row([("id", Value::Float(123.0))])]);
        let fresh = table(&["id"], vec![row([("id", Value::text("123"))])]);
        assert!(delta(&persisted, &fresh, "id").unwrap().is_empty());
    }

    #[test]
    fn test_large_keys_are_not_collapsed() {
        let persisted = table(&["id"], vec![row([("id", Value::text("9007199254740993"))])]);
        let fresh = table(&["id"], vec![row([("id", Value::text("9007199254740992"))])]);
        assert_eq!(delta(&persisted, &fresh, "id").unwrap(), fresh);
    }

    #[test]
    fn test_large_key_drift_between_integer_and_text() {
        let persisted = table(&["id"], vec![row([("id", Value::Integer(9_007_199_254_740_993))])]);
        let fresh = table(&["id"], vec![row([("id", Value::text("9007199254740993"))])]);
        assert!(delta(&persisted, &fresh, "id").unwrap().is_empty());
    }

    #[test]
    fn test_rows_without_key_are_skipped() {
        let fresh = table(&["id"], vec![row([("id", Value::Null)]), row([("id", Value::Integer(5))])]);
        let d = delta(&Table::default(), &fresh, "id").unwrap();
        assert_eq!(ids(&d), vec!["5"]);
    }

    #[test]
    fn test_missing_identity_column() {
        let fresh = table(&["v"], vec![row([("v", 1i64)])]);
        assert_eq!(
            delta(&Table::default(), &fresh, "id").unwrap_err(),
            DeltaError::MissingIdentity {
                side: Side::Fresh,
                column: "id".to_string()
            }
        );

        let persisted = table(&["v"], vec![row([("v", 1i64)])]);
        let fresh = numbered(0..1);
        assert!(matches!(
            delta(&persisted, &fresh, "id"),
            Err(DeltaError::MissingIdentity { side: Side::Persisted, .. })
        ));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let sink = MemorySink::default();
        sink.rows.replace(numbered(0..3));
        let fresh = numbered(0..8);

        let first = upsert(&sink, &fresh, "id", None).await.unwrap();
        assert_eq!(
            first,
            UpsertReport {
                fresh: 8,
                persisted: 3,
                appended: 5
            }
        );

        let second = upsert(&sink, &fresh, "id", None).await.unwrap();
        assert_eq!(second.appended, 0);
        assert_eq!(second.persisted, 8);
        // the empty second append never reached the store
        assert_eq!(*sink.appends.borrow(), 1);
    }

    #[tokio::test]
    async fn test_plan_does_not_write() {
        let sink = MemorySink::default();
        let fresh = numbered(0..4);
        let (rows, report) = plan(&sink, &fresh, "id", None).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(report.appended, 0);
        assert!(sink.rows.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_with_selector_scopes_persisted_rows() {
        let sink = MemorySink::default();
        sink.rows.replace(table(
            &["id", "v"],
            vec![
                row([("id", Value::Integer(1)), ("v", Value::text("keep"))]),
                row([("id", Value::Integer(2)), ("v", Value::text("other"))]),
            ],
        ));
        let fresh = table(
            &["id", "v"],
            vec![
                row([("id", Value::Integer(1)), ("v", Value::text("keep"))]),
                row([("id", Value::Integer(2)), ("v", Value::text("keep"))]),
            ],
        );
        let sel = Selector::new().eq("v", "keep");
        let report = upsert(&sink, &fresh, "id", Some(&sel)).await.unwrap();
        assert_eq!(report.persisted, 1);
        assert_eq!(report.appended, 1);
    }
}
