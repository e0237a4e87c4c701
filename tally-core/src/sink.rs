//! The contract every durable store (CSV directory, document store,
//! spreadsheet) implements: one bulk read, one bulk append.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::table::{Row, Table};
use crate::value::Value;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum SinkError {
    /// The store could not be reached when the sink was built.
    /// Callers may catch this and continue without the store.
    #[error("store unavailable: {reason}")]
    Unavailable {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("collection not found: {name}")]
    NotFound { name: String },

    #[error("rows do not fit {name}: {reason}")]
    Incompatible { name: String, reason: String },

    #[error("store operation failed: {reason}")]
    Backend {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    pub fn unavailable(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SinkError::Unavailable {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn backend(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SinkError::Backend {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, SinkError::Unavailable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SinkError::NotFound { .. })
    }
}

/// Equality filter for `read_all`. Values compare by canonical key, so
/// `1`, `1.0` and `"1"` all match each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    pub equals: BTreeMap<String, Value>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(column.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.equals.iter().all(|(column, expected)| {
            let actual = row.get(column).and_then(Value::identity_key);
            actual == expected.identity_key()
        })
    }

    pub fn apply(&self, table: &Table) -> Table {
        table.filter(|r| self.matches(r))
    }
}

/// A durable store for one collection.
#[allow(async_fn_in_trait)]
pub trait Sink {
    /// All stored rows matching `selector`. A collection that does not exist
    /// yet reads as an empty table.
    async fn read_all(&self, selector: Option<&Selector>) -> Result<Table, SinkError>;

    /// Add rows without touching existing ones. Appending an empty table is a
    /// no-op. Returns the number of rows written.
    async fn append(&self, rows: &Table) -> Result<usize, SinkError>;
}

/// Hands out one [`Sink`] per named collection.
#[allow(async_fn_in_trait)]
pub trait SinkProvider {
    type Sink: Sink;

    async fn open(&self, collection: &str) -> Result<Self::Sink, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::row;

    #[test]
    fn test_selector_matches_across_types() {
        let sel = Selector::new().eq("account_id", 3i64);
        assert!(sel.matches(&row([("account_id", Value::text("3"))])));
        assert!(sel.matches(&row([("account_id", Value::Float(3.0))])));
        assert!(!sel.matches(&row([("account_id", Value::Integer(4))])));
        assert!(!sel.matches(&row([("other", Value::Integer(3))])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let t = Table::with_rows(
            vec!["a".to_string()],
            [row([("a", 1i64)]), row([("a", 2i64)])],
        );
        assert_eq!(Selector::new().apply(&t).len(), 2);
    }

    #[test]
    fn test_error_kinds() {
        let e = SinkError::NotFound {
            name: "accounts".to_string(),
        };
        assert!(e.is_not_found());
        assert!(!e.is_unavailable());
        assert_eq!(e.to_string(), "collection not found: accounts");

        let e = SinkError::unavailable("ping timed out", "server selection timeout");
        assert!(e.is_unavailable());
    }
}
