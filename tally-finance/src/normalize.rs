//! Split a flat transactions table into dimension tables with synthetic
//! integer ids (accounts, categories, currencies) and foreign keys.
//!
//! Ids must stay stable across runs, so each dimension starts from what the
//! store already holds: known names keep their id, new names get `max + 1`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tally_core::{CoerceError, Row, Table, Value};
use thiserror::Error;
use tracing::debug;

pub const DIMENSION_ID: &str = "id";
pub const DIMENSION_NAME: &str = "name";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error(transparent)]
    Coerce(#[from] CoerceError),

    #[error("stored dimension {table} is unusable: {reason}")]
    InvalidDimension { table: String, reason: String },
}

/// One lookup table derived from a transactions column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Column in the transactions table, e.g. `Account`
    pub column: String,
    /// Collection the dimension is stored in, e.g. `accounts`
    pub table: String,
    /// Foreign-key column replacing `column`, e.g. `account_id`
    pub key: String,
}

impl DimensionSpec {
    pub fn new(column: &str, table: &str, key: &str) -> Self {
        Self {
            column: column.to_string(),
            table: table.to_string(),
            key: key.to_string(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("Account", "accounts", "account_id"),
            Self::new("Category", "categories", "category_id"),
            Self::new("Currency", "currencies", "currency_id"),
        ]
    }
}

/// Name -> id enumeration for one dimension.
#[derive(Debug, Clone, Default)]
pub struct Dimension {
    by_key: HashMap<String, i64>,
    names: BTreeMap<i64, Value>,
    next_id: i64,
}

impl Dimension {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Seed from a stored `{id, name}` table.
    pub fn from_persisted(name: &str, table: &Table) -> Result<Self, NormalizeError> {
        let mut dim = Self::new();
        if table.is_empty() {
            return Ok(dim);
        }
        for col in [DIMENSION_ID, DIMENSION_NAME] {
            if !table.has_column(col) {
                return Err(NormalizeError::InvalidDimension {
                    table: name.to_string(),
                    reason: format!("missing column '{col}'"),
                });
            }
        }

        for row in table.rows() {
            let id = row
                .get(DIMENSION_ID)
                .and_then(Value::identity_key)
                .and_then(|k| k.parse::<i64>().ok())
                .ok_or_else(|| NormalizeError::InvalidDimension {
                    table: name.to_string(),
                    reason: format!("non-integer id {:?}", row.get(DIMENSION_ID)),
                })?;
            let value = row.get(DIMENSION_NAME).cloned().unwrap_or_default();
            if let Some(key) = value.identity_key() {
                dim.by_key.insert(key, id);
            }
            dim.names.insert(id, value);
            dim.next_id = dim.next_id.max(id + 1);
        }
        Ok(dim)
    }

    /// Id for `value`, assigning the next one if it is new. `Null` has none.
    pub fn id_of(&mut self, value: &Value) -> Option<i64> {
        let key = value.identity_key()?;
        if let Some(id) = self.by_key.get(&key) {
            return Some(*id);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_key.insert(key, id);
        self.names.insert(id, value.clone());
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Full `{id, name}` table ordered by id.
    pub fn to_table(&self) -> Table {
        let rows = self.names.iter().map(|(id, name)| {
            let mut r = Row::new();
            r.insert(DIMENSION_ID.to_string(), Value::Integer(*id));
            r.insert(DIMENSION_NAME.to_string(), name.clone());
            r
        });
        Table::with_rows(
            vec![DIMENSION_ID.to_string(), DIMENSION_NAME.to_string()],
            rows,
        )
    }
}

/// Normalized output: dimensions in the order given, then transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    pub dimensions: Vec<(DimensionSpec, Table)>,
    pub transactions: Table,
}

/// Replace each dimension column of `transactions` with a foreign key into its
/// dimension. `persisted` holds stored dimension tables by collection name;
/// missing entries start empty.
pub fn normalize(
    transactions: &Table,
    specs: &[DimensionSpec],
    persisted: &HashMap<String, Table>,
) -> Result<Ledger, NormalizeError> {
    let mut out = transactions.clone();
    let mut dimensions = Vec::with_capacity(specs.len());

    for spec in specs {
        if !out.has_column(&spec.column) {
            return Err(CoerceError::MissingColumn {
                column: spec.column.clone(),
            }
            .into());
        }

        let mut dim = match persisted.get(&spec.table) {
            Some(t) => Dimension::from_persisted(&spec.table, t)?,
            None => Dimension::new(),
        };
        let before = dim.len();

        let keys: Vec<Value> = out
            .column_values(&spec.column)
            .map(|v| dim.id_of(v).map(Value::Integer).unwrap_or_default())
            .collect();
        out.replace_column(&spec.column, &spec.key, keys)?;

        debug!(
            dimension = %spec.table,
            known = before,
            added = dim.len() - before,
            "enumerated dimension"
        );
        dimensions.push((spec.clone(), dim.to_table()));
    }

    Ok(Ledger {
        dimensions,
        transactions: out,
    })
}
