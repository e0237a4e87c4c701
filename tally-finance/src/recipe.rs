//! Per-table reshaping of the transactions export: parse money and dates,
//! pin the identity column to one representation, drop display-only columns.

use serde::{Deserialize, Serialize};
use tally_core::{coerce_currency, coerce_date, coerce_identity, CoerceError, Table};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionRecipe {
    /// Source table name in the doc
    pub table: String,
    /// Identity column as it comes from the source
    pub identity: String,
    /// Name the identity column is stored under
    pub identity_as: String,
    /// Collection the reshaped rows are written to
    pub collection: String,
    pub currency_columns: Vec<String>,
    pub date_columns: Vec<String>,
    pub drop_columns: Vec<String>,
}

impl Default for TransactionRecipe {
    fn default() -> Self {
        Self {
            table: "Historical Transactions".to_string(),
            identity: "UUID".to_string(),
            identity_as: "id".to_string(),
            collection: "transactions".to_string(),
            currency_columns: vec!["Value".to_string(), "Amount (SGD)".to_string()],
            date_columns: vec!["Date".to_string()],
            drop_columns: vec!["Display".to_string()],
        }
    }
}

impl TransactionRecipe {
    /// Reshape `table` in place. A table with no columns (nothing fetched) is
    /// left alone.
    pub fn apply(&self, table: &mut Table) -> Result<(), CoerceError> {
        if table.columns().is_empty() {
            return Ok(());
        }

        let drop: Vec<&str> = self.drop_columns.iter().map(String::as_str).collect();
        table.drop_columns(&drop);

        for c in &self.currency_columns {
            coerce_currency(table, c)?;
        }
        for c in &self.date_columns {
            coerce_date(table, c)?;
        }

        coerce_identity(table, &self.identity)?;
        if self.identity != self.identity_as {
            table.rename_column(&self.identity, &self.identity_as)?;
        }

        debug!(table = %self.table, rows = table.len(), columns = ?table.columns(), "applied recipe");
        Ok(())
    }
}
