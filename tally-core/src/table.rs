//! Rows and tables: the in-memory shape every source and sink exchanges.

use std::collections::BTreeMap;

use crate::coerce::CoerceError;
use crate::value::Value;

/// One record: column name -> value.
pub type Row = BTreeMap<String, Value>;

/// An ordered column list plus rows that all carry exactly those columns.
///
/// Rows pushed with missing columns are padded with `Null`; keys outside the
/// column list are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: impl IntoIterator<Item = Row>) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push(row);
        }
        table
    }

    /// Build a table from JSON records; columns follow first appearance.
    pub fn from_json_records<'a>(
        records: impl IntoIterator<Item = &'a serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
            rows.push(json_row(record));
        }
        Self::with_rows(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn push(&mut self, mut row: Row) {
        row.retain(|k, _| self.columns.iter().any(|c| c == k));
        for c in &self.columns {
            row.entry(c.clone()).or_insert(Value::Null);
        }
        self.rows.push(row);
    }

    pub fn push_json(&mut self, record: &serde_json::Map<String, serde_json::Value>) {
        self.push(json_row(record));
    }

    pub fn extend(&mut self, other: Table) {
        for row in other.rows {
            self.push(row);
        }
    }

    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().filter_map(move |r| r.get(column))
    }

    pub fn drop_columns(&mut self, columns: &[&str]) {
        self.columns.retain(|c| !columns.contains(&c.as_str()));
        for row in &mut self.rows {
            row.retain(|k, _| !columns.contains(&k.as_str()));
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), CoerceError> {
        let pos = self.position(from)?;
        self.columns[pos] = to.to_string();
        for row in &mut self.rows {
            let v = row.remove(from).unwrap_or_default();
            row.insert(to.to_string(), v);
        }
        Ok(())
    }

    /// Replace `column`'s name and values in place (used for foreign keys).
    pub fn replace_column(
        &mut self,
        column: &str,
        new_name: &str,
        values: Vec<Value>,
    ) -> Result<(), CoerceError> {
        let pos = self.position(column)?;
        self.columns[pos] = new_name.to_string();
        for (row, v) in self.rows.iter_mut().zip(values) {
            row.remove(column);
            row.insert(new_name.to_string(), v);
        }
        Ok(())
    }

    pub fn select_columns(&self, columns: &[&str]) -> Result<Table, CoerceError> {
        for c in columns {
            self.position(c)?;
        }
        let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        Ok(Table::with_rows(cols, self.rows.iter().cloned()))
    }

    /// Rewrite every cell of `column` through `f(row_index, value)`.
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<(), CoerceError>
    where
        F: FnMut(usize, &Value) -> Result<Value, CoerceError>,
    {
        self.position(column)?;
        for (i, row) in self.rows.iter_mut().enumerate() {
            let cell = row.entry(column.to_string()).or_default();
            *cell = f(i, cell)?;
        }
        Ok(())
    }

    pub fn filter<P>(&self, mut keep: P) -> Table
    where
        P: FnMut(&Row) -> bool,
    {
        Table::with_rows(
            self.columns.clone(),
            self.rows.iter().filter(|r| keep(r)).cloned(),
        )
    }

    fn position(&self, column: &str) -> Result<usize, CoerceError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| CoerceError::MissingColumn {
                column: column.to_string(),
            })
    }
}

fn json_row(record: &serde_json::Map<String, serde_json::Value>) -> Row {
    record
        .iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v)))
        .collect()
}

/// Build a row from `(column, value)` pairs.
pub fn row<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Row
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_push_pads_and_trims_to_columns() {
        let mut t = Table::new(cols(&["id", "v"]));
        t.push(row([("id", Value::Integer(1)), ("extra", Value::text("x"))]));

        assert_eq!(t.len(), 1);
        let r = &t.rows()[0];
        assert_eq!(r.get("v"), Some(&Value::Null));
        assert!(!r.contains_key("extra"));
    }

    #[test]
    fn test_from_json_records_keeps_first_seen_order() {
        let recs = vec![
            json!({"Date": "2024-01-01", "Value": "$5.00", "UUID": 1})
                .as_object()
                .cloned()
                .unwrap(),
            json!({"Date": "2024-01-02", "Value": "$6.00", "UUID": 2, "Note": "late"})
                .as_object()
                .cloned()
                .unwrap(),
        ];
        let t = Table::from_json_records(&recs);
        assert_eq!(t.columns(), &cols(&["Date", "Value", "UUID", "Note"])[..]);
        assert_eq!(t.rows()[0].get("Note"), Some(&Value::Null));
    }

    #[test]
    fn test_rename_and_drop() {
        let mut t = Table::with_rows(
            cols(&["UUID", "Display", "Value"]),
            [row([("UUID", 1i64), ("Display", 2), ("Value", 3)])],
        );
        t.drop_columns(&["Display"]);
        t.rename_column("UUID", "id").unwrap();

        assert_eq!(t.columns(), &cols(&["id", "Value"])[..]);
        assert_eq!(t.rows()[0].get("id"), Some(&Value::Integer(1)));
        assert!(t.rename_column("nope", "x").is_err());
    }

    #[test]
    fn test_select_columns_requires_known_columns() {
        let t = Table::new(cols(&["a", "b"]));
        assert_eq!(t.select_columns(&["b"]).unwrap().columns(), &cols(&["b"])[..]);
        assert!(matches!(
            t.select_columns(&["c"]),
            Err(CoerceError::MissingColumn { .. })
        ));
    }
}
