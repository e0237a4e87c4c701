//! Google Sheets as a sink: each collection is a worksheet whose first row is
//! the header.

use chrono::{DateTime, Utc};
use google_sheets4::api::{
    AddSheetRequest, BatchUpdateSpreadsheetRequest, ClearValuesRequest, Request, SheetProperties,
    ValueRange,
};
use google_sheets4::Sheets;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use serde_json::Value as Json;
use std::path::Path;
use std::sync::Arc;
use tally_core::{Row, Selector, Sink, SinkError, SinkProvider, Table, Value};
use tally_finance::{export_timestamped, ExportOutcome};
use tracing::{debug, info, warn};

// use the oauth2 version re-exported by google-sheets4 to avoid version mismatches
use google_sheets4::oauth2;

type Hub = Sheets<HttpsConnector<HttpConnector>>;

pub const BACKUP_PREFIX: &str = "sheets_backup";

pub struct SheetsStore {
    hub: Arc<Hub>,
    doc_id: String,
}

impl SheetsStore {
    pub async fn connect(service_account: &Path, doc_id: &str) -> Result<Self, SinkError> {
        if doc_id.is_empty() {
            return Err(SinkError::NotFound {
                name: "sheets.doc_id (not configured)".to_string(),
            });
        }
        let key = oauth2::read_service_account_key(service_account)
            .await
            .map_err(|e| {
                SinkError::backend(format!("read service account {}", service_account.display()), e)
            })?;
        let auth = oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| SinkError::unavailable("building service account authenticator", e))?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let hub = Sheets::new(hyper::Client::builder().build(connector), auth);
        Ok(Self {
            hub: Arc::new(hub),
            doc_id: doc_id.to_string(),
        })
    }

    async fn worksheet_titles(&self) -> Result<Vec<String>, SinkError> {
        let (_, spreadsheet) = self
            .hub
            .spreadsheets()
            .get(&self.doc_id)
            .doit()
            .await
            .map_err(|e| SinkError::unavailable(format!("open spreadsheet {}", self.doc_id), e))?;
        Ok(spreadsheet
            .sheets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| s.properties.and_then(|p| p.title))
            .collect())
    }

    async fn add_worksheet(&self, title: &str) -> Result<(), SinkError> {
        let req = BatchUpdateSpreadsheetRequest {
            requests: Some(vec![Request {
                add_sheet: Some(AddSheetRequest {
                    properties: Some(SheetProperties {
                        title: Some(title.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };
        self.hub
            .spreadsheets()
            .batch_update(req, &self.doc_id)
            .doit()
            .await
            .map_err(|e| SinkError::backend(format!("add worksheet {title}"), e))?;
        info!(worksheet = title, "created worksheet");
        Ok(())
    }
}

impl SinkProvider for SheetsStore {
    type Sink = WorksheetSink;

    /// Missing worksheets are created, matching the behavior of the other
    /// stores when they are allowed to create collections.
    async fn open(&self, collection: &str) -> Result<WorksheetSink, SinkError> {
        if !self.worksheet_titles().await?.iter().any(|t| t == collection) {
            self.add_worksheet(collection).await?;
        }
        Ok(WorksheetSink {
            hub: Arc::clone(&self.hub),
            doc_id: self.doc_id.clone(),
            title: collection.to_string(),
        })
    }
}

pub struct WorksheetSink {
    hub: Arc<Hub>,
    doc_id: String,
    title: String,
}

impl WorksheetSink {
    /// A1 range covering the whole worksheet.
    fn range(&self) -> String {
        format!("'{}'", self.title.replace('\'', "''"))
    }

    async fn values(&self) -> Result<Vec<Vec<Json>>, SinkError> {
        let (_, range) = self
            .hub
            .spreadsheets()
            .values_get(&self.doc_id, &self.range())
            .doit()
            .await
            .map_err(|e| SinkError::backend(format!("read worksheet {}", self.title), e))?;
        Ok(range.values.unwrap_or_default())
    }

    async fn write_values(&self, values: Vec<Vec<Json>>) -> Result<(), SinkError> {
        let body = ValueRange {
            values: Some(values),
            ..Default::default()
        };
        self.hub
            .spreadsheets()
            .values_update(body, &self.doc_id, &self.range())
            .value_input_option("RAW")
            .doit()
            .await
            .map_err(|e| SinkError::backend(format!("write worksheet {}", self.title), e))?;
        Ok(())
    }

    /// Back the current contents up to a timestamped CSV, then overwrite the
    /// worksheet with `table`.
    pub async fn replace(
        &self,
        table: &Table,
        backup_dir: &Path,
        timezone: &str,
        keep: usize,
    ) -> anyhow::Result<ExportOutcome> {
        // a failed backup returns before anything on the sheet is cleared
        let current = self.read_all(None).await?;
        let backup = backup_rows(&current, backup_dir, Utc::now(), timezone, keep)?;
        info!(path = %backup.path.display(), rows = backup.rows, "backed up worksheet");

        self.hub
            .spreadsheets()
            .values_clear(ClearValuesRequest::default(), &self.doc_id, &self.range())
            .doit()
            .await
            .map_err(|e| SinkError::backend(format!("clear worksheet {}", self.title), e))?;
        self.write_values(table_to_values(table, true)).await?;
        info!(worksheet = %self.title, rows = table.len(), "replaced worksheet");
        Ok(backup)
    }
}

impl Sink for WorksheetSink {
    async fn read_all(&self, selector: Option<&Selector>) -> Result<Table, SinkError> {
        let table = values_to_table(self.values().await?);
        debug!(worksheet = %self.title, rows = table.len(), "read worksheet");
        Ok(match selector {
            Some(s) => s.apply(&table),
            None => table,
        })
    }

    async fn append(&self, rows: &Table) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let existing = self.values().await?;
        let values = append_values(&self.title, existing.first(), rows)?;

        let body = ValueRange {
            values: Some(values),
            ..Default::default()
        };
        self.hub
            .spreadsheets()
            .values_append(body, &self.doc_id, &self.range())
            .value_input_option("RAW")
            .insert_data_option("INSERT_ROWS")
            .doit()
            .await
            .map_err(|e| SinkError::backend(format!("append to worksheet {}", self.title), e))?;
        Ok(rows.len())
    }
}

fn backup_rows(
    current: &Table,
    backup_dir: &Path,
    now: DateTime<Utc>,
    timezone: &str,
    keep: usize,
) -> anyhow::Result<ExportOutcome> {
    export_timestamped(backup_dir, BACKUP_PREFIX, current, now, timezone, keep)
}

/// Cells to append under `header`. An empty sheet gets the rows' own header
/// first; otherwise rows are laid out in the sheet's column order and every
/// row column must exist there.
fn append_values(
    title: &str,
    header: Option<&Vec<Json>>,
    rows: &Table,
) -> Result<Vec<Vec<Json>>, SinkError> {
    let header: Vec<String> = header
        .map(|h| h.iter().map(cell_text).collect())
        .unwrap_or_default();
    if header.iter().all(|h| h.is_empty()) {
        return Ok(table_to_values(rows, true));
    }

    if let Some(missing) = rows.columns().iter().find(|c| !header.contains(*c)) {
        return Err(SinkError::Incompatible {
            name: title.to_string(),
            reason: format!("worksheet has no column '{missing}'"),
        });
    }
    if header.len() != rows.columns().len() {
        warn!(worksheet = title, "worksheet has extra columns; leaving them blank");
    }
    let ordered = Table::with_rows(header, rows.rows().iter().cloned());
    Ok(table_to_values(&ordered, false))
}

fn cell_text(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

fn cell_value(v: &Json) -> Value {
    match v {
        Json::String(s) => Value::infer(s),
        other => Value::from_json(other),
    }
}

/// First row is the header; short rows are padded with nulls.
fn values_to_table(values: Vec<Vec<Json>>) -> Table {
    let mut rows = values.into_iter();
    let Some(header) = rows.next() else {
        return Table::default();
    };
    let columns: Vec<String> = header.iter().map(cell_text).collect();

    let mut table = Table::new(columns.clone());
    for r in rows {
        let row: Row = columns
            .iter()
            .zip(r.iter())
            .map(|(c, v)| (c.clone(), cell_value(v)))
            .collect();
        table.push(row);
    }
    table
}

fn table_to_values(table: &Table, with_header: bool) -> Vec<Vec<Json>> {
    let mut out = Vec::with_capacity(table.len() + 1);
    if with_header {
        out.push(table.columns().iter().map(|c| Json::String(c.clone())).collect());
    }
    for r in table.rows() {
        out.push(
            table
                .columns()
                .iter()
                .map(|c| match r.get(c) {
                    None | Some(Value::Null) => Json::String(String::new()),
                    Some(Value::Date(d)) => Json::String(d.to_string()),
                    Some(v) => v.to_json(),
                })
                .collect(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_core::row;

    #[test]
    fn test_values_to_table_pads_short_rows() {
        let values = vec![
            vec![json!("id"), json!("name"), json!("note")],
            vec![json!("1"), json!("DBS"), json!("joint")],
            vec![json!("2"), json!("OCBC")],
        ];
        let t = values_to_table(values);
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows()[0].get("id"), Some(&Value::Integer(1)));
        assert_eq!(t.rows()[1].get("note"), Some(&Value::Null));
    }

    #[test]
    fn test_empty_worksheet_is_empty_table() {
        assert!(values_to_table(Vec::new()).columns().is_empty());
    }

    fn ledger(columns: &[&str]) -> Table {
        Table::with_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            [row([("id", Value::Integer(1)), ("name", Value::text("DBS"))])],
        )
    }

    #[test]
    fn test_append_to_empty_sheet_writes_header() {
        let v = append_values("accounts", None, &ledger(&["id", "name"])).unwrap();
        assert_eq!(v, vec![vec![json!("id"), json!("name")], vec![json!(1), json!("DBS")]]);
    }

    #[test]
    fn test_append_follows_sheet_column_order() {
        let header = vec![json!("name"), json!("note"), json!("id")];
        let v = append_values("accounts", Some(&header), &ledger(&["id", "name"])).unwrap();
        assert_eq!(v, vec![vec![json!("DBS"), json!(""), json!(1)]]);
    }

    #[test]
    fn test_append_rejects_unknown_column() {
        let header = vec![json!("id")];
        let err = append_values("accounts", Some(&header), &ledger(&["id", "name"])).unwrap_err();
        assert!(matches!(err, SinkError::Incompatible { .. }));
    }

    #[test]
    fn test_backup_holds_current_rows() {
        let dir = tempfile::tempdir().unwrap();
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 5, 1, 8, 0, 0).unwrap();
        let out = backup_rows(&ledger(&["id", "name"]), dir.path(), now, "UTC", 7).unwrap();

        assert_eq!(out.path, dir.path().join("sheets_backup-20240501-080000.csv"));
        assert_eq!(tally_finance::read_csv(&out.path).unwrap().len(), 1);
    }

    #[test]
    fn test_backup_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let now = Utc::now();
        assert!(backup_rows(&ledger(&["id", "name"]), &blocker, now, "UTC", 7).is_err());
    }

    #[test]
    fn test_table_to_values_with_header() {
        let t = Table::with_rows(
            vec!["id".to_string(), "Value".to_string(), "note".to_string()],
            [row([
                ("id", Value::Integer(3)),
                ("Value", Value::Float(-2.5)),
                ("note", Value::Null),
            ])],
        );
        let v = table_to_values(&t, true);
        assert_eq!(v[0], vec![json!("id"), json!("Value"), json!("note")]);
        assert_eq!(v[1], vec![json!(3), json!(-2.5), json!("")]);
    }
}
