//! Response shapes of the document API, reduced to the fields we read.

use serde::Deserialize;
use serde_json::{Map, Value};

/// `GET /docs/{doc}/tables/{table}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDetails {
    pub id: String,
    pub row_count: u64,
}

/// `GET /docs/{doc}/tables/{table}/rows`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsPage {
    #[serde(default)]
    pub items: Vec<RowItem>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowItem {
    /// Column name -> cell, requested with `useColumnNames=true`.
    pub values: Map<String, Value>,
}

/// `GET /docs/{doc}/tables`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableList {
    #[serde(default)]
    pub items: Vec<TableSummary>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub name: String,
    /// `table` or `view`
    pub table_type: String,
}

impl TableSummary {
    pub fn is_view(&self) -> bool {
        self.table_type == "view"
    }
}
