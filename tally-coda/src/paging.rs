//! The paging loop, written against [`RowPager`] so it runs without HTTP.

use tally_core::Table;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::types::{RowsPage, TableDetails};

/// Rows per page the API is asked for.
pub const PAGE_SIZE: u64 = 200;

/// One page of rows at a time, plus the detail call that sizes the loop.
#[allow(async_fn_in_trait)]
pub trait RowPager {
    async fn details(&self, table: &str) -> Result<TableDetails, SourceError>;

    async fn page(&self, table: &str, page_token: Option<&str>) -> Result<RowsPage, SourceError>;
}

/// Fetch every row of `table`.
///
/// The page count comes from the detail call (`ceil(row_count / page_size)`).
/// Each request passes back the previous continuation token; the loop ends
/// when no token comes back or the page count runs out. Columns are fixed by
/// the first page.
pub async fn fetch_table<P: RowPager>(
    pager: &P,
    table: &str,
    page_size: u64,
) -> Result<Table, SourceError> {
    let details = pager.details(table).await?;
    let total_pages = details.row_count.div_ceil(page_size.max(1));
    info!(
        table,
        id = %details.id,
        rows = details.row_count,
        pages = total_pages,
        "extracting table"
    );

    let mut out = Table::default();
    let mut token: Option<String> = None;

    for page_no in 1..=total_pages {
        let page = pager.page(table, token.as_deref()).await?;
        debug!(table, page = page_no, of = total_pages, items = page.items.len(), "fetched page");

        if out.columns().is_empty() {
            out = Table::from_json_records(page.items.iter().map(|item| &item.values));
        } else {
            for item in &page.items {
                out.push_json(&item.values);
            }
        }

        token = page.next_page_token.filter(|t| !t.is_empty());
        if token.is_none() {
            break;
        }
    }

    if out.len() as u64 != details.row_count {
        warn!(
            table,
            expected = details.row_count,
            fetched = out.len(),
            "row count changed while paging"
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowItem;
    use serde_json::json;
    use std::cell::RefCell;
    use tally_core::Value;

    /// Serves `rows` rows in pages of `page_size`, numbering ids from 0.
    struct FakePager {
        row_count: u64,
        page_size: usize,
        served: usize,
        fail_on_page: Option<usize>,
        /// stop handing out tokens after this many pages
        token_pages: usize,
        requests: RefCell<Vec<Option<String>>>,
    }

    impl FakePager {
        fn new(row_count: u64) -> Self {
            Self {
                row_count,
                page_size: PAGE_SIZE as usize,
                served: row_count as usize,
                fail_on_page: None,
                token_pages: usize::MAX,
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    impl RowPager for FakePager {
        async fn details(&self, _table: &str) -> Result<TableDetails, SourceError> {
            Ok(TableDetails {
                id: "grid-1".to_string(),
                row_count: self.row_count,
            })
        }

        async fn page(&self, _table: &str, page_token: Option<&str>) -> Result<RowsPage, SourceError> {
            let mut requests = self.requests.borrow_mut();
            requests.push(page_token.map(str::to_string));
            let n = requests.len();
            if self.fail_on_page == Some(n) {
                return Err(SourceError::Status {
                    endpoint: "/rows".to_string(),
                    status: 500,
                    body: "boom".to_string(),
                });
            }

            let start = (n - 1) * self.page_size;
            let end = (start + self.page_size).min(self.served);
            let items = (start..end)
                .map(|i| RowItem {
                    values: json!({"UUID": i, "Value": format!("${i}.00")})
                        .as_object()
                        .cloned()
                        .unwrap(),
                })
                .collect();
            let next_page_token = (end < self.served && n < self.token_pages).then(|| format!("p{}", n + 1));
            Ok(RowsPage {
                items,
                next_page_token,
            })
        }
    }

    #[tokio::test]
    async fn test_450_rows_take_three_pages() {
        let pager = FakePager::new(450);
        let t = fetch_table(&pager, "Historical Transactions", PAGE_SIZE).await.unwrap();

        assert_eq!(
            *pager.requests.borrow(),
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
        assert_eq!(t.len(), 450);
        assert_eq!(t.columns(), &["UUID".to_string(), "Value".to_string()][..]);
        let ids: Vec<i64> = t.column_values("UUID").filter_map(Value::as_i64).collect();
        assert_eq!(ids, (0..450).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_missing_token_stops_early() {
        let mut pager = FakePager::new(450);
        pager.token_pages = 1;
        let t = fetch_table(&pager, "t", PAGE_SIZE).await.unwrap();
        assert_eq!(pager.requests.borrow().len(), 1);
        assert_eq!(t.len(), 200);
    }

    #[tokio::test]
    async fn test_page_count_bounds_the_loop() {
        // details says 200 rows but the table grew to 300 meanwhile
        let mut pager = FakePager::new(200);
        pager.served = 300;
        let t = fetch_table(&pager, "t", PAGE_SIZE).await.unwrap();
        assert_eq!(pager.requests.borrow().len(), 1);
        assert_eq!(t.len(), 200);
    }

    #[tokio::test]
    async fn test_empty_table_makes_no_page_request() {
        let pager = FakePager::new(0);
        let t = fetch_table(&pager, "t", PAGE_SIZE).await.unwrap();
        assert!(pager.requests.borrow().is_empty());
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn test_failed_page_is_fatal() {
        let mut pager = FakePager::new(450);
        pager.fail_on_page = Some(2);
        let err = fetch_table(&pager, "t", PAGE_SIZE).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 500, .. }));
        assert_eq!(pager.requests.borrow().len(), 2);
    }
}
