//! HTTP client for the document API.
//!
//! All configuration is fixed at construction: the bearer token goes into the
//! client's default headers once instead of living in shared mutable state.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::fmt;
use tally_core::Table;
use tracing::debug;

use crate::error::SourceError;
use crate::paging::{fetch_table, RowPager, PAGE_SIZE};
use crate::types::{RowsPage, TableDetails, TableList};

pub const DEFAULT_BASE_URL: &str = "https://coda.io/apis/v1";

#[derive(Clone)]
pub struct CodaConfig {
    pub base_url: String,
    pub doc_id: String,
    pub api_key: String,
    pub page_size: u64,
}

impl CodaConfig {
    pub fn new(doc_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            doc_id: doc_id.into(),
            api_key: api_key.into(),
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

// keeps the token out of logs
impl fmt::Debug for CodaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodaConfig")
            .field("base_url", &self.base_url)
            .field("doc_id", &self.doc_id)
            .field("api_key", &"<redacted>")
            .field("page_size", &self.page_size)
            .finish()
    }
}

pub struct CodaClient {
    http: reqwest::Client,
    config: CodaConfig,
}

impl CodaClient {
    pub fn new(config: CodaConfig) -> Result<Self, SourceError> {
        if config.api_key.trim().is_empty() {
            return Err(SourceError::Config {
                reason: "API key is empty".to_string(),
            });
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
            .map_err(|_| SourceError::Config {
                reason: "API key contains characters not allowed in a header".to_string(),
            })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|source| SourceError::Http {
                endpoint: config.base_url.clone(),
                source,
            })?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &CodaConfig {
        &self.config
    }

    /// Names of every non-view table in the doc.
    pub async fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = Vec::new();
            if let Some(t) = &token {
                query.push(("pageToken", t.clone()));
            }
            let page: TableList = self.get_json(self.url(&[])?, &query).await?;
            names.extend(
                page.items
                    .into_iter()
                    .filter(|t| !t.is_view())
                    .map(|t| t.name),
            );
            token = page.next_page_token.filter(|t| !t.is_empty());
            if token.is_none() {
                break;
            }
        }
        Ok(names)
    }

    /// Row count and id of `table`.
    pub async fn table_details(&self, table: &str) -> Result<TableDetails, SourceError> {
        self.get_json(self.url(&[table])?, &[]).await
    }

    /// One page of rows keyed by column name.
    pub async fn rows_page(
        &self,
        table: &str,
        page_token: Option<&str>,
    ) -> Result<RowsPage, SourceError> {
        let mut query = vec![
            ("useColumnNames", "true".to_string()),
            ("limit", self.config.page_size.to_string()),
        ];
        if let Some(t) = page_token {
            query.push(("pageToken", t.to_string()));
        }
        self.get_json(self.url(&[table, "rows"])?, &query).await
    }

    /// Every row of `table`, in page order.
    pub async fn export_table(&self, table: &str) -> Result<Table, SourceError> {
        fetch_table(self, table, self.config.page_size).await
    }

    /// `{base}/docs/{doc}/tables/{segments..}`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let bad_base = |reason: String| SourceError::Config { reason };
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| bad_base(format!("base URL {}: {e}", self.config.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| bad_base(format!("base URL {} cannot hold a path", self.config.base_url)))?
            .pop_if_empty()
            .extend(["docs", self.config.doc_id.as_str(), "tables"])
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let endpoint = url.path().to_string();
        debug!(%endpoint, ?query, "GET");

        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|source| SourceError::Http {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(|source| SourceError::Http {
            endpoint: endpoint.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode {
            endpoint,
            reason: e.to_string(),
        })
    }
}

impl RowPager for CodaClient {
    async fn details(&self, table: &str) -> Result<TableDetails, SourceError> {
        self.table_details(table).await
    }

    async fn page(&self, table: &str, page_token: Option<&str>) -> Result<RowsPage, SourceError> {
        self.rows_page(table, page_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> CodaClient {
        CodaClient::new(CodaConfig::new("nADf8mVx-6", "secret").with_base_url(base)).unwrap()
    }

    #[test]
    fn test_url_encodes_table_names() {
        let c = client("https://coda.io/apis/v1");
        let url = c.url(&["Historical Transactions", "rows"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://coda.io/apis/v1/docs/nADf8mVx-6/tables/Historical%20Transactions/rows"
        );
    }

    #[test]
    fn test_url_tolerates_trailing_slash() {
        let c = client("http://127.0.0.1:9999/");
        assert_eq!(
            c.url(&[]).unwrap().as_str(),
            "http://127.0.0.1:9999/docs/nADf8mVx-6/tables"
        );
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = CodaClient::new(CodaConfig::new("doc", "  ")).err().unwrap();
        assert!(matches!(err, SourceError::Config { .. }));
    }

    #[test]
    fn test_debug_redacts_key() {
        let cfg = CodaConfig::new("doc", "super-secret");
        assert!(!format!("{cfg:?}").contains("super-secret"));
    }
}
