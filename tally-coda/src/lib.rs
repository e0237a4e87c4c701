//! tally-coda: table source backed by the Coda document API.

pub mod client;
pub mod error;
pub mod paging;
pub mod types;

pub use client::{CodaClient, CodaConfig, DEFAULT_BASE_URL};
pub use error::SourceError;
pub use paging::{fetch_table, RowPager, PAGE_SIZE};
pub use types::{RowsPage, TableDetails};
