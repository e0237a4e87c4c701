//! tally-finance: transaction reshaping, ledger normalization, and the CSV sink

pub mod csv_sink;
pub mod normalize;
pub mod recipe;

pub use csv_sink::{export_timestamped, read_csv, write_csv, CsvSink, CsvStore, ExportOutcome};
pub use normalize::{normalize, Dimension, DimensionSpec, Ledger, NormalizeError};
pub use recipe::TransactionRecipe;
