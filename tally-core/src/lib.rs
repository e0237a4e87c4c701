//! tally-core: table model, coercions, the incremental diff engine, and the
//! sink contract shared by every store.

pub mod coerce;
pub mod delta;
pub mod retention;
pub mod sink;
pub mod table;
pub mod time;
pub mod value;

pub use coerce::{coerce_currency, coerce_date, coerce_identity, CoerceError};
pub use delta::{delta, plan, upsert, DeltaError, Side, UpsertError, UpsertReport};
pub use retention::{RetentionError, RetentionPolicy, DEFAULT_KEEP};
pub use sink::{Selector, Sink, SinkError, SinkProvider};
pub use table::{row, Row, Table};
pub use value::Value;
