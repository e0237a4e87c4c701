//! MongoDB as a sink: one collection per ledger table, documents keyed by
//! column name.

use chrono::{DateTime, NaiveDate};
use futures_util::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use std::time::Duration;
use tally_core::{Row, Selector, Sink, SinkError, SinkProvider, Table, Value};
use tracing::{debug, info};

/// Server-assigned key; never surfaced as a column.
const MONGO_ID: &str = "_id";

pub struct MongoStore {
    db: Database,
    create_collections: bool,
}

impl MongoStore {
    /// Connect and ping. Anything that keeps the server from answering within
    /// `timeout` is reported as [`SinkError::Unavailable`].
    pub async fn connect(
        uri: &str,
        database: &str,
        timeout: Duration,
        create_collections: bool,
    ) -> Result<Self, SinkError> {
        let mut opts = ClientOptions::parse(uri)
            .await
            .map_err(|e| SinkError::backend(format!("parse mongo uri {uri}"), e))?;
        opts.app_name = Some("tally".to_string());
        opts.connect_timeout = Some(timeout);
        opts.server_selection_timeout = Some(timeout);

        let client = Client::with_options(opts)
            .map_err(|e| SinkError::unavailable(format!("mongo client for {uri}"), e))?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| SinkError::unavailable(format!("ping {uri}"), e))?;

        info!(database, "connected to mongo");
        Ok(Self {
            db,
            create_collections,
        })
    }
}

impl SinkProvider for MongoStore {
    type Sink = MongoSink;

    async fn open(&self, collection: &str) -> Result<MongoSink, SinkError> {
        let names = self
            .db
            .list_collection_names()
            .await
            .map_err(|e| SinkError::backend("list collections", e))?;

        if !names.iter().any(|n| n == collection) {
            if !self.create_collections {
                return Err(SinkError::NotFound {
                    name: format!("{}.{collection}", self.db.name()),
                });
            }
            self.db
                .create_collection(collection)
                .await
                .map_err(|e| SinkError::backend(format!("create collection {collection}"), e))?;
            info!(collection, "created collection");
        }

        Ok(MongoSink {
            name: collection.to_string(),
            collection: self.db.collection::<Document>(collection),
        })
    }
}

pub struct MongoSink {
    name: String,
    collection: Collection<Document>,
}

impl Sink for MongoSink {
    async fn read_all(&self, selector: Option<&Selector>) -> Result<Table, SinkError> {
        let cursor = self
            .collection
            .find(doc! {})
            .await
            .map_err(|e| SinkError::backend(format!("find in {}", self.name), e))?;
        let docs: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| SinkError::backend(format!("read {}", self.name), e))?;
        debug!(collection = %self.name, documents = docs.len(), "read collection");

        // filtered client-side so "3" and 3 select the same rows, as in every sink
        let table = documents_to_table(&docs);
        Ok(match selector {
            Some(s) => s.apply(&table),
            None => table,
        })
    }

    async fn append(&self, rows: &Table) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let docs: Vec<Document> = rows
            .rows()
            .iter()
            .map(|r| row_to_document(rows.columns(), r))
            .collect();
        let result = self
            .collection
            .insert_many(docs)
            .await
            .map_err(|e| SinkError::backend(format!("insert into {}", self.name), e))?;
        Ok(result.inserted_ids.len())
    }
}

fn documents_to_table(docs: &[Document]) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for d in docs {
        for k in d.keys() {
            if k != MONGO_ID && !columns.contains(k) {
                columns.push(k.clone());
            }
        }
    }

    let mut table = Table::new(columns);
    for d in docs {
        let row: Row = d
            .iter()
            .filter(|(k, _)| k.as_str() != MONGO_ID)
            .map(|(k, v)| (k.clone(), from_bson(v)))
            .collect();
        table.push(row);
    }
    table
}

fn row_to_document(columns: &[String], row: &Row) -> Document {
    let mut d = Document::new();
    for c in columns {
        let v = row.get(c).map(to_bson).unwrap_or(Bson::Null);
        d.insert(c.clone(), v);
    }
    d
}

fn to_bson(v: &Value) -> Bson {
    match v {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Integer(i) => Bson::Int64(*i),
        Value::Float(f) => Bson::Double(*f),
        Value::Text(s) => Bson::String(s.clone()),
        Value::Date(d) => Bson::DateTime(bson::DateTime::from_millis(date_millis(*d))),
    }
}

fn from_bson(b: &Bson) -> Value {
    match b {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Integer(i64::from(*i)),
        Bson::Int64(i) => Value::Integer(*i),
        Bson::Double(f) => Value::Float(*f),
        Bson::String(s) => Value::Text(s.clone()),
        Bson::DateTime(dt) => DateTime::from_timestamp_millis(dt.timestamp_millis())
            .map(|t| Value::Date(t.date_naive()))
            .unwrap_or_default(),
        other => Value::Text(other.to_string()),
    }
}

fn date_millis(d: NaiveDate) -> i64 {
    d.and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc().timestamp_millis())
        .unwrap_or_default()
}
