//! CSV files as a sink: one `{collection}.csv` per collection in a directory,
//! plus timestamped full exports with retention.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tally_core::time::stamped_file_name;
use tally_core::{RetentionPolicy, Row, Selector, Sink, SinkError, SinkProvider, Table, Value};
use tracing::{debug, info};

/// Read a CSV file with a header row. Cells are typed with [`Value::infer`].
pub fn read_csv(path: &Path) -> Result<Table, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();

    let mut table = Table::new(columns.clone());
    for record in rdr.records() {
        let record = record?;
        let row: Row = columns
            .iter()
            .zip(record.iter())
            .map(|(c, cell)| (c.clone(), Value::infer(cell)))
            .collect();
        table.push(row);
    }
    Ok(table)
}

/// Write `table` to `path`, replacing any existing file.
pub fn write_csv(path: &Path, table: &Table) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(table.columns())?;
    write_rows(&mut wtr, table.columns(), table)?;
    wtr.flush()?;
    Ok(())
}

fn write_rows<W: std::io::Write>(
    wtr: &mut csv::Writer<W>,
    columns: &[String],
    table: &Table,
) -> Result<(), csv::Error> {
    for row in table.rows() {
        wtr.write_record(
            columns
                .iter()
                .map(|c| row.get(c).map(Value::to_string).unwrap_or_default()),
        )?;
    }
    Ok(())
}

fn csv_failure(path: &Path, e: csv::Error) -> SinkError {
    SinkError::backend(format!("csv {}", path.display()), e)
}

/// A directory of `{collection}.csv` files.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SinkProvider for CsvStore {
    type Sink = CsvSink;

    async fn open(&self, collection: &str) -> Result<CsvSink, SinkError> {
        if !self.dir.is_dir() {
            return Err(SinkError::NotFound {
                name: self.dir.display().to_string(),
            });
        }
        Ok(CsvSink::new(self.dir.join(format!("{collection}.csv"))))
    }
}

/// One CSV file. A missing file reads as empty; the first append writes the
/// header.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn has_content(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false)
    }

    fn stored_header(&self) -> Result<Vec<String>, SinkError> {
        let mut rdr = csv::Reader::from_path(&self.path).map_err(|e| csv_failure(&self.path, e))?;
        let headers = rdr.headers().map_err(|e| csv_failure(&self.path, e))?;
        Ok(headers.iter().map(|h| h.to_string()).collect())
    }
}

impl Sink for CsvSink {
    async fn read_all(&self, selector: Option<&Selector>) -> Result<Table, SinkError> {
        if !self.has_content() {
            return Ok(Table::default());
        }
        let table = read_csv(&self.path).map_err(|e| csv_failure(&self.path, e))?;
        Ok(match selector {
            Some(s) => s.apply(&table),
            None => table,
        })
    }

    async fn append(&self, rows: &Table) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }

        if !self.has_content() {
            write_csv(&self.path, rows).map_err(|e| csv_failure(&self.path, e))?;
            debug!(path = %self.path.display(), rows = rows.len(), "created csv");
            return Ok(rows.len());
        }

        // write in the stored column order; the column sets must agree
        let header = self.stored_header()?;
        let mut wanted: Vec<&String> = rows.columns().iter().collect();
        let mut stored: Vec<&String> = header.iter().collect();
        wanted.sort();
        stored.sort();
        if wanted != stored {
            return Err(SinkError::Incompatible {
                name: self.path.display().to_string(),
                reason: format!("file has columns {header:?}, rows have {:?}", rows.columns()),
            });
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        write_rows(&mut wtr, &header, rows).map_err(|e| csv_failure(&self.path, e))?;
        wtr.flush()?;
        debug!(path = %self.path.display(), rows = rows.len(), "appended csv");
        Ok(rows.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub rows: usize,
    pub removed: Vec<PathBuf>,
}

/// Write `table` to `{dir}/{prefix}-{stamp}.csv` and keep only the newest
/// `keep` exports with that prefix. The file just written always survives,
/// so `keep` is at least 1.
pub fn export_timestamped(
    dir: &Path,
    prefix: &str,
    table: &Table,
    now: DateTime<Utc>,
    timezone: &str,
    keep: usize,
) -> Result<ExportOutcome> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let name = stamped_file_name(prefix, "csv", now, timezone)?;
    let path = dir.join(name);

    write_csv(&path, table).with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), rows = table.len(), "exported table");

    let removed = RetentionPolicy::new(prefix, "csv")?
        .with_keep(keep.max(1))
        .apply(dir)
        .with_context(|| format!("apply retention in {}", dir.display()))?;

    Ok(ExportOutcome {
        path,
        rows: table.len(),
        removed,
    })
}
