use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use tally_coda::CodaClient;
use tally_core::{RetentionPolicy, SinkError, Table};
#[cfg(feature = "gsheets")]
use tally_core::SinkProvider;
use tally_finance::{export_timestamped, CsvStore};
use tracing::warn;

mod config;
#[cfg(feature = "mongo")]
mod mongo;
mod pipeline;
#[cfg(feature = "gsheets")]
mod sheets;
mod state;
mod telemetry;

use config::Config;
use pipeline::Layout;

#[derive(Parser, Debug)]
#[command(name = "tally", version, about = "Sync a Coda finance ledger into CSV, MongoDB or Google Sheets")]
struct Cli {
    /// Config file (default: ~/.tally/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config file
    Init,

    /// List the tables in the configured doc
    Tables,

    /// Fetch a table and write it to a timestamped CSV
    Export {
        /// Table to export (default: the transactions table)
        #[arg(long)]
        table: Option<String>,

        /// Output directory (default: export.dir)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// File name prefix (default: export.prefix)
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Append new ledger rows to a store
    Sync {
        #[arg(long, value_enum, default_value_t = SinkKind::Csv)]
        sink: SinkKind,

        /// Report what would be appended without writing
        #[arg(long)]
        dry_run: bool,

        /// Overwrite the transactions worksheet after a backup (sheets only)
        #[arg(long)]
        replace: bool,
    },

    /// Delete old timestamped exports
    Prune {
        #[arg(long)]
        dir: Option<PathBuf>,

        #[arg(long)]
        prefix: Option<String>,

        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SinkKind {
    Csv,
    Mongo,
    Sheets,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose);

    let config_path = cli.config;
    let load = || config::load_config(config_path.as_deref());

    match cli.command {
        Command::Init => {
            config::init_config(config_path.as_deref())?;
        }

        Command::Tables => {
            let cfg = load()?;
            let client = CodaClient::new(cfg.coda_config()?)?;
            for name in client.list_tables().await.context("list tables")? {
                println!("{name}");
            }
        }

        Command::Export { table, dir, prefix } => {
            let cfg = load()?;
            let client = CodaClient::new(cfg.coda_config()?)?;
            let table = table.unwrap_or_else(|| cfg.transactions.table.clone());
            let recipe = (table == cfg.transactions.table).then_some(&cfg.transactions);
            let rows = pipeline::fetch(&client, &table, recipe).await?;

            let dir = dir.unwrap_or_else(|| cfg.export.dir.clone());
            let prefix = prefix.unwrap_or_else(|| cfg.export.prefix.clone());
            let out = export_timestamped(&dir, &prefix, &rows, Utc::now(), &cfg.timezone, cfg.export.keep)?;
            println!("Wrote {} rows to {}", out.rows, out.path.display());
            for p in &out.removed {
                println!("Removed {}", p.display());
            }
        }

        Command::Sync {
            sink,
            dry_run,
            replace,
        } => {
            if replace && sink != SinkKind::Sheets {
                bail!("--replace only applies to --sink sheets");
            }
            let cfg = load()?;
            let client = CodaClient::new(cfg.coda_config()?)?;
            let txns = pipeline::fetch(&client, &cfg.transactions.table, Some(&cfg.transactions)).await?;
            if txns.is_empty() {
                println!("No rows in '{}'; nothing to sync", cfg.transactions.table);
                return Ok(());
            }

            match sink {
                SinkKind::Csv => sync_csv(&cfg, &txns, dry_run).await?,
                SinkKind::Mongo => sync_mongo(&cfg, &txns, dry_run).await?,
                SinkKind::Sheets => sync_sheets(&cfg, &txns, dry_run, replace).await?,
            }
        }

        Command::Prune { dir, prefix, keep } => {
            let cfg = load()?;
            let dir = dir.unwrap_or_else(|| cfg.export.dir.clone());
            let prefix = prefix.unwrap_or_else(|| cfg.export.prefix.clone());
            let removed = RetentionPolicy::new(&prefix, "csv")?
                .with_keep(keep.unwrap_or(cfg.export.keep))
                .apply(&dir)
                .with_context(|| format!("prune {}", dir.display()))?;
            println!("Removed {} file(s) from {}", removed.len(), dir.display());
            for p in &removed {
                println!("  {}", p.display());
            }
        }
    }

    Ok(())
}

fn layout(cfg: &Config) -> Layout<'_> {
    Layout {
        dimensions: &cfg.dimensions,
        transactions: &cfg.transactions.collection,
        identity: &cfg.transactions.identity_as,
    }
}

async fn sync_csv(cfg: &Config, txns: &Table, dry_run: bool) -> Result<()> {
    fs::create_dir_all(&cfg.csv.dir).with_context(|| format!("create {}", cfg.csv.dir.display()))?;
    let store = CsvStore::new(&cfg.csv.dir);
    let outcomes = pipeline::sync_ledger(&store, &layout(cfg), txns, dry_run).await?;
    pipeline::print_outcomes(&outcomes, dry_run);
    Ok(())
}

/// True when the store could not be reached at all, as opposed to failing
/// mid-operation.
#[cfg_attr(not(feature = "mongo"), allow(dead_code))]
fn store_unavailable(e: &anyhow::Error) -> bool {
    e.chain()
        .any(|c| c.downcast_ref::<SinkError>().is_some_and(SinkError::is_unavailable))
}

/// Without a store the fetched rows still land on disk.
#[cfg_attr(not(feature = "mongo"), allow(dead_code))]
fn degrade_to_csv(cfg: &Config, txns: &Table, dry_run: bool, e: &anyhow::Error) -> Result<()> {
    warn!(error = %e, "document store unavailable; falling back to csv export");
    if dry_run {
        println!("Store unavailable; a real run would export {} rows instead", txns.len());
        return Ok(());
    }
    let out = export_timestamped(
        &cfg.export.dir,
        &cfg.export.prefix,
        txns,
        Utc::now(),
        &cfg.timezone,
        cfg.export.keep,
    )?;
    println!(
        "Store unavailable; wrote {} rows to {}",
        out.rows,
        out.path.display()
    );
    Ok(())
}

#[cfg(feature = "mongo")]
async fn sync_mongo(cfg: &Config, txns: &Table, dry_run: bool) -> Result<()> {
    let result: Result<Vec<pipeline::CollectionOutcome>> = async {
        let store = mongo::MongoStore::connect(
            &cfg.mongo.uri,
            &cfg.mongo.database,
            cfg.mongo.connect_timeout(),
            cfg.mongo.create_collections,
        )
        .await?;
        pipeline::sync_ledger(&store, &layout(cfg), txns, dry_run).await
    }
    .await;

    match result {
        Ok(outcomes) => {
            pipeline::print_outcomes(&outcomes, dry_run);
            Ok(())
        }
        Err(e) if store_unavailable(&e) => degrade_to_csv(cfg, txns, dry_run, &e),
        Err(e) => Err(e),
    }
}

#[cfg(not(feature = "mongo"))]
async fn sync_mongo(_cfg: &Config, _txns: &Table, _dry_run: bool) -> Result<()> {
    bail!("tally was built without the `mongo` feature (rebuild with --features mongo)")
}

#[cfg(feature = "gsheets")]
async fn sync_sheets(cfg: &Config, txns: &Table, dry_run: bool, replace: bool) -> Result<()> {
    let store = sheets::SheetsStore::connect(&cfg.sheets.service_account, &cfg.sheets.doc_id).await?;
    let layout = Layout {
        transactions: &cfg.sheets.worksheet,
        ..layout(cfg)
    };

    if !replace {
        let outcomes = pipeline::sync_ledger(&store, &layout, txns, dry_run).await?;
        pipeline::print_outcomes(&outcomes, dry_run);
        return Ok(());
    }

    let (ledger, outcomes) =
        pipeline::sync_dimensions(&store, layout.dimensions, txns, dry_run).await?;
    pipeline::print_outcomes(&outcomes, dry_run);
    if dry_run {
        println!(
            "{:<14} would replace with {} rows",
            layout.transactions,
            ledger.transactions.len()
        );
        return Ok(());
    }

    let sink = store.open(layout.transactions).await?;
    let backup = sink
        .replace(
            &ledger.transactions,
            &cfg.sheets.backup_dir,
            &cfg.timezone,
            cfg.sheets.backup_keep,
        )
        .await?;
    println!(
        "{:<14} replaced with {} rows (backup {})",
        layout.transactions,
        ledger.transactions.len(),
        backup.path.display()
    );
    Ok(())
}

#[cfg(not(feature = "gsheets"))]
async fn sync_sheets(_cfg: &Config, _txns: &Table, _dry_run: bool, _replace: bool) -> Result<()> {
    bail!("tally was built without the `gsheets` feature (rebuild with --features gsheets)")
}
