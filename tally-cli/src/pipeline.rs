//! Fetch, reshape, normalize, and push the ledger into a store.

use anyhow::{Context, Result};
use std::collections::HashMap;
use tally_coda::CodaClient;
use tally_core::{delta, plan, upsert, Sink, SinkProvider, Table};
use tally_finance::normalize::DIMENSION_ID;
use tally_finance::{normalize, DimensionSpec, Ledger, TransactionRecipe};
use tracing::info;

/// What one collection got (or would get) during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionOutcome {
    pub collection: String,
    pub fresh: usize,
    pub persisted: usize,
    pub appended: usize,
}

/// Export `table` and, when it is the transactions table, reshape it.
pub async fn fetch(client: &CodaClient, table: &str, recipe: Option<&TransactionRecipe>) -> Result<Table> {
    let mut rows = client
        .export_table(table)
        .await
        .with_context(|| format!("export table '{table}'"))?;
    if let Some(recipe) = recipe {
        recipe
            .apply(&mut rows)
            .with_context(|| format!("reshape table '{table}'"))?;
    }
    Ok(rows)
}

/// Where each part of the ledger goes in a store.
#[derive(Debug, Clone)]
pub struct Layout<'a> {
    pub dimensions: &'a [DimensionSpec],
    pub transactions: &'a str,
    pub identity: &'a str,
}

/// Normalize `transactions` against the dimensions already in `provider`
/// and append the new dimension rows. Returns the normalized ledger so the
/// caller decides how the transactions themselves are written.
pub async fn sync_dimensions<P: SinkProvider>(
    provider: &P,
    dimensions: &[DimensionSpec],
    transactions: &Table,
    dry_run: bool,
) -> Result<(Ledger, Vec<CollectionOutcome>)> {
    let mut sinks = Vec::with_capacity(dimensions.len());
    let mut persisted = HashMap::new();
    for spec in dimensions {
        let sink = provider
            .open(&spec.table)
            .await
            .with_context(|| format!("open collection '{}'", spec.table))?;
        let stored = sink
            .read_all(None)
            .await
            .with_context(|| format!("read collection '{}'", spec.table))?;
        persisted.insert(spec.table.clone(), stored);
        sinks.push(sink);
    }

    let ledger = normalize(transactions, dimensions, &persisted)?;
    let mut outcomes = Vec::with_capacity(sinks.len());

    // the reads above double as the persisted side of each diff
    let empty = Table::default();
    for ((spec, table), sink) in ledger.dimensions.iter().zip(&sinks) {
        let stored = persisted.get(&spec.table).unwrap_or(&empty);
        let new_rows = delta(stored, table, DIMENSION_ID)?;
        let appended = if dry_run {
            new_rows.len()
        } else {
            sink.append(&new_rows)
                .await
                .with_context(|| format!("append to '{}'", spec.table))?
        };
        outcomes.push(CollectionOutcome {
            collection: spec.table.clone(),
            fresh: table.len(),
            persisted: stored.len(),
            appended,
        });
    }
    Ok((ledger, outcomes))
}

/// Dimensions first so foreign keys resolve, then the transactions delta.
pub async fn sync_ledger<P: SinkProvider>(
    provider: &P,
    layout: &Layout<'_>,
    transactions: &Table,
    dry_run: bool,
) -> Result<Vec<CollectionOutcome>> {
    let (ledger, mut outcomes) =
        sync_dimensions(provider, layout.dimensions, transactions, dry_run).await?;

    let sink = provider
        .open(layout.transactions)
        .await
        .with_context(|| format!("open collection '{}'", layout.transactions))?;
    let report = if dry_run {
        let (new_rows, mut report) = plan(&sink, &ledger.transactions, layout.identity, None).await?;
        report.appended = new_rows.len();
        report
    } else {
        upsert(&sink, &ledger.transactions, layout.identity, None)
            .await
            .with_context(|| format!("upsert into '{}'", layout.transactions))?
    };
    outcomes.push(CollectionOutcome {
        collection: layout.transactions.to_string(),
        fresh: report.fresh,
        persisted: report.persisted,
        appended: report.appended,
    });

    info!(
        collections = outcomes.len(),
        appended = outcomes.iter().map(|o| o.appended).sum::<usize>(),
        dry_run,
        "sync finished"
    );
    Ok(outcomes)
}

pub fn print_outcomes(outcomes: &[CollectionOutcome], dry_run: bool) {
    let verb = if dry_run { "would append" } else { "appended" };
    for o in outcomes {
        println!(
            "{:<14} fresh={:<6} stored={:<6} {verb}={}",
            o.collection, o.fresh, o.persisted, o.appended
        );
    }
}
