//! Blocking implementations of the `strata` subcommands.
//!
//! Each function takes an opened [`SqliteStore`] and returns a serializable
//! value that `main` prints as JSON.

use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use strata_cluster::{
    BuildOptions, BuildReport, CentroidRepository, ClusterBuilder, ClusterRouter,
    RecomputeReport, RecomputeScope, RouteResult,
};
use strata_store::{
    ClusterFilter, ClusterRecord, ClusterStats, ClusterStore, ImportRecord, LabelReport,
    LabelUpdate, SqliteStore,
};
use tracing::info;

/// Output of `import`.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutput {
    /// Lines parsed from the input file.
    pub read: usize,
    /// Rows inserted or replaced.
    pub written: usize,
}

/// Output of `prune`.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PruneOutput {
    /// Ids requested.
    pub requested: usize,
    /// Rows deleted.
    pub deleted: usize,
}

/// Output of `stats`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsOutput {
    /// Corpus and level statistics.
    #[serde(flatten)]
    pub stats: ClusterStats,
    /// Level-2 rows without a level-1 parent.
    pub orphaned_sub_clusters: usize,
}

/// Run a full rebuild. With `strict`, a partial build is an error.
pub fn build(store: &SqliteStore, options: &BuildOptions, strict: bool) -> Result<BuildReport> {
    let report = ClusterBuilder::new(store, store).build(options)?;
    if strict {
        report.ensure_complete()?;
    }
    Ok(report)
}

/// Recompute centroids for `scope`.
pub fn recompute(store: &SqliteStore, scope: RecomputeScope) -> Result<RecomputeReport> {
    Ok(CentroidRepository::new(store, store).recompute(scope)?)
}

/// Route one query vector.
pub fn route(store: &SqliteStore, query: &[f32]) -> Result<RouteResult> {
    Ok(ClusterRouter::new(store, store).route(query)?)
}

/// Corpus and hierarchy statistics.
pub fn stats(store: &SqliteStore) -> Result<StatsOutput> {
    Ok(StatsOutput {
        stats: store.stats()?,
        orphaned_sub_clusters: store.orphan_count()?,
    })
}

/// List cluster rows.
pub fn list(store: &SqliteStore, filter: ClusterFilter, with_centroids: bool) -> Result<Vec<ClusterRecord>> {
    let mut rows = store.list_clusters(filter)?;
    if !with_centroids {
        for row in &mut rows {
            row.centroid = None;
        }
    }
    Ok(rows)
}

/// Apply label updates read from a JSON array file.
pub fn label(store: &SqliteStore, path: &Path, dry_run: bool) -> Result<LabelReport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels file: {}", path.display()))?;
    let updates: Vec<LabelUpdate> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse labels file: {}", path.display()))?;
    let report = store.apply_labels(&updates, dry_run)?;
    info!(
        updated = report.updated,
        skipped = report.skipped,
        not_found = report.not_found,
        dry_run,
        "labels processed"
    );
    Ok(report)
}

/// Import `{recordId, embedding}` JSON lines, `batch_size` rows per
/// transaction.
pub fn import(store: &SqliteStore, path: &Path, batch_size: usize) -> Result<ImportOutput> {
    if batch_size == 0 {
        bail!("batch size must be > 0");
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open import file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut out = ImportOutput {
        read: 0,
        written: 0,
    };
    let mut pending = Vec::with_capacity(batch_size);
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(&line)
            .with_context(|| format!("Invalid record on line {}", idx + 1))?;
        pending.push(record);
        out.read += 1;
        if pending.len() == batch_size {
            out.written += store.import(&pending)?;
            pending.clear();
        }
    }
    if !pending.is_empty() {
        out.written += store.import(&pending)?;
    }
    info!(read = out.read, written = out.written, "import complete");
    Ok(out)
}

/// Delete records by id.
pub fn prune(store: &SqliteStore, ids: &[i64]) -> Result<PruneOutput> {
    let deleted = store.delete_records(ids)?;
    info!(requested = ids.len(), deleted, "records pruned");
    Ok(PruneOutput {
        requested: ids.len(),
        deleted,
    })
}

/// Parse a query vector given as a JSON array.
pub fn parse_vector(text: &str) -> Result<Vec<f32>> {
    serde_json::from_str(text.trim()).context("Query vector must be a JSON array of numbers")
}
