//! Store traits used by the clustering core, and their `SQLite` implementation.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::sqlite::repositories::{ClusterRepo, RecordRepo};
use crate::sqlite::{ConnectionConfig, ConnectionPool, new_file, new_in_memory, run_migrations};
use crate::types::{
    Assignment, ClusterFilter, ClusterKey, ClusterLevel, ClusterRecord, ClusterStats,
    ClusterUpsert, EmbeddingRecord, ImportRecord, LabelReport, LabelUpdate,
};

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Durable table of embeddings and their `(top, sub)` assignments.
pub trait EmbeddingStore: Send + Sync {
    /// Dimensionality every stored vector has.
    fn dimensions(&self) -> usize;
    /// Number of records holding an embedding.
    fn count_embeddings(&self) -> Result<usize>;
    /// One page of records ordered by id, starting after `after`.
    fn fetch_embeddings(&self, after: Option<i64>, limit: usize) -> Result<Vec<EmbeddingRecord>>;
    /// Write one page of assignments atomically.
    fn write_assignments(&self, batch: &[Assignment]) -> Result<usize>;
    /// Whether at least one record is assigned to `(top, sub)`.
    fn has_members(&self, top: i64, sub: i64) -> Result<bool>;
    /// Embeddings of the records currently assigned to `key`.
    fn member_embeddings(&self, key: &ClusterKey) -> Result<Vec<Vec<f32>>>;
}

/// Durable table of cluster descriptors.
pub trait ClusterStore: Send + Sync {
    /// Make the table hold exactly the keys of `rows`. Surviving keys keep their label.
    fn sync_clusters(&self, rows: &[ClusterUpsert]) -> Result<usize>;
    /// Cluster rows matching `filter`, ordered by level, parent, id.
    fn list_clusters(&self, filter: ClusterFilter) -> Result<Vec<ClusterRecord>>;
    /// Overwrite the centroid and size of an existing row.
    fn update_summary(&self, key: &ClusterKey, centroid: Option<&[f32]>, size: usize)
    -> Result<bool>;
    /// Corpus totals and per-level size distribution.
    fn stats(&self) -> Result<ClusterStats>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteStore
// ─────────────────────────────────────────────────────────────────────────────

/// Both stores backed by one `SQLite` database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
    dims: usize,
}

impl SqliteStore {
    /// Wrap an existing pool, running pending migrations.
    pub fn new(pool: ConnectionPool, dims: usize) -> Result<Self> {
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            if applied > 0 {
                info!(applied, "database schema migrated");
            }
        }
        Ok(Self { pool, dims })
    }

    /// Open (or create) a file-backed store.
    pub fn open_file(path: &Path, config: &ConnectionConfig, dims: usize) -> Result<Self> {
        debug!(path = %path.display(), dims, "opening sqlite store");
        Self::new(new_file(&path.to_string_lossy(), config)?, dims)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory(dims: usize) -> Result<Self> {
        Self::new(new_in_memory(&ConnectionConfig::default())?, dims)
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Insert or replace embeddings. Every vector must have the store's
    /// dimensionality; a mismatch rejects the whole batch.
    pub fn import(&self, records: &[ImportRecord]) -> Result<usize> {
        let rows: Vec<(i64, Vec<f32>)> = records
            .iter()
            .map(|r| (r.record_id, r.embedding.clone()))
            .collect();
        let conn = self.pool.get()?;
        RecordRepo::upsert_many(&conn, &rows, self.dims)
    }

    /// Delete records by id. Cluster rows are left in place, possibly empty.
    pub fn delete_records(&self, record_ids: &[i64]) -> Result<usize> {
        let conn = self.pool.get()?;
        RecordRepo::delete(&conn, record_ids)
    }

    /// Number of records currently assigned to `key`.
    pub fn member_count(&self, key: &ClusterKey) -> Result<usize> {
        let conn = self.pool.get()?;
        RecordRepo::member_count(&conn, key)
    }

    /// Level-2 rows whose parent has no level-1 row.
    pub fn orphan_count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        ClusterRepo::orphan_count(&conn)
    }

    /// Apply label updates.
    ///
    /// Entries with no label, a blank label or the placeholder `EMPTY` are
    /// skipped. Entries naming an unknown cluster are counted as not found.
    /// With `dry_run` nothing is written.
    pub fn apply_labels(&self, updates: &[LabelUpdate], dry_run: bool) -> Result<LabelReport> {
        let conn = self.pool.get()?;
        let mut report = LabelReport::default();
        for update in updates {
            let key = update.key();
            let label = match update.label.as_deref().map(str::trim) {
                Some(l) if !l.is_empty() && l != "EMPTY" => l,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };
            let found = if dry_run {
                ClusterRepo::get(&conn, &key, self.dims)?.is_some()
            } else {
                ClusterRepo::set_label(&conn, &key, Some(label))?
            };
            if found {
                report.updated += 1;
                debug!(cluster = %key, label, dry_run, "label applied");
            } else {
                report.not_found += 1;
                warn!(cluster = %key, "label target not found");
            }
        }
        Ok(report)
    }
}

impl EmbeddingStore for SqliteStore {
    fn dimensions(&self) -> usize {
        self.dims
    }

    fn count_embeddings(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        RecordRepo::count(&conn)
    }

    fn fetch_embeddings(&self, after: Option<i64>, limit: usize) -> Result<Vec<EmbeddingRecord>> {
        let conn = self.pool.get()?;
        RecordRepo::fetch_page(&conn, after, limit, self.dims)
    }

    fn write_assignments(&self, batch: &[Assignment]) -> Result<usize> {
        let conn = self.pool.get()?;
        RecordRepo::write_assignments(&conn, batch)
    }

    fn has_members(&self, top: i64, sub: i64) -> Result<bool> {
        let conn = self.pool.get()?;
        RecordRepo::has_members(&conn, top, sub)
    }

    fn member_embeddings(&self, key: &ClusterKey) -> Result<Vec<Vec<f32>>> {
        let conn = self.pool.get()?;
        RecordRepo::member_embeddings(&conn, key, self.dims)
    }
}

impl ClusterStore for SqliteStore {
    fn sync_clusters(&self, rows: &[ClusterUpsert]) -> Result<usize> {
        let conn = self.pool.get()?;
        ClusterRepo::sync_all(&conn, rows)
    }

    fn list_clusters(&self, filter: ClusterFilter) -> Result<Vec<ClusterRecord>> {
        let conn = self.pool.get()?;
        ClusterRepo::list(&conn, filter, self.dims)
    }

    fn update_summary(
        &self,
        key: &ClusterKey,
        centroid: Option<&[f32]>,
        size: usize,
    ) -> Result<bool> {
        let conn = self.pool.get()?;
        ClusterRepo::update_summary(&conn, key, centroid, size)
    }

    fn stats(&self) -> Result<ClusterStats> {
        let conn = self.pool.get()?;
        Ok(ClusterStats {
            total_embeddings: RecordRepo::count(&conn)?,
            total_clustered: RecordRepo::count_clustered(&conn)?,
            top: ClusterRepo::level_stats(&conn, ClusterLevel::Top)?,
            sub: ClusterRepo::level_stats(&conn, ClusterLevel::Sub)?,
        })
    }
}
