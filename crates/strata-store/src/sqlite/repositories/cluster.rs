//! Cluster repository for the `clusters` metadata table.

use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::codec::{decode_checked, f32_slice_to_blob};
use crate::errors::{Result, StoreError};
use crate::types::{ClusterFilter, ClusterKey, ClusterLevel, ClusterRecord, ClusterUpsert, LevelStats};

const SELECT_COLUMNS: &str =
    "SELECT cluster_id, parent_cluster_id, level, centroid, size, label, updated_at FROM clusters";

const ORDER: &str = " ORDER BY level, parent_cluster_id, cluster_id";

struct ClusterRow {
    cluster_id: i64,
    parent_id: Option<i64>,
    level: i64,
    centroid: Option<Vec<u8>>,
    size: i64,
    label: Option<String>,
    updated_at: String,
}

impl ClusterRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cluster_id: row.get(0)?,
            parent_id: row.get(1)?,
            level: row.get(2)?,
            centroid: row.get(3)?,
            size: row.get(4)?,
            label: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_record(self, dims: usize) -> Result<ClusterRecord> {
        let key = ClusterKey {
            cluster_id: self.cluster_id,
            parent_id: self.parent_id,
        };
        if ClusterLevel::from_num(self.level) != Some(key.level()) {
            return Err(StoreError::Corrupt(format!(
                "cluster {key} stored with level {}",
                self.level
            )));
        }
        let centroid = self
            .centroid
            .map(|blob| decode_checked(&blob, dims))
            .transpose()?;
        Ok(ClusterRecord {
            key,
            centroid,
            size: self.size.max(0) as usize,
            label: self.label,
            updated_at: self.updated_at,
        })
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// UPDATE by key, INSERT when no row matched. Leaves `label` untouched.
fn upsert_row(conn: &Connection, row: &ClusterUpsert, ts: &str) -> Result<()> {
    let blob = row.centroid.as_deref().map(f32_slice_to_blob);
    let changed = conn.execute(
        "UPDATE clusters SET centroid = ?1, size = ?2, updated_at = ?3
         WHERE cluster_id = ?4 AND parent_cluster_id IS ?5 AND level = ?6",
        params![
            blob,
            row.size as i64,
            ts,
            row.key.cluster_id,
            row.key.parent_id,
            row.key.level().as_num(),
        ],
    )?;
    if changed == 0 {
        let _ = conn.execute(
            "INSERT INTO clusters (cluster_id, parent_cluster_id, level, centroid, size, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.key.cluster_id,
                row.key.parent_id,
                row.key.level().as_num(),
                blob,
                row.size as i64,
                ts,
            ],
        )?;
    }
    Ok(())
}

/// Cluster repository. Stateless, every method takes `&Connection`.
pub struct ClusterRepo;

impl ClusterRepo {
    /// Make the table hold exactly the keys of `rows`, in one transaction.
    ///
    /// Existing keys keep their label and take the new centroid and size.
    /// Keys absent from `rows` are deleted.
    pub fn sync_all(conn: &Connection, rows: &[ClusterUpsert]) -> Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let ts = now();
        for row in rows {
            upsert_row(&tx, row, &ts)?;
        }

        let keep: HashSet<ClusterKey> = rows.iter().map(|r| r.key).collect();
        let existing = {
            let mut stmt = tx.prepare_cached("SELECT cluster_id, parent_cluster_id FROM clusters")?;
            let keys = stmt
                .query_map([], |row| {
                    Ok(ClusterKey {
                        cluster_id: row.get(0)?,
                        parent_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            keys
        };
        let mut removed = 0usize;
        {
            let mut stmt = tx.prepare_cached(
                "DELETE FROM clusters WHERE cluster_id = ?1 AND parent_cluster_id IS ?2 AND level = ?3",
            )?;
            for key in existing.iter().filter(|k| !keep.contains(k)) {
                removed += stmt.execute(params![key.cluster_id, key.parent_id, key.level().as_num()])?;
            }
        }
        tx.commit()?;
        if removed > 0 {
            debug!(removed, "stale cluster rows deleted");
        }
        Ok(rows.len())
    }

    /// Update a row's centroid and size, inserting it if missing.
    pub fn upsert(conn: &Connection, row: &ClusterUpsert) -> Result<()> {
        let tx = conn.unchecked_transaction()?;
        upsert_row(&tx, row, &now())?;
        tx.commit()?;
        Ok(())
    }

    /// List cluster rows matching `filter`, ordered by level, parent, id.
    pub fn list(conn: &Connection, filter: ClusterFilter, dims: usize) -> Result<Vec<ClusterRecord>> {
        let rows = match filter {
            ClusterFilter::All => {
                let mut stmt = conn.prepare_cached(&format!("{SELECT_COLUMNS}{ORDER}"))?;
                stmt.query_map([], ClusterRow::from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            ClusterFilter::Level(level) => {
                let mut stmt =
                    conn.prepare_cached(&format!("{SELECT_COLUMNS} WHERE level = ?1{ORDER}"))?;
                stmt.query_map(params![level.as_num()], ClusterRow::from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            ClusterFilter::ChildrenOf(parent) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "{SELECT_COLUMNS} WHERE level = 2 AND parent_cluster_id = ?1{ORDER}"
                ))?;
                stmt.query_map(params![parent], ClusterRow::from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        rows.into_iter().map(|r| r.into_record(dims)).collect()
    }

    /// Fetch one row by key.
    pub fn get(conn: &Connection, key: &ClusterKey, dims: usize) -> Result<Option<ClusterRecord>> {
        let row = conn
            .query_row(
                &format!(
                    "{SELECT_COLUMNS} WHERE cluster_id = ?1 AND parent_cluster_id IS ?2 AND level = ?3"
                ),
                params![key.cluster_id, key.parent_id, key.level().as_num()],
                ClusterRow::from_row,
            )
            .optional()?;
        row.map(|r| r.into_record(dims)).transpose()
    }

    /// Overwrite centroid and size of an existing row.
    ///
    /// Returns `false` when no row has this key.
    pub fn update_summary(
        conn: &Connection,
        key: &ClusterKey,
        centroid: Option<&[f32]>,
        size: usize,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE clusters SET centroid = ?1, size = ?2, updated_at = ?3
             WHERE cluster_id = ?4 AND parent_cluster_id IS ?5 AND level = ?6",
            params![
                centroid.map(f32_slice_to_blob),
                size as i64,
                now(),
                key.cluster_id,
                key.parent_id,
                key.level().as_num(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Set or clear a row's label. Returns `false` when no row has this key.
    pub fn set_label(conn: &Connection, key: &ClusterKey, label: Option<&str>) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE clusters SET label = ?1, updated_at = ?2
             WHERE cluster_id = ?3 AND parent_cluster_id IS ?4 AND level = ?5",
            params![label, now(), key.cluster_id, key.parent_id, key.level().as_num()],
        )?;
        Ok(changed > 0)
    }

    /// Size distribution of one level.
    pub fn level_stats(conn: &Connection, level: ClusterLevel) -> Result<LevelStats> {
        let (count, min, avg, max): (i64, Option<i64>, Option<f64>, Option<i64>) = conn.query_row(
            "SELECT count(*), MIN(size), AVG(size), MAX(size) FROM clusters WHERE level = ?1",
            params![level.as_num()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        Ok(LevelStats {
            count: count as usize,
            min_size: min.unwrap_or(0).max(0) as usize,
            avg_size: avg.unwrap_or(0.0),
            max_size: max.unwrap_or(0).max(0) as usize,
        })
    }

    /// Count level-2 rows whose parent has no level-1 row.
    pub fn orphan_count(conn: &Connection) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM clusters s
             WHERE s.level = 2 AND NOT EXISTS (
                 SELECT 1 FROM clusters t WHERE t.level = 1 AND t.cluster_id = s.parent_cluster_id
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
