//! Record repository for the `records` table (embeddings and assignments).

use rusqlite::{Connection, params};

use crate::codec::{decode_checked, f32_slice_to_blob};
use crate::errors::{Result, StoreError};
use crate::types::{Assignment, ClusterKey, EmbeddingRecord};

/// Record repository. Stateless, every method takes `&Connection`.
pub struct RecordRepo;

impl RecordRepo {
    /// Insert or replace embeddings in one transaction.
    ///
    /// Replacing an embedding clears the record's assignment, since the old
    /// assignment was computed from a different vector.
    pub fn upsert_many(conn: &Connection, records: &[(i64, Vec<f32>)], dims: usize) -> Result<usize> {
        for (_, embedding) in records {
            if embedding.len() != dims {
                return Err(StoreError::DimensionMismatch {
                    expected: dims,
                    actual: embedding.len(),
                });
            }
        }

        let tx = conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO records (record_id, embedding, top_cluster_id, sub_cluster_id)
                 VALUES (?1, ?2, NULL, NULL)
                 ON CONFLICT (record_id) DO UPDATE SET
                     embedding = excluded.embedding,
                     top_cluster_id = NULL,
                     sub_cluster_id = NULL",
            )?;
            for (record_id, embedding) in records {
                written += stmt.execute(params![record_id, f32_slice_to_blob(embedding)])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Delete records by id. Returns the number of rows removed.
    pub fn delete(conn: &Connection, record_ids: &[i64]) -> Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM records WHERE record_id = ?1")?;
            for id in record_ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Count records holding an embedding.
    pub fn count(conn: &Connection) -> Result<usize> {
        let count: i64 = conn.query_row("SELECT count(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Count records with a top-level assignment.
    pub fn count_clustered(conn: &Connection) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM records WHERE top_cluster_id IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Read one page of records ordered by id, starting after `after`.
    pub fn fetch_page(
        conn: &Connection,
        after: Option<i64>,
        limit: usize,
        dims: usize,
    ) -> Result<Vec<EmbeddingRecord>> {
        let mut stmt = conn.prepare_cached(
            "SELECT record_id, embedding, top_cluster_id, sub_cluster_id
             FROM records WHERE ?1 IS NULL OR record_id > ?1
             ORDER BY record_id LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(record_id, blob, top_cluster_id, sub_cluster_id)| {
                Ok(EmbeddingRecord {
                    record_id,
                    embedding: decode_checked(&blob, dims)?,
                    top_cluster_id,
                    sub_cluster_id,
                })
            })
            .collect()
    }

    /// Write a page of assignments in one transaction.
    ///
    /// Returns the number of records updated; ids with no row are ignored.
    pub fn write_assignments(conn: &Connection, batch: &[Assignment]) -> Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE records SET top_cluster_id = ?1, sub_cluster_id = ?2 WHERE record_id = ?3",
            )?;
            for a in batch {
                updated += stmt.execute(params![a.top_cluster_id, a.sub_cluster_id, a.record_id])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Whether any record is currently assigned to `(top, sub)`.
    pub fn has_members(conn: &Connection, top: i64, sub: i64) -> Result<bool> {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM records WHERE top_cluster_id = ?1 AND sub_cluster_id = ?2)",
            params![top, sub],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    /// Count records currently assigned to a cluster.
    pub fn member_count(conn: &Connection, key: &ClusterKey) -> Result<usize> {
        let count: i64 = match key.parent_id {
            None => conn.query_row(
                "SELECT count(*) FROM records WHERE top_cluster_id = ?1",
                params![key.cluster_id],
                |row| row.get(0),
            )?,
            Some(parent) => conn.query_row(
                "SELECT count(*) FROM records WHERE top_cluster_id = ?1 AND sub_cluster_id = ?2",
                params![parent, key.cluster_id],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    /// Embeddings of the records currently assigned to a cluster.
    pub fn member_embeddings(conn: &Connection, key: &ClusterKey, dims: usize) -> Result<Vec<Vec<f32>>> {
        let blobs: Vec<Vec<u8>> = match key.parent_id {
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT embedding FROM records WHERE top_cluster_id = ?1 ORDER BY record_id",
                )?;
                stmt.query_map(params![key.cluster_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            Some(parent) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT embedding FROM records
                     WHERE top_cluster_id = ?1 AND sub_cluster_id = ?2 ORDER BY record_id",
                )?;
                stmt.query_map(params![parent, key.cluster_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        blobs.iter().map(|b| decode_checked(b, dims)).collect()
    }
}
