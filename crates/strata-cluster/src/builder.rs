//! Two-level partition builder.
//!
//! A build reads the whole corpus in keyset pages, partitions it into top
//! clusters, partitions each top group into sub-clusters, syncs the
//! cluster metadata and finally writes assignments in paged transactions.
//!
//! A failed assignment page is logged and counted; the remaining pages are
//! still written. While the pages are being written, readers can observe a
//! mix of old and new assignments.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strata_settings::ClusteringSettings;
use strata_store::{Assignment, ClusterKey, ClusterStore, ClusterUpsert, EmbeddingStore};
use tracing::{debug, info, warn};

use crate::errors::{ClusterError, Result};
use crate::kmeans::{self, KMeansParams};
use crate::vector::mean;

/// Parameters of a build.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// Target number of top clusters (`T`).
    pub top_clusters: usize,
    /// Target number of sub-clusters per top cluster (`S`).
    pub sub_clusters: usize,
    /// Rows per corpus page and per assignment transaction.
    pub batch_size: usize,
    /// Base seed.
    pub seed: u64,
    /// Persist centroids alongside sizes.
    pub store_centroids: bool,
    /// Seeded initializations per partitioning run.
    pub n_init: usize,
    /// Mini-batch steps per initialization.
    pub max_iter: usize,
    /// Points per mini-batch step.
    pub mini_batch_size: usize,
    /// Convergence threshold on the largest squared centre shift.
    pub tolerance: f64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&ClusteringSettings::default())
    }
}

impl From<&ClusteringSettings> for BuildOptions {
    fn from(s: &ClusteringSettings) -> Self {
        Self {
            top_clusters: s.top_clusters,
            sub_clusters: s.sub_clusters,
            batch_size: s.batch_size,
            seed: s.seed,
            store_centroids: s.store_centroids,
            n_init: s.n_init,
            max_iter: s.max_iter,
            mini_batch_size: s.mini_batch_size,
            tolerance: s.tolerance,
        }
    }
}

impl BuildOptions {
    /// Reject zero counts and sizes.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.top_clusters, "top_clusters"),
            (self.sub_clusters, "sub_clusters"),
            (self.batch_size, "batch_size"),
            (self.n_init, "n_init"),
            (self.max_iter, "max_iter"),
            (self.mini_batch_size, "mini_batch_size"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(ClusterError::Configuration(format!("{name} must be > 0")));
            }
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ClusterError::Configuration(
                "tolerance must be a finite non-negative number".into(),
            ));
        }
        Ok(())
    }

    fn kmeans(&self, k: usize, seed: u64) -> KMeansParams {
        KMeansParams {
            k,
            n_init: self.n_init,
            max_iter: self.max_iter,
            batch_size: self.mini_batch_size,
            tolerance: self.tolerance,
            seed,
        }
    }
}

/// Outcome of a build.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// Records read from the embedding store.
    pub records: usize,
    /// Level-1 rows persisted.
    pub top_clusters: usize,
    /// Level-2 rows persisted.
    pub sub_clusters: usize,
    /// Top groups too small to sub-partition, assigned wholly to sub `0`.
    pub degenerate_groups: usize,
    /// Assignment rows submitted.
    pub assignments_attempted: usize,
    /// Assignment rows written.
    pub assignments_written: usize,
    /// Assignment rows lost to failed pages.
    pub assignments_failed: usize,
    /// Assignment pages submitted.
    pub pages_total: usize,
    /// Assignment pages whose transaction failed.
    pub pages_failed: usize,
    /// Inertia of the top-level partition.
    pub top_inertia: f64,
}

impl BuildReport {
    /// Whether every assignment page was written.
    pub fn is_complete(&self) -> bool {
        self.pages_failed == 0
    }

    /// Turn a partial build into [`ClusterError::PartialBatchFailure`].
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(ClusterError::PartialBatchFailure {
            failed_pages: self.pages_failed,
            total_pages: self.pages_total,
            failed_rows: self.assignments_failed,
        })
    }
}

/// Sub-partition of one top group. `labels` is parallel to the group's
/// member list; `centres` is indexed by sub-cluster id.
struct SubPartition {
    labels: Vec<usize>,
    centres: Vec<Vec<f32>>,
    degenerate: bool,
}

/// Builds the two-level partition over the full corpus.
pub struct ClusterBuilder<'a> {
    embeddings: &'a dyn EmbeddingStore,
    clusters: &'a dyn ClusterStore,
}

impl<'a> ClusterBuilder<'a> {
    /// Create a builder over the given stores.
    pub fn new(embeddings: &'a dyn EmbeddingStore, clusters: &'a dyn ClusterStore) -> Self {
        Self {
            embeddings,
            clusters,
        }
    }

    /// Run a full rebuild.
    pub fn build(&self, options: &BuildOptions) -> Result<BuildReport> {
        options.validate()?;
        let dims = self.embeddings.dimensions();

        let (ids, vectors) = self.load_corpus(options.batch_size)?;
        if ids.is_empty() {
            return Err(ClusterError::DataAbsence(
                "embedding store holds no records".into(),
            ));
        }
        let n = ids.len();
        info!(
            records = n,
            dims,
            top = options.top_clusters,
            sub = options.sub_clusters,
            seed = options.seed,
            "starting cluster build"
        );

        let k_top = if options.top_clusters > n {
            warn!(
                requested = options.top_clusters,
                records = n,
                "fewer records than top clusters, clamping"
            );
            n
        } else {
            options.top_clusters
        };

        let top_fit = kmeans::fit(&vectors, &options.kmeans(k_top, options.seed))?;
        info!(
            k = k_top,
            inertia = top_fit.inertia,
            iterations = top_fit.iterations,
            converged = top_fit.converged,
            "top-level partition done"
        );

        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); k_top];
        for (i, &label) in top_fit.labels.iter().enumerate() {
            groups[label].push(i);
        }

        let subs: Vec<SubPartition> = groups
            .par_iter()
            .enumerate()
            .map(|(top, members)| partition_group(top, members, &vectors, dims, options))
            .collect::<Result<_>>()?;

        let mut report = BuildReport {
            records: n,
            top_inertia: top_fit.inertia,
            ..BuildReport::default()
        };
        let mut rows = Vec::new();
        let mut assignments = Vec::with_capacity(n);

        for (top, (members, sub)) in groups.iter().zip(&subs).enumerate() {
            let top_id = top as i64;
            let centroid = mean(members.iter().map(|&i| vectors[i].as_slice()), dims)
                .unwrap_or_else(|| top_fit.centroids[top].clone());
            rows.push(ClusterUpsert {
                key: ClusterKey::top(top_id),
                centroid: options.store_centroids.then_some(centroid),
                size: members.len(),
            });
            report.top_clusters += 1;
            if sub.degenerate {
                report.degenerate_groups += 1;
            }

            for (sub_idx, learned) in sub.centres.iter().enumerate() {
                let sub_members: Vec<usize> = members
                    .iter()
                    .zip(&sub.labels)
                    .filter(|&(_, &l)| l == sub_idx)
                    .map(|(&i, _)| i)
                    .collect();
                let centroid = mean(sub_members.iter().map(|&i| vectors[i].as_slice()), dims)
                    .unwrap_or_else(|| learned.clone());
                rows.push(ClusterUpsert {
                    key: ClusterKey::sub(top_id, sub_idx as i64),
                    centroid: options.store_centroids.then_some(centroid),
                    size: sub_members.len(),
                });
                report.sub_clusters += 1;
            }

            for (&i, &l) in members.iter().zip(&sub.labels) {
                assignments.push(Assignment {
                    record_id: ids[i],
                    top_cluster_id: top_id,
                    sub_cluster_id: l as i64,
                });
            }
        }

        let _ = self.clusters.sync_clusters(&rows)?;
        info!(
            top = report.top_clusters,
            sub = report.sub_clusters,
            store_centroids = options.store_centroids,
            "cluster metadata synced"
        );

        assignments.sort_unstable_by_key(|a| a.record_id);
        self.write_assignments(&assignments, options.batch_size, &mut report);

        if report.is_complete() {
            info!(
                written = report.assignments_written,
                pages = report.pages_total,
                "cluster build complete"
            );
        } else {
            warn!(
                written = report.assignments_written,
                failed = report.assignments_failed,
                pages_failed = report.pages_failed,
                pages = report.pages_total,
                "cluster build finished with failed pages"
            );
        }
        Ok(report)
    }

    fn load_corpus(&self, page_size: usize) -> Result<(Vec<i64>, Vec<Vec<f32>>)> {
        let expected = self.embeddings.count_embeddings()?;
        let mut ids = Vec::with_capacity(expected);
        let mut vectors = Vec::with_capacity(expected);
        let mut after = None;
        loop {
            let page = self.embeddings.fetch_embeddings(after, page_size)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.record_id);
            debug!(rows = page.len(), after = ?after, "fetched corpus page");
            for record in page {
                ids.push(record.record_id);
                vectors.push(record.embedding);
            }
        }
        Ok((ids, vectors))
    }

    fn write_assignments(&self, assignments: &[Assignment], page_size: usize, report: &mut BuildReport) {
        for (page, batch) in assignments.chunks(page_size).enumerate() {
            report.pages_total += 1;
            report.assignments_attempted += batch.len();
            match self.embeddings.write_assignments(batch) {
                Ok(written) => report.assignments_written += written,
                Err(e) => {
                    warn!(
                        page,
                        rows = batch.len(),
                        first_record = batch.first().map(|a| a.record_id),
                        error = %e,
                        "assignment page failed, skipping"
                    );
                    report.pages_failed += 1;
                    report.assignments_failed += batch.len();
                }
            }
        }
    }
}

fn partition_group(
    top: usize,
    members: &[usize],
    vectors: &[Vec<f32>],
    dims: usize,
    options: &BuildOptions,
) -> Result<SubPartition> {
    if members.is_empty() {
        warn!(top, "top cluster has no members, no sub-clusters created");
        return Ok(SubPartition {
            labels: Vec::new(),
            centres: Vec::new(),
            degenerate: false,
        });
    }

    if members.len() < options.sub_clusters {
        debug!(
            top,
            members = members.len(),
            sub = options.sub_clusters,
            "group smaller than sub-cluster target, using sub 0"
        );
        let centre = mean(members.iter().map(|&i| vectors[i].as_slice()), dims)
            .unwrap_or_else(|| vec![0.0; dims]);
        return Ok(SubPartition {
            labels: vec![0; members.len()],
            centres: vec![centre],
            degenerate: true,
        });
    }

    let points: Vec<Vec<f32>> = members.iter().map(|&i| vectors[i].clone()).collect();
    let seed = options.seed.wrapping_add(top as u64);
    let fit = kmeans::fit(&points, &options.kmeans(options.sub_clusters, seed))?;
    debug!(
        top,
        members = members.len(),
        seed,
        inertia = fit.inertia,
        "sub-partition done"
    );
    Ok(SubPartition {
        labels: fit.labels,
        centres: fit.centroids,
        degenerate: false,
    })
}
