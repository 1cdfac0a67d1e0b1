//! Two-level partitioning settings.

use serde::{Deserialize, Serialize};

/// Parameters for building and refining the cluster hierarchy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusteringSettings {
    /// Number of level-1 clusters.
    pub top_clusters: usize,
    /// Number of level-2 clusters per level-1 cluster.
    pub sub_clusters: usize,
    /// Rows per page when reading the corpus and writing assignments.
    pub batch_size: usize,
    /// Base seed; sub-partitioning of top cluster `t` uses `seed + t`.
    pub seed: u64,
    /// Persist centroids with cluster metadata (sizes are always stored).
    pub store_centroids: bool,
    /// Number of seeded initializations per partitioning run.
    pub n_init: usize,
    /// Upper bound on mini-batch refinement steps per initialization.
    pub max_iter: usize,
    /// Upper bound on the number of points sampled per refinement step.
    pub mini_batch_size: usize,
    /// Convergence threshold on the largest squared centre shift.
    pub tolerance: f64,
}

impl Default for ClusteringSettings {
    fn default() -> Self {
        Self {
            top_clusters: 25,
            sub_clusters: 10,
            batch_size: 1000,
            seed: 42,
            store_centroids: true,
            n_init: 5,
            max_iter: 100,
            mini_batch_size: 500,
            tolerance: 1e-4,
        }
    }
}
