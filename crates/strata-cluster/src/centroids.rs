//! On-demand centroid recomputation from current cluster members.

use serde::{Deserialize, Serialize};
use strata_store::{ClusterFilter, ClusterKey, ClusterLevel, ClusterStore, EmbeddingStore};
use tracing::{debug, info};

use crate::errors::{ClusterError, Result};
use crate::vector::mean;

/// Which clusters to recompute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecomputeScope {
    /// Every cluster, top level first.
    All,
    /// Every cluster at one level.
    Level(ClusterLevel),
    /// The sub-clusters of one top cluster.
    TopCluster(i64),
}

impl RecomputeScope {
    /// Scope for a numeric level (`1` or `2`).
    pub fn level(n: i64) -> Result<Self> {
        ClusterLevel::from_num(n)
            .map(Self::Level)
            .ok_or_else(|| ClusterError::Configuration(format!("level must be 1 or 2, got {n}")))
    }
}

/// Outcome of a recomputation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeReport {
    /// Clusters that received a centroid.
    pub updated: usize,
    /// Clusters with no members; their centroid was cleared.
    pub cleared: usize,
}

/// Recomputes centroids as the mean of each cluster's current members.
pub struct CentroidRepository<'a> {
    embeddings: &'a dyn EmbeddingStore,
    clusters: &'a dyn ClusterStore,
}

impl<'a> CentroidRepository<'a> {
    /// Create a repository over the given stores.
    pub fn new(embeddings: &'a dyn EmbeddingStore, clusters: &'a dyn ClusterStore) -> Self {
        Self {
            embeddings,
            clusters,
        }
    }

    /// Mean of the embeddings currently assigned to `key`, with the member
    /// count. `None` when the cluster has no members.
    pub fn compute(&self, key: &ClusterKey) -> Result<(Option<Vec<f32>>, usize)> {
        let members = self.embeddings.member_embeddings(key)?;
        let dims = self.embeddings.dimensions();
        let centroid = mean(members.iter().map(Vec::as_slice), dims);
        Ok((centroid, members.len()))
    }

    /// Recompute and persist centroid and size of every cluster in `scope`.
    pub fn recompute(&self, scope: RecomputeScope) -> Result<RecomputeReport> {
        let keys: Vec<ClusterKey> = match scope {
            RecomputeScope::All => {
                let mut keys = self.keys(ClusterFilter::Level(ClusterLevel::Top))?;
                keys.extend(self.keys(ClusterFilter::Level(ClusterLevel::Sub))?);
                keys
            }
            RecomputeScope::Level(level) => self.keys(ClusterFilter::Level(level))?,
            RecomputeScope::TopCluster(id) => self.keys(ClusterFilter::ChildrenOf(id))?,
        };

        let mut report = RecomputeReport::default();
        for key in &keys {
            let (centroid, size) = self.compute(key)?;
            let _ = self
                .clusters
                .update_summary(key, centroid.as_deref(), size)?;
            if centroid.is_some() {
                report.updated += 1;
            } else {
                report.cleared += 1;
                debug!(cluster = %key, "cluster has no members, centroid cleared");
            }
        }

        info!(
            scope = ?scope,
            updated = report.updated,
            cleared = report.cleared,
            "centroids recomputed"
        );
        Ok(report)
    }

    fn keys(&self, filter: ClusterFilter) -> Result<Vec<ClusterKey>> {
        Ok(self
            .clusters
            .list_clusters(filter)?
            .into_iter()
            .map(|r| r.key)
            .collect())
    }
}
