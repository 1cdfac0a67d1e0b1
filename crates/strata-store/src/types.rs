//! Typed rows for the embedding and cluster tables.

use serde::{Deserialize, Serialize};

/// Tier of a cluster in the two-level hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClusterLevel {
    /// Top-level cluster spanning the whole corpus.
    Top,
    /// Sub-cluster nested inside one top-level cluster.
    Sub,
}

impl ClusterLevel {
    /// Numeric level as persisted (`1` or `2`).
    pub fn as_num(self) -> i64 {
        match self {
            Self::Top => 1,
            Self::Sub => 2,
        }
    }

    /// Parse a persisted level number.
    pub fn from_num(n: i64) -> Option<Self> {
        match n {
            1 => Some(Self::Top),
            2 => Some(Self::Sub),
            _ => None,
        }
    }
}

/// Composite identity of a cluster.
///
/// A top-level cluster has no parent; a sub-cluster's id is only unique
/// within its parent. The level is implied by the presence of a parent, so a
/// key can never describe a parentless level-2 row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterKey {
    /// Cluster id (unique among siblings).
    pub cluster_id: i64,
    /// Parent top-level cluster id, `None` for top-level clusters.
    pub parent_id: Option<i64>,
}

impl ClusterKey {
    /// Key of a top-level cluster.
    pub fn top(cluster_id: i64) -> Self {
        Self {
            cluster_id,
            parent_id: None,
        }
    }

    /// Key of sub-cluster `cluster_id` under top-level cluster `parent_id`.
    pub fn sub(parent_id: i64, cluster_id: i64) -> Self {
        Self {
            cluster_id,
            parent_id: Some(parent_id),
        }
    }

    /// Level implied by the key.
    pub fn level(&self) -> ClusterLevel {
        if self.parent_id.is_some() {
            ClusterLevel::Sub
        } else {
            ClusterLevel::Top
        }
    }
}

impl std::fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.parent_id {
            Some(parent) => write!(f, "{parent}/{}", self.cluster_id),
            None => write!(f, "{}", self.cluster_id),
        }
    }
}

/// A persisted cluster descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    /// Composite identity.
    pub key: ClusterKey,
    /// Mean of the members at the last build/recompute, if materialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Vec<f32>>,
    /// Member count at the last build/recompute.
    pub size: usize,
    /// Optional human-readable label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// RFC 3339 timestamp of the last write.
    pub updated_at: String,
}

impl ClusterRecord {
    /// Level of this cluster.
    pub fn level(&self) -> ClusterLevel {
        self.key.level()
    }
}

/// Summary values written for one cluster by a build.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterUpsert {
    /// Composite identity.
    pub key: ClusterKey,
    /// Centroid, or `None` when centroids are not stored.
    pub centroid: Option<Vec<f32>>,
    /// Member count.
    pub size: usize,
}

/// Which cluster rows to select.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterFilter {
    /// Every row.
    All,
    /// Rows at one level.
    Level(ClusterLevel),
    /// Sub-clusters of one top-level cluster.
    ChildrenOf(i64),
}

/// One record of the embedding store.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingRecord {
    /// Record id.
    pub record_id: i64,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Assigned top-level cluster, if clustered.
    pub top_cluster_id: Option<i64>,
    /// Assigned sub-cluster, if clustered.
    pub sub_cluster_id: Option<i64>,
}

/// New `(top, sub)` assignment for one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    /// Record id.
    pub record_id: i64,
    /// Top-level cluster id.
    pub top_cluster_id: i64,
    /// Sub-cluster id within the top-level cluster.
    pub sub_cluster_id: i64,
}

/// Size distribution of one cluster level.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelStats {
    /// Number of cluster rows at this level.
    pub count: usize,
    /// Smallest recorded size.
    pub min_size: usize,
    /// Mean recorded size.
    pub avg_size: f64,
    /// Largest recorded size.
    pub max_size: usize,
}

/// Corpus and hierarchy statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    /// Records holding an embedding.
    pub total_embeddings: usize,
    /// Records with a top-level assignment.
    pub total_clustered: usize,
    /// Level-1 size distribution.
    pub top: LevelStats,
    /// Level-2 size distribution.
    pub sub: LevelStats,
}

/// One line of a corpus import file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    /// Record id.
    #[serde(alias = "record_id")]
    pub record_id: i64,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

/// A requested label change for one cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelUpdate {
    /// Cluster id.
    #[serde(alias = "cluster_id")]
    pub cluster_id: i64,
    /// Parent id, absent for top-level clusters.
    #[serde(default, alias = "parent_cluster_id")]
    pub parent_cluster_id: Option<i64>,
    /// New label.
    #[serde(default)]
    pub label: Option<String>,
}

impl LabelUpdate {
    /// Key this update targets.
    pub fn key(&self) -> ClusterKey {
        ClusterKey {
            cluster_id: self.cluster_id,
            parent_id: self.parent_cluster_id,
        }
    }
}

/// Outcome of a bulk label update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelReport {
    /// Labels written (or that would be written in a dry run).
    pub updated: usize,
    /// Entries skipped for an empty or placeholder label.
    pub skipped: usize,
    /// Entries naming a cluster that does not exist.
    pub not_found: usize,
}
