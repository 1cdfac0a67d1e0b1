//! Nearest-cluster routing with fallback to populated clusters.
//!
//! A routing call loads a [`ClusterSnapshot`], scores every `(top, sub)`
//! pair against the query and walks one ranked candidate list until a pair
//! with at least one member is found.
//!
//! Ranking order is top similarity descending, then sub similarity
//! descending, then top id and sub id ascending. The first candidate is the
//! naive nearest pair; the rest reproduce sibling fallback (same top, next
//! best sub) followed by the next best tops with their subs.
//!
//! A top cluster with no materialized sub-centroids contributes a single
//! candidate `(top, 0)` with sub similarity `0.0`.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strata_store::{ClusterFilter, ClusterLevel, ClusterRecord, ClusterStore, EmbeddingStore};
use tracing::{debug, info, warn};

use crate::errors::{ClusterError, Result};
use crate::vector::cosine_similarity;

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Cluster rows loaded once per routing call, with a children index.
#[derive(Clone, Debug, Default)]
pub struct ClusterSnapshot {
    records: Vec<ClusterRecord>,
    tops: Vec<usize>,
    children: HashMap<i64, Vec<usize>>,
}

impl ClusterSnapshot {
    /// Load every cluster row from `store`.
    pub fn load(store: &dyn ClusterStore) -> Result<Self> {
        Ok(Self::from_records(store.list_clusters(ClusterFilter::All)?))
    }

    /// Index an already loaded set of rows.
    pub fn from_records(records: Vec<ClusterRecord>) -> Self {
        let mut tops = Vec::new();
        let mut children: HashMap<i64, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            match record.key.parent_id {
                None => tops.push(idx),
                Some(parent) => children.entry(parent).or_default().push(idx),
            }
        }
        Self {
            records,
            tops,
            children,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Level-1 rows.
    pub fn tops(&self) -> impl Iterator<Item = &ClusterRecord> {
        self.tops.iter().map(|&i| &self.records[i])
    }

    /// Level-2 rows under `top`.
    pub fn children(&self, top: i64) -> impl Iterator<Item = &ClusterRecord> {
        self.children
            .get(&top)
            .into_iter()
            .flatten()
            .map(|&i| &self.records[i])
    }

    /// Level-2 rows whose parent has no level-1 row.
    pub fn orphans(&self) -> impl Iterator<Item = &ClusterRecord> {
        self.children
            .iter()
            .filter(|(parent, _)| !self.tops().any(|t| t.key.cluster_id == **parent))
            .flat_map(|(_, idx)| idx.iter().map(|&i| &self.records[i]))
    }

    fn count(&self, level: ClusterLevel) -> usize {
        match level {
            ClusterLevel::Top => self.tops.len(),
            ClusterLevel::Sub => self.records.len() - self.tops.len(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ranking
// ─────────────────────────────────────────────────────────────────────────────

/// One `(top, sub)` pair scored against a query.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Top cluster id.
    pub top_cluster_id: i64,
    /// Sub-cluster id.
    pub sub_cluster_id: i64,
    /// Cosine similarity of the query to the top centroid.
    pub top_similarity: f32,
    /// Cosine similarity of the query to the sub centroid (`0.0` when the
    /// sub row has no centroid or the top has no sub rows).
    pub sub_similarity: f32,
}

fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.top_similarity
        .total_cmp(&a.top_similarity)
        .then_with(|| b.sub_similarity.total_cmp(&a.sub_similarity))
        .then_with(|| a.top_cluster_id.cmp(&b.top_cluster_id))
        .then_with(|| a.sub_cluster_id.cmp(&b.sub_cluster_id))
}

/// Score and rank every routable pair of `snapshot` against `query`.
///
/// Tops without a centroid are not routable. Sub rows without a centroid
/// rank with a sub similarity of `0.0`, and a top with no sub rows at all
/// yields the default pair `(top, 0)`. The caller is responsible for
/// matching `query` to the stored dimensionality.
pub fn rank_candidates(snapshot: &ClusterSnapshot, query: &[f32]) -> Result<Vec<Candidate>> {
    if snapshot.is_empty() {
        return Err(ClusterError::RoutingExhaustion(
            "no clusters exist; run a build first".into(),
        ));
    }
    if snapshot.count(ClusterLevel::Top) == 0 {
        return Err(ClusterError::DataAbsence(format!(
            "{} sub-clusters exist but no top-level clusters",
            snapshot.count(ClusterLevel::Sub)
        )));
    }

    let mut candidates = Vec::new();
    let mut routable_tops = 0usize;
    for top in snapshot.tops() {
        let Some(top_centroid) = top.centroid.as_deref() else {
            continue;
        };
        routable_tops += 1;
        let top_id = top.key.cluster_id;
        let top_similarity = cosine_similarity(query, top_centroid);

        let before = candidates.len();
        for sub in snapshot.children(top_id) {
            // A sub row without a centroid still holds members; score it neutrally.
            let sub_similarity = sub
                .centroid
                .as_deref()
                .map_or(0.0, |c| cosine_similarity(query, c));
            candidates.push(Candidate {
                top_cluster_id: top_id,
                sub_cluster_id: sub.key.cluster_id,
                top_similarity,
                sub_similarity,
            });
        }
        if candidates.len() == before {
            candidates.push(Candidate {
                top_cluster_id: top_id,
                sub_cluster_id: 0,
                top_similarity,
                sub_similarity: 0.0,
            });
        }
    }

    if routable_tops == 0 {
        return Err(ClusterError::Configuration(
            "no top-level centroids are stored; recompute centroids first".into(),
        ));
    }

    candidates.sort_by(rank_order);
    Ok(candidates)
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a routing call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    /// Selected top cluster.
    pub top_cluster_id: i64,
    /// Selected sub-cluster.
    pub sub_cluster_id: i64,
    /// Similarity of the query to the selected top centroid.
    pub top_similarity: f32,
    /// Similarity of the query to the selected sub centroid.
    pub sub_similarity: f32,
    /// Whether the naive nearest pair was empty and a fallback was taken.
    pub fallback: bool,
    /// Candidates checked for members, including the selected one.
    pub candidates_checked: usize,
}

/// Routes query embeddings to populated leaf clusters.
pub struct ClusterRouter<'a> {
    embeddings: &'a dyn EmbeddingStore,
    clusters: &'a dyn ClusterStore,
}

impl<'a> ClusterRouter<'a> {
    /// Create a router over the given stores.
    pub fn new(embeddings: &'a dyn EmbeddingStore, clusters: &'a dyn ClusterStore) -> Self {
        Self {
            embeddings,
            clusters,
        }
    }

    /// Route `query` to the most similar `(top, sub)` pair with members.
    pub fn route(&self, query: &[f32]) -> Result<RouteResult> {
        let dims = self.embeddings.dimensions();
        if query.len() != dims {
            return Err(ClusterError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(ClusterError::Configuration(
                "query embedding contains non-finite values".into(),
            ));
        }

        let snapshot = ClusterSnapshot::load(self.clusters)?;
        let orphans = snapshot.orphans().count();
        if orphans > 0 {
            warn!(orphans, "sub-clusters without a top-level parent are ignored");
        }
        let candidates = rank_candidates(&snapshot, query)?;

        for (pos, c) in candidates.iter().enumerate() {
            if self
                .embeddings
                .has_members(c.top_cluster_id, c.sub_cluster_id)?
            {
                let result = RouteResult {
                    top_cluster_id: c.top_cluster_id,
                    sub_cluster_id: c.sub_cluster_id,
                    top_similarity: c.top_similarity,
                    sub_similarity: c.sub_similarity,
                    fallback: pos > 0,
                    candidates_checked: pos + 1,
                };
                if result.fallback {
                    info!(
                        top = c.top_cluster_id,
                        sub = c.sub_cluster_id,
                        skipped = pos,
                        "nearest cluster empty, routed to fallback"
                    );
                } else {
                    debug!(top = c.top_cluster_id, sub = c.sub_cluster_id, "routed");
                }
                return Ok(result);
            }
        }

        Err(ClusterError::RoutingExhaustion(format!(
            "all {} candidate clusters are empty",
            candidates.len()
        )))
    }
}
