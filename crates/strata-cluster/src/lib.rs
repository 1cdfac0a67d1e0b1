//! # strata-cluster
//!
//! Two-level partitioning of embedding vectors, centroid maintenance and
//! query routing on top of the `strata-store` traits.
//!
//! - **[`ClusterBuilder`]**: full rebuild. Mini-batch k-means into `T` top
//!   clusters, then `S` sub-clusters per top cluster, persisted in paged
//!   transactions.
//! - **[`CentroidRepository`]**: recomputes centroids from current members,
//!   for a level, one top cluster's children, or everything.
//! - **[`ClusterRouter`]**: cosine nearest-cluster routing that only ever
//!   returns a populated leaf.

#![deny(unsafe_code)]

pub mod builder;
pub mod centroids;
pub mod errors;
pub mod kmeans;
pub mod router;
pub mod vector;

pub use builder::{BuildOptions, BuildReport, ClusterBuilder};
pub use centroids::{CentroidRepository, RecomputeReport, RecomputeScope};
pub use errors::{ClusterError, Result};
pub use router::{Candidate, ClusterRouter, ClusterSnapshot, RouteResult, rank_candidates};
