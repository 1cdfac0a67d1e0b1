//! # strata-store
//!
//! Durable storage for embeddings and cluster metadata.
//!
//! - **Embedding store**: one row per record holding its vector and its
//!   current `(top, sub)` assignment.
//! - **Cluster metadata store**: one row per cluster keyed by
//!   `(cluster_id, parent_cluster_id, level)` with centroid, size and label.
//!
//! Clustering code talks to the [`EmbeddingStore`] and [`ClusterStore`]
//! traits; [`SqliteStore`] implements both on an `r2d2` pool of `SQLite`
//! connections.

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod sqlite;
pub mod store;
pub mod types;

pub use errors::{Result, StoreError};
pub use store::{ClusterStore, EmbeddingStore, SqliteStore};
pub use types::{
    Assignment, ClusterFilter, ClusterKey, ClusterLevel, ClusterRecord, ClusterStats,
    ClusterUpsert, EmbeddingRecord, ImportRecord, LabelReport, LabelUpdate, LevelStats,
};
