//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`
//! parameter, so every operation is a function from (connection, input) to
//! output and can be tested against an in-memory database.

pub mod cluster;
pub mod record;

pub use cluster::ClusterRepo;
pub use record::RecordRepo;
