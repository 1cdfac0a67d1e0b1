//! `SQLite` backend.
//!
//! - **[`connection`]**: `r2d2` connection pool with WAL mode and busy
//!   timeout applied to every connection.
//! - **[`migrations`]**: version-tracked schema, run transactionally.
//! - **[`repositories`]**: stateless repository structs; each method takes
//!   `&Connection` and executes SQL.

pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, PragmaState, new_file, new_in_memory,
    verify_pragmas,
};
pub use migrations::{current_version, latest_version, run_migrations};
