//! Database settings.

use serde::{Deserialize, Serialize};

/// Location and tuning of the `SQLite` database holding embeddings and
/// cluster metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Database file path (may contain `~`).
    pub path: String,
    /// Maximum connection pool size.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Expected embedding dimensionality.
    pub dimensions: usize,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "~/.strata/strata.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 30_000,
            dimensions: 384,
        }
    }
}

impl DatabaseSettings {
    /// Resolve the database path, expanding `~/` to the home directory.
    pub fn resolved_path(&self) -> String {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{home}/{rest}");
            }
        }
        self.path.clone()
    }
}
