//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. `#[serde(default)]` allows partial
//! JSON: missing fields get their default during deserialization.

mod clustering;
mod database;
mod logging;

pub use clustering::*;
pub use database::*;
pub use logging::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "database": { "path": "/var/lib/strata/strata.db" },
///   "clustering": { "topClusters": 30, "subClusters": 8 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrataSettings {
    /// Embedding and cluster database settings.
    pub database: DatabaseSettings,
    /// Two-level partitioning parameters.
    pub clustering: ClusteringSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl StrataSettings {
    /// Reject values that would make a build or route meaningless.
    pub fn validate(&self) -> Result<()> {
        let c = &self.clustering;
        if c.top_clusters == 0 {
            return Err(SettingsError::InvalidValue(
                "clustering.topClusters must be >= 1".into(),
            ));
        }
        if c.sub_clusters == 0 {
            return Err(SettingsError::InvalidValue(
                "clustering.subClusters must be >= 1".into(),
            ));
        }
        if c.batch_size == 0 {
            return Err(SettingsError::InvalidValue(
                "clustering.batchSize must be >= 1".into(),
            ));
        }
        if c.n_init == 0 || c.max_iter == 0 || c.mini_batch_size == 0 {
            return Err(SettingsError::InvalidValue(
                "clustering.nInit, maxIter and miniBatchSize must be >= 1".into(),
            ));
        }
        if !c.tolerance.is_finite() || c.tolerance < 0.0 {
            return Err(SettingsError::InvalidValue(format!(
                "clustering.tolerance must be finite and >= 0, got {}",
                c.tolerance
            )));
        }
        if self.database.dimensions == 0 {
            return Err(SettingsError::InvalidValue(
                "database.dimensions must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_camel_case() {
        let value = serde_json::to_value(StrataSettings::default()).unwrap();
        assert!(value["clustering"].get("topClusters").is_some());
        assert!(value["clustering"].get("storeCentroids").is_some());
        assert!(value["database"].get("busyTimeoutMs").is_some());
        assert!(value["clustering"].get("top_clusters").is_none());
    }

    #[test]
    fn partial_json_with_defaults() {
        let json = r#"{"clustering": {"topClusters": 5}}"#;
        let settings: StrataSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.clustering.top_clusters, 5);
        assert_eq!(settings.clustering.sub_clusters, 10);
        assert_eq!(settings.database.pool_size, 8);
    }

    #[test]
    fn validate_rejects_zero_counts() {
        let mut settings = StrataSettings::default();
        settings.clustering.top_clusters = 0;
        assert!(settings.validate().is_err());

        let mut settings = StrataSettings::default();
        settings.clustering.sub_clusters = 0;
        assert!(settings.validate().is_err());

        let mut settings = StrataSettings::default();
        settings.clustering.batch_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_tolerance() {
        let mut settings = StrataSettings::default();
        settings.clustering.tolerance = f64::NAN;
        assert!(settings.validate().is_err());
        settings.clustering.tolerance = -1.0;
        assert!(settings.validate().is_err());
    }
}
