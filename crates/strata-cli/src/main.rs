//! # strata
//!
//! Command-line entry point: builds the two-level cluster hierarchy,
//! maintains centroids and labels, and routes query vectors.

#![deny(unsafe_code)]

mod commands;
mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use strata_cluster::{BuildOptions, RecomputeScope};
use strata_settings::StrataSettings;
use strata_store::sqlite::ConnectionConfig;
use strata_store::{ClusterFilter, ClusterLevel, SqliteStore};

/// Hierarchical embedding clusters.
#[derive(Parser, Debug)]
#[command(name = "strata", about = "Build, maintain and query embedding clusters")]
struct Cli {
    /// Path to the `SQLite` database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Embedding dimensionality (overrides settings).
    #[arg(long, global = true)]
    dimensions: Option<usize>,

    /// Log level filter, e.g. `info` or `strata_cluster=debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the full cluster hierarchy.
    Build {
        /// Number of top-level clusters.
        #[arg(long)]
        top: Option<usize>,
        /// Number of sub-clusters per top-level cluster.
        #[arg(long)]
        sub: Option<usize>,
        /// Rows per corpus page and assignment transaction.
        #[arg(long)]
        batch_size: Option<usize>,
        /// Base random seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Persist sizes only; run `recompute` later to materialize centroids.
        #[arg(long)]
        no_centroids: bool,
        /// Exit with an error if any assignment page failed.
        #[arg(long)]
        strict: bool,
    },
    /// Recompute centroids from current members.
    Recompute {
        /// Only clusters at this level (1 or 2).
        #[arg(long, conflicts_with = "top_cluster")]
        level: Option<i64>,
        /// Only the sub-clusters of this top-level cluster.
        #[arg(long)]
        top_cluster: Option<i64>,
    },
    /// Route a query vector to a populated cluster.
    Route {
        /// Query vector as a JSON array.
        #[arg(long, required_unless_present = "vector_file")]
        vector: Option<String>,
        /// File holding the query vector as a JSON array.
        #[arg(long, conflicts_with = "vector")]
        vector_file: Option<PathBuf>,
    },
    /// Show corpus and hierarchy statistics.
    Stats,
    /// List cluster rows.
    List {
        /// Only clusters at this level (1 or 2).
        #[arg(long, conflicts_with = "parent")]
        level: Option<i64>,
        /// Only the sub-clusters of this top-level cluster.
        #[arg(long)]
        parent: Option<i64>,
        /// Include centroid vectors in the output.
        #[arg(long)]
        centroids: bool,
    },
    /// Apply cluster labels from a JSON file.
    Label {
        /// JSON array of `{clusterId, parentClusterId, label}` objects.
        #[arg(long)]
        file: PathBuf,
        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Import `{recordId, embedding}` JSON lines.
    Import {
        /// JSON-lines input file.
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete records by id.
    Prune {
        /// Record ids to delete.
        #[arg(required = true, num_args = 1..)]
        ids: Vec<i64>,
    },
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply_overrides(&self, settings: &mut StrataSettings) {
        if let Some(ref path) = self.db_path {
            settings.database.path = path.to_string_lossy().into_owned();
        }
        if let Some(dims) = self.dimensions {
            settings.database.dimensions = dims;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Command::Build {
            top,
            sub,
            batch_size,
            seed,
            no_centroids,
            ..
        } = self.command
        {
            let c = &mut settings.clustering;
            c.top_clusters = top.unwrap_or(c.top_clusters);
            c.sub_clusters = sub.unwrap_or(c.sub_clusters);
            c.batch_size = batch_size.unwrap_or(c.batch_size);
            c.seed = seed.unwrap_or(c.seed);
            if no_centroids {
                c.store_centroids = false;
            }
        }
    }
}

fn load_settings_at(path: &Path) -> Result<StrataSettings> {
    strata_settings::load_settings_from_path(path)
        .with_context(|| format!("Failed to load settings: {}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_store(settings: &StrataSettings) -> Result<SqliteStore> {
    let db_path = PathBuf::from(settings.database.resolved_path());
    ensure_parent_dir(&db_path)?;
    SqliteStore::open_file(
        &db_path,
        &ConnectionConfig::from(&settings.database),
        settings.database.dimensions,
    )
    .with_context(|| format!("Failed to open database: {}", db_path.display()))
}

fn level_filter(level: Option<i64>, parent: Option<i64>) -> Result<ClusterFilter> {
    match (level, parent) {
        (_, Some(parent)) => Ok(ClusterFilter::ChildrenOf(parent)),
        (Some(n), None) => ClusterLevel::from_num(n)
            .map(ClusterFilter::Level)
            .with_context(|| format!("Level must be 1 or 2, got {n}")),
        (None, None) => Ok(ClusterFilter::All),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize output")
}

/// Execute one subcommand against an opened store. Returns JSON text.
fn run(command: Command, settings: &StrataSettings, store: &SqliteStore) -> Result<String> {
    match command {
        Command::Build { strict, .. } => {
            let options = BuildOptions::from(&settings.clustering);
            to_json(&commands::build(store, &options, strict)?)
        }
        Command::Recompute { level, top_cluster } => {
            let scope = match (level, top_cluster) {
                (_, Some(id)) => RecomputeScope::TopCluster(id),
                (Some(n), None) => RecomputeScope::level(n)?,
                (None, None) => RecomputeScope::All,
            };
            to_json(&commands::recompute(store, scope)?)
        }
        Command::Route {
            vector,
            vector_file,
        } => {
            let text = match (vector, vector_file) {
                (Some(v), _) => v,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read vector file: {}", path.display()))?,
                (None, None) => anyhow::bail!("Either --vector or --vector-file is required"),
            };
            let query = commands::parse_vector(&text)?;
            to_json(&commands::route(store, &query)?)
        }
        Command::Stats => to_json(&commands::stats(store)?),
        Command::List {
            level,
            parent,
            centroids,
        } => to_json(&commands::list(store, level_filter(level, parent)?, centroids)?),
        Command::Label { file, dry_run } => to_json(&commands::label(store, &file, dry_run)?),
        Command::Import { file } => {
            to_json(&commands::import(store, &file, settings.clustering.batch_size)?)
        }
        Command::Prune { ids } => to_json(&commands::prune(store, &ids)?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = load_settings_at(&strata_settings::settings_path())?;
    args.apply_overrides(&mut settings);
    logging::init_subscriber(&settings.logging.level);
    settings.validate().context("Invalid settings")?;
    tracing::debug!(db = %settings.database.resolved_path(), "settings loaded");

    let store = open_store(&settings)?;
    let output = tokio::task::spawn_blocking(move || run(args.command, &settings, &store))
        .await
        .context("Command task panicked")??;
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_flags_override_settings() {
        let cli = Cli::try_parse_from([
            "strata",
            "--db-path",
            "/tmp/x.db",
            "build",
            "--top",
            "7",
            "--seed",
            "3",
            "--no-centroids",
        ])
        .unwrap();
        let mut settings = StrataSettings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.database.path, "/tmp/x.db");
        assert_eq!(settings.clustering.top_clusters, 7);
        assert_eq!(settings.clustering.sub_clusters, 10);
        assert_eq!(settings.clustering.seed, 3);
        assert!(!settings.clustering.store_centroids);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["strata", "stats", "--dimensions", "8"]).unwrap();
        assert_eq!(cli.dimensions, Some(8));
        assert!(matches!(cli.command, Command::Stats));
    }

    #[test]
    fn recompute_scope_flags_conflict() {
        assert!(
            Cli::try_parse_from(["strata", "recompute", "--level", "1", "--top-cluster", "2"])
                .is_err()
        );
    }

    #[test]
    fn route_requires_a_vector() {
        assert!(Cli::try_parse_from(["strata", "route"]).is_err());
        assert!(Cli::try_parse_from(["strata", "route", "--vector", "[1,2]"]).is_ok());
    }

    #[test]
    fn prune_requires_ids() {
        assert!(Cli::try_parse_from(["strata", "prune"]).is_err());
        let cli = Cli::try_parse_from(["strata", "prune", "4", "5"]).unwrap();
        assert!(matches!(cli.command, Command::Prune { ref ids } if ids == &[4, 5]));
    }

    #[test]
    fn level_filter_mapping() {
        assert_eq!(level_filter(None, None).unwrap(), ClusterFilter::All);
        assert_eq!(
            level_filter(Some(2), None).unwrap(),
            ClusterFilter::Level(ClusterLevel::Sub)
        );
        assert_eq!(level_filter(None, Some(3)).unwrap(), ClusterFilter::ChildrenOf(3));
        assert!(level_filter(Some(5), None).is_err());
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{\"clustering\": ").unwrap();
        let err = load_settings_at(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));

        assert!(load_settings_at(&dir.path().join("absent.json")).is_ok());
    }

    #[test]
    fn run_against_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = StrataSettings::default();
        settings.database.path = dir.path().join("nested/strata.db").to_string_lossy().into_owned();
        settings.database.dimensions = 2;
        let store = open_store(&settings).unwrap();

        let out = run(Command::Stats, &settings, &store).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["totalEmbeddings"], 0);

        let err = run(
            Command::Route {
                vector: Some("[1.0, 0.0]".into()),
                vector_file: None,
            },
            &settings,
            &store,
        )
        .unwrap_err();
        assert!(err.to_string().contains("routing exhausted"));
    }
}
