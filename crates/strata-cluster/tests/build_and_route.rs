//! End-to-end behaviour of build, recompute and route over an in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_cluster::{
    BuildOptions, CentroidRepository, ClusterBuilder, ClusterError, ClusterRouter,
    ClusterSnapshot, RecomputeScope, rank_candidates,
};
use strata_store::{
    Assignment, ClusterFilter, ClusterKey, ClusterLevel, ClusterRecord, ClusterStats,
    ClusterStore, ClusterUpsert, EmbeddingRecord, EmbeddingStore, ImportRecord, LabelUpdate,
    SqliteStore, StoreError,
};

const DIMS: usize = 8;

/// `n` points scattered around six fixed centres.
fn corpus(n: usize, seed: u64) -> Vec<ImportRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centres: Vec<Vec<f32>> = (0..6)
        .map(|_| (0..DIMS).map(|_| rng.random_range(-5.0f32..5.0)).collect())
        .collect();
    (0..n)
        .map(|i| ImportRecord {
            record_id: i as i64 + 1,
            embedding: centres[i % centres.len()]
                .iter()
                .map(|c| c + rng.random_range(-0.5f32..0.5))
                .collect(),
        })
        .collect()
}

fn seeded_store(n: usize) -> SqliteStore {
    let store = SqliteStore::open_in_memory(DIMS).unwrap();
    let _ = store.import(&corpus(n, 11)).unwrap();
    store
}

fn options(top: usize, sub: usize) -> BuildOptions {
    BuildOptions {
        top_clusters: top,
        sub_clusters: sub,
        batch_size: 128,
        n_init: 2,
        max_iter: 40,
        mini_batch_size: 100,
        ..BuildOptions::default()
    }
}

fn all_records(store: &dyn EmbeddingStore) -> Vec<EmbeddingRecord> {
    store.fetch_embeddings(None, usize::MAX >> 1).unwrap()
}

fn leaves(store: &dyn ClusterStore) -> Vec<ClusterRecord> {
    store
        .list_clusters(ClusterFilter::Level(ClusterLevel::Sub))
        .unwrap()
}

#[test]
fn scenario_a_thousand_records_five_by_three() {
    let store = seeded_store(1000);
    let report = ClusterBuilder::new(&store, &store)
        .build(&options(5, 3))
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.records, 1000);
    assert_eq!(report.assignments_written, 1000);
    assert_eq!(report.pages_total, 8);

    let leaves = leaves(&store);
    assert!(leaves.len() <= 15);
    assert_eq!(leaves.iter().map(|l| l.size).sum::<usize>(), 1000);

    let stats: ClusterStats = store.stats().unwrap();
    assert_eq!(stats.total_clustered, 1000);
    assert_eq!(stats.top.count, 5);
}

#[test]
fn every_sub_cluster_has_a_parent_and_every_assignment_a_row() {
    let store = seeded_store(300);
    let _ = ClusterBuilder::new(&store, &store)
        .build(&options(4, 3))
        .unwrap();

    let snapshot = ClusterSnapshot::load(&store).unwrap();
    assert_eq!(snapshot.orphans().count(), 0);
    assert_eq!(store.orphan_count().unwrap(), 0);

    let rows = store.list_clusters(ClusterFilter::All).unwrap();
    for record in all_records(&store) {
        let key = ClusterKey::sub(record.top_cluster_id.unwrap(), record.sub_cluster_id.unwrap());
        assert!(rows.iter().any(|r| r.key == key), "missing row for {key}");
    }
}

#[test]
fn rebuild_with_same_seed_is_reproducible() {
    let a = seeded_store(400);
    let b = seeded_store(400);
    let _ = ClusterBuilder::new(&a, &a).build(&options(5, 3)).unwrap();
    let _ = ClusterBuilder::new(&b, &b).build(&options(5, 3)).unwrap();

    let strip = |rows: Vec<ClusterRecord>| {
        rows.into_iter()
            .map(|r| (r.key, r.centroid, r.size))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        strip(a.list_clusters(ClusterFilter::All).unwrap()),
        strip(b.list_clusters(ClusterFilter::All).unwrap())
    );
    assert_eq!(all_records(&a), all_records(&b));

    // Rebuilding in place gives the same result again.
    let before = all_records(&a);
    let _ = ClusterBuilder::new(&a, &a).build(&options(5, 3)).unwrap();
    assert_eq!(all_records(&a), before);
}

#[test]
fn labels_survive_an_identical_rebuild() {
    let store = seeded_store(200);
    let _ = ClusterBuilder::new(&store, &store)
        .build(&options(3, 2))
        .unwrap();
    let report = store
        .apply_labels(
            &[LabelUpdate {
                cluster_id: 0,
                parent_cluster_id: None,
                label: Some("roads".into()),
            }],
            false,
        )
        .unwrap();
    assert_eq!(report.updated, 1);

    let _ = ClusterBuilder::new(&store, &store)
        .build(&options(3, 2))
        .unwrap();
    let tops = store
        .list_clusters(ClusterFilter::Level(ClusterLevel::Top))
        .unwrap();
    assert_eq!(tops[0].key, ClusterKey::top(0));
    assert_eq!(tops[0].label.as_deref(), Some("roads"));
}

#[test]
fn recomputed_centroids_match_build_centroids() {
    let built = seeded_store(200);
    let _ = ClusterBuilder::new(&built, &built)
        .build(&options(3, 2))
        .unwrap();

    let sizes_only = seeded_store(200);
    let opts = BuildOptions {
        store_centroids: false,
        ..options(3, 2)
    };
    let _ = ClusterBuilder::new(&sizes_only, &sizes_only)
        .build(&opts)
        .unwrap();
    let report = CentroidRepository::new(&sizes_only, &sizes_only)
        .recompute(RecomputeScope::All)
        .unwrap();
    assert!(report.updated > 0);

    let expected = built.list_clusters(ClusterFilter::All).unwrap();
    let actual = sizes_only.list_clusters(ClusterFilter::All).unwrap();
    assert_eq!(expected.len(), actual.len());
    for (e, a) in expected.iter().zip(&actual) {
        assert_eq!(e.key, a.key);
        assert_eq!(e.size, a.size);
        if e.size > 0 {
            let (ec, ac) = (e.centroid.as_ref().unwrap(), a.centroid.as_ref().unwrap());
            for (x, y) in ec.iter().zip(ac) {
                assert!((x - y).abs() < 1e-5, "{} centroid drifted", e.key);
            }
        }
    }
}

#[test]
fn routing_returns_populated_leaf_deterministically() {
    let store = seeded_store(300);
    let _ = ClusterBuilder::new(&store, &store)
        .build(&options(4, 3))
        .unwrap();
    let router = ClusterRouter::new(&store, &store);

    for record in all_records(&store).iter().step_by(37) {
        let first = router.route(&record.embedding).unwrap();
        assert!(store.has_members(first.top_cluster_id, first.sub_cluster_id).unwrap());
        let second = router.route(&record.embedding).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn scenario_b_emptied_leaf_falls_back() {
    let store = seeded_store(300);
    let _ = ClusterBuilder::new(&store, &store)
        .build(&options(4, 3))
        .unwrap();

    let query = all_records(&store)[0].embedding.clone();
    let snapshot = ClusterSnapshot::load(&store).unwrap();
    let naive = rank_candidates(&snapshot, &query)
        .unwrap()
        .into_iter()
        .find(|c| store.has_members(c.top_cluster_id, c.sub_cluster_id).unwrap())
        .unwrap();

    let doomed: Vec<i64> = all_records(&store)
        .into_iter()
        .filter(|r| {
            r.top_cluster_id == Some(naive.top_cluster_id)
                && r.sub_cluster_id == Some(naive.sub_cluster_id)
        })
        .map(|r| r.record_id)
        .collect();
    assert!(!doomed.is_empty());
    let _ = store.delete_records(&doomed).unwrap();

    let routed = ClusterRouter::new(&store, &store).route(&query).unwrap();
    assert!(routed.fallback);
    assert_ne!(
        (routed.top_cluster_id, routed.sub_cluster_id),
        (naive.top_cluster_id, naive.sub_cluster_id)
    );
    assert!(store.has_members(routed.top_cluster_id, routed.sub_cluster_id).unwrap());
}

#[test]
fn scenario_c_single_top_without_subs() {
    let store = SqliteStore::open_in_memory(2).unwrap();
    let _ = store
        .import(&[ImportRecord {
            record_id: 1,
            embedding: vec![1.0, 0.0],
        }])
        .unwrap();
    let _ = store
        .write_assignments(&[Assignment {
            record_id: 1,
            top_cluster_id: 0,
            sub_cluster_id: 0,
        }])
        .unwrap();
    let _ = store
        .sync_clusters(&[ClusterUpsert {
            key: ClusterKey::top(0),
            centroid: Some(vec![1.0, 0.0]),
            size: 1,
        }])
        .unwrap();

    let routed = ClusterRouter::new(&store, &store).route(&[0.6, 0.8]).unwrap();
    assert_eq!((routed.top_cluster_id, routed.sub_cluster_id), (0, 0));
    assert_eq!(routed.sub_similarity, 0.0);
    assert!((routed.top_similarity - 0.6).abs() < 1e-6);
    assert!(!routed.fallback);
}

#[test]
fn scenario_d_empty_corpus() {
    let store = SqliteStore::open_in_memory(DIMS).unwrap();
    let err = ClusterBuilder::new(&store, &store)
        .build(&options(5, 3))
        .unwrap_err();
    assert!(matches!(err, ClusterError::DataAbsence(_)));

    let err = ClusterRouter::new(&store, &store)
        .route(&[0.1; DIMS])
        .unwrap_err();
    assert!(matches!(err, ClusterError::RoutingExhaustion(_)));
}

#[test]
fn routing_exhausts_when_every_record_is_pruned() {
    let store = seeded_store(60);
    let _ = ClusterBuilder::new(&store, &store)
        .build(&options(3, 2))
        .unwrap();
    let ids: Vec<i64> = all_records(&store).iter().map(|r| r.record_id).collect();
    let _ = store.delete_records(&ids).unwrap();

    let err = ClusterRouter::new(&store, &store)
        .route(&[0.1; DIMS])
        .unwrap_err();
    assert!(matches!(err, ClusterError::RoutingExhaustion(_)));
}

#[test]
fn routing_without_centroids_is_configuration_error() {
    let store = seeded_store(60);
    let opts = BuildOptions {
        store_centroids: false,
        ..options(3, 2)
    };
    let _ = ClusterBuilder::new(&store, &store).build(&opts).unwrap();
    let err = ClusterRouter::new(&store, &store)
        .route(&[0.1; DIMS])
        .unwrap_err();
    assert!(matches!(err, ClusterError::Configuration(_)));
}

#[test]
fn routing_reaches_subs_that_lack_centroids() {
    let store = seeded_store(40);
    let opts = BuildOptions {
        store_centroids: false,
        ..options(1, 2)
    };
    let _ = ClusterBuilder::new(&store, &store).build(&opts).unwrap();
    let _ = CentroidRepository::new(&store, &store)
        .recompute(RecomputeScope::Level(ClusterLevel::Top))
        .unwrap();

    let doomed: Vec<i64> = all_records(&store)
        .into_iter()
        .filter(|r| r.sub_cluster_id == Some(0))
        .map(|r| r.record_id)
        .collect();
    let _ = store.delete_records(&doomed).unwrap();
    assert!(store.stats().unwrap().total_clustered > 0);

    let routed = ClusterRouter::new(&store, &store)
        .route(&[1.0; DIMS])
        .unwrap();
    assert_eq!((routed.top_cluster_id, routed.sub_cluster_id), (0, 1));
    assert!(routed.fallback);
    assert_eq!(routed.sub_similarity, 0.0);
}

#[test]
fn routing_rejects_wrong_dimensionality() {
    let store = seeded_store(60);
    let _ = ClusterBuilder::new(&store, &store)
        .build(&options(3, 2))
        .unwrap();
    let err = ClusterRouter::new(&store, &store)
        .route(&[0.1; 3])
        .unwrap_err();
    assert!(matches!(
        err,
        ClusterError::DimensionMismatch {
            expected: DIMS,
            actual: 3
        }
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure injection
// ─────────────────────────────────────────────────────────────────────────────

/// Delegates to a real store but fails one assignment page.
struct FlakyStore {
    inner: SqliteStore,
    fail_page: usize,
    pages_seen: AtomicUsize,
}

impl EmbeddingStore for FlakyStore {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn count_embeddings(&self) -> strata_store::Result<usize> {
        self.inner.count_embeddings()
    }

    fn fetch_embeddings(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> strata_store::Result<Vec<EmbeddingRecord>> {
        self.inner.fetch_embeddings(after, limit)
    }

    fn write_assignments(&self, batch: &[Assignment]) -> strata_store::Result<usize> {
        let page = self.pages_seen.fetch_add(1, Ordering::SeqCst);
        if page == self.fail_page {
            return Err(StoreError::Corrupt("injected page failure".into()));
        }
        self.inner.write_assignments(batch)
    }

    fn has_members(&self, top: i64, sub: i64) -> strata_store::Result<bool> {
        self.inner.has_members(top, sub)
    }

    fn member_embeddings(&self, key: &ClusterKey) -> strata_store::Result<Vec<Vec<f32>>> {
        self.inner.member_embeddings(key)
    }
}

#[test]
fn failed_page_is_skipped_and_counted() {
    let inner = SqliteStore::open_in_memory(DIMS).unwrap();
    let _ = inner.import(&corpus(50, 3)).unwrap();
    let flaky = FlakyStore {
        inner: inner.clone(),
        fail_page: 2,
        pages_seen: AtomicUsize::new(0),
    };
    let opts = BuildOptions {
        batch_size: 10,
        ..options(3, 2)
    };

    let report = ClusterBuilder::new(&flaky, &inner).build(&opts).unwrap();
    assert_eq!(report.pages_total, 5);
    assert_eq!(report.pages_failed, 1);
    assert_eq!(report.assignments_attempted, 50);
    assert_eq!(report.assignments_written, 40);
    assert_eq!(report.assignments_failed, 10);
    assert!(matches!(
        report.ensure_complete(),
        Err(ClusterError::PartialBatchFailure {
            failed_pages: 1,
            total_pages: 5,
            failed_rows: 10
        })
    ));

    // Records 21..=30 made up the third page and keep no assignment.
    let unassigned: Vec<i64> = all_records(&inner)
        .into_iter()
        .filter(|r| r.top_cluster_id.is_none())
        .map(|r| r.record_id)
        .collect();
    assert_eq!(unassigned, (21..=30).collect::<Vec<_>>());
}
