//! File-backed store behaviour across reopen.

use strata_store::sqlite::{ConnectionConfig, current_version, latest_version};
use strata_store::{
    Assignment, ClusterFilter, ClusterKey, ClusterStore, ClusterUpsert, EmbeddingStore,
    ImportRecord, SqliteStore,
};

fn records(n: i64) -> Vec<ImportRecord> {
    (0..n)
        .map(|i| ImportRecord {
            record_id: i,
            embedding: vec![i as f32, 1.0, -1.0],
        })
        .collect()
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.db");
    let config = ConnectionConfig::default();

    {
        let store = SqliteStore::open_file(&path, &config, 3).unwrap();
        assert_eq!(store.import(&records(10)).unwrap(), 10);
        let _ = store
            .write_assignments(&[Assignment {
                record_id: 4,
                top_cluster_id: 1,
                sub_cluster_id: 2,
            }])
            .unwrap();
        let _ = store
            .sync_clusters(&[
                ClusterUpsert {
                    key: ClusterKey::top(1),
                    centroid: Some(vec![4.0, 1.0, -1.0]),
                    size: 1,
                },
                ClusterUpsert {
                    key: ClusterKey::sub(1, 2),
                    centroid: Some(vec![4.0, 1.0, -1.0]),
                    size: 1,
                },
            ])
            .unwrap();
    }

    let store = SqliteStore::open_file(&path, &config, 3).unwrap();
    let conn = store.pool().get().unwrap();
    assert_eq!(current_version(&conn).unwrap(), latest_version());
    drop(conn);

    assert_eq!(store.count_embeddings().unwrap(), 10);
    assert!(store.has_members(1, 2).unwrap());
    let clusters = store.list_clusters(ClusterFilter::All).unwrap();
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[1].key, ClusterKey::sub(1, 2));
    assert_eq!(clusters[1].centroid.as_deref(), Some(&[4.0, 1.0, -1.0][..]));
}

#[test]
fn keyset_paging_visits_every_record_once() {
    let store = SqliteStore::open_in_memory(3).unwrap();
    let _ = store.import(&records(25)).unwrap();

    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let page = store.fetch_embeddings(after, 7).unwrap();
        if page.is_empty() {
            break;
        }
        after = page.last().map(|r| r.record_id);
        seen.extend(page.into_iter().map(|r| r.record_id));
    }
    assert_eq!(seen, (0..25).collect::<Vec<_>>());
}

#[test]
fn pruning_leaves_cluster_rows_in_place() {
    let store = SqliteStore::open_in_memory(3).unwrap();
    let _ = store.import(&records(2)).unwrap();
    let _ = store
        .write_assignments(&[
            Assignment {
                record_id: 0,
                top_cluster_id: 0,
                sub_cluster_id: 0,
            },
            Assignment {
                record_id: 1,
                top_cluster_id: 0,
                sub_cluster_id: 1,
            },
        ])
        .unwrap();
    let _ = store
        .sync_clusters(&[ClusterUpsert {
            key: ClusterKey::sub(0, 0),
            centroid: None,
            size: 1,
        }])
        .unwrap();

    assert_eq!(store.delete_records(&[0]).unwrap(), 1);
    assert!(!store.has_members(0, 0).unwrap());
    assert!(store.has_members(0, 1).unwrap());
    assert_eq!(store.list_clusters(ClusterFilter::All).unwrap().len(), 1);
    assert_eq!(store.orphan_count().unwrap(), 1);
}
