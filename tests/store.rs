mod common;

use assert_matches::assert_matches;
use serde_json::json;

use bravo_ingest::domain::{BulkMode, CollectionKind, IndexDescriptor, NaturalKey};
use bravo_ingest::error::IngestError;
use bravo_ingest::store::{DocumentStore, SqliteStore, StoreConnection, UpdateRequest};

use common::{doc, scratch};

fn variant(xpos: i64, alt: &str) -> bravo_ingest::domain::Document {
    doc(json!({"xpos": xpos, "ref": "A", "alt": alt, "filter": "PASS", "rsids": ["rs1"]}))
}

#[test]
fn insert_count_and_drop() {
    let (_dir, root) = scratch();
    let store = SqliteStore::open(root.join("db/bravo.sqlite"));
    let mut conn = store.connect().unwrap();

    assert!(!conn.collection_exists("variants").unwrap());
    assert_eq!(conn.count("variants").unwrap(), 0);
    conn.drop_collection("variants").unwrap();

    let result = conn
        .insert_many("variants", &[variant(1, "C"), variant(2, "G")], BulkMode::Ordered)
        .unwrap();
    assert_eq!(result.inserted, 2);
    assert!(conn.collection_exists("variants").unwrap());
    assert_eq!(conn.count("variants").unwrap(), 2);

    conn.drop_collection("variants").unwrap();
    assert!(!conn.collection_exists("variants").unwrap());
}

#[test]
fn connections_see_each_others_writes() {
    let (_dir, root) = scratch();
    let store = SqliteStore::open(root.join("bravo.sqlite"));
    let mut writer = store.connect().unwrap();
    writer
        .insert_many("dbsnp", &[doc(json!({"rsid": 7, "xpos": 1_000_000_001i64}))], BulkMode::Unordered)
        .unwrap();
    drop(writer);

    let mut reader = store.connect().unwrap();
    assert_eq!(reader.count("dbsnp").unwrap(), 1);
    assert!(store.describe().starts_with("sqlite:"));
}

#[test]
fn keyed_update_touches_first_match_only() {
    let (_dir, root) = scratch();
    let store = SqliteStore::open(root.join("bravo.sqlite"));
    let mut conn = store.connect().unwrap();
    conn.insert_many(
        "variants",
        &[variant(5, "T"), variant(5, "T"), variant(6, "T")],
        BulkMode::Ordered,
    )
    .unwrap();
    conn.create_indexes("variants", &CollectionKind::Variants.indexes())
        .unwrap();

    let requests = vec![
        UpdateRequest {
            key: NaturalKey::new(5, "A", "T"),
            set: doc(json!({"cadd": 3.5})),
        },
        UpdateRequest {
            key: NaturalKey::new(9, "A", "T"),
            set: doc(json!({"cadd": 1.0})),
        },
        UpdateRequest {
            key: NaturalKey::new(6, "A", "T"),
            set: doc(json!({"filter": "PASS"})),
        },
    ];
    let result = conn
        .bulk_update("variants", &requests, BulkMode::Unordered)
        .unwrap();
    assert_eq!((result.matched, result.modified), (2, 1));
    assert!(!result.has_errors());
    assert_eq!(conn.count_duplicate_keys("variants").unwrap(), 1);
    assert_eq!(conn.count("variants").unwrap(), 3);
}

#[test]
fn updating_an_absent_collection_creates_nothing() {
    let (_dir, root) = scratch();
    let store = SqliteStore::open(root.join("bravo.sqlite"));
    let mut conn = store.connect().unwrap();
    let result = conn
        .bulk_update(
            "variants",
            &[UpdateRequest {
                key: NaturalKey::new(1, "A", "C"),
                set: doc(json!({"x": 1})),
            }],
            BulkMode::Unordered,
        )
        .unwrap();
    assert_eq!(result.matched, 0);
    assert!(!conn.collection_exists("variants").unwrap());
}

#[test]
fn unique_index_rejects_duplicates_per_bulk_mode() {
    let (_dir, root) = scratch();
    let store = SqliteStore::open(root.join("bravo.sqlite"));
    let mut conn = store.connect().unwrap();
    conn.create_indexes("igv_cache", &[IndexDescriptor::unique("name")])
        .unwrap();
    assert_eq!(conn.count("igv_cache").unwrap(), 0);

    let batch = [
        doc(json!({"name": "a.cram"})),
        doc(json!({"name": "a.cram"})),
        doc(json!({"name": "b.cram"})),
    ];
    let err = conn
        .insert_many("igv_cache", &batch, BulkMode::Ordered)
        .unwrap_err();
    assert_matches!(err, IngestError::BulkWrite { attempted: 3, .. });
    assert_eq!(conn.count("igv_cache").unwrap(), 0);

    let result = conn
        .insert_many("igv_cache", &batch, BulkMode::Unordered)
        .unwrap();
    assert_eq!(result.inserted, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(conn.count("igv_cache").unwrap(), 2);
}

#[test]
fn index_build_on_empty_collection_is_allowed() {
    let (_dir, root) = scratch();
    let store = SqliteStore::open(root.join("bravo.sqlite"));
    let mut conn = store.connect().unwrap();
    conn.create_indexes("genes", &CollectionKind::Genes.indexes())
        .unwrap();
    conn.create_indexes("genes", &CollectionKind::Genes.indexes())
        .unwrap();
    assert!(conn.collection_exists("genes").unwrap());
    assert_eq!(conn.count("genes").unwrap(), 0);
}

#[test]
fn concurrent_keyed_updates_all_apply() {
    let (_dir, root) = scratch();
    let store = SqliteStore::open(root.join("bravo.sqlite"));
    let workers = 4i64;
    let per_worker = 500i64;
    let seeded: Vec<_> = (1..=workers * per_worker)
        .map(|xpos| variant(xpos, "T"))
        .collect();
    let mut conn = store.connect().unwrap();
    conn.insert_many("variants", &seeded, BulkMode::Ordered)
        .unwrap();
    conn.create_indexes("variants", &CollectionKind::Variants.indexes())
        .unwrap();
    drop(conn);

    let results: Vec<(u64, usize)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let store = &store;
                scope.spawn(move || {
                    let mut conn = store.connect().unwrap();
                    let keys: Vec<i64> =
                        (worker * per_worker + 1..=(worker + 1) * per_worker).collect();
                    let mut matched = 0;
                    let mut errors = 0;
                    for batch in keys.chunks(25) {
                        let requests: Vec<_> = batch
                            .iter()
                            .map(|xpos| UpdateRequest {
                                key: NaturalKey::new(*xpos, "A", "T"),
                                set: doc(json!({"cadd": worker})),
                            })
                            .collect();
                        let result = conn
                            .bulk_update("variants", &requests, BulkMode::Unordered)
                            .unwrap();
                        matched += result.matched;
                        errors += result.errors.len();
                    }
                    (matched, errors)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    for (matched, errors) in results {
        assert_eq!(errors, 0);
        assert_eq!(matched, per_worker as u64);
    }
}
