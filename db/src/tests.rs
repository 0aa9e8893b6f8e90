use crate::{ReadOnlyTickStore, TickStore};
use evochora_app_config::DBConfig;
use std::collections::HashMap;

fn setup_store(prefix: &str) -> (tempfile::TempDir, TickStore) {
    let tmp_dir = tempfile::Builder::new().prefix(prefix).tempdir().unwrap();
    let store = TickStore::open_in(&tmp_dir).unwrap();
    (tmp_dir, store)
}

#[test]
fn open_with_tuning_options() {
    let tmp_dir = tempfile::Builder::new()
        .prefix("open_with_tuning_options")
        .tempdir()
        .unwrap();
    let config = DBConfig {
        cache_size: Some(8 << 20),
        mmap_size: Some(64 << 20),
        page_size: Some(4096),
        options: {
            let mut opts = HashMap::new();
            opts.insert("disable_auto_compactions".to_owned(), "true".to_owned());
            opts
        },
    };
    TickStore::open(&tmp_dir, &config).unwrap();
}

#[test]
fn open_memory_optimized_works() {
    let tmp_dir = tempfile::Builder::new()
        .prefix("open_memory_optimized")
        .tempdir()
        .unwrap();
    TickStore::open_memory_optimized(&tmp_dir, &DBConfig::default()).unwrap();
}

#[test]
fn invalid_raw_option_is_rejected() {
    let tmp_dir = tempfile::Builder::new()
        .prefix("invalid_raw_option_is_rejected")
        .tempdir()
        .unwrap();
    let config = DBConfig {
        options: {
            let mut opts = HashMap::new();
            opts.insert("letsrock".to_owned(), "true".to_owned());
            opts
        },
        ..Default::default()
    };
    assert!(TickStore::open(&tmp_dir, &config).is_err());
}

#[test]
fn batch_commit_is_atomic_and_readable() {
    let (_tmp, store) = setup_store("batch_commit");

    let mut batch = store.tick_batch();
    assert!(batch.is_empty());
    for tick in 0u64..10 {
        batch
            .put_tick(tick, format!("{{\"tickNumber\":{}}}", tick).as_bytes())
            .unwrap();
    }
    assert_eq!(batch.len(), 10);
    store.commit(&batch).unwrap();

    for tick in 0u64..10 {
        let row = store.tick(tick).unwrap().unwrap();
        assert_eq!(row, format!("{{\"tickNumber\":{}}}", tick).into_bytes());
    }
    assert!(store.tick(10).unwrap().is_none());
}

#[test]
fn restaging_a_tick_replaces_the_row() {
    let (_tmp, store) = setup_store("restaging_replaces");

    for payload in [&b"first"[..], &b"second"[..]] {
        let mut batch = store.tick_batch();
        batch.put_tick(7, payload).unwrap();
        store.commit(&batch).unwrap();
    }
    assert_eq!(store.tick(7).unwrap().unwrap(), b"second");
}

#[test]
fn scan_walks_ticks_ascending() {
    let (_tmp, store) = setup_store("scan_ascending");

    let mut batch = store.tick_batch();
    for tick in [300u64, 0, 256, 5, 1] {
        batch.put_tick(tick, b"x").unwrap();
    }
    store.commit(&batch).unwrap();

    let ticks: Vec<u64> = store
        .scan_ticks(0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|(tick, _)| tick)
        .collect();
    assert_eq!(ticks, vec![0, 1, 5, 256, 300]);

    // a scan can start mid-range and is bounded by the limit
    let ticks: Vec<u64> = store
        .scan_ticks(2, 2)
        .unwrap()
        .into_iter()
        .map(|(tick, _)| tick)
        .collect();
    assert_eq!(ticks, vec![5, 256]);
}

#[test]
fn transaction_couples_rows_with_high_water_mark() {
    let (_tmp, store) = setup_store("txn_high_water");
    assert_eq!(store.last_processed_tick().unwrap(), None);

    let txn = store.transaction();
    txn.put_tick(0, b"prepared-0").unwrap();
    txn.put_tick(1, b"prepared-1").unwrap();
    txn.set_last_processed_tick(1).unwrap();
    txn.commit().unwrap();

    assert_eq!(store.last_processed_tick().unwrap(), Some(1));
    assert_eq!(store.tick(1).unwrap().unwrap(), b"prepared-1");
}

#[test]
fn rolled_back_transaction_leaves_no_trace() {
    let (_tmp, store) = setup_store("txn_rollback");

    let txn = store.transaction();
    txn.put_tick(3, b"never").unwrap();
    txn.set_last_processed_tick(3).unwrap();
    txn.rollback().unwrap();

    assert!(store.tick(3).unwrap().is_none());
    assert_eq!(store.last_processed_tick().unwrap(), None);
}

#[test]
fn read_only_handle_sees_committed_rows() {
    let (tmp_dir, store) = setup_store("read_only_sees_rows");

    let mut batch = store.tick_batch();
    batch.put_tick(3, b"payload").unwrap();
    store.commit(&batch).unwrap();

    let ro = ReadOnlyTickStore::open(&tmp_dir).unwrap().unwrap();
    assert_eq!(ro.tick(3).unwrap().unwrap(), b"payload");
    assert!(ro.tick(4).unwrap().is_none());
}

#[test]
fn read_only_open_missing_store_is_none() {
    assert!(ReadOnlyTickStore::open("/nonexistent/evochora-store")
        .unwrap()
        .is_none());
}
