use crate::PersistenceService;
use evochora_core::RawTickState;
use evochora_db::TickStore;
use evochora_queue::TickQueue;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn tick(tick_number: u64) -> RawTickState {
    RawTickState {
        tick_number,
        organisms: vec![],
        cells: vec![],
    }
}

fn setup(prefix: &str) -> (tempfile::TempDir, TickStore, Arc<TickQueue>) {
    let tmp_dir = tempfile::Builder::new().prefix(prefix).tempdir().unwrap();
    let store = TickStore::open_in(&tmp_dir).unwrap();
    let queue = Arc::new(TickQueue::new(64 << 20));
    (tmp_dir, store, queue)
}

fn stored_ticks(store: &TickStore) -> Vec<u64> {
    store
        .scan_ticks(0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|(tick, _)| tick)
        .collect()
}

fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

/// 2500 messages with batch size 1000: three atomic commits, 2500 rows,
/// tick numbers 0..2499 all present.
#[test]
fn batching_commits_exactly_as_sized() {
    let (_tmp, store, queue) = setup("batching_commits");
    for t in 0..2500u64 {
        queue.put(tick(t)).unwrap();
    }
    queue.close();

    let service = PersistenceService::new(
        Arc::clone(&queue),
        store.clone(),
        1000,
        Duration::from_secs(60),
    );
    let (handle, controller) = service.start(Some("PersistenceService-batch"));
    handle.join().unwrap();

    assert_eq!(controller.commits(), 3);
    assert_eq!(controller.last_persisted_tick(), Some(2499));
    let ticks = stored_ticks(&store);
    assert_eq!(ticks.len(), 2500);
    assert_eq!(ticks, (0u64..2500).collect::<Vec<_>>());
}

#[test]
fn flush_timeout_commits_partial_batch() {
    let (_tmp, store, queue) = setup("flush_timeout");
    let service = PersistenceService::new(
        Arc::clone(&queue),
        store.clone(),
        1000,
        Duration::from_millis(100),
    );
    let (handle, controller) = service.start(Some("PersistenceService-timeout"));

    for t in 0..5u64 {
        queue.put(tick(t)).unwrap();
    }
    wait_until("timeout flush", || {
        controller.last_persisted_tick() == Some(4)
    });
    assert_eq!(controller.commits(), 1);
    assert_eq!(stored_ticks(&store), vec![0, 1, 2, 3, 4]);

    assert!(controller.stop());
    queue.close();
    handle.join().unwrap();
}

#[test]
fn rows_hold_canonical_json() {
    let (_tmp, store, queue) = setup("canonical_json");
    queue.put(tick(7)).unwrap();
    queue.close();

    let service = PersistenceService::new(
        Arc::clone(&queue),
        store.clone(),
        10,
        Duration::from_millis(50),
    );
    let (handle, _controller) = service.start(Some("PersistenceService-json"));
    handle.join().unwrap();

    let row = store.tick(7).unwrap().unwrap();
    let parsed: RawTickState = serde_json::from_slice(&row).unwrap();
    assert_eq!(parsed, tick(7));
}

#[test]
fn pause_halts_commits_resume_continues() {
    let (_tmp, store, queue) = setup("pause_halts");
    let service = PersistenceService::new(
        Arc::clone(&queue),
        store.clone(),
        1,
        Duration::from_millis(50),
    );
    let (handle, controller) = service.start(Some("PersistenceService-pause"));

    for t in 0..3u64 {
        queue.put(tick(t)).unwrap();
    }
    wait_until("first three ticks", || {
        controller.last_persisted_tick() == Some(2)
    });

    assert!(controller.pause());
    for t in 3..5u64 {
        queue.put(tick(t)).unwrap();
    }
    thread::sleep(Duration::from_millis(200));
    assert_eq!(controller.last_persisted_tick(), Some(2));
    assert_eq!(queue.size(), 2, "paused service must not consume");

    assert!(controller.resume());
    wait_until("resumed ticks", || {
        controller.last_persisted_tick() == Some(4)
    });

    assert!(controller.stop());
    queue.close();
    handle.join().unwrap();
}

#[test]
fn stop_flushes_pending_batch() {
    let (_tmp, store, queue) = setup("stop_flushes");
    let service = PersistenceService::new(
        Arc::clone(&queue),
        store.clone(),
        1000,
        Duration::from_secs(60),
    );
    let (handle, controller) = service.start(Some("PersistenceService-stop"));

    for t in 0..7u64 {
        queue.put(tick(t)).unwrap();
    }
    wait_until("messages consumed", || queue.size() == 0);
    // nothing committed yet: batch is below size and timeout is far away
    assert_eq!(controller.commits(), 0);

    assert!(controller.stop());
    handle.join().unwrap();
    assert_eq!(stored_ticks(&store).len(), 7);
}

#[test]
fn reprocessing_a_tick_replaces_the_row() {
    let (_tmp, store, queue) = setup("reprocess_replaces");
    let mut first = tick(3);
    first.cells.push(evochora_core::RawCellState {
        pos: vec![1, 1],
        molecule: 42,
        owner_id: 1,
    });
    queue.put(first).unwrap();
    queue.put(tick(3)).unwrap();
    queue.close();

    let service = PersistenceService::new(
        Arc::clone(&queue),
        store.clone(),
        1,
        Duration::from_millis(50),
    );
    let (handle, _controller) = service.start(Some("PersistenceService-idem"));
    handle.join().unwrap();

    assert_eq!(stored_ticks(&store), vec![3]);
    let row = store.tick(3).unwrap().unwrap();
    let parsed: RawTickState = serde_json::from_slice(&row).unwrap();
    assert!(parsed.cells.is_empty(), "second write replaced the first");
}
