use super::sled_store::node_store_path;
use super::{
    DEFAULT_MAX_PAYLOAD_BYTES, MAX_PAYLOAD_BYTES_CEILING, MessageRecord, QueueStore, Status,
};
use crate::utils::error::StorageFault;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tempfile::tempdir;

fn ids(records: &[MessageRecord]) -> Vec<u64> {
    records.iter().map(|r| r.id).collect()
}

#[test]
fn test_append_assigns_increasing_ids_starting_at_one() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();

    assert_eq!(store.append("t1", b"a").unwrap(), 1);
    assert_eq!(store.append("t2", b"b").unwrap(), 2);
    assert_eq!(store.append("t1", b"c").unwrap(), 3);
    assert_eq!(store.len(), 3);
    assert_eq!(store.pending_count(), 3);
}

#[test]
fn test_appended_record_is_pending_with_timestamp() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    let before = chrono::Utc::now().timestamp();

    let id = store.append("sensors", &[0, 159, 255]).unwrap();
    let record = store.get(id).unwrap().unwrap();

    assert_eq!(record.topic, "sensors");
    assert_eq!(record.payload, vec![0, 159, 255]);
    assert_eq!(record.status, Status::Pending);
    assert!(record.created_at >= before);
}

#[test]
fn test_peek_pending_on_empty_store() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    assert!(store.peek_pending(10).unwrap().is_empty());
    assert!(store.is_empty());
}

#[test]
fn test_peek_pending_is_read_only() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    store.append("t1", b"a").unwrap();
    store.append("t1", b"b").unwrap();

    let first = store.peek_pending(10).unwrap();
    let second = store.peek_pending(10).unwrap();

    assert_eq!(first, second);
    assert!(second.iter().all(|r| r.status == Status::Pending));
}

#[test]
fn test_peek_pending_zero_limit() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    store.append("t1", b"a").unwrap();
    assert!(store.peek_pending(0).unwrap().is_empty());
}

#[test]
fn test_scenario_peek_mark_peek() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    for (topic, payload) in [("t1", b"a"), ("t2", b"b"), ("t1", b"c")] {
        store.append(topic, payload).unwrap();
    }

    let batch = store.peek_pending(2).unwrap();
    assert_eq!(ids(&batch), vec![1, 2]);
    let topics: Vec<_> = batch.iter().map(|r| r.topic.as_str()).collect();
    assert_eq!(topics, vec!["t1", "t2"]);

    assert_eq!(store.mark_sent(&[1]).unwrap(), 1);
    assert_eq!(ids(&store.peek_pending(10).unwrap()), vec![2, 3]);
    assert_eq!(store.get(1).unwrap().unwrap().status, Status::Sent);
}

#[test]
fn test_mark_sent_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    store.append("t1", b"a").unwrap();
    store.append("t1", b"b").unwrap();

    assert_eq!(store.mark_sent(&[1]).unwrap(), 1);
    let after_once = (store.peek_pending(10).unwrap(), store.get(1).unwrap());

    assert_eq!(store.mark_sent(&[1]).unwrap(), 0);
    let after_twice = (store.peek_pending(10).unwrap(), store.get(1).unwrap());

    assert_eq!(after_once, after_twice);
}

#[test]
fn test_mark_sent_unknown_id_is_noop() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    store.append("t1", b"a").unwrap();

    assert_eq!(store.mark_sent(&[42, 7]).unwrap(), 0);
    assert_eq!(store.mark_sent(&[]).unwrap(), 0);
    assert_eq!(ids(&store.peek_pending(10).unwrap()), vec![1]);
    assert!(store.get(42).unwrap().is_none());
}

#[test]
fn test_mark_sent_with_duplicate_ids() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    store.append("t1", b"a").unwrap();
    store.append("t1", b"b").unwrap();

    assert_eq!(store.mark_sent(&[2, 2, 2]).unwrap(), 1);
    assert_eq!(ids(&store.peek_pending(10).unwrap()), vec![1]);
}

#[test]
fn test_ordering_survives_interleaved_marks() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    for i in 0..10u8 {
        store.append("t", &[i]).unwrap();
    }
    store.mark_sent(&[2, 5, 6]).unwrap();
    store.append("t", b"late").unwrap();
    store.mark_sent(&[1]).unwrap();

    assert_eq!(ids(&store.peek_pending(4).unwrap()), vec![3, 4, 7, 8]);
    assert_eq!(
        ids(&store.peek_pending(100).unwrap()),
        vec![3, 4, 7, 8, 9, 10, 11]
    );
}

#[test]
fn test_peek_orders_by_created_at_then_id() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    // A clock step backwards between appends.
    store.append_at("t", b"a", 1_725_000_100).unwrap();
    store.append_at("t", b"b", 1_725_000_000).unwrap();
    store.append_at("t", b"c", 1_725_000_000).unwrap();

    assert_eq!(ids(&store.peek_pending(10).unwrap()), vec![2, 3, 1]);
}

#[test]
fn test_negative_timestamps_sort_first() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    store.append_at("t", b"a", 10).unwrap();
    store.append_at("t", b"b", -10).unwrap();

    assert_eq!(ids(&store.peek_pending(10).unwrap()), vec![2, 1]);
}

#[test]
fn test_records_survive_restart() {
    let dir = tempdir().unwrap();
    {
        let store = QueueStore::open(dir.path()).unwrap();
        store.append("t1", b"a").unwrap();
        store.append("t2", b"b").unwrap();
        store.append("t3", b"c").unwrap();
        store.mark_sent(&[2]).unwrap();
        // Dropped without any explicit shutdown.
    }

    let store = QueueStore::open(dir.path()).unwrap();
    let pending = store.peek_pending(10).unwrap();
    assert_eq!(ids(&pending), vec![1, 3]);
    assert!(pending.iter().all(|r| r.status == Status::Pending));
    assert_eq!(store.get(2).unwrap().unwrap().status, Status::Sent);
}

#[test]
fn test_ids_are_not_reused_after_restart() {
    let dir = tempdir().unwrap();
    {
        let store = QueueStore::open(dir.path()).unwrap();
        store.append("t", b"a").unwrap();
        store.append("t", b"b").unwrap();
        store.mark_sent(&[1, 2]).unwrap();
    }

    let store = QueueStore::open(dir.path()).unwrap();
    assert_eq!(store.append("t", b"c").unwrap(), 3);
}

#[test]
fn test_concurrent_appends_keep_ids_unique() {
    let dir = tempdir().unwrap();
    let store = Arc::new(QueueStore::open(dir.path()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                (0..25)
                    .map(|i| store.append("t", format!("{worker}-{i}").as_bytes()).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();

    assert_eq!(all, (1..=100).collect::<Vec<_>>());
    assert_eq!(ids(&store.peek_pending(1000).unwrap()), all);
}

#[test]
fn test_drain_runs_safely_alongside_appends() {
    const WORKERS: u64 = 4;
    const PER_WORKER: u64 = 50;
    const TOTAL: u64 = WORKERS * PER_WORKER;

    let dir = tempdir().unwrap();
    let store = Arc::new(QueueStore::open(dir.path()).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let drainer = {
        let store = store.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut sent: Vec<u64> = Vec::new();
            while !done.load(Ordering::SeqCst) {
                let batch = ids(&store.peek_pending(7).unwrap());
                // Everything up to the last sent id is gone and everything
                // after it was committed in id order, so a batch is always
                // the next contiguous run.
                let next = sent.last().map_or(1, |id| id + 1);
                let expected: Vec<u64> = (next..next + batch.len() as u64).collect();
                assert_eq!(batch, expected, "batch after id {}", next - 1);

                // Confirm only the front half, like a partial broker ack.
                let confirmed = &batch[..batch.len().div_ceil(2)];
                assert_eq!(store.mark_sent(confirmed).unwrap(), confirmed.len());
                sent.extend_from_slice(confirmed);
                thread::yield_now();
            }
            sent
        })
    };

    let appenders: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..PER_WORKER {
                    // One timestamp for every record, so drain order is id order.
                    store
                        .append_at("t", format!("{worker}-{i}").as_bytes(), 0)
                        .unwrap();
                }
            })
        })
        .collect();
    for appender in appenders {
        appender.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let sent = drainer.join().unwrap();

    let pending = ids(&store.peek_pending(usize::MAX).unwrap());
    let mut all: Vec<u64> = sent.iter().chain(&pending).copied().collect();
    all.sort_unstable();
    assert_eq!(all, (1..=TOTAL).collect::<Vec<_>>());
    assert!(sent.iter().all(|&id| store.get(id).unwrap().unwrap().status == Status::Sent));
    assert!(pending.iter().all(|&id| store.get(id).unwrap().unwrap().status == Status::Pending));
}

#[test]
fn test_append_is_withdrawn_when_flush_fails() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();

    let result = store.append_locked("t", b"lost", 0, |_| {
        Err(sled::Error::Io(std::io::Error::other("disk gone")))
    });

    assert!(matches!(result, Err(StorageFault::Db(_))));
    assert_eq!(store.pending_count(), 0);
    assert!(store.is_empty());
    assert!(store.get(1).unwrap().is_none());

    // A retry after the error is the only copy, under a fresh id.
    assert_eq!(store.append("t", b"lost").unwrap(), 2);
    assert_eq!(ids(&store.peek_pending(10).unwrap()), vec![2]);
}

#[test]
fn test_oversized_payload_is_rejected_without_writing() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path())
        .unwrap()
        .with_max_payload_bytes(4);

    assert_eq!(store.append("t", b"1234").unwrap(), 1);
    let err = store.append("t", b"12345").unwrap_err();

    assert!(matches!(
        err,
        StorageFault::PayloadTooLarge { size: 5, limit: 4 }
    ));
    assert_eq!(store.len(), 1);
    assert_eq!(store.append("t", b"ok").unwrap(), 2);
}

#[test]
fn test_payload_limit_defaults_and_ceiling() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    assert_eq!(store.max_payload_bytes(), DEFAULT_MAX_PAYLOAD_BYTES);

    let store = store.with_max_payload_bytes(usize::MAX);
    assert_eq!(store.max_payload_bytes(), MAX_PAYLOAD_BYTES_CEILING);
}

#[test]
fn test_clones_share_one_store() {
    let dir = tempdir().unwrap();
    let store = QueueStore::open(dir.path()).unwrap();
    let other = store.clone();

    store.append("t", b"a").unwrap();
    other.mark_sent(&[1]).unwrap();

    assert_eq!(store.pending_count(), 0);
}

#[test]
fn test_for_node_uses_node_scoped_directory() {
    let dir = tempdir().unwrap();
    let a = QueueStore::for_node(dir.path(), "node-a").unwrap();
    let b = QueueStore::for_node(dir.path(), "node-b").unwrap();

    a.append("t", b"only in a").unwrap();

    assert_eq!(a.pending_count(), 1);
    assert_eq!(b.pending_count(), 0);
    assert!(dir.path().join("edge_node_node-a").exists());
}

#[test]
fn test_invalid_node_ids_are_rejected() {
    for bad in ["", "  ", "../escape", "a/b", "a\\b"] {
        match node_store_path(Path::new("data"), bad) {
            Err(StorageFault::InvalidNodeId(id)) => assert_eq!(id, bad),
            other => panic!("expected InvalidNodeId for {bad:?}, got {other:?}"),
        }
    }
    assert_eq!(
        node_store_path(Path::new("data"), "edge-1").unwrap(),
        Path::new("data").join("edge_node_edge-1")
    );
}

#[test]
fn test_record_serialization_uses_lowercase_status() {
    let record = MessageRecord {
        id: 7,
        topic: "roundtrip".into(),
        payload: b"{\"key\":42}".to_vec(),
        created_at: 1725000000,
        status: Status::Pending,
    };

    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["status"], "pending");
    assert_eq!(value["created_at"], 1725000000);
}
