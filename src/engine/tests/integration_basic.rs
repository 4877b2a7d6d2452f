// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use config::TernConfig;
use engine::{
    datatype, xattr, Bucket, BucketKind, ConnectionSink, Cookie, ErrorKind, IoCompleteStatus,
    StoreOp, StreamState, VBucketState,
};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct TestSink {
    events: Mutex<Vec<(Cookie, IoCompleteStatus)>>,
}

impl ConnectionSink for TestSink {
    fn notify_io_complete(&self, cookie: Cookie, status: IoCompleteStatus) {
        self.events.lock().unwrap().push((cookie, status));
    }
}

impl TestSink {
    fn saw(&self, cookie: Cookie) -> bool {
        self.events.lock().unwrap().iter().any(|(c, _)| *c == cookie)
    }

    fn saw_with(&self, cookie: Cookie, status: IoCompleteStatus) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(c, s)| *c == cookie && *s == status)
    }
}

fn bucket_with(config_toml: &str) -> (Bucket, Arc<TestSink>) {
    let config: TernConfig = toml::from_str(config_toml).expect("bad test config");
    let sink = Arc::new(TestSink::default());
    let bucket = Bucket::new(&config, BucketKind::Ephemeral, sink.clone());
    bucket
        .create_vbucket(0, VBucketState::Active)
        .expect("failed to create vbucket");
    (bucket, sink)
}

fn bucket() -> (Bucket, Arc<TestSink>) {
    bucket_with("")
}

fn set(bucket: &Bucket, key: &[u8], value: &[u8]) -> engine::StoreResult {
    bucket
        .store(0, key, value, 0, 0, datatype::RAW, 0, StoreOp::Set)
        .expect("set failed")
}

fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn store_get_delete() {
    let (bucket, _sink) = bucket();

    let stored = set(&bucket, b"coffee", b"strong");
    assert_eq!(stored.seqno, 1);
    assert_ne!(stored.cas, 0);
    assert_ne!(stored.vbucket_uuid, 0);

    let item = bucket.get(0, b"coffee").unwrap();
    assert_eq!(item.value.as_ref(), b"strong");
    assert_eq!(item.cas, stored.cas);

    let deleted = bucket.delete(0, b"coffee", 0).unwrap();
    assert_eq!(deleted.seqno, 2);
    assert_eq!(bucket.get(0, b"coffee"), Err(ErrorKind::NotFound));
    assert_eq!(bucket.delete(0, b"coffee", 0), Err(ErrorKind::NotFound));
}

#[test]
fn store_ops_map_to_protocol_errors() {
    let (bucket, _sink) = bucket();

    assert_eq!(
        bucket.store(0, b"k", b"v", 0, 0, datatype::RAW, 0, StoreOp::Replace),
        Err(ErrorKind::NotStored)
    );
    bucket
        .store(0, b"k", b"v", 0, 0, datatype::RAW, 0, StoreOp::Add)
        .unwrap();
    assert_eq!(
        bucket.store(0, b"k", b"v2", 0, 0, datatype::RAW, 0, StoreOp::Add),
        Err(ErrorKind::KeyAlreadyExists)
    );

    let current = bucket.get(0, b"k").unwrap();
    assert_eq!(
        bucket.store(0, b"k", b"v2", 0, 0, datatype::RAW, current.cas + 1, StoreOp::Cas),
        Err(ErrorKind::CasMismatch)
    );
    bucket
        .store(0, b"k", b"v2", 0, 0, datatype::RAW, current.cas, StoreOp::Cas)
        .unwrap();
    assert_eq!(bucket.get(0, b"k").unwrap().value.as_ref(), b"v2");

    // cas of zero is not a valid Cas operation
    assert_eq!(
        bucket.store(0, b"k", b"v3", 0, 0, datatype::RAW, 0, StoreOp::Cas),
        Err(ErrorKind::InvalidArgument)
    );

    // unknown vbucket
    assert_eq!(
        bucket.store(7, b"k", b"v", 0, 0, datatype::RAW, 0, StoreOp::Set),
        Err(ErrorKind::NotMyVBucket)
    );
}

#[test]
fn get_if_applies_predicate() {
    let (bucket, _sink) = bucket();
    set(&bucket, b"k", b"v");

    let hit = bucket.get_if(0, b"k", &|item| item.value.len() == 1).unwrap();
    assert!(hit.is_some());
    let miss = bucket.get_if(0, b"k", &|item| item.flags == 99).unwrap();
    assert!(miss.is_none());
    assert_eq!(
        bucket.get_if(0, b"missing", &|_| true),
        Err(ErrorKind::NotFound)
    );
}

#[test]
fn oversized_values_are_rejected() {
    let (bucket, _sink) = bucket_with("[engine]\nmax_item_size = 1024\n");
    let value = vec![0u8; 2048];
    assert_eq!(
        bucket.store(0, b"k", &value, 0, 0, datatype::RAW, 0, StoreOp::Set),
        Err(ErrorKind::TooBig)
    );
}

// Scenario: a set that lacks xattrs must preserve the previous
// version's xattr section.
#[test]
fn xattr_preserving_set() {
    let (bucket, _sink) = bucket();

    let xattrs = b"{\"meta\":{\"owner\":\"x\"}}";
    let with_xattrs = xattr::splice(xattrs, b"B1");
    bucket
        .store(0, b"k", &with_xattrs, 0, 0, datatype::XATTR, 0, StoreOp::Set)
        .unwrap();

    // client writes a bare body; the engine grafts the xattrs back in
    bucket
        .store(0, b"k", b"B2", 0, 0, datatype::RAW, 0, StoreOp::Set)
        .unwrap();

    let item = bucket.get(0, b"k").unwrap();
    assert_ne!(item.datatype & datatype::XATTR, 0);
    let (kept_xattrs, body) = xattr::split(item.datatype, &item.value);
    assert_eq!(kept_xattrs, xattrs);
    assert_eq!(body, b"B2");
}

#[test]
fn quota_fail_new_data_rejects_stores() {
    let (bucket, _sink) = bucket_with(
        "[engine]\nmem_quota = 8192\n[ephemeral]\nfull_policy = \"fail_new_data\"\n",
    );
    let value = vec![0u8; 1024];
    let mut hit_failure = false;
    for i in 0..64u32 {
        let key = format!("key-{}", i);
        match bucket.store(0, key.as_bytes(), &value, 0, 0, datatype::RAW, 0, StoreOp::Set) {
            Ok(_) => {}
            Err(ErrorKind::TemporaryFailure) => {
                hit_failure = true;
                break;
            }
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert!(hit_failure, "quota never rejected a store");
}

#[test]
fn quota_auto_delete_pages_items_out() {
    let (bucket, _sink) = bucket_with(
        "[engine]\nmem_quota = 65536\n[ephemeral]\nfull_policy = \"auto_delete\"\n",
    );
    let value = vec![0u8; 1024];
    for i in 0..128u32 {
        let key = format!("key-{}", i);
        // stores may transiently fail at the hard limit while the pager
        // catches up
        let _ = bucket.store(0, key.as_bytes(), &value, 0, 0, datatype::RAW, 0, StoreOp::Set);
    }
    assert!(
        wait_for(Duration::from_secs(10), || {
            bucket.vbucket_stats(0).unwrap().auto_delete_count > 0
        }),
        "pager never ejected anything"
    );
}

// Scenario: buffered backfill with backpressure. Every resumption emits
// at most one buffer's worth before pausing; the consumer drains the
// buffer and wakes it again.
#[test]
fn buffered_backfill_with_backpressure() {
    let (bucket, _sink) = bucket_with("[engine]\ndcp_stream_buffer_size = 65536\n");
    let value = vec![0u8; 1024];
    const ITEMS: u64 = 10_000;
    for i in 0..ITEMS {
        let key = format!("key-{:05}", i);
        set(&bucket, key.as_bytes(), &value);
    }

    let stream = bucket
        .open_dcp_stream(0, 0, u64::MAX, 0, 0, 0, 42)
        .expect("failed to open stream");

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        match stream.next_item() {
            Some(item) => {
                // the producer never runs the buffer far past its high
                // water mark
                assert!(stream.buffered_bytes() <= 65536 + 2048);
                received.push(item);
            }
            None => {
                if stream.is_ended() {
                    break;
                }
                assert!(Instant::now() < deadline, "backfill stalled");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    assert_eq!(received.len(), ITEMS as usize);
    assert_eq!(received.last().unwrap().seqno, ITEMS as i64);
    assert_eq!(stream.state(), StreamState::Done);
    assert!(wait_for(Duration::from_secs(5), || {
        bucket.vbucket_stats(0).unwrap().num_range_reads == 0
    }));
}

#[test]
fn backfill_sees_snapshot_not_later_writes() {
    // a small stream buffer keeps the backfill paused (pin held) while
    // the test rewrites every key underneath it
    let (bucket, _sink) = bucket_with("[engine]\ndcp_stream_buffer_size = 256\n");
    for i in 0..50u32 {
        let key = format!("key-{}", i);
        set(&bucket, key.as_bytes(), &[7u8; 64]);
    }
    let stream = bucket
        .open_dcp_stream(0, 0, u64::MAX, 0, 0, 0, 7)
        .unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        stream.buffered_bytes() > 0
    }));

    // these land after the snapshot bound and must not be streamed
    for i in 0..50u32 {
        let key = format!("key-{}", i);
        set(&bucket, key.as_bytes(), &[9u8; 64]);
    }

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        match stream.next_item() {
            Some(item) => received.push(item),
            None => {
                if stream.is_ended() {
                    break;
                }
                assert!(Instant::now() < deadline, "backfill stalled");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    assert_eq!(received.len(), 50);
    for item in &received {
        assert_eq!(item.value.as_ref(), &[7u8; 64]);
        assert!(item.seqno <= 50);
    }
}

#[test]
fn stream_close_releases_range_read() {
    let (bucket, _sink) = bucket_with("[engine]\ndcp_stream_buffer_size = 1024\n");
    for i in 0..100u32 {
        let key = format!("key-{}", i);
        set(&bucket, key.as_bytes(), &[0u8; 512]);
    }
    let stream = bucket
        .open_dcp_stream(0, 0, u64::MAX, 0, 0, 0, 9)
        .unwrap();
    // let the backfill start and hit backpressure
    assert!(wait_for(Duration::from_secs(5), || {
        stream.buffered_bytes() > 0
    }));

    stream.close();
    assert_eq!(stream.state(), StreamState::Dead);
    assert!(
        wait_for(Duration::from_secs(5), || {
            bucket.vbucket_stats(0).unwrap().num_range_reads == 0
        }),
        "cancelled backfill did not release its pin"
    );
}

// Scenario: a reconnecting client whose snapshot runs past the
// producer's high seqno rolls back to its snapshot start.
#[test]
fn stream_request_rolls_back_to_snapshot_start() {
    let (bucket, _sink) = bucket();
    for i in 0..300u32 {
        let key = format!("key-{}", i);
        set(&bucket, key.as_bytes(), b"v");
    }
    let uuid = set(&bucket, b"last", b"v").vbucket_uuid;
    // high seqno is now 301; reopen asks from 220 within snapshot
    // [210, 302]
    let err = bucket
        .open_dcp_stream(0, 220, u64::MAX, uuid, 210, 302, 11)
        .unwrap_err();
    assert_eq!(err, ErrorKind::Rollback { to_seqno: 210 });

    // an unknown uuid rolls all the way back
    let err = bucket
        .open_dcp_stream(0, 220, u64::MAX, 0xBAD, 210, 302, 11)
        .unwrap_err();
    assert_eq!(err, ErrorKind::Rollback { to_seqno: 0 });

    // a clean resume from the current position opens a stream
    assert!(bucket
        .open_dcp_stream(0, 301, u64::MAX, uuid, 301, 301, 11)
        .is_ok());
}

#[test]
fn deferred_vbucket_deletion_notifies_waiter() {
    let (bucket, sink) = bucket();
    set(&bucket, b"k", b"v");

    bucket.delete_vbucket(0, Some(99)).unwrap();
    assert_eq!(bucket.get(0, b"k"), Err(ErrorKind::NotMyVBucket));
    assert!(
        wait_for(Duration::from_secs(5), || sink
            .saw_with(99, IoCompleteStatus::Success)),
        "deletion waiter never woken"
    );
    assert_eq!(bucket.vbucket_state(0), None);
}

#[test]
fn backfill_completion_wakes_stream_cookie() {
    let (bucket, sink) = bucket();
    set(&bucket, b"k", b"v");
    let stream = bucket
        .open_dcp_stream(0, 0, u64::MAX, 0, 0, 0, 1234)
        .unwrap();
    assert!(
        wait_for(Duration::from_secs(5), || sink.saw(1234)),
        "stream cookie never notified"
    );
    drop(stream);
}

#[test]
fn failover_table_round_trips_through_engine() {
    let (bucket, _sink) = bucket();
    let json = bucket.failover_table_json(0).unwrap();
    assert!(json.starts_with('['));

    // restoring a vbucket sanitizes the table and counts the erasures
    let dirty = concat!(
        r#"[{"id":0,"seq":0},"#,
        r#"{"id":1356861809263,"seq":100},"#,
        r#"{"id":227813077095126,"seq":200},"#,
        r#"{"id":227813077095128,"seq":300},"#,
        r#"{"id":0,"seq":50},"#,
        r#"{"id":160260368866392,"seq":0}]"#
    );
    bucket
        .restore_vbucket(1, VBucketState::Replica, dirty)
        .unwrap();
    let restored = bucket.failover_table_json(1).unwrap();
    assert_eq!(restored.matches("\"id\"").count(), 2);
    assert!(restored.contains("\"seq\":300"));
    assert!(restored.contains("\"seq\":50"));
}
