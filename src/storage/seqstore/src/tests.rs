// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use super::*;
use crate::failover::FailoverTable;
use crate::vbucket::VBucketOptions;

use proptest::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn vb(state: VBucketState) -> Arc<VBucket> {
    VBucket::new(
        VBucketOptions {
            id: 0,
            state,
            ht_initial_size: 16,
            ht_stripes: 4,
            ht_max_load_factor: 3.0,
            failover_table: FailoverTable::new(25),
        },
        Arc::new(NullCheckpointHook),
        Arc::new(MemoryTracker::new()),
    )
}

fn item(key: &[u8], value: &[u8]) -> Item {
    Item::new(key, value, 0, 0, datatype::RAW)
}

fn tracker() -> ProgressTracker {
    ProgressTracker::new(Instant::now() + Duration::from_secs(60))
}

#[test]
fn set_get_round_trip() {
    let vb = vb(VBucketState::Active);
    let first = vb.set(item(b"k", b"v1"), 0).unwrap();
    assert_eq!(first.seqno, 1);

    let second = vb.set(item(b"k", b"v2"), 0).unwrap();
    assert_eq!(second.seqno, 2);
    assert_ne!(second.cas, first.cas);

    let got = vb.get(b"k").unwrap();
    assert_eq!(got.value.as_ref(), b"v2");
    assert_eq!(got.cas, second.cas);
    assert_eq!(got.seqno, 2);
}

#[test]
fn add_and_replace_semantics() {
    let vb = vb(VBucketState::Active);
    assert_eq!(
        vb.replace(item(b"k", b"v"), 0),
        Err(MutationError::NotStored)
    );
    vb.add(item(b"k", b"v")).unwrap();
    assert_eq!(
        vb.add(item(b"k", b"v2")).unwrap_err(),
        MutationError::KeyAlreadyExists
    );
    vb.replace(item(b"k", b"v2"), 0).unwrap();
    assert_eq!(vb.get(b"k").unwrap().value.as_ref(), b"v2");

    // add may revive a tombstone
    vb.delete(b"k", 0).unwrap();
    vb.add(item(b"k", b"v3")).unwrap();
    assert_eq!(vb.get(b"k").unwrap().value.as_ref(), b"v3");
}

#[test]
fn cas_mismatch_and_match() {
    let vb = vb(VBucketState::Active);
    let stored = vb.set(item(b"k", b"v1"), 0).unwrap();
    assert_eq!(
        vb.set(item(b"k", b"v2"), stored.cas + 1).unwrap_err(),
        MutationError::CasMismatch
    );
    vb.set(item(b"k", b"v2"), stored.cas).unwrap();
    assert_eq!(vb.get(b"k").unwrap().value.as_ref(), b"v2");

    // cas against an absent key reads as not found
    assert_eq!(
        vb.set(item(b"missing", b"v"), 12345).unwrap_err(),
        MutationError::NotFound
    );
}

#[test]
fn delete_is_idempotently_not_found() {
    let vb = vb(VBucketState::Active);
    assert_eq!(vb.delete(b"k", 0), Err(MutationError::NotFound));
    assert_eq!(vb.delete(b"k", 0), Err(MutationError::NotFound));

    vb.set(item(b"k", b"v"), 0).unwrap();
    vb.delete(b"k", 0).unwrap();
    assert!(vb.get(b"k").is_none());
    // tombstone reads as absent; deleting it again is NotFound
    assert_eq!(vb.delete(b"k", 0), Err(MutationError::NotFound));
    // but the tombstone itself is still materialized
    assert!(vb.get_full(b"k").unwrap().deleted);
}

// Scenario: an update under a pinned range becomes an append, leaving
// the superseded record stale; the iterator still sees its snapshot and
// never the new version.
#[test]
fn update_with_pinned_range_becomes_append_stale() {
    let vb = vb(VBucketState::Active);
    vb.set(item(b"a", b"v1"), 0).unwrap();
    vb.set(item(b"b", b"v2"), 0).unwrap();

    let mut iter = VBucket::make_range_iterator(&vb).unwrap();
    let first = iter.next().unwrap();
    assert_eq!(first.key.as_ref(), b"a");
    assert_eq!(first.seqno, 1);
    assert_eq!(first.value.as_ref(), b"v1");

    // single-reader policy
    assert!(VBucket::make_range_iterator(&vb).is_none());

    let updated = vb.set(item(b"a", b"v1b"), 0).unwrap();
    assert_eq!(updated.seqno, 3);

    assert_eq!(
        vb.seqnos_for_test(),
        vec![(1, true), (2, false), (3, false)]
    );
    let stats = vb.stats();
    assert_eq!(stats.high_seqno, 3);
    assert_eq!(stats.seqlist_stale_count, 1);
    assert_eq!(stats.seqlist_count, 2);
    assert_eq!(vb.get(b"a").unwrap().value.as_ref(), b"v1b");
    assert_eq!(vb.get(b"b").unwrap().value.as_ref(), b"v2");

    // iteration continues from its snapshot and ends at the old bound
    let second = iter.next().unwrap();
    assert_eq!(second.key.as_ref(), b"b");
    assert_eq!(second.seqno, 2);
    assert!(iter.next().is_none());

    drop(iter);
    assert_eq!(vb.stats().num_range_reads, 0);
}

// Scenario: page-out is an active-only operation.
#[test]
fn page_out_on_active_only() {
    let vb = vb(VBucketState::Replica);
    vb.set(item(b"k", b"v"), 0).unwrap();

    assert_eq!(vb.page_out(b"k"), PageOutResult::NotEligible);
    assert!(vb.get(b"k").is_some());

    vb.set_state(VBucketState::Active);
    assert!(matches!(vb.page_out(b"k"), PageOutResult::Ejected(_)));
    assert!(vb.get(b"k").is_none());
    assert_eq!(vb.stats().num_deleted, 1);
    assert_eq!(vb.stats().auto_delete_count, 1);

    // a valueless tombstone cannot be paged out again
    assert_eq!(vb.page_out(b"k"), PageOutResult::NotEligible);
}

#[test]
fn page_out_bumps_rev_seqno() {
    let vb = vb(VBucketState::Active);
    vb.set(item(b"k", b"v"), 0).unwrap();
    let before = vb.get_full(b"k").unwrap().rev_seqno;
    assert!(matches!(vb.page_out(b"k"), PageOutResult::Ejected(_)));
    let after = vb.get_full(b"k").unwrap().rev_seqno;
    assert_eq!(after, before + 1);
}

#[test]
fn tombstone_purge_two_phases() {
    let vb = vb(VBucketState::Active);
    for i in 0..5u32 {
        let key = format!("key-{}", i);
        vb.set(item(key.as_bytes(), b"value"), 0).unwrap();
    }
    vb.delete(b"key-0", 0).unwrap();
    vb.delete(b"key-1", 0).unwrap();
    // a trailing live write keeps the tail (the high seqno anchor) off
    // the purgeable set
    vb.set(item(b"key-5", b"value"), 0).unwrap();
    assert_eq!(vb.stats().num_deleted, 2);

    // phase one: hash-table sweep marks aged tombstones stale
    let sweep = vb.mark_old_tombstones_stale(0, &mut tracker(), 0);
    assert_eq!(sweep.marked, 2);
    assert!(sweep.resume.is_none());
    assert_eq!(vb.stats().seqlist_stale_count, 2);
    // the tombstones left the hash table entirely
    assert!(vb.get_full(b"key-0").is_none());

    // phase two: list sweep frees them and advances the purge seqno
    let sweep = vb.purge_stale_items(&mut tracker(), 0);
    assert_eq!(sweep.purged, 2);
    assert!(sweep.resume.is_none());
    let stats = vb.stats();
    assert_eq!(stats.seqlist_stale_count, 0);
    assert_eq!(stats.seqlist_count, 4);
    // both tombstones were purged; the purge seqno is the higher one
    assert_eq!(stats.purge_seqno, 7);
}

#[test]
fn purger_respects_purge_age() {
    let vb = vb(VBucketState::Active);
    vb.set(item(b"k", b"v"), 0).unwrap();
    vb.delete(b"k", 0).unwrap();

    // an hour-long purge age keeps the fresh tombstone
    let sweep = vb.mark_old_tombstones_stale(3600, &mut tracker(), 0);
    assert_eq!(sweep.marked, 0);
    assert!(vb.get_full(b"k").is_some());
}

#[test]
fn purger_excluded_while_range_read_active() {
    let vb = vb(VBucketState::Active);
    vb.set(item(b"k1", b"v"), 0).unwrap();
    vb.set(item(b"k2", b"v"), 0).unwrap();
    vb.delete(b"k1", 0).unwrap();
    vb.set(item(b"k3", b"v"), 0).unwrap();
    vb.mark_old_tombstones_stale(0, &mut tracker(), 0);
    assert_eq!(vb.stats().seqlist_stale_count, 1);

    let iter = VBucket::make_range_iterator(&vb).unwrap();
    let sweep = vb.purge_stale_items(&mut tracker(), 0);
    assert_eq!(sweep.purged, 0);
    assert!(sweep.resume.is_some());
    assert_eq!(vb.stats().seqlist_stale_count, 1);

    drop(iter);
    let sweep = vb.purge_stale_items(&mut tracker(), 0);
    assert_eq!(sweep.purged, 1);
    assert_eq!(vb.stats().seqlist_stale_count, 0);
}

// Range-read safety: every yielded item sits inside the pinned bounds
// and its bytes are the snapshot's, regardless of later writes.
#[test]
fn range_read_yields_only_pinned_snapshot() {
    let vb = vb(VBucketState::Active);
    for i in 0..10u32 {
        let key = format!("key-{}", i);
        vb.set(item(key.as_bytes(), b"old"), 0).unwrap();
    }

    let mut iter = VBucket::make_range_iterator(&vb).unwrap();
    let end = iter.end_seqno();
    assert_eq!(end, 10);

    let mut yielded = Vec::new();
    for _ in 0..5 {
        yielded.push(iter.next().unwrap());
    }
    // rewrite every key mid-iteration
    for i in 0..10u32 {
        let key = format!("key-{}", i);
        vb.set(item(key.as_bytes(), b"new"), 0).unwrap();
    }
    while let Some(it) = iter.next() {
        yielded.push(it);
    }

    assert_eq!(yielded.len(), 10);
    for it in &yielded {
        assert!(it.seqno >= 1 && it.seqno <= end);
        assert_eq!(it.value.as_ref(), b"old");
    }
}

#[test]
fn memory_is_reclaimed_at_teardown() {
    let mem = Arc::new(MemoryTracker::new());
    let vb = VBucket::new(
        VBucketOptions {
            id: 0,
            state: VBucketState::Active,
            ht_initial_size: 16,
            ht_stripes: 4,
            ht_max_load_factor: 3.0,
            failover_table: FailoverTable::new(25),
        },
        Arc::new(NullCheckpointHook),
        mem.clone(),
    );
    for i in 0..100u32 {
        let key = format!("key-{}", i);
        vb.set(item(key.as_bytes(), &[0; 128]), 0).unwrap();
    }
    // churn some keys through the stale path under a pin
    {
        let _iter = VBucket::make_range_iterator(&vb).unwrap();
        for i in 0..10u32 {
            let key = format!("key-{}", i);
            vb.set(item(key.as_bytes(), &[1; 64]), 0).unwrap();
        }
    }
    assert!(mem.used() > 0);
    drop(vb);
    assert_eq!(mem.used(), 0);
}

#[test]
fn hashtable_resize_keeps_coherence() {
    let vb = vb(VBucketState::Active);
    // enough keys to trip the load factor several times
    for i in 0..500u32 {
        let key = format!("key-{}", i);
        vb.set(item(key.as_bytes(), b"v"), 0).unwrap();
    }
    for i in 0..500u32 {
        let key = format!("key-{}", i);
        assert!(vb.get(key.as_bytes()).is_some(), "lost {}", key);
    }
    assert_eq!(vb.num_items(), 500);
}

// ----------------------------------------------------------------------
// universal invariants over generated operation sequences

#[derive(Clone, Debug)]
enum Op {
    Set(u8, u8),
    Del(u8),
    PinThenSet(u8, u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..16, any::<u8>()).prop_map(|(k, v)| Op::Set(k, v)),
        (0u8..16).prop_map(Op::Del),
        (0u8..16, any::<u8>()).prop_map(|(k, v)| Op::PinThenSet(k, v)),
    ]
}

fn check_invariants(vb: &Arc<VBucket>) {
    let nodes = vb.nodes_for_test();

    // sequence monotonicity along the list
    let mut last = 0;
    for n in &nodes {
        assert!(n.seqno > last, "seqnos not increasing: {:?}", n.seqno);
        last = n.seqno;
    }

    // high seqno matches the maximum on the list
    assert_eq!(vb.high_seqno(), last);

    // uniqueness: at most one non-stale record per key, and it is the
    // newest record for that key
    let mut newest: std::collections::HashMap<&[u8], i64> = std::collections::HashMap::new();
    let mut live: std::collections::HashMap<&[u8], i64> = std::collections::HashMap::new();
    for n in &nodes {
        newest
            .entry(n.key.as_slice())
            .and_modify(|s| *s = (*s).max(n.seqno))
            .or_insert(n.seqno);
        if !n.stale {
            let prev = live.insert(n.key.as_slice(), n.seqno);
            assert!(prev.is_none(), "two non-stale records for one key");
        }
    }
    for (key, seqno) in &live {
        assert_eq!(newest[key], *seqno, "non-stale record is not the newest");
    }

    // hash-list coherence: every key in the hash table maps to the
    // non-stale record with the same seqno
    for (key, seqno) in &live {
        let item = vb.get_full(key).expect("key on list but not in table");
        assert_eq!(item.seqno, *seqno);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_ops_hold_invariants(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let vb = vb(VBucketState::Active);
        for op in ops {
            match op {
                Op::Set(k, v) => {
                    let _ = vb.set(item(&[b'k', k], &[v]), 0);
                }
                Op::Del(k) => {
                    let _ = vb.delete(&[b'k', k], 0);
                }
                Op::PinThenSet(k, v) => {
                    let iter = VBucket::make_range_iterator(&vb);
                    let _ = vb.set(item(&[b'k', k], &[v]), 0);
                    drop(iter);
                }
            }
        }
        check_invariants(&vb);
    }

    #[test]
    fn purger_preserves_invariants(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let vb = vb(VBucketState::Active);
        for op in ops {
            match op {
                Op::Set(k, v) | Op::PinThenSet(k, v) => {
                    let _ = vb.set(item(&[b'k', k], &[v]), 0);
                }
                Op::Del(k) => {
                    let _ = vb.delete(&[b'k', k], 0);
                }
            }
        }
        vb.mark_old_tombstones_stale(0, &mut tracker(), 0);
        vb.purge_stale_items(&mut tracker(), 0);
        prop_assert_eq!(vb.stats().num_deleted, 0);
        // a stale record may only survive the sweep as the tail, which
        // anchors the high seqno
        let nodes = vb.nodes_for_test();
        for (i, n) in nodes.iter().enumerate() {
            if n.stale {
                prop_assert_eq!(i, nodes.len() - 1);
            }
        }
        check_invariants(&vb);
    }

    #[test]
    fn needs_rollback_is_deterministic(
        start in 0u64..400,
        cur in 0u64..400,
        uuid in prop_oneof![Just(170u64), Just(187u64), Just(9999u64)],
        snap_start in 0u64..400,
        snap_end in 0u64..400,
        purge in 0i64..300,
    ) {
        let json = r#"[{"id":170,"seq":200},{"id":187,"seq":100}]"#;
        let table = FailoverTable::from_json(json, 25).unwrap();
        let a = table.needs_rollback(start, cur, uuid, snap_start, snap_end, purge);
        let b = table.needs_rollback(start, cur, uuid, snap_start, snap_end, purge);
        prop_assert_eq!(a, b);
        if start == 0 {
            prop_assert_eq!(a, RollbackDecision::NotNeeded);
        }
        if uuid == 9999 && start != 0 {
            prop_assert_eq!(a, RollbackDecision::Rollback { to: 0 });
        }
    }
}
