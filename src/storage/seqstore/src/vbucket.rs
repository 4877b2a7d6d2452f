// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A vbucket: one hash table and one sequence list, plus the mutation
//! protocol that keeps them coherent.
//!
//! Two locks order every mutation: the vbucket *sequence lock*, which
//! serializes seqno assignment, and the sequence list's *write lock*.
//! They are always taken in that order, after the key's hash bucket
//! lock. The ordered structure is updated first, then the hash table, so
//! a range reader can never lose sight of a key: the replacement record
//! is linked and published before the superseded one goes stale.

use crate::error::MutationError;
use crate::failover::FailoverTable;
use crate::hashtable::{BucketGuard, HashTable};
use crate::hlc::HybridClock;
use crate::item::Item;
use crate::monotonic::AtomicMonotonic;
use crate::progress::ProgressTracker;
use crate::record::{MemoryTracker, Record};
use crate::seqlist::{RangeIterator, SequenceList, UpdateStatus};
use crate::{CheckpointHook, Seqno};

use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VBucketState {
    Active,
    Replica,
    Pending,
    Dead,
}

impl std::fmt::Display for VBucketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VBucketState::Active => "active",
            VBucketState::Replica => "replica",
            VBucketState::Pending => "pending",
            VBucketState::Dead => "dead",
        };
        write!(f, "{}", name)
    }
}

/// What the engine must do after a mutation returns, once no storage
/// locks are held.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NotifyCtx {
    pub vb: u16,
    pub seqno: Seqno,
    pub notify_replication: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MutationOutcome {
    pub cas: u64,
    pub seqno: Seqno,
    pub notify: NotifyCtx,
}

/// What a store predicate decided about the existing document.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PredicateResult {
    /// Proceed with the store.
    Continue,
    /// Reject the store; the caller owns recovery.
    Fail,
    /// The predicate needs the document's info materialized. In an
    /// ephemeral vbucket everything is resident, so this proceeds like
    /// `Continue`.
    GetItemInfo,
}

/// Outcome of an ephemeral page-out attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageOutResult {
    /// The item was converted to a tombstone; memory was reclaimed.
    Ejected(NotifyCtx),
    /// Not an active vbucket, the key is absent, or the item is already
    /// a valueless tombstone.
    NotEligible,
}

/// A point-in-time view of the vbucket's counters.
#[derive(Clone, Debug, Default)]
pub struct VBucketStats {
    pub high_seqno: Seqno,
    pub purge_seqno: Seqno,
    pub num_items: usize,
    pub num_deleted: i64,
    pub seqlist_count: usize,
    pub seqlist_stale_count: usize,
    pub seqlist_high_seqno: Seqno,
    pub seqlist_highest_deduped_seqno: Seqno,
    pub seqlist_range_read_begin: Seqno,
    pub seqlist_range_read_end: Seqno,
    pub num_range_reads: usize,
    pub auto_delete_count: u64,
    pub ht_tombstone_purged_count: u64,
    pub seqlist_purged_count: u64,
    pub ops_create: u64,
    pub ops_update: u64,
    pub ops_delete: u64,
}

pub struct VBucketOptions {
    pub id: u16,
    pub state: VBucketState,
    pub ht_initial_size: usize,
    pub ht_stripes: usize,
    pub ht_max_load_factor: f64,
    pub failover_table: FailoverTable,
}

pub struct VBucket {
    id: u16,
    state: RwLock<VBucketState>,
    ht: HashTable,
    seq_list: SequenceList,
    sequence_lock: Mutex<()>,
    next_seqno: AtomicI64,
    purge_seqno: AtomicMonotonic,
    hlc: HybridClock,
    failover: FailoverTable,
    checkpoint: Arc<dyn CheckpointHook>,
    ops_create: AtomicU64,
    ops_update: AtomicU64,
    ops_delete: AtomicU64,
    auto_delete_count: AtomicU64,
    ht_tombstone_purged_count: AtomicU64,
    seqlist_purged_count: AtomicU64,
}

impl VBucket {
    pub fn new(
        opts: VBucketOptions,
        checkpoint: Arc<dyn CheckpointHook>,
        mem: Arc<MemoryTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: opts.id,
            state: RwLock::new(opts.state),
            ht: HashTable::new(
                opts.ht_initial_size,
                opts.ht_stripes,
                opts.ht_max_load_factor,
                mem.clone(),
            ),
            seq_list: SequenceList::new(mem),
            sequence_lock: Mutex::new(()),
            next_seqno: AtomicI64::new(0),
            purge_seqno: AtomicMonotonic::new(0),
            hlc: HybridClock::default(),
            failover: opts.failover_table,
            checkpoint,
            ops_create: AtomicU64::new(0),
            ops_update: AtomicU64::new(0),
            ops_delete: AtomicU64::new(0),
            auto_delete_count: AtomicU64::new(0),
            ht_tombstone_purged_count: AtomicU64::new(0),
            seqlist_purged_count: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn state(&self) -> VBucketState {
        *self.state.read().unwrap()
    }

    pub fn set_state(&self, state: VBucketState) {
        let mut current = self.state.write().unwrap();
        info!("vb:{} state {} -> {}", self.id, *current, state);
        *current = state;
    }

    pub fn high_seqno(&self) -> Seqno {
        self.seq_list.high_seqno()
    }

    pub fn purge_seqno(&self) -> Seqno {
        self.purge_seqno.load()
    }

    pub fn failover(&self) -> &FailoverTable {
        &self.failover
    }

    pub fn hlc(&self) -> &HybridClock {
        &self.hlc
    }

    pub(crate) fn seq_list(&self) -> &SequenceList {
        &self.seq_list
    }

    /// Resident documents: in the hash table and not tombstones.
    pub fn num_items(&self) -> usize {
        self.ht.num_items() - self.ht.num_deleted()
    }

    pub fn stats(&self) -> VBucketStats {
        let (rr_begin, rr_end) = self.seq_list.range_read_bounds().unwrap_or((0, 0));
        VBucketStats {
            high_seqno: self.high_seqno(),
            purge_seqno: self.purge_seqno(),
            num_items: self.num_items(),
            num_deleted: self.seq_list.num_deleted(),
            seqlist_count: self.seq_list.num_items(),
            seqlist_stale_count: self.seq_list.num_stale(),
            seqlist_high_seqno: self.seq_list.high_seqno(),
            seqlist_highest_deduped_seqno: self.seq_list.highest_deduped_seqno(),
            seqlist_range_read_begin: rr_begin,
            seqlist_range_read_end: rr_end,
            num_range_reads: self.seq_list.num_range_reads(),
            auto_delete_count: self.auto_delete_count.load(Ordering::Relaxed),
            ht_tombstone_purged_count: self.ht_tombstone_purged_count.load(Ordering::Relaxed),
            seqlist_purged_count: self.seqlist_purged_count.load(Ordering::Relaxed),
            ops_create: self.ops_create.load(Ordering::Relaxed),
            ops_update: self.ops_update.load(Ordering::Relaxed),
            ops_delete: self.ops_delete.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // reads

    /// Fetch the visible document for `key`. Tombstones read as absent.
    pub fn get(&self, key: &[u8]) -> Option<Item> {
        let hbl = self.ht.lock_bucket(key);
        let rec = hbl.find(key)?;
        // Safety: bucket lock held
        unsafe {
            let r = rec.as_ref();
            if r.is_deleted() || r.is_temp() {
                return None;
            }
            Some(r.snapshot())
        }
    }

    /// Fetch whatever record exists for `key`, tombstones included.
    pub fn get_full(&self, key: &[u8]) -> Option<Item> {
        let hbl = self.ht.lock_bucket(key);
        let rec = hbl.find(key)?;
        // Safety: bucket lock held
        unsafe {
            let r = rec.as_ref();
            if r.is_temp() {
                return None;
            }
            Some(r.snapshot())
        }
    }

    // ------------------------------------------------------------------
    // writes

    /// Unconditional (or CAS-guarded) upsert.
    pub fn set(&self, item: Item, input_cas: u64) -> Result<MutationOutcome, MutationError> {
        self.set_with_predicate(item, input_cas, &|_| PredicateResult::Continue)
    }

    /// Upsert guarded by a predicate over the existing document. The
    /// predicate runs under the hash bucket lock, so the store is atomic
    /// with respect to the state it inspected.
    pub fn set_with_predicate(
        &self,
        item: Item,
        input_cas: u64,
        predicate: &dyn Fn(Option<&Item>) -> PredicateResult,
    ) -> Result<MutationOutcome, MutationError> {
        let outcome = {
            let hbl = self.ht.lock_bucket(&item.key);
            let existing = hbl.find(&item.key);

            // Safety: bucket lock held
            let snapshot = existing.and_then(|rec| unsafe {
                if rec.as_ref().is_temp() {
                    None
                } else {
                    Some(rec.as_ref().snapshot())
                }
            });
            match predicate(snapshot.as_ref()) {
                // everything is resident in an ephemeral vbucket, so a
                // request for item info is already satisfied
                PredicateResult::Continue | PredicateResult::GetItemInfo => {}
                PredicateResult::Fail => return Err(MutationError::PredicateFailed),
            }

            match existing {
                Some(rec) => {
                    self.check_cas(rec, input_cas)?;
                    self.update_stored_value(&hbl, rec, item)
                }
                None => {
                    if input_cas != 0 {
                        return Err(MutationError::NotFound);
                    }
                    self.add_new_stored_value(&hbl, item)
                }
            }
        };
        self.ht.maybe_resize();
        Ok(outcome)
    }

    /// Create-only store: fails on a visible existing document.
    pub fn add(&self, item: Item) -> Result<MutationOutcome, MutationError> {
        let outcome = {
            let hbl = self.ht.lock_bucket(&item.key);
            match hbl.find(&item.key) {
                // add may revive a tombstone
                Some(rec) if !unsafe { rec.as_ref().is_deleted() } => {
                    return Err(MutationError::KeyAlreadyExists);
                }
                Some(rec) => self.update_stored_value(&hbl, rec, item),
                None => self.add_new_stored_value(&hbl, item),
            }
        };
        self.ht.maybe_resize();
        Ok(outcome)
    }

    /// Update-only store: fails on an absent or deleted document.
    pub fn replace(&self, item: Item, input_cas: u64) -> Result<MutationOutcome, MutationError> {
        let outcome = {
            let hbl = self.ht.lock_bucket(&item.key);
            match hbl.find(&item.key) {
                Some(rec) if !unsafe { rec.as_ref().is_deleted() } => {
                    self.check_cas(rec, input_cas)?;
                    self.update_stored_value(&hbl, rec, item)
                }
                _ => return Err(MutationError::NotStored),
            }
        };
        self.ht.maybe_resize();
        Ok(outcome)
    }

    /// Soft delete: the document becomes a tombstone with its value
    /// dropped, retained until the purger reclaims it.
    pub fn delete(&self, key: &[u8], input_cas: u64) -> Result<MutationOutcome, MutationError> {
        let hbl = self.ht.lock_bucket(key);
        let rec = match hbl.find(key) {
            Some(rec) if !unsafe { rec.as_ref().is_deleted() } => rec,
            _ => return Err(MutationError::NotFound),
        };
        self.check_cas(rec, input_cas)?;
        Ok(self.soft_delete_stored_value(&hbl, rec, false))
    }

    /// Ephemeral auto-eviction under memory pressure: converts a resident
    /// item to a valueless tombstone. Only legal on active vbuckets, so
    /// replicas stay in sync via the replicated delete.
    pub fn page_out(&self, key: &[u8]) -> PageOutResult {
        if self.state() != VBucketState::Active {
            return PageOutResult::NotEligible;
        }
        let hbl = self.ht.lock_bucket(key);
        let rec = match hbl.find(key) {
            Some(rec) => rec,
            None => return PageOutResult::NotEligible,
        };
        // Safety: bucket lock held
        unsafe {
            let r = rec.as_ref();
            if r.is_temp() || (r.is_deleted() && r.payload().value.is_empty()) {
                // nothing left to reclaim until the tombstone is purged
                return PageOutResult::NotEligible;
            }
        }
        let outcome = self.soft_delete_stored_value(&hbl, rec, false);
        self.auto_delete_count.fetch_add(1, Ordering::Relaxed);
        PageOutResult::Ejected(outcome.notify)
    }

    /// CAS acceptance per the mutation contract: zero means
    /// unconditional, a locked document rejects cas-less mutations, and
    /// a caller-supplied cas overrides the lock.
    fn check_cas(&self, rec: NonNull<Record>, input_cas: u64) -> Result<(), MutationError> {
        // Safety: callers hold the bucket lock
        let rec = unsafe { rec.as_ref() };
        if input_cas == 0 {
            if rec.is_locked() {
                return Err(MutationError::Locked);
            }
            return Ok(());
        }
        if rec.is_locked() || rec.cas() == input_cas {
            Ok(())
        } else {
            Err(MutationError::CasMismatch)
        }
    }

    fn assign_seqno(&self) -> Seqno {
        // caller holds the sequence lock; the atomic keeps reads cheap
        self.next_seqno.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Mutate a key that already has a record: move it in place
    /// when no range read covers it, otherwise append a replacement and
    /// leave the old record stale.
    fn update_stored_value(
        &self,
        hbl: &BucketGuard<'_>,
        rec: NonNull<Record>,
        item: Item,
    ) -> MutationOutcome {
        let _seq = self.sequence_lock.lock().unwrap();

        // Safety: bucket lock held
        let (was_temp, old_deleted, old_rev) = unsafe {
            let r = rec.as_ref();
            (r.is_temp(), r.is_deleted(), r.rev_seqno())
        };
        let new_cas = self.hlc.next();
        let new_deleted = item.deleted;

        let seqno;
        let snapshot;
        {
            // Hold the write lock across the whole transition: while the
            // list is mid-update the high and deduped seqnos are briefly
            // inconsistent, and a new range read must not bound itself
            // against them.
            let mut list = self.seq_list.write();

            let status = if was_temp {
                // a temp record has no list position yet; first placement
                self.seq_list.append(&mut list, rec);
                UpdateStatus::Moved
            } else {
                self.seq_list.update_in_place(&mut list, rec)
            };

            let mut superseded = None;
            let new_rec = match status {
                UpdateStatus::Moved => {
                    hbl.update(rec, &item);
                    rec
                }
                UpdateStatus::MustAppend => {
                    // release before marking stale: once stale, the list
                    // owns the record and may reclaim it
                    let owned = hbl
                        .release(&item.key)
                        .expect("record vanished under bucket lock");
                    let fresh = hbl.insert(&item, 0);
                    self.seq_list.append(&mut list, fresh);
                    superseded = Some(owned);
                    fresh
                }
            };

            seqno = self.stamp(new_rec, new_cas, old_rev + 1);
            self.seq_list.update_high_seqno(seqno);
            if !was_temp {
                self.seq_list.update_highest_deduped_seqno(seqno);
            }
            if let Some(owned) = superseded {
                // the replacement is reachable by range readers now that
                // its seqno is published; only at this point may the
                // superseded record disappear
                self.seq_list.mark_stale(&mut list, owned, Some(new_rec));
            }
            // Safety: bucket lock held
            snapshot = unsafe { new_rec.as_ref().snapshot() };
        }

        self.finish_update(old_deleted, new_deleted, was_temp, &snapshot);
        MutationOutcome {
            cas: new_cas,
            seqno,
            notify: self.notify_ctx(seqno),
        }
    }

    /// First store of a key.
    fn add_new_stored_value(&self, hbl: &BucketGuard<'_>, item: Item) -> MutationOutcome {
        let rec = hbl.insert(&item, 0);
        let _seq = self.sequence_lock.lock().unwrap();
        let new_cas = self.hlc.next();

        let seqno;
        let snapshot;
        {
            let mut list = self.seq_list.write();
            self.seq_list.append(&mut list, rec);
            seqno = self.stamp(rec, new_cas, 1);
            self.seq_list.update_high_seqno(seqno);
            // Safety: bucket lock held
            snapshot = unsafe { rec.as_ref().snapshot() };
        }

        self.ops_create.fetch_add(1, Ordering::Relaxed);
        self.seq_list.update_num_deleted(false, item.deleted);
        self.checkpoint.queue_dirty(self.id, &snapshot);
        MutationOutcome {
            cas: new_cas,
            seqno,
            notify: self.notify_ctx(seqno),
        }
    }

    /// Soft delete. Mirrors the update flow, but on the append
    /// path the replacement is a copy of the record rather than a caller
    /// supplied item, and the result is always a tombstone.
    fn soft_delete_stored_value(
        &self,
        hbl: &BucketGuard<'_>,
        rec: NonNull<Record>,
        only_mark: bool,
    ) -> MutationOutcome {
        let _seq = self.sequence_lock.lock().unwrap();

        // Safety: bucket lock held
        let (was_temp, old_deleted, old_rev) = unsafe {
            let r = rec.as_ref();
            (r.is_temp(), r.is_deleted(), r.rev_seqno())
        };
        let new_cas = self.hlc.next();

        let seqno;
        let snapshot;
        {
            let mut list = self.seq_list.write();

            let status = if was_temp {
                self.seq_list.append(&mut list, rec);
                UpdateStatus::Moved
            } else {
                self.seq_list.update_in_place(&mut list, rec)
            };

            let (target, owned) = match status {
                UpdateStatus::Moved => (rec, None),
                UpdateStatus::MustAppend => {
                    let (fresh, owned) = hbl
                        .replace_by_copy(unsafe { rec.as_ref().key() })
                        .expect("record vanished under bucket lock");
                    self.seq_list.append(&mut list, fresh);
                    (fresh, Some(owned))
                }
            };

            hbl.soft_delete(target, only_mark);
            seqno = self.stamp(target, new_cas, old_rev + 1);
            self.seq_list.update_high_seqno(seqno);
            if !was_temp {
                self.seq_list.update_highest_deduped_seqno(seqno);
            }
            if let Some(owned) = owned {
                self.seq_list.mark_stale(&mut list, owned, Some(target));
            }
            // Safety: bucket lock held
            snapshot = unsafe { target.as_ref().snapshot() };
        }

        self.ops_delete.fetch_add(1, Ordering::Relaxed);
        self.seq_list.update_num_deleted(old_deleted, true);
        self.checkpoint.queue_dirty(self.id, &snapshot);
        MutationOutcome {
            cas: new_cas,
            seqno,
            notify: self.notify_ctx(seqno),
        }
    }

    fn stamp(&self, rec: NonNull<Record>, cas: u64, rev: u64) -> Seqno {
        let seqno = self.assign_seqno();
        // Safety: callers hold the bucket lock and the list write lock
        unsafe {
            let r = rec.as_ref();
            r.set_seqno(seqno);
            r.set_cas(cas);
            r.set_rev_seqno(rev);
        }
        seqno
    }

    fn finish_update(&self, old_deleted: bool, new_deleted: bool, was_temp: bool, item: &Item) {
        if was_temp || old_deleted {
            self.ops_create.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ops_update.fetch_add(1, Ordering::Relaxed);
        }
        self.seq_list.update_num_deleted(old_deleted, new_deleted);
        self.checkpoint.queue_dirty(self.id, item);
    }

    fn notify_ctx(&self, seqno: Seqno) -> NotifyCtx {
        NotifyCtx {
            vb: self.id,
            seqno,
            notify_replication: true,
        }
    }

    /// Keys of resident documents (non-deleted, placed on the list), up
    /// to `max`. The item pager uses these as page-out candidates.
    pub fn eviction_candidates(&self, max: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut bucket = 0;
        while out.len() < max {
            let guard = match self.ht.lock_bucket_at(bucket) {
                Some(guard) => guard,
                None => break,
            };
            for rec in guard.records() {
                // Safety: bucket lock held
                unsafe {
                    let r = rec.as_ref();
                    if !r.is_deleted() && !r.is_temp() {
                        out.push(r.key().to_vec());
                        if out.len() == max {
                            break;
                        }
                    }
                }
            }
            bucket += 1;
        }
        out
    }

    // ------------------------------------------------------------------
    // range reads

    /// Open a snapshot reader over the sequence list. At most one exists
    /// per vbucket; `None` while another is live. The iterator shares
    /// ownership of the vbucket, which therefore outlives the pin.
    pub fn make_range_iterator(vb: &Arc<VBucket>) -> Option<RangeIterator> {
        let (head, end) = vb.seq_list.reserve_range()?;
        Some(RangeIterator::new(vb.clone(), head, end))
    }

    // ------------------------------------------------------------------
    // tombstone purging

    /// Phase one: mark aged tombstones stale, transferring ownership
    /// from the hash table to the sequence list. Visits buckets from
    /// `resume_bucket`; yields when the tracker's deadline passes.
    pub fn mark_old_tombstones_stale(
        &self,
        purge_age_secs: u32,
        tracker: &mut ProgressTracker,
        resume_bucket: usize,
    ) -> HtSweepOutcome {
        let now = crate::record::now_secs();
        let mut marked = 0;
        let mut visited = 0u64;
        let mut bucket = resume_bucket;

        while let Some(guard) = self.ht.lock_bucket_at(bucket) {
            for rec in guard.records() {
                visited += 1;
                // Safety: bucket lock held
                let (key, eligible) = unsafe {
                    let r = rec.as_ref();
                    let aged = r.is_deleted()
                        && !r.is_temp()
                        && now.saturating_sub(r.deleted_at()) >= purge_age_secs;
                    (r.key().to_vec(), aged)
                };
                if !eligible {
                    continue;
                }
                let owned = match guard.release(&key) {
                    Some(owned) => owned,
                    None => continue,
                };
                {
                    let mut list = self.seq_list.write();
                    // no replacement: the tombstone simply leaves the
                    // hash table and waits for the list sweep
                    self.seq_list.mark_stale(&mut list, owned, None);
                }
                self.ht_tombstone_purged_count
                    .fetch_add(1, Ordering::Relaxed);
                marked += 1;
            }
            drop(guard);
            bucket += 1;
            if !tracker.should_continue_visiting(visited) {
                return HtSweepOutcome {
                    marked,
                    resume: Some(bucket),
                };
            }
        }

        HtSweepOutcome {
            marked,
            resume: None,
        }
    }

    /// Phase two: sweep the sequence list, freeing stale records and
    /// aged tombstones outside any pinned range, then advance the purge
    /// seqno.
    pub fn purge_stale_items(
        &self,
        tracker: &mut ProgressTracker,
        start_after: Seqno,
    ) -> ListSweepOutcome {
        let sweep =
            self.seq_list
                .purge_tombstones(self.purge_seqno.load(), tracker, start_after);
        let mut purged = sweep.purged;

        // Aged tombstones were only reported by the sweep: they are
        // still reachable by key, so removal takes the bucket lock first
        // and re-verifies under the proper lock order.
        for (key, seqno) in sweep.tombstone_candidates {
            let hbl = self.ht.lock_bucket(&key);
            let rec = match hbl.find(&key) {
                Some(rec) => rec,
                None => continue,
            };
            // Safety: bucket lock held
            let unchanged = unsafe {
                let r = rec.as_ref();
                r.seqno() == seqno && r.is_deleted()
            };
            if !unchanged {
                continue;
            }
            let mut list = self.seq_list.write();
            if self.seq_list.num_range_reads() != 0 {
                break;
            }
            // the record may have become the tail since the scan; the
            // tail stays as the high seqno anchor
            if unsafe { rec.as_ref().next().is_null() } {
                continue;
            }
            if let Some(owned) = hbl.release(&key) {
                self.seq_list.remove_tombstone(&mut list, owned);
                purged += 1;
            }
        }

        self.purge_seqno
            .store_max(self.seq_list.highest_purged_deleted_seqno());
        self.seqlist_purged_count
            .fetch_add(purged as u64, Ordering::Relaxed);

        ListSweepOutcome {
            purged,
            resume: sweep.resume,
        }
    }

    #[cfg(test)]
    pub(crate) fn seqnos_for_test(&self) -> Vec<(Seqno, bool)> {
        self.seq_list.seqnos_for_test()
    }

    #[cfg(test)]
    pub(crate) fn nodes_for_test(&self) -> Vec<crate::seqlist::TestNode> {
        self.seq_list.nodes_for_test()
    }
}

impl Drop for VBucket {
    fn drop(&mut self) {
        // Safety: exclusive access (last owner). Temps first, clearing
        // the chain heads; then the list walk frees everything else.
        unsafe {
            self.ht.drop_temps();
            self.seq_list.teardown();
        }
    }
}

pub struct HtSweepOutcome {
    pub marked: usize,
    /// Bucket index to resume from; `None` when the pass completed.
    pub resume: Option<usize>,
}

pub struct ListSweepOutcome {
    pub purged: usize,
    /// Seqno to resume after; `None` when the pass completed.
    pub resume: Option<Seqno>,
}
