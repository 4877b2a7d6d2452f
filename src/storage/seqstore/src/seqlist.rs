// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Append-ordered doubly-linked list of records, sorted by sequence
//! number. Writers take the list write lock; a range reader pins the
//! interval it will traverse and then walks the links without any lock.
//!
//! The pin is what keeps that walk sound: no node inside `[begin, end]`
//! may be unlinked or have its sequence number reassigned while the pin
//! is held, so updates to pinned records take the append path and leave
//! the superseded record behind as *stale*. Stale records are owned by
//! the list and reclaimed by the tombstone purger once no pin covers
//! them.

use crate::monotonic::AtomicMonotonic;
use crate::progress::ProgressTracker;
use crate::record::{free_record, MemoryTracker, OwnedRecord, Record};
use crate::vbucket::VBucket;
use crate::{Item, Seqno};

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Outcome of trying to move an updated record to the list tail.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The record was relinked at the tail; update it in place.
    Moved,
    /// A range read covers the record; append a new one instead.
    MustAppend,
}

pub(crate) struct ListInner {
    head: *mut Record,
    tail: *mut Record,
}

// Safety: ListInner is only reached through the list write lock.
unsafe impl Send for ListInner {}

pub(crate) struct SequenceList {
    inner: Mutex<ListInner>,
    range_read_active: AtomicBool,
    range_begin: AtomicI64,
    range_end: AtomicI64,
    high_seqno: AtomicMonotonic,
    highest_deduped: AtomicMonotonic,
    highest_purged_deleted: AtomicMonotonic,
    num_items: AtomicUsize,
    num_deleted: AtomicI64,
    num_stale: AtomicUsize,
    mem: Arc<MemoryTracker>,
}

// Safety: structural state lives behind the write lock; counters and pin
// bounds are atomics.
unsafe impl Send for SequenceList {}
unsafe impl Sync for SequenceList {}

impl SequenceList {
    pub(crate) fn new(mem: Arc<MemoryTracker>) -> Self {
        Self {
            inner: Mutex::new(ListInner {
                head: ptr::null_mut(),
                tail: ptr::null_mut(),
            }),
            range_read_active: AtomicBool::new(false),
            range_begin: AtomicI64::new(0),
            range_end: AtomicI64::new(0),
            high_seqno: AtomicMonotonic::new(0),
            highest_deduped: AtomicMonotonic::new(0),
            highest_purged_deleted: AtomicMonotonic::new(0),
            num_items: AtomicUsize::new(0),
            num_deleted: AtomicI64::new(0),
            num_stale: AtomicUsize::new(0),
            mem,
        }
    }

    /// Acquire the list write lock.
    pub(crate) fn write(&self) -> MutexGuard<'_, ListInner> {
        self.inner.lock().unwrap()
    }

    pub(crate) fn high_seqno(&self) -> Seqno {
        self.high_seqno.load()
    }

    pub(crate) fn highest_deduped_seqno(&self) -> Seqno {
        self.highest_deduped.load()
    }

    pub(crate) fn highest_purged_deleted_seqno(&self) -> Seqno {
        self.highest_purged_deleted.load()
    }

    /// Non-stale records on the list.
    pub(crate) fn num_items(&self) -> usize {
        self.num_items.load(Ordering::Relaxed)
    }

    /// Logically deleted documents on the list (each key counted once).
    pub(crate) fn num_deleted(&self) -> i64 {
        self.num_deleted.load(Ordering::Relaxed)
    }

    pub(crate) fn num_stale(&self) -> usize {
        self.num_stale.load(Ordering::Relaxed)
    }

    pub(crate) fn num_range_reads(&self) -> usize {
        self.range_read_active.load(Ordering::Acquire) as usize
    }

    /// The pinned interval, if a range read is active.
    pub(crate) fn range_read_bounds(&self) -> Option<(Seqno, Seqno)> {
        if self.range_read_active.load(Ordering::Acquire) {
            Some((
                self.range_begin.load(Ordering::Acquire),
                self.range_end.load(Ordering::Acquire),
            ))
        } else {
            None
        }
    }

    fn covered_by_pin(&self, seqno: Seqno) -> bool {
        self.range_read_active.load(Ordering::Acquire)
            && seqno >= self.range_begin.load(Ordering::Acquire)
            && seqno <= self.range_end.load(Ordering::Acquire)
    }

    /// Link `rec` at the tail. The caller has already stamped its seqno
    /// under the vbucket sequence lock.
    pub(crate) fn append(&self, inner: &mut ListInner, rec: NonNull<Record>) {
        let rec_ptr = rec.as_ptr();
        // Safety: write lock held; rec is unlinked
        unsafe {
            let r = rec.as_ref();
            debug_assert!(r.next().is_null() && r.prev().is_null());
            r.set_prev(inner.tail);
            r.set_next(ptr::null_mut());
            if inner.tail.is_null() {
                inner.head = rec_ptr;
            } else {
                (*inner.tail).set_next(rec_ptr);
            }
            inner.tail = rec_ptr;
        }
        self.num_items.fetch_add(1, Ordering::Relaxed);
    }

    /// Try to move `rec` to the tail so its seqno can be reassigned in
    /// place. Refused when a range read covers the record.
    pub(crate) fn update_in_place(
        &self,
        inner: &mut ListInner,
        rec: NonNull<Record>,
    ) -> UpdateStatus {
        // Safety: write lock held
        let seqno = unsafe { rec.as_ref().seqno() };
        if self.covered_by_pin(seqno) {
            return UpdateStatus::MustAppend;
        }
        unsafe {
            self.unlink(inner, rec);
            let r = rec.as_ref();
            r.set_prev(inner.tail);
            r.set_next(ptr::null_mut());
            if inner.tail.is_null() {
                inner.head = rec.as_ptr();
            } else {
                (*inner.tail).set_next(rec.as_ptr());
            }
            inner.tail = rec.as_ptr();
        }
        UpdateStatus::Moved
    }

    /// Take ownership of a record the hash table has released and mark it
    /// stale. With a replacement, this must happen after the replacement
    /// is linked, so a range reader never loses sight of the key. Without
    /// one (tombstone reclamation) the record's deletedness leaves the
    /// live population here.
    pub(crate) fn mark_stale(
        &self,
        _inner: &mut ListInner,
        owned: OwnedRecord,
        replacement: Option<NonNull<Record>>,
    ) {
        let rec = owned.record();
        debug_assert!(!rec.is_stale());
        if let Some(replacement) = replacement {
            // Safety: write lock held; replacement was just linked
            debug_assert_eq!(unsafe { replacement.as_ref().key() }, rec.key());
        } else if rec.is_deleted() {
            self.num_deleted.fetch_sub(1, Ordering::Relaxed);
        }
        rec.set_stale();
        self.num_items.fetch_sub(1, Ordering::Relaxed);
        self.num_stale.fetch_add(1, Ordering::Relaxed);
        // ownership transfers to the list; the record stays linked and is
        // freed by the purger or at teardown
        std::mem::forget(owned);
    }

    pub(crate) fn update_high_seqno(&self, seqno: Seqno) {
        self.high_seqno.store_max(seqno);
    }

    pub(crate) fn update_highest_deduped_seqno(&self, seqno: Seqno) {
        self.highest_deduped.store_max(seqno);
    }

    /// Track the logical deleted-document count across a mutation of one
    /// key from `old_deleted` to `new_deleted`.
    pub(crate) fn update_num_deleted(&self, old_deleted: bool, new_deleted: bool) {
        match (old_deleted, new_deleted) {
            (false, true) => {
                self.num_deleted.fetch_add(1, Ordering::Relaxed);
            }
            (true, false) => {
                self.num_deleted.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Reserve the range-read pin and snapshot the traversal bounds.
    /// Returns `None` if a range read is already active: at most one
    /// iterator exists per list.
    pub(crate) fn reserve_range(&self) -> Option<(*mut Record, Seqno)> {
        let inner = self.write();
        if self
            .range_read_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let head = inner.head;
        let end = self.high_seqno();
        let begin = if head.is_null() {
            0
        } else {
            // Safety: write lock held
            unsafe { (*head).seqno() }
        };
        self.range_begin.store(begin, Ordering::Release);
        self.range_end.store(end, Ordering::Release);
        Some((head, end))
    }

    pub(crate) fn release_range(&self) {
        self.range_begin.store(0, Ordering::Release);
        self.range_end.store(0, Ordering::Release);
        self.range_read_active.store(false, Ordering::Release);
    }

    /// Unlink `rec` from the list without freeing it.
    ///
    /// # Safety
    /// Write lock must be held and `rec` must be linked on this list.
    unsafe fn unlink(&self, inner: &mut ListInner, rec: NonNull<Record>) {
        let r = rec.as_ref();
        let prev = r.prev();
        let next = r.next();
        if prev.is_null() {
            inner.head = next;
        } else {
            (*prev).set_next(next);
        }
        if next.is_null() {
            inner.tail = prev;
        } else {
            (*next).set_prev(prev);
        }
        r.set_next(ptr::null_mut());
        r.set_prev(ptr::null_mut());
    }

    /// Sweep the list for reclaimable nodes, from the node after
    /// `start_after` (zero restarts from the head).
    ///
    /// Stale nodes outside the pin are freed inline: the list owns them
    /// exclusively. Aged tombstones (deleted, below `purge_seqno`) are
    /// still reachable from the hash table, so they are only reported;
    /// the vbucket removes them afterwards under the proper lock order.
    /// The tail is never reclaimed: it anchors the high seqno.
    pub(crate) fn purge_tombstones(
        &self,
        purge_seqno: Seqno,
        tracker: &mut ProgressTracker,
        start_after: Seqno,
    ) -> ListPurge {
        let mut inner = self.write();

        // An active range read excludes the sweep entirely: an iterator
        // walks links without the write lock, so nothing may be unlinked
        // while it lives. Report "not done" and let the task retry.
        if self.range_read_active.load(Ordering::Acquire) {
            return ListPurge {
                purged: 0,
                tombstone_candidates: Vec::new(),
                resume: Some(start_after),
            };
        }

        let mut purged = 0;
        let mut visited = 0u64;
        let mut candidates = Vec::new();

        let mut curr = inner.head;
        loop {
            if curr.is_null() {
                return ListPurge {
                    purged,
                    tombstone_candidates: candidates,
                    resume: None,
                };
            }
            // Safety: write lock held
            let rec = unsafe { &*curr };
            let seqno = rec.seqno();
            let next = rec.next();
            visited += 1;

            if seqno > start_after && curr != inner.tail && !self.covered_by_pin(seqno) {
                if rec.is_stale() {
                    unsafe {
                        self.unlink(&mut inner, NonNull::new_unchecked(curr));
                        if rec.is_deleted() {
                            self.highest_purged_deleted.store_max(seqno);
                        }
                        free_record(NonNull::new_unchecked(curr), &self.mem);
                    }
                    self.num_stale.fetch_sub(1, Ordering::Relaxed);
                    purged += 1;
                } else if rec.is_deleted() && seqno < purge_seqno {
                    candidates.push((rec.key().into(), seqno));
                }
            }

            if !tracker.should_continue_visiting(visited) {
                return ListPurge {
                    purged,
                    tombstone_candidates: candidates,
                    resume: Some(seqno),
                };
            }
            curr = next;
        }
    }

    /// Remove an aged tombstone that the vbucket has just released from
    /// the hash table.
    pub(crate) fn remove_tombstone(&self, inner: &mut ListInner, owned: OwnedRecord) {
        let seqno = owned.record().seqno();
        debug_assert!(owned.record().is_deleted());
        // Safety: write lock held; record was linked and is now unreachable
        // from the hash table
        unsafe {
            self.unlink(inner, owned.0);
        }
        self.num_items.fetch_sub(1, Ordering::Relaxed);
        self.num_deleted.fetch_sub(1, Ordering::Relaxed);
        self.highest_purged_deleted.store_max(seqno);
        owned.free(&self.mem);
    }

    /// Free every node. Called at vbucket teardown, after the hash table
    /// has been emptied of temps and its chain heads cleared.
    ///
    /// # Safety
    /// Caller must have exclusive access to the vbucket.
    pub(crate) unsafe fn teardown(&self) {
        let mut inner = self.write();
        let mut curr = inner.head;
        while !curr.is_null() {
            let next = (*curr).next();
            free_record(NonNull::new_unchecked(curr), &self.mem);
            curr = next;
        }
        inner.head = ptr::null_mut();
        inner.tail = ptr::null_mut();
        self.num_items.store(0, Ordering::Relaxed);
        self.num_deleted.store(0, Ordering::Relaxed);
        self.num_stale.store(0, Ordering::Relaxed);
    }

    /// Sequence numbers currently on the list, in link order. Test-only:
    /// takes the write lock for the duration.
    #[cfg(test)]
    pub(crate) fn seqnos_for_test(&self) -> Vec<(Seqno, bool)> {
        self.nodes_for_test()
            .into_iter()
            .map(|n| (n.seqno, n.stale))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn nodes_for_test(&self) -> Vec<TestNode> {
        let inner = self.write();
        let mut out = Vec::new();
        let mut curr = inner.head;
        while !curr.is_null() {
            // Safety: write lock held
            unsafe {
                out.push(TestNode {
                    seqno: (*curr).seqno(),
                    stale: (*curr).is_stale(),
                    deleted: (*curr).is_deleted(),
                    key: (*curr).key().to_vec(),
                });
                curr = (*curr).next();
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) struct TestNode {
    pub seqno: Seqno,
    pub stale: bool,
    pub deleted: bool,
    pub key: Vec<u8>,
}

pub(crate) struct ListPurge {
    pub purged: usize,
    pub tombstone_candidates: Vec<(Box<[u8]>, Seqno)>,
    pub resume: Option<Seqno>,
}

/// A snapshot reader over one vbucket's sequence list. Holding the
/// iterator pins `[begin, end]`: every record it yields stays linked and
/// immutable until the iterator is dropped, which releases the pin.
pub struct RangeIterator {
    vb: Arc<VBucket>,
    curr: *mut Record,
    end: Seqno,
}

// Safety: the iterator owns the pin; the records it dereferences cannot
// be unlinked, freed or rewritten while the pin is held.
unsafe impl Send for RangeIterator {}

impl RangeIterator {
    pub(crate) fn new(vb: Arc<VBucket>, curr: *mut Record, end: Seqno) -> Self {
        Self { vb, curr, end }
    }

    /// The upper bound of the snapshot (the vbucket high seqno at
    /// iterator creation).
    pub fn end_seqno(&self) -> Seqno {
        self.end
    }
}

impl Iterator for RangeIterator {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        if self.curr.is_null() {
            return None;
        }
        // Safety: curr is linked (no node is reclaimed while the pin is
        // held). Its seqno is an atomic, safe to read even if the node
        // sits past the pin; its payload is only frozen inside the pin,
        // so the bound check must come before the snapshot.
        unsafe {
            let rec = &*self.curr;
            if rec.seqno() > self.end {
                self.curr = ptr::null_mut();
                return None;
            }
            let item = rec.snapshot();
            self.curr = rec.next();
            Some(item)
        }
    }
}

impl Drop for RangeIterator {
    fn drop(&mut self) {
        self.vb.seq_list().release_range();
    }
}
