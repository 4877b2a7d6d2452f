// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Striped-lock hash table mapping document keys to their current record.
//!
//! The lock for a key's bucket is chosen by bucket index modulo the
//! (fixed) stripe count, so resize can exclude every accessor by taking
//! all stripes. Lookup revalidates the bucket count after acquiring the
//! stripe, since a resize may have landed in between.
//!
//! The table owns every record it can reach. Ownership leaves the table
//! through [`BucketGuard::release`] (and the replace-by-copy swap), after
//! which the caller must either free the record or hand it to the
//! sequence list for stale accounting.

use crate::item::Item;
use crate::record::{alloc_record, free_record, MemoryTracker, OwnedRecord, Record};

use ahash::RandomState;
use std::cell::UnsafeCell;
use std::hash::BuildHasher;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

struct TableInner {
    buckets: Vec<*mut Record>,
}

pub(crate) struct HashTable {
    hash_builder: RandomState,
    locks: Box<[Mutex<()>]>,
    inner: UnsafeCell<TableInner>,
    num_buckets: AtomicUsize,
    max_load_factor: f64,
    num_items: AtomicUsize,
    num_deleted: AtomicUsize,
    mem: Arc<MemoryTracker>,
}

// Safety: `inner` is only touched under a stripe lock (single bucket) or
// under all stripe locks (resize, teardown); records are reached through
// the documented lock protocol.
unsafe impl Send for HashTable {}
unsafe impl Sync for HashTable {}

impl HashTable {
    pub(crate) fn new(
        initial_size: usize,
        stripes: usize,
        max_load_factor: f64,
        mem: Arc<MemoryTracker>,
    ) -> Self {
        let initial_size = initial_size.max(1);
        let stripes = stripes.max(1);
        let locks = (0..stripes).map(|_| Mutex::new(())).collect();
        Self {
            hash_builder: RandomState::with_seeds(
                0xbb8c484891ec6c86,
                0x0522a25ae9c769f9,
                0xeed2797b9571bc75,
                0x4feb29c1fbbd59d0,
            ),
            locks,
            inner: UnsafeCell::new(TableInner {
                buckets: vec![ptr::null_mut(); initial_size],
            }),
            num_buckets: AtomicUsize::new(initial_size),
            max_load_factor,
            num_items: AtomicUsize::new(0),
            num_deleted: AtomicUsize::new(0),
            mem,
        }
    }

    fn hash(&self, key: &[u8]) -> u64 {
        self.hash_builder.hash_one(key)
    }

    pub(crate) fn num_buckets(&self) -> usize {
        self.num_buckets.load(Ordering::Acquire)
    }

    /// Count of records reachable from the table.
    pub(crate) fn num_items(&self) -> usize {
        self.num_items.load(Ordering::Relaxed)
    }

    pub(crate) fn num_deleted(&self) -> usize {
        self.num_deleted.load(Ordering::Relaxed)
    }

    /// Lock the bucket that owns `key`.
    pub(crate) fn lock_bucket(&self, key: &[u8]) -> BucketGuard<'_> {
        let hash = self.hash(key);
        loop {
            let n = self.num_buckets();
            let bucket = (hash % n as u64) as usize;
            let guard = self.locks[bucket % self.locks.len()].lock().unwrap();
            // a resize may have landed while we waited on the stripe
            if self.num_buckets() == n {
                return BucketGuard {
                    ht: self,
                    _guard: guard,
                    bucket,
                };
            }
        }
    }

    /// Lock a bucket by index, for whole-table visitation. Returns `None`
    /// once `index` runs past the current bucket count.
    pub(crate) fn lock_bucket_at(&self, index: usize) -> Option<BucketGuard<'_>> {
        loop {
            let n = self.num_buckets();
            if index >= n {
                return None;
            }
            let guard = self.locks[index % self.locks.len()].lock().unwrap();
            if self.num_buckets() == n {
                return Some(BucketGuard {
                    ht: self,
                    _guard: guard,
                    bucket: index,
                });
            }
        }
    }

    /// Grow the table if the load factor crossed the configured maximum.
    /// Stop-the-world: takes every stripe. Must be called without any
    /// bucket lock held.
    pub(crate) fn maybe_resize(&self) {
        let population = self.num_items();
        let buckets = self.num_buckets();
        if (population as f64) / (buckets as f64) <= self.max_load_factor {
            return;
        }

        let _guards: Vec<MutexGuard<'_, ()>> =
            self.locks.iter().map(|l| l.lock().unwrap()).collect();

        // re-check under exclusion; another thread may have resized
        let buckets = self.num_buckets();
        let population = self.num_items();
        if (population as f64) / (buckets as f64) <= self.max_load_factor {
            return;
        }

        let new_size = buckets * 2;
        debug!(
            "resizing hashtable from {} to {} buckets ({} records)",
            buckets, new_size, population
        );

        // Safety: all stripes held
        let inner = unsafe { &mut *self.inner.get() };
        let mut new_buckets: Vec<*mut Record> = vec![ptr::null_mut(); new_size];
        for head in inner.buckets.iter() {
            let mut curr = *head;
            while !curr.is_null() {
                // Safety: records in the chain are owned by the table
                unsafe {
                    let rec = &*curr;
                    let next = rec.ht_next();
                    let idx = (self.hash(rec.key()) % new_size as u64) as usize;
                    rec.set_ht_next(new_buckets[idx]);
                    new_buckets[idx] = curr;
                    curr = next;
                }
            }
        }
        inner.buckets = new_buckets;
        self.num_buckets.store(new_size, Ordering::Release);
    }

    /// Drop every temp record still owned by the table. Non-temp records
    /// are freed through the sequence list, which links every one of
    /// them; this only reaps the hash-table-only allocations.
    ///
    /// # Safety
    /// Caller must have exclusive access to the vbucket (teardown).
    pub(crate) unsafe fn drop_temps(&self) {
        let _guards: Vec<MutexGuard<'_, ()>> =
            self.locks.iter().map(|l| l.lock().unwrap()).collect();
        let inner = &mut *self.inner.get();
        for head in inner.buckets.iter_mut() {
            let mut curr = *head;
            while !curr.is_null() {
                let rec = &*curr;
                let next = rec.ht_next();
                if rec.is_temp() {
                    free_record(NonNull::new_unchecked(curr), &self.mem);
                }
                curr = next;
            }
            *head = ptr::null_mut();
        }
    }
}

/// Holds one bucket's stripe lock; every operation on the chain goes
/// through this guard.
pub(crate) struct BucketGuard<'a> {
    ht: &'a HashTable,
    _guard: MutexGuard<'a, ()>,
    bucket: usize,
}

impl BucketGuard<'_> {
    fn head(&self) -> *mut Record {
        // Safety: stripe lock held
        unsafe { (&(*self.ht.inner.get()).buckets)[self.bucket] }
    }

    fn set_head(&self, head: *mut Record) {
        // Safety: stripe lock held
        unsafe { (&mut (*self.ht.inner.get()).buckets)[self.bucket] = head };
    }

    /// Find the current record for `key`, if any.
    pub(crate) fn find(&self, key: &[u8]) -> Option<NonNull<Record>> {
        let mut curr = self.head();
        while !curr.is_null() {
            // Safety: chain records are owned by the table; stripe held
            unsafe {
                if (*curr).key() == key {
                    return Some(NonNull::new_unchecked(curr));
                }
                curr = (*curr).ht_next();
            }
        }
        None
    }

    /// Every record on this bucket's chain, snapshotted under the lock.
    pub(crate) fn records(&self) -> Vec<NonNull<Record>> {
        let mut out = Vec::new();
        let mut curr = self.head();
        while !curr.is_null() {
            // Safety: stripe held
            unsafe {
                out.push(NonNull::new_unchecked(curr));
                curr = (*curr).ht_next();
            }
        }
        out
    }

    /// Allocate a record for `item` and link it at the chain head. The
    /// record is temp (seqno zero) until placed on the sequence list.
    pub(crate) fn insert(&self, item: &Item, cas: u64) -> NonNull<Record> {
        let rec = alloc_record(item, cas, &self.ht.mem);
        // Safety: stripe held; rec is fresh
        unsafe {
            rec.as_ref().set_ht_next(self.head());
        }
        self.set_head(rec.as_ptr());
        self.ht.num_items.fetch_add(1, Ordering::Relaxed);
        if item.deleted {
            self.ht.num_deleted.fetch_add(1, Ordering::Relaxed);
        }
        rec
    }

    /// Unlink the record for `key` and yield ownership to the caller
    /// without touching its flags. Used when the record is about to be
    /// re-filed (into the sequence list's stale accounting) or freed.
    pub(crate) fn release(&self, key: &[u8]) -> Option<OwnedRecord> {
        let mut prev: *mut Record = ptr::null_mut();
        let mut curr = self.head();
        while !curr.is_null() {
            // Safety: stripe held
            unsafe {
                if (*curr).key() == key {
                    let next = (*curr).ht_next();
                    if prev.is_null() {
                        self.set_head(next);
                    } else {
                        (*prev).set_ht_next(next);
                    }
                    let rec = &*curr;
                    self.ht.num_items.fetch_sub(1, Ordering::Relaxed);
                    if rec.is_deleted() {
                        self.ht.num_deleted.fetch_sub(1, Ordering::Relaxed);
                    }
                    rec.set_ht_next(ptr::null_mut());
                    return Some(OwnedRecord(NonNull::new_unchecked(curr)));
                }
                prev = curr;
                curr = (*curr).ht_next();
            }
        }
        None
    }

    /// Swap the record for `key` with a fresh copy of itself, returning
    /// the copy (now in the table) and the original by ownership.
    pub(crate) fn replace_by_copy(&self, key: &[u8]) -> Option<(NonNull<Record>, OwnedRecord)> {
        let old = self.find(key)?;
        // Safety: stripe held; the copy is built before the original is
        // unlinked so readers never observe an empty slot
        let copy_item = unsafe { old.as_ref().snapshot() };
        let cas = unsafe { old.as_ref().cas() };
        let owned = self.release(key)?;
        let fresh = self.insert(&copy_item, cas);
        unsafe {
            fresh.as_ref().set_rev_seqno(owned.record().rev_seqno());
        }
        Some((fresh, owned))
    }

    /// Mark the record deleted in place; with `only_mark` unset the value
    /// bytes are dropped as well. Returns the record for restamping.
    pub(crate) fn soft_delete(&self, rec: NonNull<Record>, only_mark: bool) -> NonNull<Record> {
        // Safety: stripe held; callers never soft-delete a pinned record
        // in place (the vbucket routes those through the append path)
        unsafe {
            let r = rec.as_ref();
            if !r.is_deleted() {
                self.ht.num_deleted.fetch_add(1, Ordering::Relaxed);
            }
            if !only_mark {
                let payload = r.payload_mut();
                let old_len = payload.value.len();
                payload.value = Box::default();
                self.ht.mem.sub(old_len);
            }
            r.set_deleted(true);
        }
        rec
    }

    /// Apply `item`'s value and metadata to an existing record in place.
    pub(crate) fn update(&self, rec: NonNull<Record>, item: &Item) {
        let was_deleted = unsafe { rec.as_ref().is_deleted() };
        // Safety: stripe held; pinned records take the append path instead
        unsafe { rec.as_ref().apply(item, &self.ht.mem) };
        match (was_deleted, item.deleted) {
            (false, true) => {
                self.ht.num_deleted.fetch_add(1, Ordering::Relaxed);
            }
            (true, false) => {
                self.ht.num_deleted.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HashTable {
        HashTable::new(4, 4, 2.0, Arc::new(MemoryTracker::new()))
    }

    fn item(key: &[u8], value: &[u8]) -> Item {
        Item::new(key, value, 0, 0, crate::item::datatype::RAW)
    }

    #[test]
    fn insert_find_release() {
        let ht = table();
        let mem = ht.mem.clone();
        {
            let guard = ht.lock_bucket(b"k1");
            assert!(guard.find(b"k1").is_none());
            guard.insert(&item(b"k1", b"v1"), 1);
            let found = guard.find(b"k1").unwrap();
            // Safety: bucket lock held
            assert_eq!(unsafe { found.as_ref().snapshot().value.as_ref() }, b"v1");
        }
        assert_eq!(ht.num_items(), 1);
        {
            let guard = ht.lock_bucket(b"k1");
            let owned = guard.release(b"k1").unwrap();
            owned.free(&mem);
            assert!(guard.find(b"k1").is_none());
        }
        assert_eq!(ht.num_items(), 0);
        assert_eq!(mem.used(), 0);
    }

    #[test]
    fn resize_preserves_records() {
        let ht = table();
        for i in 0..64u32 {
            let key = format!("key-{}", i);
            let guard = ht.lock_bucket(key.as_bytes());
            guard.insert(&item(key.as_bytes(), b"value"), 1);
        }
        ht.maybe_resize();
        assert!(ht.num_buckets() > 4);
        for i in 0..64u32 {
            let key = format!("key-{}", i);
            let guard = ht.lock_bucket(key.as_bytes());
            assert!(guard.find(key.as_bytes()).is_some(), "lost {}", key);
        }
        // teardown: records here are never linked to a list
        for i in 0..64u32 {
            let key = format!("key-{}", i);
            let guard = ht.lock_bucket(key.as_bytes());
            let owned = guard.release(key.as_bytes()).unwrap();
            owned.free(&ht.mem.clone());
        }
    }

    #[test]
    fn replace_by_copy_keeps_table_coherent() {
        let ht = table();
        let mem = ht.mem.clone();
        let guard = ht.lock_bucket(b"k");
        guard.insert(&item(b"k", b"v"), 7);
        let (fresh, owned) = guard.replace_by_copy(b"k").unwrap();
        // Safety: bucket lock held
        unsafe {
            assert_eq!(fresh.as_ref().cas(), 7);
            assert_eq!(fresh.as_ref().payload().value.as_ref(), b"v");
            assert!(!std::ptr::eq(fresh.as_ptr(), owned.as_ptr()));
        }
        assert_eq!(guard.find(b"k").unwrap(), fresh);
        owned.free(&mem);
        let owned = guard.release(b"k").unwrap();
        owned.free(&mem);
    }
}
