// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The record shared between the hash table and the sequence list.
//!
//! Records are heap allocations reached through raw pointers from both
//! structures. Field access follows a strict lock protocol:
//!
//! * `ht_next` and `payload` are written only under the owning hash
//!   bucket lock; `payload` of a record covered by a range-read pin is
//!   never written (such updates take the append path instead)
//! * `next`/`prev` are written only under the list write lock, and read
//!   without it by range iterators (hence atomics)
//! * `seqno`, `cas`, `deleted` and `stale` are atomics readable anywhere
//!
//! Ownership is exclusive and transferred, never shared: the hash table
//! owns every non-stale record, `mark_stale` moves ownership into the
//! sequence list, and a record is freed exactly once, by the purger or
//! at vbucket teardown.

use crate::item::Item;
use crate::Seqno;

use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{
    AtomicBool, AtomicI64, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// CAS value of a locked document. A caller-supplied CAS overrides the
/// lock; a cas-less mutation against it fails.
pub const CAS_LOCKED: u64 = u64::MAX;

pub(crate) fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Tracks bytes resident in the storage core. An explicit handle, shared
/// by every vbucket of a bucket, so the quota policy can act on the sum.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    used: AtomicUsize,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub(crate) fn add(&self, bytes: usize) {
        self.used.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn sub(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// Value bytes plus the opaque per-document metadata that travels with
/// them. Guarded by the hash bucket lock while the record is reachable
/// from the hash table; immutable once the record is stale.
pub(crate) struct Payload {
    pub value: Box<[u8]>,
    pub flags: u32,
    pub expiry: u32,
    pub datatype: u8,
}

pub(crate) struct Record {
    key: Box<[u8]>,
    seqno: AtomicI64,
    rev_seqno: AtomicU64,
    cas: AtomicU64,
    deleted: AtomicBool,
    stale: AtomicBool,
    deleted_at: AtomicU32,
    payload: UnsafeCell<Payload>,
    ht_next: UnsafeCell<*mut Record>,
    next: AtomicPtr<Record>,
    prev: AtomicPtr<Record>,
}

pub(crate) const RECORD_OVERHEAD: usize = std::mem::size_of::<Record>();

impl Record {
    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }

    pub(crate) fn seqno(&self) -> Seqno {
        self.seqno.load(Ordering::Acquire)
    }

    pub(crate) fn set_seqno(&self, seqno: Seqno) {
        self.seqno.store(seqno, Ordering::Release);
    }

    /// A temp record exists only in the hash table and has no position on
    /// the sequence list yet.
    pub(crate) fn is_temp(&self) -> bool {
        self.seqno() == 0
    }

    pub(crate) fn cas(&self) -> u64 {
        self.cas.load(Ordering::Acquire)
    }

    pub(crate) fn set_cas(&self, cas: u64) {
        self.cas.store(cas, Ordering::Release);
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.cas() == CAS_LOCKED
    }

    pub(crate) fn rev_seqno(&self) -> u64 {
        self.rev_seqno.load(Ordering::Acquire)
    }

    pub(crate) fn set_rev_seqno(&self, rev: u64) {
        self.rev_seqno.store(rev, Ordering::Release);
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn set_deleted(&self, deleted: bool) {
        if deleted {
            self.deleted_at.store(now_secs(), Ordering::Release);
        }
        self.deleted.store(deleted, Ordering::Release);
    }

    /// Unix seconds when the record was last marked deleted.
    pub(crate) fn deleted_at(&self) -> u32 {
        self.deleted_at.load(Ordering::Acquire)
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Monotonic false-to-true, set under the list write lock.
    pub(crate) fn set_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub(crate) fn next(&self) -> *mut Record {
        self.next.load(Ordering::Acquire)
    }

    pub(crate) fn set_next(&self, next: *mut Record) {
        self.next.store(next, Ordering::Release);
    }

    pub(crate) fn prev(&self) -> *mut Record {
        self.prev.load(Ordering::Acquire)
    }

    pub(crate) fn set_prev(&self, prev: *mut Record) {
        self.prev.store(prev, Ordering::Release);
    }

    /// # Safety
    /// Caller must hold the owning hash bucket lock, or be reading a
    /// record that cannot be written (stale, or covered by the caller's
    /// range-read pin).
    pub(crate) unsafe fn payload(&self) -> &Payload {
        &*self.payload.get()
    }

    /// # Safety
    /// Caller must hold the owning hash bucket lock, and the record must
    /// not be covered by an active range-read pin.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self) -> &mut Payload {
        &mut *self.payload.get()
    }

    /// # Safety
    /// Caller must hold the owning hash bucket lock.
    pub(crate) unsafe fn ht_next(&self) -> *mut Record {
        *self.ht_next.get()
    }

    /// # Safety
    /// Caller must hold the owning hash bucket lock.
    pub(crate) unsafe fn set_ht_next(&self, next: *mut Record) {
        *self.ht_next.get() = next;
    }

    /// Overwrite value and metadata in place from `item`, keeping the
    /// record's identity (key, list position at the time of call).
    ///
    /// # Safety
    /// Caller must hold the owning hash bucket lock and the record must
    /// not be covered by an active range-read pin.
    pub(crate) unsafe fn apply(&self, item: &Item, mem: &MemoryTracker) {
        let payload = self.payload_mut();
        let old_len = payload.value.len();
        payload.value = item.value.clone();
        payload.flags = item.flags;
        payload.expiry = item.expiry;
        payload.datatype = item.datatype;
        if item.value.len() >= old_len {
            mem.add(item.value.len() - old_len);
        } else {
            mem.sub(old_len - item.value.len());
        }
        self.set_deleted(item.deleted);
    }

    /// Copy the record out as a self-contained [`Item`].
    ///
    /// # Safety
    /// Same contract as [`Record::payload`].
    pub(crate) unsafe fn snapshot(&self) -> Item {
        let payload = self.payload();
        Item {
            key: self.key.clone(),
            value: payload.value.clone(),
            flags: payload.flags,
            expiry: payload.expiry,
            datatype: payload.datatype,
            cas: self.cas(),
            seqno: self.seqno(),
            rev_seqno: self.rev_seqno(),
            deleted: self.is_deleted(),
        }
    }

    pub(crate) fn footprint(&self) -> usize {
        // value length is stable for the callers that account memory: a
        // record is only freed while its payload cannot change
        RECORD_OVERHEAD + self.key.len() + unsafe { (&(*self.payload.get()).value).len() }
    }
}

/// Allocate a record from an item. The record starts with no list or
/// chain links and seqno zero (temp until placed on the list).
pub(crate) fn alloc_record(item: &Item, cas: u64, mem: &MemoryTracker) -> NonNull<Record> {
    let record = Box::new(Record {
        key: item.key.clone(),
        seqno: AtomicI64::new(0),
        rev_seqno: AtomicU64::new(item.rev_seqno.max(1)),
        cas: AtomicU64::new(cas),
        deleted: AtomicBool::new(item.deleted),
        stale: AtomicBool::new(false),
        deleted_at: AtomicU32::new(if item.deleted { now_secs() } else { 0 }),
        payload: UnsafeCell::new(Payload {
            value: item.value.clone(),
            flags: item.flags,
            expiry: item.expiry,
            datatype: item.datatype,
        }),
        ht_next: UnsafeCell::new(ptr::null_mut()),
        next: AtomicPtr::new(ptr::null_mut()),
        prev: AtomicPtr::new(ptr::null_mut()),
    });
    mem.add(RECORD_OVERHEAD + item.key.len() + item.value.len());
    // Safety: Box::into_raw never returns null
    unsafe { NonNull::new_unchecked(Box::into_raw(record)) }
}

/// Free a record and return its memory to the tracker.
///
/// # Safety
/// `ptr` must be a live record with no remaining reachability from either
/// structure, and must not be freed again.
pub(crate) unsafe fn free_record(ptr: NonNull<Record>, mem: &MemoryTracker) {
    mem.sub(ptr.as_ref().footprint());
    drop(Box::from_raw(ptr.as_ptr()));
}

/// Exclusive ownership of a record that is not (or no longer) reachable
/// from the hash table. Produced by `HashTable::release` and consumed by
/// `SequenceList::mark_stale` or freed outright.
pub(crate) struct OwnedRecord(pub(crate) NonNull<Record>);

// Safety: an OwnedRecord is the only handle to its record outside the
// storage structures; moving it across threads is sound.
unsafe impl Send for OwnedRecord {}

impl OwnedRecord {
    pub(crate) fn as_ptr(&self) -> *mut Record {
        self.0.as_ptr()
    }

    pub(crate) fn record(&self) -> &Record {
        // Safety: owner holds exclusive access
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn free(self, mem: &MemoryTracker) {
        // Safety: by the OwnedRecord contract this is the last reference
        unsafe { free_record(self.0, mem) };
    }
}
