// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Ordered in-memory storage for ephemeral vbuckets.
//!
//! Each vbucket pairs a striped-lock [`HashTable`] (point lookups by key)
//! with a [`SequenceList`] (append-ordered iteration by sequence number).
//! Both structures index the same heap-allocated records. The hash table
//! always maps a key to the newest version of its document; superseded
//! versions stay on the sequence list as *stale* records for as long as a
//! range reader may still observe them, and are reclaimed by the tombstone
//! purger.
//!
//! The [`VBucket`] mediates every mutation so that hash-table and
//! sequence-list transitions stay atomic with respect to sequence-number
//! ordering. Lock order is always hash-bucket lock, then the vbucket
//! sequence lock, then the list write lock.
//!
//! Goals:
//! * writers, point reads and long-running range reads proceed without
//!   blocking one another
//! * strict per-vbucket sequence-number ordering
//! * safe reclamation of superseded records
//!
//! Non-goals:
//! * durability; contents are deliberately volatile

#[macro_use]
extern crate log;

mod error;
mod failover;
mod hashtable;
mod hlc;
mod item;
mod monotonic;
mod progress;
mod record;
mod seqlist;
mod vbucket;

#[cfg(test)]
mod tests;

pub use error::MutationError;
pub use failover::{FailoverEntry, FailoverTable, RollbackDecision};
pub use hlc::HybridClock;
pub use item::{datatype, Item};
pub use monotonic::AtomicMonotonic;
pub use progress::ProgressTracker;
pub use record::{MemoryTracker, CAS_LOCKED};
pub use seqlist::{RangeIterator, UpdateStatus};
pub use vbucket::{
    HtSweepOutcome, ListSweepOutcome, MutationOutcome, NotifyCtx, PageOutResult, PredicateResult,
    VBucket, VBucketOptions, VBucketState, VBucketStats,
};

/// Per-vbucket sequence number. Zero means "not yet placed on the
/// sequence list".
pub type Seqno = i64;

/// Called by a vbucket after a mutation is published, while no storage
/// locks are held. The checkpoint manager buffers mutations for
/// replication; it interacts with the vbucket only via queue-and-notify.
pub trait CheckpointHook: Send + Sync {
    fn queue_dirty(&self, vb: u16, item: &Item);
}

/// A no-op hook for standalone vbuckets and tests.
pub struct NullCheckpointHook;

impl CheckpointHook for NullCheckpointHook {
    fn queue_dirty(&self, _vb: u16, _item: &Item) {}
}
