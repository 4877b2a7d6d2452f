// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The tern bucket engine.
//!
//! This crate assembles the storage core (`seqstore`) and the task
//! scheduler (`executor`) into a bucket the protocol layer can drive:
//! the key-value operations, DCP stream open/backfill, connection
//! wakeups, and the recurring background work (tombstone purging, item
//! paging, deferred vbucket deletion).
//!
//! The wire protocol codec, the connection event loop, authentication
//! and the persistent bucket's disk formats are external collaborators;
//! they appear here only as the [`ConnectionSink`] and [`KVStore`]
//! contracts.

#[macro_use]
extern crate log;

mod bucket;
mod dcp;
mod deletion;
mod error;
mod notifier;
mod tasks;
pub mod xattr;

pub use bucket::{Bucket, BucketKind, DeleteResult, StoreOp, StoreResult};
pub use dcp::{StreamHandle, StreamState};
pub use error::ErrorKind;

// storage types that cross the engine boundary
pub use seqstore::{datatype, Item, Seqno, VBucketState, VBucketStats};

/// Opaque per-request connection identifier supplied by the protocol
/// layer.
pub type Cookie = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoCompleteStatus {
    Success,
    TemporaryFailure,
}

/// How the engine wakes a paused connection: the protocol layer
/// implements this and resumes the request for `cookie`.
pub trait ConnectionSink: Send + Sync {
    fn notify_io_complete(&self, cookie: Cookie, status: IoCompleteStatus);
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub more_work: bool,
    pub items_flushed: usize,
}

/// The persistence contract a persistent bucket consumes. Ephemeral
/// buckets persist nothing and never call it.
pub trait KVStore: Send + Sync {
    /// Flush a vbucket's dirty items to disk.
    fn flush_vbucket(&self, vb: u16) -> FlushOutcome;

    /// Remove a vbucket's on-disk state. `revision` fences the removal
    /// against a newer incarnation of the same vbucket writing its own
    /// files.
    fn delete_vbucket(&self, vb: u16, revision: u64);

    /// Persist the failover table's JSON form.
    fn persist_failover_table(&self, vb: u16, json: &str);
}
