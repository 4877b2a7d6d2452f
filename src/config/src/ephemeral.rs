// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const FULL_POLICY: FullPolicy = FullPolicy::AutoDelete;
const METADATA_PURGE_INTERVAL: u64 = 60;
const METADATA_PURGE_AGE: i64 = 60 * 60 * 24 * 3;
const PURGE_CHUNK_DURATION: u64 = 20;
const BACKFILL_TYPE: BackfillType = BackfillType::Buffered;
const BACKFILL_SCAN_BUFFER: usize = 20 * 1024 * 1024;

/// Behavior when the memory quota is reached.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullPolicy {
    /// Page out resident items to recover memory.
    AutoDelete,
    /// Reject new mutations with a temporary failure.
    FailNewData,
}

/// How DCP backfills read the in-memory sequence list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillType {
    None,
    Buffered,
}

// helper functions
fn full_policy() -> FullPolicy {
    FULL_POLICY
}

fn metadata_purge_interval() -> u64 {
    METADATA_PURGE_INTERVAL
}

fn metadata_purge_age() -> i64 {
    METADATA_PURGE_AGE
}

fn purge_chunk_duration() -> u64 {
    PURGE_CHUNK_DURATION
}

fn backfill_type() -> BackfillType {
    BACKFILL_TYPE
}

fn backfill_scan_buffer() -> usize {
    BACKFILL_SCAN_BUFFER
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Ephemeral {
    #[serde(default = "full_policy")]
    full_policy: FullPolicy,
    #[serde(default = "metadata_purge_interval")]
    metadata_purge_interval: u64,
    #[serde(default = "metadata_purge_age")]
    metadata_purge_age: i64,
    #[serde(default = "purge_chunk_duration")]
    purge_chunk_duration: u64,
    #[serde(default = "backfill_type")]
    backfill_type: BackfillType,
    #[serde(default = "backfill_scan_buffer")]
    backfill_scan_buffer: usize,
}

// implementation
impl Ephemeral {
    pub fn full_policy(&self) -> FullPolicy {
        self.full_policy
    }

    /// Seconds between sweeps of the sequence lists for purgeable
    /// tombstones. Zero disables the sweep.
    pub fn metadata_purge_interval(&self) -> u64 {
        self.metadata_purge_interval
    }

    /// Minimum age, in seconds, of a tombstone before the hashtable sweep
    /// marks it stale. Negative disables the sweep.
    pub fn metadata_purge_age(&self) -> i64 {
        self.metadata_purge_age
    }

    /// Milliseconds a purger visitor may run before yielding back to the
    /// executor.
    pub fn purge_chunk_duration(&self) -> u64 {
        self.purge_chunk_duration
    }

    pub fn backfill_type(&self) -> BackfillType {
        self.backfill_type
    }

    /// Bytes of stream buffer that all concurrent backfills may fill before
    /// scanning pauses globally.
    pub fn backfill_scan_buffer(&self) -> usize {
        self.backfill_scan_buffer
    }
}

// trait implementations
impl Default for Ephemeral {
    fn default() -> Self {
        Self {
            full_policy: full_policy(),
            metadata_purge_interval: metadata_purge_interval(),
            metadata_purge_age: metadata_purge_age(),
            purge_chunk_duration: purge_chunk_duration(),
            backfill_type: backfill_type(),
            backfill_scan_buffer: backfill_scan_buffer(),
        }
    }
}

// trait definitions
pub trait EphemeralConfig {
    fn ephemeral(&self) -> &Ephemeral;
}
