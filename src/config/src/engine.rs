// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

const MB: usize = 1024 * 1024;

// constants to define default values
const MEM_QUOTA: usize = 256 * MB;
const MAX_ITEM_SIZE: usize = 20 * MB;
const MAX_VBUCKETS: u16 = 1024;
const HASH_INITIAL_SIZE: usize = 47;
const HASH_STRIPES: usize = 47;
const HASH_MAX_LOAD_FACTOR: f64 = 3.0;
const MAX_FAILOVER_ENTRIES: usize = 25;
const CONNECTION_MANAGER_INTERVAL: u64 = 1;
const XATTR_ENABLED: bool = true;
const DCP_STREAM_BUFFER_SIZE: usize = MB;

// helper functions
fn mem_quota() -> usize {
    MEM_QUOTA
}

fn max_item_size() -> usize {
    MAX_ITEM_SIZE
}

fn max_vbuckets() -> u16 {
    MAX_VBUCKETS
}

fn hash_initial_size() -> usize {
    HASH_INITIAL_SIZE
}

fn hash_stripes() -> usize {
    HASH_STRIPES
}

fn hash_max_load_factor() -> f64 {
    HASH_MAX_LOAD_FACTOR
}

fn max_failover_entries() -> usize {
    MAX_FAILOVER_ENTRIES
}

fn connection_manager_interval() -> u64 {
    CONNECTION_MANAGER_INTERVAL
}

fn xattr_enabled() -> bool {
    XATTR_ENABLED
}

fn dcp_stream_buffer_size() -> usize {
    DCP_STREAM_BUFFER_SIZE
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Engine {
    #[serde(default = "mem_quota")]
    mem_quota: usize,
    #[serde(default = "max_item_size")]
    max_item_size: usize,
    #[serde(default = "max_vbuckets")]
    max_vbuckets: u16,
    #[serde(default = "hash_initial_size")]
    hash_initial_size: usize,
    #[serde(default = "hash_stripes")]
    hash_stripes: usize,
    #[serde(default = "hash_max_load_factor")]
    hash_max_load_factor: f64,
    #[serde(default = "max_failover_entries")]
    max_failover_entries: usize,
    #[serde(default = "connection_manager_interval")]
    connection_manager_interval: u64,
    #[serde(default = "xattr_enabled")]
    xattr_enabled: bool,
    #[serde(default = "dcp_stream_buffer_size")]
    dcp_stream_buffer_size: usize,
}

// implementation
impl Engine {
    pub fn mem_quota(&self) -> usize {
        self.mem_quota
    }

    pub fn max_item_size(&self) -> usize {
        self.max_item_size
    }

    pub fn max_vbuckets(&self) -> u16 {
        self.max_vbuckets
    }

    pub fn hash_initial_size(&self) -> usize {
        self.hash_initial_size
    }

    pub fn hash_stripes(&self) -> usize {
        self.hash_stripes
    }

    pub fn hash_max_load_factor(&self) -> f64 {
        self.hash_max_load_factor
    }

    pub fn max_failover_entries(&self) -> usize {
        self.max_failover_entries
    }

    /// Seconds between idle-connection sweeps by the connection manager.
    pub fn connection_manager_interval(&self) -> u64 {
        self.connection_manager_interval
    }

    /// Whether the engine advertises extended-attribute support.
    pub fn xattr_enabled(&self) -> bool {
        self.xattr_enabled
    }

    /// Per-stream buffer high water mark for DCP backfills.
    pub fn dcp_stream_buffer_size(&self) -> usize {
        self.dcp_stream_buffer_size
    }
}

// trait implementations
impl Default for Engine {
    fn default() -> Self {
        Self {
            mem_quota: mem_quota(),
            max_item_size: max_item_size(),
            max_vbuckets: max_vbuckets(),
            hash_initial_size: hash_initial_size(),
            hash_stripes: hash_stripes(),
            hash_max_load_factor: hash_max_load_factor(),
            max_failover_entries: max_failover_entries(),
            connection_manager_interval: connection_manager_interval(),
            xattr_enabled: xattr_enabled(),
            dcp_stream_buffer_size: dcp_stream_buffer_size(),
        }
    }
}

// trait definitions
pub trait EngineConfig {
    fn engine(&self) -> &Engine;
}
