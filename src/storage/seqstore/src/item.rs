// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The value type exchanged across the storage boundary. An [`Item`] is a
//! self-contained snapshot: reads copy out of the store under the hash
//! bucket lock, and writes carry fully formed items in.

use crate::Seqno;

/// Datatype bits carried per document.
pub mod datatype {
    pub const RAW: u8 = 0x00;
    pub const JSON: u8 = 0x01;
    pub const SNAPPY: u8 = 0x02;
    pub const XATTR: u8 = 0x04;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub key: Box<[u8]>,
    pub value: Box<[u8]>,
    pub flags: u32,
    pub expiry: u32,
    pub datatype: u8,
    pub cas: u64,
    pub seqno: Seqno,
    pub rev_seqno: u64,
    pub deleted: bool,
}

impl Item {
    /// A plain mutation carrying a value.
    pub fn new(key: &[u8], value: &[u8], flags: u32, expiry: u32, datatype: u8) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            flags,
            expiry,
            datatype,
            cas: 0,
            seqno: 0,
            rev_seqno: 0,
            deleted: false,
        }
    }

    /// A deletion marker for `key`.
    pub fn deleted(key: &[u8]) -> Self {
        Self {
            key: key.into(),
            value: Box::default(),
            flags: 0,
            expiry: 0,
            datatype: datatype::RAW,
            cas: 0,
            seqno: 0,
            rev_seqno: 0,
            deleted: true,
        }
    }

    pub fn has_xattr(&self) -> bool {
        self.datatype & datatype::XATTR != 0
    }

    /// Approximate heap footprint, used for memory accounting.
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}
