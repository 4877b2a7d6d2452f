// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A counter that only moves forward. Seqno-carrying fields use this so a
//! late or duplicated update can never drag a published position back.

use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct AtomicMonotonic {
    inner: AtomicI64,
}

impl AtomicMonotonic {
    pub fn new(value: i64) -> Self {
        Self {
            inner: AtomicI64::new(value),
        }
    }

    pub fn load(&self) -> i64 {
        self.inner.load(Ordering::Acquire)
    }

    /// Store `value` if it is greater than the current value; lesser
    /// values are ignored.
    pub fn store_max(&self, value: i64) {
        self.inner.fetch_max(value, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_moves_backward() {
        let m = AtomicMonotonic::new(5);
        m.store_max(3);
        assert_eq!(m.load(), 5);
        m.store_max(9);
        assert_eq!(m.load(), 9);
    }
}
