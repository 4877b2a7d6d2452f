// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A hybrid logical clock used to stamp CAS values. Only the send side of
//! the HLC algorithm is implemented: a new stamp is either the current
//! wall-clock time (masked to 48 bits of real time plus 16 logical bits)
//! or one past the highest stamp seen, whichever is larger. Stamps
//! accepted from peers feed drift accounting.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Drop the low 16 bits; they act as a logical counter when the physical
/// clock stalls or runs behind.
fn masked48(value: u64) -> u64 {
    value & !0xffff
}

fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriftExceptions {
    pub ahead: u32,
    pub behind: u32,
}

pub struct HybridClock {
    max_hlc: AtomicU64,
    logical_ticks: AtomicU64,
    ahead_threshold_ns: u64,
    behind_threshold_ns: u64,
    ahead_exceeded: AtomicU32,
    behind_exceeded: AtomicU32,
}

impl HybridClock {
    pub fn new(init: u64, ahead_threshold: Duration, behind_threshold: Duration) -> Self {
        Self {
            max_hlc: AtomicU64::new(init),
            logical_ticks: AtomicU64::new(0),
            ahead_threshold_ns: ahead_threshold.as_nanos() as u64,
            behind_threshold_ns: behind_threshold.as_nanos() as u64,
            ahead_exceeded: AtomicU32::new(0),
            behind_exceeded: AtomicU32::new(0),
        }
    }

    /// Generate the next stamp: the masked current time, or one past the
    /// last stamp if time has not advanced past it.
    pub fn next(&self) -> u64 {
        let time_now = masked48(wall_clock_ns());
        let last = self.max_hlc.load(Ordering::Acquire);
        if time_now > last {
            self.max_hlc.fetch_max(time_now, Ordering::AcqRel);
            return time_now;
        }
        self.logical_ticks.fetch_add(1, Ordering::Relaxed);
        self.max_hlc.fetch_max(last + 1, Ordering::AcqRel);
        last + 1
    }

    /// Fold in a stamp received from a peer, counting an exception if the
    /// peer's clock is further ahead or behind than the thresholds allow.
    pub fn set_max_and_track_drift(&self, hlc: u64) {
        let time_now = masked48(wall_clock_ns());
        let difference = masked48(hlc) as i64 - time_now as i64;

        if difference > self.ahead_threshold_ns as i64 {
            self.ahead_exceeded.fetch_add(1, Ordering::Relaxed);
        } else if difference < -(self.behind_threshold_ns as i64) {
            self.behind_exceeded.fetch_add(1, Ordering::Relaxed);
        }

        self.set_max(hlc);
    }

    pub fn set_max(&self, hlc: u64) {
        self.max_hlc.fetch_max(hlc, Ordering::AcqRel);
    }

    pub fn max(&self) -> u64 {
        self.max_hlc.load(Ordering::Acquire)
    }

    pub fn drift_exceptions(&self) -> DriftExceptions {
        DriftExceptions {
            ahead: self.ahead_exceeded.load(Ordering::Relaxed),
            behind: self.behind_exceeded.load(Ordering::Relaxed),
        }
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        // 5s thresholds match the engine defaults for drift exceptions
        Self::new(0, Duration::from_secs(5), Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_strictly_increasing() {
        let clock = HybridClock::default();
        let mut last = 0;
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn peer_stamp_moves_clock_forward() {
        let clock = HybridClock::default();
        let far_future = masked48(wall_clock_ns()) + (1 << 30);
        clock.set_max_and_track_drift(far_future);
        assert!(clock.next() > far_future);
        assert_eq!(clock.drift_exceptions().ahead, 1);
    }
}
