// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Deadline bookkeeping for pause/resume visitors. Reading the clock on
//! every visited item would dominate the visit itself, so the tracker
//! checks the clock periodically and adapts the check interval to target
//! a fixed number of checks per chunk.

use std::time::{Duration, Instant};

const INITIAL_VISIT_COUNT_CHECK: u64 = 100;

/// Ideally we want to check the clock every 100ms of wall time.
const CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub struct ProgressTracker {
    deadline: Instant,
    next_check_at: u64,
    check_interval: u64,
    last_check: Instant,
}

impl ProgressTracker {
    pub fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            next_check_at: INITIAL_VISIT_COUNT_CHECK,
            check_interval: INITIAL_VISIT_COUNT_CHECK,
            last_check: Instant::now(),
        }
    }

    /// Whether the visitor should keep going after `visited` items.
    pub fn should_continue_visiting(&mut self, visited: u64) -> bool {
        if visited < self.next_check_at {
            return true;
        }

        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }

        // Scale the interval so roughly one clock check lands per
        // CHECK_INTERVAL of wall time.
        let elapsed = now.duration_since(self.last_check);
        if elapsed < CHECK_INTERVAL / 2 {
            self.check_interval = (self.check_interval * 2).min(1 << 20);
        } else if elapsed > CHECK_INTERVAL * 2 && self.check_interval > 1 {
            self.check_interval /= 2;
        }
        self.last_check = now;
        self.next_check_at = visited + self.check_interval;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_deadline_stops_visiting() {
        let mut tracker = ProgressTracker::new(Instant::now() - Duration::from_millis(1));
        // under the first check threshold we keep going regardless
        assert!(tracker.should_continue_visiting(1));
        assert!(!tracker.should_continue_visiting(INITIAL_VISIT_COUNT_CHECK));
    }

    #[test]
    fn future_deadline_keeps_visiting() {
        let mut tracker = ProgressTracker::new(Instant::now() + Duration::from_secs(60));
        for i in 0..10_000 {
            assert!(tracker.should_continue_visiting(i));
        }
    }
}
