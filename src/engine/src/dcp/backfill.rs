// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The backfill producer: a state machine (`Init -> Scanning -> Done`)
//! driven by the executor pool, streaming a snapshot of a vbucket's
//! sequence list into a stream buffer.
//!
//! Scanning honors two independent gates: the stream's own buffer high
//! water mark, and a global budget across every concurrent backfill.
//! Either being exceeded snoozes the task; the consumer draining the
//! buffer wakes it again.

use crate::dcp::stream::ActiveStream;
use executor::{Task, TaskControl, TaskType};
use seqstore::{RangeIterator, Seqno, VBucket};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fallback re-check interval while backpressured; the normal resume
/// path is an explicit wake from the consumer.
const BACKPRESSURE_SNOOZE: Duration = Duration::from_millis(500);

/// Retry interval when another range read holds the vbucket's single
/// iterator slot.
const ITERATOR_RETRY_SNOOZE: Duration = Duration::from_millis(100);

/// Bytes of stream buffer shared by every backfill of a bucket.
/// Scanning pauses globally while the total sits above the limit.
pub(crate) struct ScanBudget {
    used: AtomicUsize,
    limit: usize,
}

impl ScanBudget {
    pub(crate) fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            used: AtomicUsize::new(0),
            limit,
        })
    }

    pub(crate) fn add(&self, bytes: usize) {
        self.used.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn sub(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    pub(crate) fn exceeded(&self) -> bool {
        self.limit != 0 && self.used.load(Ordering::Acquire) >= self.limit
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BackfillState {
    Init,
    Scanning,
    Done,
}

pub(crate) struct BackfillTask {
    vb: Arc<VBucket>,
    stream: Arc<ActiveStream>,
    budget: Arc<ScanBudget>,
    state: BackfillState,
    iter: Option<RangeIterator>,
    start: Seqno,
    end: Seqno,
}

impl BackfillTask {
    pub(crate) fn new(
        vb: Arc<VBucket>,
        stream: Arc<ActiveStream>,
        budget: Arc<ScanBudget>,
        start: Seqno,
        end: Seqno,
    ) -> Box<Self> {
        Box::new(Self {
            vb,
            stream,
            budget,
            state: BackfillState::Init,
            iter: None,
            start,
            end,
        })
    }

    fn transition(&mut self, next: BackfillState) {
        trace!(
            "vb:{} backfill {:?} -> {:?}",
            self.vb.id(),
            self.state,
            next
        );
        self.state = next;
    }

    /// Open the range iterator and announce the snapshot. The end is
    /// clamped to the high seqno captured at iterator creation.
    fn create(&mut self, ctl: &TaskControl) -> bool {
        if !self.stream.is_active() {
            self.transition(BackfillState::Done);
            return true;
        }
        match VBucket::make_range_iterator(&self.vb) {
            Some(iter) => {
                self.end = self.end.min(iter.end_seqno());
                self.stream.mark_snapshot(self.start, self.end);
                self.iter = Some(iter);
                self.transition(BackfillState::Scanning);
                true
            }
            None => {
                // a single range read exists per vbucket; wait our turn
                ctl.snooze(ITERATOR_RETRY_SNOOZE);
                false
            }
        }
    }

    /// Emit items until drained or backpressured. Returns whether the
    /// state machine should keep running in this call.
    fn scan(&mut self, ctl: &TaskControl) -> bool {
        loop {
            if !self.stream.is_active() {
                debug!("vb:{} backfill cancelled mid-scan", self.vb.id());
                self.transition(BackfillState::Done);
                return true;
            }
            if self.stream.over_high_water() || self.budget.exceeded() {
                ctl.snooze(BACKPRESSURE_SNOOZE);
                return false;
            }
            let item = match self.iter.as_mut().and_then(|i| i.next()) {
                Some(item) => item,
                None => {
                    self.transition(BackfillState::Done);
                    return true;
                }
            };
            if item.seqno < self.start {
                continue;
            }
            if item.seqno > self.end {
                self.transition(BackfillState::Done);
                return true;
            }
            self.stream.push(item);
        }
    }

    fn complete(&mut self) {
        // dropping the iterator releases the range pin; signal the
        // stream only afterwards
        self.iter = None;
        self.stream.complete_backfill();
    }
}

impl Task for BackfillTask {
    fn run(&mut self, ctl: &TaskControl) -> bool {
        loop {
            match self.state {
                BackfillState::Init => {
                    if !self.create(ctl) {
                        return true;
                    }
                }
                BackfillState::Scanning => {
                    if !self.scan(ctl) {
                        return true;
                    }
                }
                BackfillState::Done => {
                    self.complete();
                    return false;
                }
            }
        }
    }

    fn description(&self) -> &'static str {
        "dcp backfill (memory)"
    }

    fn task_type(&self) -> TaskType {
        TaskType::AuxIo
    }

    fn priority(&self) -> u8 {
        4
    }
}
