// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The producer side of one DCP stream: an in-memory buffer filled by
//! the backfill task and drained by the connection. The buffer's byte
//! count provides the backpressure signal; draining below the high
//! water mark wakes the backfill so it resumes scanning.

use crate::dcp::ScanBudget;
use crate::notifier::ConnNotifier;
use crate::Cookie;
use executor::ExecutorPool;
use seqstore::{Item, Seqno};

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Backfill is (or will be) feeding the buffer.
    Backfilling = 0,
    /// Backfill completed; the buffer holds whatever remains.
    Done = 1,
    /// Closed by the consumer or torn down; buffered items are dropped
    /// by the consumer.
    Dead = 2,
}

impl StreamState {
    fn from_u8(v: u8) -> StreamState {
        match v {
            0 => StreamState::Backfilling,
            1 => StreamState::Done,
            _ => StreamState::Dead,
        }
    }
}

pub(crate) struct ActiveStream {
    vb: u16,
    cookie: Cookie,
    tx: Sender<Item>,
    rx: Receiver<Item>,
    buffered_bytes: AtomicUsize,
    high_water: usize,
    state: AtomicU8,
    snapshot: Mutex<Option<(Seqno, Seqno)>>,
    backfill_task: AtomicU64,
    pool: Arc<ExecutorPool>,
    notifier: Arc<ConnNotifier>,
    budget: Arc<ScanBudget>,
}

impl ActiveStream {
    pub(crate) fn new(
        vb: u16,
        cookie: Cookie,
        high_water: usize,
        pool: Arc<ExecutorPool>,
        notifier: Arc<ConnNotifier>,
        budget: Arc<ScanBudget>,
    ) -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            vb,
            cookie,
            tx,
            rx,
            buffered_bytes: AtomicUsize::new(0),
            high_water,
            state: AtomicU8::new(StreamState::Backfilling as u8),
            snapshot: Mutex::new(None),
            backfill_task: AtomicU64::new(0),
            pool,
            notifier,
            budget,
        })
    }

    pub(crate) fn vb(&self) -> u16 {
        self.vb
    }

    pub(crate) fn set_backfill_task(&self, id: u64) {
        self.backfill_task.store(id, Ordering::Release);
    }

    pub(crate) fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == StreamState::Backfilling
    }

    pub(crate) fn buffered_bytes(&self) -> usize {
        self.buffered_bytes.load(Ordering::Acquire)
    }

    pub(crate) fn over_high_water(&self) -> bool {
        self.buffered_bytes() >= self.high_water
    }

    /// Record the snapshot bounds the backfill will cover, before any
    /// item is emitted.
    pub(crate) fn mark_snapshot(&self, start: Seqno, end: Seqno) {
        *self.snapshot.lock().unwrap() = Some((start, end));
    }

    pub(crate) fn push(&self, item: Item) {
        let bytes = item.size();
        self.buffered_bytes.fetch_add(bytes, Ordering::AcqRel);
        self.budget.add(bytes);
        // the receiver lives as long as self; send cannot fail
        let _ = self.tx.send(item);
        self.notifier.notify_io_waiter(self.vb, self.cookie);
    }

    /// Backfill finished (or was cancelled). The pin is already
    /// released by the time this is called.
    pub(crate) fn complete_backfill(&self) {
        let _ = self.state.compare_exchange(
            StreamState::Backfilling as u8,
            StreamState::Done as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.notifier.notify_io_waiter(self.vb, self.cookie);
    }

    /// Wake this stream's connection: its vbucket has new data.
    pub(crate) fn notify_data_ready(&self) {
        self.notifier.notify_io_waiter(self.vb, self.cookie);
    }

    pub(crate) fn set_dead(&self) {
        self.state.store(StreamState::Dead as u8, Ordering::Release);
        let id = self.backfill_task.load(Ordering::Acquire);
        if id != 0 {
            // wake the backfill so it observes the state and releases
            // its range pin
            self.pool.wake(id);
        }
    }

    fn pop(&self) -> Option<Item> {
        let item = self.rx.try_recv().ok()?;
        let bytes = item.size();
        let was = self.buffered_bytes.fetch_sub(bytes, Ordering::AcqRel);
        self.budget.sub(bytes);
        if was >= self.high_water && was - bytes < self.high_water {
            // dropped below the high water mark; resume scanning
            let id = self.backfill_task.load(Ordering::Acquire);
            if id != 0 {
                self.pool.wake(id);
            }
        }
        Some(item)
    }
}

/// The handle given to the protocol layer for one open stream.
#[derive(Clone)]
pub struct StreamHandle {
    pub(crate) inner: Arc<ActiveStream>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

impl StreamHandle {
    /// Pull the next buffered item, if any. Draining the buffer below
    /// the high water mark resumes a paused backfill.
    pub fn next_item(&self) -> Option<Item> {
        self.inner.pop()
    }

    /// The snapshot bounds the backfill announced, once known.
    pub fn snapshot(&self) -> Option<(Seqno, Seqno)> {
        *self.inner.snapshot.lock().unwrap()
    }

    pub fn state(&self) -> StreamState {
        self.inner.state()
    }

    /// Whether the stream has delivered everything it ever will.
    pub fn is_ended(&self) -> bool {
        self.inner.state() != StreamState::Backfilling && self.inner.rx.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.inner.buffered_bytes()
    }

    /// Close the stream. The backfill observes this at its next step and
    /// releases its range pin; buffered items are dropped.
    pub fn close(&self) {
        self.inner.set_dead();
    }
}
