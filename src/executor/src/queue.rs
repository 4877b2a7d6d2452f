// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::task::{TaskRef, TaskState, TaskType, WAKE_NEVER};

use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Longest interval a worker will sleep before re-checking its queue.
const MAX_SLEEP: Duration = Duration::from_secs(7);

/// An entry in the future tier. The wake time is cached at insertion; a
/// wake or snooze of a queued task rewrites the cache and rebuilds the
/// heap, mirroring how the entry's own wake time is updated.
struct FutureEntry {
    wake: u64,
    task: TaskRef,
}

impl PartialEq for FutureEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake == other.wake && self.task.uid == other.task.uid
    }
}

impl Eq for FutureEntry {}

impl PartialOrd for FutureEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FutureEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; earliest wake time must surface first
        other
            .wake
            .cmp(&self.wake)
            .then_with(|| other.task.uid.cmp(&self.task.uid))
    }
}

/// An entry in the ready tier: highest priority first, FIFO within a
/// priority (by task uid, which is assigned in schedule order).
struct ReadyEntry {
    task: TaskRef,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.task.uid == other.task.uid
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.task.uid.cmp(&self.task.uid))
    }
}

struct Inner {
    future: BinaryHeap<FutureEntry>,
    ready: BinaryHeap<ReadyEntry>,
    pending: VecDeque<TaskRef>,
    sleepers: usize,
    running: usize,
    max_concurrency: usize,
}

/// One typed task queue with its three tiers.
pub(crate) struct TaskQueue {
    queue_type: TaskType,
    mutex: Mutex<Inner>,
    condvar: Condvar,
}

pub(crate) enum Fetched {
    /// A task to run (or to discard, if it died while queued).
    Task(TaskRef),
    /// Nothing runnable right now.
    Empty,
}

impl TaskQueue {
    pub(crate) fn new(queue_type: TaskType) -> Self {
        Self {
            queue_type,
            mutex: Mutex::new(Inner {
                future: BinaryHeap::new(),
                ready: BinaryHeap::new(),
                pending: VecDeque::new(),
                sleepers: 0,
                running: 0,
                max_concurrency: usize::MAX,
            }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn set_max_concurrency(&self, limit: usize) {
        let mut inner = self.mutex.lock().unwrap();
        inner.max_concurrency = if limit == 0 { usize::MAX } else { limit };
        drop(inner);
        self.condvar.notify_all();
    }

    /// Place a (newly created or re-armed) task on the future tier.
    pub(crate) fn schedule(&self, task: TaskRef) {
        let mut inner = self.mutex.lock().unwrap();
        // rescheduling a previously cancelled task revives it
        task.set_state(TaskState::Running, TaskState::Dead);
        trace!("{}: schedule task {}", self.queue_type, task.uid);
        let wake = task.waketime();
        inner.future.push(FutureEntry { wake, task });
        drop(inner);
        self.condvar.notify_one();
    }

    /// Requeue a task after it ran and asked to be run again.
    pub(crate) fn reschedule(&self, task: TaskRef) {
        let mut inner = self.mutex.lock().unwrap();
        task.set_state(TaskState::Snoozed, TaskState::Running);
        let wake = task.waketime();
        inner.future.push(FutureEntry { wake, task });
        drop(inner);
        self.condvar.notify_one();
    }

    /// Make a queued task ready as soon as possible. Matching entries on
    /// the pending tier are folded back into the future tier so that run
    /// order stays priority-driven.
    pub(crate) fn wake(&self, task: &TaskRef) {
        let mut inner = self.mutex.lock().unwrap();
        debug!("{}: wake task {}", self.queue_type, task.uid);
        task.set_waketime_now();
        task.set_state(TaskState::Running, TaskState::Snoozed);

        let mut moved: Vec<TaskRef> = Vec::new();
        inner.pending.retain(|t| {
            if t.uid == task.uid || t.is_dead() {
                moved.push(t.clone());
                false
            } else {
                true
            }
        });
        for t in moved {
            let wake = t.waketime();
            inner.future.push(FutureEntry { wake, task: t });
        }

        Self::refresh_future(&mut inner, task.uid);
        drop(inner);
        self.condvar.notify_all();
    }

    /// Update the cached wake time of a queued task after a snooze.
    pub(crate) fn touch(&self, task: &TaskRef) {
        let mut inner = self.mutex.lock().unwrap();
        Self::refresh_future(&mut inner, task.uid);
        drop(inner);
        self.condvar.notify_all();
    }

    fn refresh_future(inner: &mut Inner, uid: u64) {
        if !inner.future.iter().any(|e| e.task.uid == uid) {
            return;
        }
        let entries: Vec<FutureEntry> = inner
            .future
            .drain()
            .map(|mut e| {
                if e.task.uid == uid {
                    e.wake = e.task.waketime();
                }
                e
            })
            .collect();
        inner.future = BinaryHeap::from(entries);
    }

    /// Called by a worker once a fetched task has finished running.
    pub(crate) fn done_running(&self) {
        let mut inner = self.mutex.lock().unwrap();
        inner.running -= 1;
        drop(inner);
        self.condvar.notify_one();
    }

    /// Fetch the next runnable task without sleeping.
    pub(crate) fn fetch_next_task(&self) -> Fetched {
        let inner = self.mutex.lock().unwrap();
        self.fetch_inner(inner)
    }

    /// Sleep until work may be available (bounded by `MAX_SLEEP` or the
    /// earliest future wake time), then attempt a fetch.
    pub(crate) fn sleep_then_fetch_next_task(&self, should_exit: impl Fn() -> bool) -> Fetched {
        let mut inner = self.mutex.lock().unwrap();

        let now = self.now(&inner);
        let has_due = !inner.ready.is_empty()
            || inner
                .future
                .peek()
                .map(|e| e.wake.min(e.task.waketime()) <= now)
                .unwrap_or(false);

        if !has_due && !should_exit() {
            let next_wake = inner.future.peek().map(|e| e.wake).unwrap_or(WAKE_NEVER);
            let timeout = if next_wake == WAKE_NEVER {
                MAX_SLEEP
            } else {
                Duration::from_nanos(next_wake.saturating_sub(now)).min(MAX_SLEEP)
            };
            inner.sleepers += 1;
            let (guard, _timed_out) = self.condvar.wait_timeout(inner, timeout).unwrap();
            inner = guard;
            inner.sleepers -= 1;
        }

        if should_exit() {
            return Fetched::Empty;
        }
        self.fetch_inner(inner)
    }

    fn now(&self, inner: &Inner) -> u64 {
        // any queued task carries the pool epoch; an empty queue has no
        // notion of "now" but also nothing due
        inner
            .future
            .peek()
            .map(|e| e.task.now())
            .or_else(|| inner.ready.peek().map(|e| e.task.now()))
            .unwrap_or(0)
    }

    fn fetch_inner(&self, mut inner: MutexGuard<'_, Inner>) -> Fetched {
        let mut num_to_wake = self.move_ready_tasks(&mut inner);

        let fetched = if inner
            .ready
            .peek()
            .map(|e| e.task.is_dead())
            .unwrap_or(false)
        {
            // clean out dead tasks first
            inner.running += 1;
            Fetched::Task(inner.ready.pop().unwrap().task)
        } else if !inner.ready.is_empty() || !inner.pending.is_empty() {
            // fold one pending task back in so prioritized order holds
            if let Some(t) = inner.pending.pop_front() {
                inner.ready.push(ReadyEntry { task: t });
            }
            let entry = inner.ready.pop().unwrap();
            if inner.running >= inner.max_concurrency && !entry.task.is_dead() {
                // over the per-type limit; defer in FIFO order
                inner.pending.push_back(entry.task);
                Fetched::Empty
            } else {
                inner.running += 1;
                Fetched::Task(entry.task)
            }
        } else {
            num_to_wake = num_to_wake.saturating_sub(1);
            Fetched::Empty
        };

        drop(inner);
        for _ in 0..num_to_wake {
            self.condvar.notify_one();
        }
        fetched
    }

    /// Move tasks whose wake time has passed from the future tier to the
    /// ready tier. Returns how many peers should be woken.
    fn move_ready_tasks(&self, inner: &mut Inner) -> usize {
        if !inner.ready.is_empty() {
            return 0;
        }
        let now = self.now(inner);
        let mut num_ready: usize = 0;
        while let Some(entry) = inner.future.peek() {
            // the entry's own wake time governs; the cached key can only
            // be later than it after an external wake raced the rebuild
            if entry.task.waketime() <= now || entry.task.is_dead() {
                let entry = inner.future.pop().unwrap();
                inner.ready.push(ReadyEntry { task: entry.task });
                num_ready += 1;
            } else {
                break;
            }
        }
        // current thread will pop one task itself
        num_ready.saturating_sub(1)
    }

    #[cfg(test)]
    pub(crate) fn future_len(&self) -> usize {
        self.mutex.lock().unwrap().future.len()
    }

    /// Wake every sleeping worker. Takes the queue mutex so a worker
    /// that just decided to sleep cannot miss the notification.
    pub(crate) fn notify_all(&self) {
        let _guard = self.mutex.lock().unwrap();
        self.condvar.notify_all();
    }
}
