// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Wake time value meaning "sleep until explicitly woken".
pub(crate) const WAKE_NEVER: u64 = u64::MAX;

/// The four typed queues of the pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskType {
    Reader = 0,
    Writer = 1,
    AuxIo = 2,
    NonIo = 3,
}

pub(crate) const NUM_TASK_TYPES: usize = 4;

impl TaskType {
    pub(crate) fn from_index(i: usize) -> TaskType {
        match i {
            0 => TaskType::Reader,
            1 => TaskType::Writer,
            2 => TaskType::AuxIo,
            _ => TaskType::NonIo,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskType::Reader => "Reader",
            TaskType::Writer => "Writer",
            TaskType::AuxIo => "AuxIO",
            TaskType::NonIo => "NonIO",
        };
        write!(f, "{}", name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Running = 0,
    Snoozed = 1,
    Dead = 2,
}

impl TaskState {
    fn from_u8(v: u8) -> TaskState {
        match v {
            0 => TaskState::Running,
            1 => TaskState::Snoozed,
            _ => TaskState::Dead,
        }
    }
}

/// A unit of background work. Implementations hold their own resume state;
/// long operations should respect a chunk deadline and return `true` to be
/// rescheduled at the wake time set via [`TaskControl::snooze`].
pub trait Task: Send {
    /// Runs one slice of the task. Returns whether the task should be
    /// rescheduled.
    fn run(&mut self, ctl: &TaskControl) -> bool;

    /// A short human-readable description, used in logging.
    fn description(&self) -> &'static str;

    /// Which typed queue this task runs on.
    fn task_type(&self) -> TaskType;

    /// Scheduling priority. Lower values run first among tasks ready at
    /// the same instant.
    fn priority(&self) -> u8 {
        5
    }
}

/// Handle given to a running task so it can adjust its own wake time.
pub struct TaskControl<'a> {
    pub(crate) entry: &'a TaskEntry,
}

impl TaskControl<'_> {
    /// Reschedule this task `after` from now, assuming `run()` returns
    /// `true`.
    pub fn snooze(&self, after: Duration) {
        self.entry.set_waketime_in(after);
    }

    /// Sleep until another thread wakes this task.
    pub fn snooze_forever(&self) {
        self.entry.waketime.store(WAKE_NEVER, Ordering::Release);
    }

    pub fn task_id(&self) -> u64 {
        self.entry.uid
    }
}

/// Pool-internal bookkeeping for one scheduled task. The wake time is a
/// nanosecond offset from the pool epoch so it can be read and written
/// without the queue mutex.
pub(crate) struct TaskEntry {
    pub(crate) uid: u64,
    pub(crate) priority: u8,
    pub(crate) task_type: TaskType,
    pub(crate) epoch: Instant,
    pub(crate) waketime: AtomicU64,
    pub(crate) state: AtomicU8,
    pub(crate) inner: Mutex<Option<Box<dyn Task>>>,
}

pub(crate) type TaskRef = Arc<TaskEntry>;

impl TaskEntry {
    pub(crate) fn new(
        uid: u64,
        epoch: Instant,
        task: Box<dyn Task>,
        initial_sleep: Duration,
    ) -> TaskRef {
        let entry = TaskEntry {
            uid,
            priority: task.priority(),
            task_type: task.task_type(),
            epoch,
            waketime: AtomicU64::new(0),
            state: AtomicU8::new(TaskState::Running as u8),
            inner: Mutex::new(Some(task)),
        };
        entry.set_waketime_in(initial_sleep);
        Arc::new(entry)
    }

    pub(crate) fn set_waketime_in(&self, after: Duration) {
        let now = self.epoch.elapsed();
        let wake = now
            .checked_add(after)
            .map(|d| d.as_nanos().min(WAKE_NEVER as u128 - 1) as u64)
            .unwrap_or(WAKE_NEVER - 1);
        self.waketime.store(wake, Ordering::Release);
    }

    pub(crate) fn set_waketime_now(&self) {
        self.waketime
            .store(self.epoch.elapsed().as_nanos() as u64, Ordering::Release);
    }

    pub(crate) fn waketime(&self) -> u64 {
        self.waketime.load(Ordering::Acquire)
    }

    pub(crate) fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.state() == TaskState::Dead
    }

    pub(crate) fn cancel(&self) {
        self.state.store(TaskState::Dead as u8, Ordering::Release);
    }

    /// Transition from `expected` to `next`, returning whether the swap
    /// happened.
    pub(crate) fn set_state(&self, next: TaskState, expected: TaskState) -> bool {
        self.state
            .compare_exchange(
                expected as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
