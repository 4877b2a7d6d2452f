// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A cooperative task scheduler. Background work is expressed as [`Task`]
//! objects which are scheduled onto one of four typed queues (Reader,
//! Writer, AuxIo, NonIo). Each queue is drained by a resizable set of
//! worker threads.
//!
//! Scheduling is cooperative within a thread: a task runs to the end of
//! its `run()` call and yields by returning. Returning `true` reschedules
//! the task at its current snooze time; returning `false` removes it.
//! Tasks run in parallel across worker threads.
//!
//! Each queue keeps three tiers:
//!
//! * a future queue, ordered by earliest wake time
//! * a ready queue, ordered by task priority (FIFO within a priority)
//! * a pending queue, for tasks deferred by the per-type concurrency limit

#[macro_use]
extern crate log;

mod pool;
mod queue;
mod task;

pub use pool::ExecutorPool;
pub use task::{Task, TaskControl, TaskState, TaskType};

#[cfg(test)]
mod tests;
