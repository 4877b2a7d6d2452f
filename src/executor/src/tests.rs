// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use super::*;
use crate::queue::{Fetched, TaskQueue};
use crate::task::TaskEntry;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct FnTask<F> {
    f: F,
    task_type: TaskType,
    priority: u8,
}

impl<F> FnTask<F>
where
    F: FnMut(&TaskControl) -> bool + Send,
{
    fn boxed(task_type: TaskType, priority: u8, f: F) -> Box<Self> {
        Box::new(Self {
            f,
            task_type,
            priority,
        })
    }
}

impl<F> Task for FnTask<F>
where
    F: FnMut(&TaskControl) -> bool + Send,
{
    fn run(&mut self, ctl: &TaskControl) -> bool {
        (self.f)(ctl)
    }

    fn description(&self) -> &'static str {
        "test task"
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn oneshot_task_runs_once() {
    let pool = ExecutorPool::with_threads([0, 0, 0, 1]);
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    pool.schedule(
        FnTask::boxed(TaskType::NonIo, 5, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            false
        }),
        Duration::ZERO,
    );
    assert!(wait_for(Duration::from_secs(5), || {
        count.load(Ordering::SeqCst) == 1
    }));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    pool.shutdown();
}

#[test]
fn recurring_task_reschedules_at_snooze_time() {
    let pool = ExecutorPool::with_threads([0, 0, 0, 1]);
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    pool.schedule(
        FnTask::boxed(TaskType::NonIo, 5, move |ctl| {
            c.fetch_add(1, Ordering::SeqCst);
            ctl.snooze(Duration::from_millis(1));
            true
        }),
        Duration::ZERO,
    );
    assert!(wait_for(Duration::from_secs(5), || {
        count.load(Ordering::SeqCst) >= 3
    }));
    pool.shutdown();
}

#[test]
fn wake_preempts_long_snooze() {
    let pool = ExecutorPool::with_threads([0, 0, 0, 1]);
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let id = pool.schedule(
        FnTask::boxed(TaskType::NonIo, 5, move |ctl| {
            c.fetch_add(1, Ordering::SeqCst);
            ctl.snooze(Duration::from_secs(3600));
            true
        }),
        Duration::from_secs(3600),
    );
    // not yet run
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), 0);

    assert!(pool.wake(id));
    assert!(wait_for(Duration::from_secs(5), || {
        count.load(Ordering::SeqCst) == 1
    }));
    pool.shutdown();
}

#[test]
fn cancel_stops_task() {
    let pool = ExecutorPool::with_threads([0, 0, 0, 1]);
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let id = pool.schedule(
        FnTask::boxed(TaskType::NonIo, 5, move |ctl| {
            c.fetch_add(1, Ordering::SeqCst);
            ctl.snooze(Duration::from_millis(1));
            true
        }),
        Duration::ZERO,
    );
    assert!(wait_for(Duration::from_secs(5), || {
        count.load(Ordering::SeqCst) >= 1
    }));
    assert!(pool.cancel(id, true));
    let after = count.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(100));
    // at most one more run could have been in flight when cancel landed
    assert!(count.load(Ordering::SeqCst) <= after + 1);
    // the locator slot was freed
    assert!(!pool.wake(id));
    pool.shutdown();
}

#[test]
fn tasks_route_to_their_queue_type() {
    let pool = ExecutorPool::with_threads([1, 1, 1, 1]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    for t in [
        TaskType::Reader,
        TaskType::Writer,
        TaskType::AuxIo,
        TaskType::NonIo,
    ] {
        let s = seen.clone();
        pool.schedule(
            FnTask::boxed(t, 5, move |_| {
                s.lock()
                    .unwrap()
                    .push(std::thread::current().name().unwrap().to_string());
                false
            }),
            Duration::ZERO,
        );
    }
    assert!(wait_for(Duration::from_secs(5), || {
        seen.lock().unwrap().len() == 4
    }));
    let seen = seen.lock().unwrap();
    for prefix in ["Reader", "Writer", "AuxIO", "NonIO"] {
        assert!(
            seen.iter().any(|n| n.starts_with(prefix)),
            "no task ran on a {} thread: {:?}",
            prefix,
            *seen
        );
    }
    pool.shutdown();
}

#[test]
fn resize_workers_at_runtime() {
    let pool = ExecutorPool::with_threads([0, 0, 0, 1]);
    assert_eq!(pool.num_workers(TaskType::NonIo), 1);
    pool.set_num_workers(TaskType::NonIo, 4);
    assert_eq!(pool.num_workers(TaskType::NonIo), 4);
    pool.set_num_workers(TaskType::NonIo, 2);
    assert_eq!(pool.num_workers(TaskType::NonIo), 2);

    // the shrunken pool still runs tasks
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    pool.schedule(
        FnTask::boxed(TaskType::NonIo, 5, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            false
        }),
        Duration::ZERO,
    );
    assert!(wait_for(Duration::from_secs(5), || {
        count.load(Ordering::SeqCst) == 1
    }));
    pool.shutdown();
}

// Queue-level ordering checks run against a bare TaskQueue for
// determinism: no worker threads are involved.

fn entry(uid: u64, priority: u8, epoch: Instant) -> crate::task::TaskRef {
    TaskEntry::new(
        uid,
        epoch,
        FnTask::boxed(TaskType::NonIo, priority, |_| false),
        Duration::ZERO,
    )
}

#[test]
fn ready_order_is_priority_then_fifo() {
    let epoch = Instant::now();
    let queue = TaskQueue::new(TaskType::NonIo);

    let low = entry(1, 9, epoch);
    let high = entry(2, 0, epoch);
    let high_later = entry(3, 0, epoch);
    queue.schedule(low.clone());
    queue.schedule(high.clone());
    queue.schedule(high_later.clone());

    let mut order = Vec::new();
    for _ in 0..3 {
        match queue.fetch_next_task() {
            Fetched::Task(t) => {
                order.push(t.uid);
                queue.done_running();
            }
            Fetched::Empty => panic!("queue should have a ready task"),
        }
    }
    assert_eq!(order, vec![2, 3, 1]);
}

#[test]
fn future_task_not_ready_before_waketime() {
    let epoch = Instant::now();
    let queue = TaskQueue::new(TaskType::NonIo);

    let task = TaskEntry::new(
        1,
        epoch,
        FnTask::boxed(TaskType::NonIo, 5, |_| false),
        Duration::from_secs(3600),
    );
    queue.schedule(task.clone());
    assert!(matches!(queue.fetch_next_task(), Fetched::Empty));
    assert_eq!(queue.future_len(), 1);

    queue.wake(&task);
    match queue.fetch_next_task() {
        Fetched::Task(t) => assert_eq!(t.uid, 1),
        Fetched::Empty => panic!("woken task should be ready"),
    }
}

#[test]
fn concurrency_limit_defers_to_pending() {
    let epoch = Instant::now();
    let queue = TaskQueue::new(TaskType::NonIo);
    queue.set_max_concurrency(1);

    queue.schedule(entry(1, 5, epoch));
    queue.schedule(entry(2, 5, epoch));

    let first = match queue.fetch_next_task() {
        Fetched::Task(t) => t,
        Fetched::Empty => panic!("first task should be ready"),
    };
    assert_eq!(first.uid, 1);

    // second fetch is over the limit and defers
    assert!(matches!(queue.fetch_next_task(), Fetched::Empty));

    queue.done_running();
    match queue.fetch_next_task() {
        Fetched::Task(t) => assert_eq!(t.uid, 2),
        Fetched::Empty => panic!("deferred task should now run"),
    }
}
