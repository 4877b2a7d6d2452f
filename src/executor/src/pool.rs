// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::queue::{Fetched, TaskQueue};
use crate::task::{Task, TaskControl, TaskEntry, TaskRef, TaskType, NUM_TASK_TYPES};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Shared {
    epoch: Instant,
    queues: [TaskQueue; NUM_TASK_TYPES],
    locator: Mutex<HashMap<u64, TaskRef>>,
    next_uid: AtomicU64,
    shutdown: AtomicBool,
}

impl Shared {
    fn queue(&self, t: TaskType) -> &TaskQueue {
        &self.queues[t as usize]
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// The executor pool: one typed queue per [`TaskType`], each drained by a
/// runtime-resizable set of worker threads.
pub struct ExecutorPool {
    shared: Arc<Shared>,
    workers: Mutex<[Vec<Worker>; NUM_TASK_TYPES]>,
}

impl ExecutorPool {
    /// Create a pool with thread counts taken from the executor config
    /// section.
    pub fn new(config: &config::Executor) -> Arc<Self> {
        Self::with_threads([
            config.num_readers(),
            config.num_writers(),
            config.num_auxio(),
            config.num_nonio(),
        ])
    }

    /// Create a pool with explicit per-type thread counts, indexed by
    /// [`TaskType`].
    pub fn with_threads(threads: [usize; NUM_TASK_TYPES]) -> Arc<Self> {
        let shared = Arc::new(Shared {
            epoch: Instant::now(),
            queues: [
                TaskQueue::new(TaskType::Reader),
                TaskQueue::new(TaskType::Writer),
                TaskQueue::new(TaskType::AuxIo),
                TaskQueue::new(TaskType::NonIo),
            ],
            locator: Mutex::new(HashMap::new()),
            next_uid: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        });

        let pool = Arc::new(Self {
            shared,
            workers: Mutex::new([Vec::new(), Vec::new(), Vec::new(), Vec::new()]),
        });

        for (idx, count) in threads.iter().enumerate() {
            pool.set_num_workers(TaskType::from_index(idx), *count);
        }

        pool
    }

    /// Schedule a task; it first becomes runnable after `initial_sleep`.
    /// Returns the task id used with `wake`, `snooze` and `cancel`.
    pub fn schedule(&self, task: Box<dyn Task>, initial_sleep: Duration) -> u64 {
        let uid = self.shared.next_uid.fetch_add(1, Ordering::Relaxed);
        let queue_type = task.task_type();
        debug!(
            "scheduling task {} \"{}\" on {}",
            uid,
            task.description(),
            queue_type
        );
        let entry = TaskEntry::new(uid, self.shared.epoch, task, initial_sleep);
        self.shared
            .locator
            .lock()
            .unwrap()
            .insert(uid, entry.clone());
        self.shared.queue(queue_type).schedule(entry);
        uid
    }

    /// Make a snoozed task runnable as soon as possible.
    pub fn wake(&self, task_id: u64) -> bool {
        let entry = self.lookup(task_id);
        if let Some(entry) = entry {
            self.shared.queue(entry.task_type).wake(&entry);
            true
        } else {
            false
        }
    }

    /// Adjust a task's wake time to `after` from now.
    pub fn snooze(&self, task_id: u64, after: Duration) -> bool {
        let entry = self.lookup(task_id);
        if let Some(entry) = entry {
            entry.set_waketime_in(after);
            self.shared.queue(entry.task_type).touch(&entry);
            true
        } else {
            false
        }
    }

    /// Mark a task dead. It is discarded the next time a worker pops it.
    /// With `remove` set, the locator slot is freed immediately.
    pub fn cancel(&self, task_id: u64, remove: bool) -> bool {
        let entry = if remove {
            self.shared.locator.lock().unwrap().remove(&task_id)
        } else {
            self.lookup(task_id)
        };
        if let Some(entry) = entry {
            debug!("cancelling task {}", task_id);
            entry.cancel();
            // wake the queue so a sleeping worker can clear it out
            self.shared.queue(entry.task_type).touch(&entry);
            true
        } else {
            false
        }
    }

    fn lookup(&self, task_id: u64) -> Option<TaskRef> {
        self.shared.locator.lock().unwrap().get(&task_id).cloned()
    }

    /// Cap how many tasks of one type may run concurrently; tasks over the
    /// limit wait on the pending tier. Zero removes the limit.
    pub fn set_max_concurrency(&self, queue_type: TaskType, limit: usize) {
        self.shared.queue(queue_type).set_max_concurrency(limit);
    }

    pub fn num_workers(&self, queue_type: TaskType) -> usize {
        self.workers.lock().unwrap()[queue_type as usize].len()
    }

    /// Resize the worker set for one task type. Growing spawns threads
    /// immediately; shrinking signals the excess threads, which exit as
    /// they observe the request.
    pub fn set_num_workers(&self, queue_type: TaskType, count: usize) {
        let mut workers = self.workers.lock().unwrap();
        let group = &mut workers[queue_type as usize];

        while group.len() > count {
            let worker = group.pop().unwrap();
            worker.stop.store(true, Ordering::Release);
            self.shared.queue(queue_type).notify_all();
            // detach; the thread exits at its next queue check
            drop(worker.join);
        }

        while group.len() < count {
            let stop = Arc::new(AtomicBool::new(false));
            let shared = self.shared.clone();
            let thread_stop = stop.clone();
            let index = group.len();
            let join = std::thread::Builder::new()
                .name(format!("{}:{}", queue_type, index))
                .spawn(move || worker_loop(shared, queue_type, thread_stop))
                .expect("failed to spawn executor worker");
            group.push(Worker { stop, join });
        }
    }

    /// Stop all workers and wait for them to exit. Queued tasks that have
    /// not started are dropped.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for queue in &self.shared.queues {
            queue.notify_all();
        }
        let mut workers = self.workers.lock().unwrap();
        for group in workers.iter_mut() {
            for worker in group.drain(..) {
                worker.stop.store(true, Ordering::Release);
                let _ = worker.join.join();
            }
        }
        self.shared.locator.lock().unwrap().clear();
    }
}

impl Drop for ExecutorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, queue_type: TaskType, stop: Arc<AtomicBool>) {
    let queue = shared.queue(queue_type);
    let should_exit = || stop.load(Ordering::Acquire) || shared.shutdown.load(Ordering::Acquire);

    loop {
        if should_exit() {
            break;
        }

        let entry = match queue.sleep_then_fetch_next_task(&should_exit) {
            Fetched::Task(entry) => entry,
            Fetched::Empty => continue,
        };

        if entry.is_dead() {
            queue.done_running();
            shared.locator.lock().unwrap().remove(&entry.uid);
            continue;
        }

        let mut task = match entry.inner.lock().unwrap().take() {
            Some(task) => task,
            None => {
                queue.done_running();
                continue;
            }
        };

        let start = Instant::now();
        let again = task.run(&TaskControl { entry: &entry });
        let runtime = start.elapsed();
        if runtime > Duration::from_secs(1) {
            info!(
                "slow task {} \"{}\" ran for {:?}",
                entry.uid,
                task.description(),
                runtime
            );
        }
        queue.done_running();

        if again && !entry.is_dead() {
            *entry.inner.lock().unwrap() = Some(task);
            queue.reschedule(entry);
        } else {
            trace!("task {} \"{}\" done", entry.uid, task.description());
            entry.cancel();
            shared.locator.lock().unwrap().remove(&entry.uid);
        }
    }
}
