// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Wakes paused client connections when the engine has data for them.
//!
//! Producers (mutation notifications, backfill completion, deferred
//! deletion) enqueue a connection cookie on its vbucket's pending queue;
//! a single scheduled NonIO task drains every queue and invokes the
//! protocol layer's I/O-completion callback exactly once per pending
//! entry. Duplicate wakeups collapse on a per-connection scheduled flag
//! held under the queue lock.

use crate::{ConnectionSink, Cookie, IoCompleteStatus};
use executor::{ExecutorPool, Task, TaskControl, TaskType};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sleep between drains when no notification arrived meanwhile.
const IDLE_SNOOZE: Duration = Duration::from_secs(1);

struct PendingInner {
    queue: Vec<Cookie>,
    scheduled: HashSet<Cookie>,
}

/// One vbucket's pending-notification queue (multi-producer).
pub(crate) struct VbPending {
    inner: Mutex<PendingInner>,
}

impl VbPending {
    fn new() -> Self {
        Self {
            inner: Mutex::new(PendingInner {
                queue: Vec::new(),
                scheduled: HashSet::new(),
            }),
        }
    }

    /// Returns whether the cookie was newly enqueued (false when a
    /// notification for it is already scheduled).
    fn push(&self, cookie: Cookie) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.scheduled.insert(cookie) {
            inner.queue.push(cookie);
            true
        } else {
            false
        }
    }

    fn drain(&self) -> Vec<Cookie> {
        let mut inner = self.inner.lock().unwrap();
        let queue = std::mem::take(&mut inner.queue);
        for cookie in &queue {
            inner.scheduled.remove(cookie);
        }
        queue
    }
}

pub(crate) struct ConnNotifier {
    sink: Arc<dyn ConnectionSink>,
    pool: Arc<ExecutorPool>,
    vbs: Mutex<HashMap<u16, Arc<VbPending>>>,
    pending_notification: AtomicBool,
    task_id: AtomicU64,
}

impl ConnNotifier {
    pub(crate) fn new(sink: Arc<dyn ConnectionSink>, pool: Arc<ExecutorPool>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            pool,
            vbs: Mutex::new(HashMap::new()),
            pending_notification: AtomicBool::new(false),
            task_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn start(self: &Arc<Self>) {
        let task = Box::new(ConnNotifierTask {
            notifier: self.clone(),
        });
        let id = self.pool.schedule(task, Duration::ZERO);
        self.task_id.store(id, Ordering::Release);
    }

    pub(crate) fn stop(&self) {
        let id = self.task_id.load(Ordering::Acquire);
        if id != 0 {
            self.pool.cancel(id, true);
        }
    }

    pub(crate) fn register_vbucket(&self, vb: u16) {
        self.vbs
            .lock()
            .unwrap()
            .insert(vb, Arc::new(VbPending::new()));
    }

    /// Queue a wakeup for `cookie` once its vbucket has data. No-op for
    /// an unregistered (deleted) vbucket.
    pub(crate) fn notify_io_waiter(&self, vb: u16, cookie: Cookie) {
        let pending = match self.vbs.lock().unwrap().get(&vb) {
            Some(p) => p.clone(),
            None => return,
        };
        if pending.push(cookie)
            && self
                .pending_notification
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let id = self.task_id.load(Ordering::Acquire);
            if id != 0 {
                self.pool.wake(id);
            }
        }
    }

    /// Invoke the completion callback directly, bypassing the pending
    /// queue. Used for one-shot completions (vbucket deletion waiters).
    pub(crate) fn complete(&self, cookie: Cookie, status: IoCompleteStatus) {
        self.sink.notify_io_complete(cookie, status);
    }

    /// Fail and unregister a vbucket's pending notifications. Called by
    /// deferred deletion before the storage is dropped.
    pub(crate) fn fail_pending(&self, vb: u16) {
        let pending = self.vbs.lock().unwrap().remove(&vb);
        if let Some(pending) = pending {
            for cookie in pending.drain() {
                self.sink
                    .notify_io_complete(cookie, IoCompleteStatus::TemporaryFailure);
            }
        }
    }

    fn notify_connections(&self, ctl: &TaskControl) {
        self.pending_notification.store(false, Ordering::Release);

        let queues: Vec<Arc<VbPending>> = self.vbs.lock().unwrap().values().cloned().collect();
        for pending in queues {
            for cookie in pending.drain() {
                self.sink
                    .notify_io_complete(cookie, IoCompleteStatus::Success);
            }
        }

        if !self.pending_notification.load(Ordering::Acquire) {
            ctl.snooze(IDLE_SNOOZE);
            if self.pending_notification.load(Ordering::Acquire) {
                // a notification raced the snooze decision; run again now
                ctl.snooze(Duration::ZERO);
            }
        } else {
            ctl.snooze(Duration::ZERO);
        }
    }
}

struct ConnNotifierTask {
    notifier: Arc<ConnNotifier>,
}

impl Task for ConnNotifierTask {
    fn run(&mut self, ctl: &TaskControl) -> bool {
        self.notifier.notify_connections(ctl);
        true
    }

    fn description(&self) -> &'static str {
        "connection notifier"
    }

    fn task_type(&self) -> TaskType {
        TaskType::NonIo
    }

    fn priority(&self) -> u8 {
        3
    }
}
