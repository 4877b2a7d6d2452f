// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Deferred vbucket deletion. Marking a vbucket dead removes it from the
//! bucket's map and schedules this NonIO task; teardown then runs off
//! the hot path: pending notifications are failed, the vbucket's streams
//! are closed, and the storage is dropped. A waiting connection is woken
//! once everything is gone.

use crate::bucket::BucketInner;
use crate::{Cookie, IoCompleteStatus};
use executor::{Task, TaskControl, TaskType};
use seqstore::VBucket;

use std::sync::Arc;

pub(crate) struct VBucketDeletionTask {
    bucket: Arc<BucketInner>,
    vb: Option<Arc<VBucket>>,
    cookie: Option<Cookie>,
}

impl VBucketDeletionTask {
    pub(crate) fn new(
        bucket: Arc<BucketInner>,
        vb: Arc<VBucket>,
        cookie: Option<Cookie>,
    ) -> Box<Self> {
        Box::new(Self {
            bucket,
            vb: Some(vb),
            cookie,
        })
    }
}

impl Task for VBucketDeletionTask {
    fn run(&mut self, _ctl: &TaskControl) -> bool {
        let vb = match self.vb.take() {
            Some(vb) => vb,
            None => return false,
        };
        let id = vb.id();
        info!("vb:{} deferred deletion running", id);

        self.bucket.close_streams_for(id);
        self.bucket.notifier.fail_pending(id);

        if let Some(kvstore) = self.bucket.kvstore() {
            let revision = self.bucket.next_delete_revision();
            kvstore.delete_vbucket(id, revision);
        }

        // an in-flight backfill may still hold the final reference; the
        // storage is freed as soon as it lets go
        drop(vb);

        if let Some(cookie) = self.cookie.take() {
            self.bucket
                .notifier
                .complete(cookie, IoCompleteStatus::Success);
        }
        false
    }

    fn description(&self) -> &'static str {
        "vbucket memory deletion"
    }

    fn task_type(&self) -> TaskType {
        TaskType::NonIo
    }

    fn priority(&self) -> u8 {
        2
    }
}
