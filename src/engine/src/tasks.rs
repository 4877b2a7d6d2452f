// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The bucket's recurring background tasks: the two-phase tombstone
//! purger, the item pager, the connection manager sweep, and (for
//! persistent buckets) the flusher driving the disk contract.

use crate::bucket::BucketInner;
use executor::{Task, TaskControl, TaskType};
use seqstore::{ProgressTracker, Seqno, VBucket};

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fraction of the memory quota the pager reclaims down to.
const PAGER_LOW_WATER: f64 = 0.75;

const PAGER_BATCH: usize = 256;

fn sorted_vbuckets(bucket: &BucketInner) -> Vec<Arc<VBucket>> {
    let mut vbs = bucket.all_vbuckets();
    vbs.sort_by_key(|vb| vb.id());
    vbs
}

// ----------------------------------------------------------------------
// tombstone purger, phase one: hash table sweep

/// Visits every vbucket's hash table and marks aged tombstones stale,
/// handing them to the sequence list. Chunk-yields on its deadline and
/// resumes where it stopped. After a completed pass it sleeps for the
/// purge interval and wakes the stale item deleter to run phase two.
pub(crate) struct TombstoneHtCleanerTask {
    bucket: Arc<BucketInner>,
    deleter_task: u64,
    /// (vbucket id, hash bucket index) to resume from mid-pass.
    position: Option<(u16, usize)>,
}

impl TombstoneHtCleanerTask {
    pub(crate) fn new(bucket: Arc<BucketInner>, deleter_task: u64) -> Box<Self> {
        Box::new(Self {
            bucket,
            deleter_task,
            position: None,
        })
    }
}

impl Task for TombstoneHtCleanerTask {
    fn run(&mut self, ctl: &TaskControl) -> bool {
        let interval = Duration::from_secs(self.bucket.purge_interval().max(1));
        let purge_age = self.bucket.purge_age();
        if purge_age < 0 {
            ctl.snooze(interval);
            return true;
        }

        let mut tracker =
            ProgressTracker::new(Instant::now() + self.bucket.purge_chunk_duration());
        let (resume_vb, mut resume_bucket) = self.position.take().unwrap_or((0, 0));
        let mut marked = 0;

        for vb in sorted_vbuckets(&self.bucket) {
            if vb.id() < resume_vb {
                continue;
            }
            let sweep = vb.mark_old_tombstones_stale(
                purge_age as u32,
                &mut tracker,
                if vb.id() == resume_vb { resume_bucket } else { 0 },
            );
            marked += sweep.marked;
            if let Some(bucket_index) = sweep.resume {
                // out of chunk budget; run again as soon as possible
                self.position = Some((vb.id(), bucket_index));
                ctl.snooze(Duration::ZERO);
                return true;
            }
            resume_bucket = 0;
        }
        let _ = resume_bucket;

        if marked > 0 {
            info!("tombstone ht sweep marked {} records stale", marked);
        }
        // completed a full pass: phase two takes over
        self.bucket.pool.wake(self.deleter_task);
        ctl.snooze(interval);
        true
    }

    fn description(&self) -> &'static str {
        "tombstone hashtable cleaner"
    }

    fn task_type(&self) -> TaskType {
        TaskType::NonIo
    }

    fn priority(&self) -> u8 {
        6
    }
}

// ----------------------------------------------------------------------
// tombstone purger, phase two: sequence list sweep

/// Scans every sequence list and frees stale records. Sleeps until the
/// hash table cleaner wakes it after a completed phase-one pass.
pub(crate) struct StaleItemDeleterTask {
    bucket: Arc<BucketInner>,
    /// (vbucket id, seqno) to resume after mid-pass.
    position: Option<(u16, Seqno)>,
}

impl StaleItemDeleterTask {
    pub(crate) fn new(bucket: Arc<BucketInner>) -> Box<Self> {
        Box::new(Self {
            bucket,
            position: None,
        })
    }
}

impl Task for StaleItemDeleterTask {
    fn run(&mut self, ctl: &TaskControl) -> bool {
        let mut tracker =
            ProgressTracker::new(Instant::now() + self.bucket.purge_chunk_duration());
        let (resume_vb, mut resume_seqno) = self.position.take().unwrap_or((0, 0));
        let mut purged = 0;

        for vb in sorted_vbuckets(&self.bucket) {
            if vb.id() < resume_vb {
                continue;
            }
            let sweep = vb.purge_stale_items(
                &mut tracker,
                if vb.id() == resume_vb { resume_seqno } else { 0 },
            );
            purged += sweep.purged;
            if let Some(seqno) = sweep.resume {
                self.position = Some((vb.id(), seqno));
                ctl.snooze(Duration::ZERO);
                return true;
            }
            resume_seqno = 0;
        }
        let _ = resume_seqno;

        if purged > 0 {
            info!("stale item deleter purged {} records", purged);
        }
        // rely on the hashtable cleaner to wake us for the next pass
        ctl.snooze_forever();
        true
    }

    fn description(&self) -> &'static str {
        "tombstone stale item deleter"
    }

    fn task_type(&self) -> TaskType {
        TaskType::NonIo
    }

    fn priority(&self) -> u8 {
        6
    }
}

// ----------------------------------------------------------------------
// item pager

/// Pages resident items out of active vbuckets when memory use crosses
/// the quota, until use drops to the low water mark. Sleeps until the
/// store path wakes it on a quota breach.
pub(crate) struct ItemPagerTask {
    bucket: Arc<BucketInner>,
}

impl ItemPagerTask {
    pub(crate) fn new(bucket: Arc<BucketInner>) -> Box<Self> {
        Box::new(Self { bucket })
    }
}

impl Task for ItemPagerTask {
    fn run(&mut self, ctl: &TaskControl) -> bool {
        let quota = self.bucket.mem_quota();
        let low_water = (quota as f64 * PAGER_LOW_WATER) as usize;
        let mut ejected = 0usize;

        if self.bucket.mem.used() > quota {
            'pass: for vb in sorted_vbuckets(&self.bucket) {
                if vb.state() != seqstore::VBucketState::Active {
                    continue;
                }
                for key in vb.eviction_candidates(PAGER_BATCH) {
                    if self.bucket.mem.used() <= low_water {
                        break 'pass;
                    }
                    if let seqstore::PageOutResult::Ejected(notify) = vb.page_out(&key) {
                        ejected += 1;
                        self.bucket.notify_replication(&notify);
                    }
                }
            }
            info!(
                "item pager ejected {} items, memory now {} bytes",
                ejected,
                self.bucket.mem.used()
            );
        }

        ctl.snooze_forever();
        true
    }

    fn description(&self) -> &'static str {
        "ephemeral item pager"
    }

    fn task_type(&self) -> TaskType {
        TaskType::NonIo
    }

    fn priority(&self) -> u8 {
        1
    }
}

// ----------------------------------------------------------------------
// connection manager

/// Periodic sweep dropping dead streams from the bucket's registry.
pub(crate) struct ConnManagerTask {
    bucket: Arc<BucketInner>,
}

impl ConnManagerTask {
    pub(crate) fn new(bucket: Arc<BucketInner>) -> Box<Self> {
        Box::new(Self { bucket })
    }
}

impl Task for ConnManagerTask {
    fn run(&mut self, ctl: &TaskControl) -> bool {
        let removed = self.bucket.reap_dead_streams();
        if removed > 0 {
            debug!("connection manager reaped {} dead streams", removed);
        }
        ctl.snooze(Duration::from_secs(
            self.bucket.connection_manager_interval().max(1),
        ));
        true
    }

    fn description(&self) -> &'static str {
        "connection manager"
    }

    fn task_type(&self) -> TaskType {
        TaskType::NonIo
    }

    fn priority(&self) -> u8 {
        7
    }
}

// ----------------------------------------------------------------------
// flusher (persistent buckets only)

/// Drives the persistence contract: asks the disk layer to flush each
/// vbucket, re-running immediately while any vbucket reports more work.
pub(crate) struct FlusherTask {
    bucket: Arc<BucketInner>,
}

impl FlusherTask {
    pub(crate) fn new(bucket: Arc<BucketInner>) -> Box<Self> {
        Box::new(Self { bucket })
    }
}

impl Task for FlusherTask {
    fn run(&mut self, ctl: &TaskControl) -> bool {
        let kvstore = match self.bucket.kvstore() {
            Some(kvstore) => kvstore,
            None => return false,
        };
        let mut more_work = false;
        for vb in sorted_vbuckets(&self.bucket) {
            let outcome = kvstore.flush_vbucket(vb.id());
            more_work |= outcome.more_work;
        }
        if more_work {
            ctl.snooze(Duration::ZERO);
        } else {
            ctl.snooze(Duration::from_secs(1));
        }
        true
    }

    fn description(&self) -> &'static str {
        "flusher"
    }

    fn task_type(&self) -> TaskType {
        TaskType::Writer
    }

    fn priority(&self) -> u8 {
        0
    }
}
