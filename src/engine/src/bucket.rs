// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The bucket: a set of vbuckets plus the background machinery that
//! keeps them healthy. This is the surface the protocol layer talks to.
//!
//! Buckets come in two kinds. An ephemeral bucket keeps everything in
//! memory and persists nothing; a persistent bucket additionally drives
//! the disk layer through the [`KVStore`](crate::KVStore) contract (the
//! disk formats themselves live behind that trait). The storage core is
//! shared; the few operations whose semantics diverge (page-out,
//! failover persistence, flushing) branch on the kind.

use crate::dcp::{ActiveStream, BackfillTask, ScanBudget, StreamHandle};
use crate::deletion::VBucketDeletionTask;
use crate::error::ErrorKind;
use crate::notifier::ConnNotifier;
use crate::tasks::{
    ConnManagerTask, FlusherTask, ItemPagerTask, StaleItemDeleterTask, TombstoneHtCleanerTask,
};
use crate::{xattr, ConnectionSink, Cookie, KVStore};

use config::{
    BackfillType, EngineConfig, EphemeralConfig, ExecutorConfig, FullPolicy, TernConfig,
};
use executor::ExecutorPool;
use seqstore::{
    datatype, FailoverTable, Item, MemoryTracker, MutationError, NotifyCtx, PredicateResult,
    RollbackDecision, Seqno, VBucket, VBucketOptions, VBucketState, VBucketStats,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Longest key the engine accepts, matching the protocol limit.
const MAX_KEY_LEN: usize = 250;

/// Headroom above the quota before mutations fail outright even under
/// the auto-delete policy.
const QUOTA_HARD_FACTOR: f64 = 1.1;

#[derive(Clone)]
pub enum BucketKind {
    Ephemeral,
    Persistent(Arc<dyn KVStore>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Set,
    Add,
    Replace,
    Cas,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreResult {
    pub cas: u64,
    pub seqno: Seqno,
    pub vbucket_uuid: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteResult {
    pub cas: u64,
    pub seqno: Seqno,
}

pub(crate) struct BucketInner {
    pub(crate) mem: Arc<MemoryTracker>,
    pub(crate) pool: Arc<ExecutorPool>,
    pub(crate) notifier: Arc<ConnNotifier>,
    kind: BucketKind,
    mem_quota: usize,
    max_item_size: usize,
    full_policy: FullPolicy,
    xattr_enabled: bool,
    ht_initial_size: usize,
    ht_stripes: usize,
    ht_max_load_factor: f64,
    max_failover_entries: usize,
    connection_manager_interval: u64,
    purge_interval: u64,
    purge_age: i64,
    purge_chunk_ms: u64,
    backfill_type: BackfillType,
    stream_high_water: usize,
    vbuckets: RwLock<HashMap<u16, Arc<VBucket>>>,
    streams: Mutex<Vec<Arc<ActiveStream>>>,
    budget: Arc<ScanBudget>,
    pager_task: AtomicU64,
    delete_revision: AtomicU64,
}

impl BucketInner {
    pub(crate) fn all_vbuckets(&self) -> Vec<Arc<VBucket>> {
        self.vbuckets.read().unwrap().values().cloned().collect()
    }

    pub(crate) fn kvstore(&self) -> Option<Arc<dyn KVStore>> {
        match &self.kind {
            BucketKind::Ephemeral => None,
            BucketKind::Persistent(kvstore) => Some(kvstore.clone()),
        }
    }

    pub(crate) fn mem_quota(&self) -> usize {
        self.mem_quota
    }

    pub(crate) fn purge_interval(&self) -> u64 {
        self.purge_interval
    }

    pub(crate) fn purge_age(&self) -> i64 {
        self.purge_age
    }

    pub(crate) fn purge_chunk_duration(&self) -> Duration {
        Duration::from_millis(self.purge_chunk_ms)
    }

    pub(crate) fn connection_manager_interval(&self) -> u64 {
        self.connection_manager_interval
    }

    pub(crate) fn next_delete_revision(&self) -> u64 {
        self.delete_revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Post-mutation fanout: wake every stream (and thereby connection)
    /// interested in this vbucket. Called with no storage locks held.
    pub(crate) fn notify_replication(&self, ctx: &NotifyCtx) {
        if !ctx.notify_replication {
            return;
        }
        let streams = self.streams.lock().unwrap();
        for stream in streams.iter() {
            if stream.vb() == ctx.vb && stream.state() != crate::dcp::StreamState::Dead {
                stream.notify_data_ready();
            }
        }
    }

    pub(crate) fn close_streams_for(&self, vb: u16) {
        let streams = self.streams.lock().unwrap();
        for stream in streams.iter() {
            if stream.vb() == vb {
                stream.set_dead();
            }
        }
    }

    pub(crate) fn reap_dead_streams(&self) -> usize {
        let mut streams = self.streams.lock().unwrap();
        let before = streams.len();
        streams.retain(|s| s.state() != crate::dcp::StreamState::Dead);
        before - streams.len()
    }

    fn wake_pager(&self) {
        let id = self.pager_task.load(Ordering::Acquire);
        if id != 0 {
            self.pool.wake(id);
        }
    }
}

/// A running bucket.
pub struct Bucket {
    inner: Arc<BucketInner>,
}

impl Bucket {
    pub fn new(config: &TernConfig, kind: BucketKind, sink: Arc<dyn ConnectionSink>) -> Self {
        let pool = ExecutorPool::new(config.executor());
        let mem = Arc::new(MemoryTracker::new());
        let notifier = ConnNotifier::new(sink, pool.clone());

        let engine = config.engine();
        let ephemeral = config.ephemeral();
        let inner = Arc::new(BucketInner {
            mem,
            pool: pool.clone(),
            notifier: notifier.clone(),
            kind,
            mem_quota: engine.mem_quota(),
            max_item_size: engine.max_item_size(),
            full_policy: ephemeral.full_policy(),
            xattr_enabled: engine.xattr_enabled(),
            ht_initial_size: engine.hash_initial_size(),
            ht_stripes: engine.hash_stripes(),
            ht_max_load_factor: engine.hash_max_load_factor(),
            max_failover_entries: engine.max_failover_entries(),
            connection_manager_interval: engine.connection_manager_interval(),
            purge_interval: ephemeral.metadata_purge_interval(),
            purge_age: ephemeral.metadata_purge_age(),
            purge_chunk_ms: ephemeral.purge_chunk_duration(),
            backfill_type: ephemeral.backfill_type(),
            stream_high_water: engine.dcp_stream_buffer_size(),
            vbuckets: RwLock::new(HashMap::new()),
            streams: Mutex::new(Vec::new()),
            budget: ScanBudget::new(ephemeral.backfill_scan_buffer()),
            pager_task: AtomicU64::new(0),
            delete_revision: AtomicU64::new(0),
        });

        notifier.start();

        // phase two sleeps until phase one wakes it
        let deleter_id = pool.schedule(StaleItemDeleterTask::new(inner.clone()), Duration::MAX);
        if inner.purge_interval > 0 {
            pool.schedule(
                TombstoneHtCleanerTask::new(inner.clone(), deleter_id),
                Duration::from_secs(inner.purge_interval),
            );
        }

        let pager_id = pool.schedule(ItemPagerTask::new(inner.clone()), Duration::MAX);
        inner.pager_task.store(pager_id, Ordering::Release);

        pool.schedule(
            ConnManagerTask::new(inner.clone()),
            Duration::from_secs(inner.connection_manager_interval.max(1)),
        );

        if inner.kvstore().is_some() {
            pool.schedule(FlusherTask::new(inner.clone()), Duration::from_secs(1));
        }

        Self { inner }
    }

    pub fn mem_used(&self) -> usize {
        self.inner.mem.used()
    }

    /// Stop the notifier and every worker thread. Queued background
    /// work is dropped.
    pub fn shutdown(&self) {
        self.inner.notifier.stop();
        self.inner.pool.shutdown();
    }

    // ------------------------------------------------------------------
    // vbucket management

    pub fn create_vbucket(&self, vb: u16, state: VBucketState) -> Result<(), ErrorKind> {
        self.create_vbucket_inner(vb, state, FailoverTable::new(self.inner.max_failover_entries))
    }

    /// Create a vbucket restoring its failover history from persisted
    /// JSON (sanitizing bad entries).
    pub fn restore_vbucket(
        &self,
        vb: u16,
        state: VBucketState,
        failover_json: &str,
    ) -> Result<(), ErrorKind> {
        let table = FailoverTable::from_json(failover_json, self.inner.max_failover_entries)
            .map_err(|_| ErrorKind::InvalidArgument)?;
        self.create_vbucket_inner(vb, state, table)
    }

    fn create_vbucket_inner(
        &self,
        vb: u16,
        state: VBucketState,
        failover_table: FailoverTable,
    ) -> Result<(), ErrorKind> {
        let mut vbuckets = self.inner.vbuckets.write().unwrap();
        if vbuckets.contains_key(&vb) {
            return Err(ErrorKind::KeyAlreadyExists);
        }
        let vbucket = VBucket::new(
            VBucketOptions {
                id: vb,
                state,
                ht_initial_size: self.inner.ht_initial_size,
                ht_stripes: self.inner.ht_stripes,
                ht_max_load_factor: self.inner.ht_max_load_factor,
                failover_table,
            },
            Arc::new(seqstore::NullCheckpointHook),
            self.inner.mem.clone(),
        );
        if state == VBucketState::Active {
            vbucket.failover().create_entry(vbucket.high_seqno() as u64);
        }
        self.persist_failover(&vbucket);
        self.inner.notifier.register_vbucket(vb);
        vbuckets.insert(vb, vbucket);
        Ok(())
    }

    pub fn set_vbucket_state(&self, vb: u16, state: VBucketState) -> Result<(), ErrorKind> {
        let vbucket = self.vbucket(vb)?;
        vbucket.set_state(state);
        if state == VBucketState::Active {
            // promotion starts a new history branch
            vbucket.failover().create_entry(vbucket.high_seqno() as u64);
            self.persist_failover(&vbucket);
        }
        Ok(())
    }

    /// Tear a vbucket down off the hot path: it disappears from the map
    /// now, and a NonIO task frees the storage, fails pending
    /// notifications, and finally wakes `cookie`.
    pub fn delete_vbucket(&self, vb: u16, cookie: Option<Cookie>) -> Result<(), ErrorKind> {
        let vbucket = {
            let mut vbuckets = self.inner.vbuckets.write().unwrap();
            vbuckets.remove(&vb).ok_or(ErrorKind::NotMyVBucket)?
        };
        vbucket.set_state(VBucketState::Dead);
        self.inner.pool.schedule(
            VBucketDeletionTask::new(self.inner.clone(), vbucket, cookie),
            Duration::ZERO,
        );
        Ok(())
    }

    pub fn vbucket_state(&self, vb: u16) -> Option<VBucketState> {
        self.inner
            .vbuckets
            .read()
            .unwrap()
            .get(&vb)
            .map(|v| v.state())
    }

    pub fn vbucket_stats(&self, vb: u16) -> Option<VBucketStats> {
        self.inner
            .vbuckets
            .read()
            .unwrap()
            .get(&vb)
            .map(|v| v.stats())
    }

    pub fn failover_table_json(&self, vb: u16) -> Option<String> {
        self.inner
            .vbuckets
            .read()
            .unwrap()
            .get(&vb)
            .map(|v| v.failover().to_json())
    }

    fn vbucket(&self, vb: u16) -> Result<Arc<VBucket>, ErrorKind> {
        self.inner
            .vbuckets
            .read()
            .unwrap()
            .get(&vb)
            .cloned()
            .ok_or(ErrorKind::NotMyVBucket)
    }

    fn active_vbucket(&self, vb: u16) -> Result<Arc<VBucket>, ErrorKind> {
        let vbucket = self.vbucket(vb)?;
        if vbucket.state() != VBucketState::Active {
            return Err(ErrorKind::NotMyVBucket);
        }
        Ok(vbucket)
    }

    fn persist_failover(&self, vbucket: &Arc<VBucket>) {
        if let Some(kvstore) = self.inner.kvstore() {
            kvstore.persist_failover_table(vbucket.id(), &vbucket.failover().to_json());
        }
    }

    // ------------------------------------------------------------------
    // data path

    /// Store a document. The pipeline runs validate, optional fetch of
    /// the existing version (xattr preservation), allocate, store; a
    /// predicate failure loops back to the fetch stage exactly once.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        vb: u16,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expiry: u32,
        dtype: u8,
        cas: u64,
        op: StoreOp,
    ) -> Result<StoreResult, ErrorKind> {
        // validate
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(ErrorKind::InvalidArgument);
        }
        if !xattr::validate(dtype, value) {
            return Err(ErrorKind::InvalidArgument);
        }
        if value.len() > self.inner.max_item_size {
            return Err(ErrorKind::TooBig);
        }
        if op == StoreOp::Cas && cas == 0 {
            return Err(ErrorKind::InvalidArgument);
        }
        let vbucket = self.active_vbucket(vb)?;
        self.check_quota(value.len())?;

        let mut item = Item::new(key, value, flags, expiry, dtype);
        let preserve_xattrs = self.inner.xattr_enabled
            && dtype & datatype::XATTR == 0
            && matches!(op, StoreOp::Set | StoreOp::Cas | StoreOp::Replace);

        let mut predicate_enabled = preserve_xattrs;
        loop {
            let result = match op {
                StoreOp::Set | StoreOp::Cas => {
                    if predicate_enabled {
                        vbucket.set_with_predicate(item.clone(), cas, &xattr_guard)
                    } else {
                        vbucket.set(item.clone(), cas)
                    }
                }
                StoreOp::Add => vbucket.add(item.clone()),
                StoreOp::Replace => {
                    if predicate_enabled {
                        // replace has no predicate path; carve the
                        // existing xattrs off up front
                        if let Some(existing) = vbucket.get(key) {
                            let (xattrs, _) = xattr::split(existing.datatype, &existing.value);
                            if !xattrs.is_empty() {
                                item = self.spliced(key, value, flags, expiry, dtype, xattrs);
                            }
                        }
                        predicate_enabled = false;
                    }
                    vbucket.replace(item.clone(), cas)
                }
            };

            match result {
                Ok(outcome) => {
                    self.inner.notify_replication(&outcome.notify);
                    return Ok(StoreResult {
                        cas: outcome.cas,
                        seqno: outcome.seqno,
                        vbucket_uuid: vbucket.failover().latest_uuid(),
                    });
                }
                Err(MutationError::PredicateFailed) => {
                    // fetch the existing version, graft its xattrs in
                    // front of the new body, retry with the predicate
                    // disabled (bounded to one retry)
                    debug_assert!(predicate_enabled);
                    predicate_enabled = false;
                    if let Some(existing) = vbucket.get(key) {
                        let (xattrs, _) = xattr::split(existing.datatype, &existing.value);
                        if !xattrs.is_empty() {
                            item = self.spliced(key, value, flags, expiry, dtype, xattrs);
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn spliced(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expiry: u32,
        dtype: u8,
        xattrs: &[u8],
    ) -> Item {
        Item::new(
            key,
            &xattr::splice(xattrs, value),
            flags,
            expiry,
            dtype | datatype::XATTR,
        )
    }

    fn check_quota(&self, incoming: usize) -> Result<(), ErrorKind> {
        let used = self.inner.mem.used();
        let quota = self.inner.mem_quota;
        if used + incoming <= quota {
            return Ok(());
        }
        match self.inner.full_policy {
            FullPolicy::FailNewData => Err(ErrorKind::TemporaryFailure),
            FullPolicy::AutoDelete => {
                self.inner.wake_pager();
                if used as f64 > quota as f64 * QUOTA_HARD_FACTOR {
                    Err(ErrorKind::TemporaryFailure)
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn get(&self, vb: u16, key: &[u8]) -> Result<Item, ErrorKind> {
        let vbucket = self.active_vbucket(vb)?;
        vbucket.get(key).ok_or(ErrorKind::NotFound)
    }

    /// Conditional fetch: the caller's predicate sees the item's
    /// metadata and decides whether the value should be returned.
    pub fn get_if(
        &self,
        vb: u16,
        key: &[u8],
        predicate: &dyn Fn(&Item) -> bool,
    ) -> Result<Option<Item>, ErrorKind> {
        let vbucket = self.active_vbucket(vb)?;
        let item = vbucket.get(key).ok_or(ErrorKind::NotFound)?;
        if predicate(&item) {
            Ok(Some(item))
        } else {
            Ok(None)
        }
    }

    pub fn delete(&self, vb: u16, key: &[u8], cas: u64) -> Result<DeleteResult, ErrorKind> {
        let vbucket = self.active_vbucket(vb)?;
        let outcome = vbucket.delete(key, cas)?;
        self.inner.notify_replication(&outcome.notify);
        Ok(DeleteResult {
            cas: outcome.cas,
            seqno: outcome.seqno,
        })
    }

    // ------------------------------------------------------------------
    // replication

    /// Open a DCP stream for `[start_seqno, end_seqno]`. If the
    /// client's history diverged from ours, the rollback seqno comes
    /// back as `ErrorKind::Rollback` and no stream is created.
    #[allow(clippy::too_many_arguments)]
    pub fn open_dcp_stream(
        &self,
        vb: u16,
        start_seqno: u64,
        end_seqno: u64,
        client_uuid: u64,
        snap_start_seqno: u64,
        snap_end_seqno: u64,
        cookie: Cookie,
    ) -> Result<StreamHandle, ErrorKind> {
        let vbucket = self.vbucket(vb)?;
        if vbucket.state() == VBucketState::Dead {
            return Err(ErrorKind::NotMyVBucket);
        }

        let cur = vbucket.high_seqno() as u64;
        match vbucket.failover().needs_rollback(
            start_seqno,
            cur,
            client_uuid,
            snap_start_seqno,
            snap_end_seqno,
            vbucket.purge_seqno(),
        ) {
            RollbackDecision::Rollback { to } => {
                info!(
                    "vb:{} stream request (start:{}) requires rollback to {}",
                    vb, start_seqno, to
                );
                return Err(ErrorKind::Rollback {
                    to_seqno: to as Seqno,
                });
            }
            RollbackDecision::NotNeeded => {}
        }

        let stream = ActiveStream::new(
            vb,
            cookie,
            self.inner.stream_high_water,
            self.inner.pool.clone(),
            self.inner.notifier.clone(),
            self.inner.budget.clone(),
        );

        let backfill_wanted =
            self.inner.backfill_type == BackfillType::Buffered && start_seqno < cur;
        if backfill_wanted {
            // the stream start is the last seqno the client already
            // has; backfill begins one past it
            let task = BackfillTask::new(
                vbucket.clone(),
                stream.clone(),
                self.inner.budget.clone(),
                start_seqno as Seqno + 1,
                end_seqno.min(i64::MAX as u64) as Seqno,
            );
            let id = self.inner.pool.schedule(task, Duration::ZERO);
            stream.set_backfill_task(id);
        } else {
            // nothing to backfill (or backfill disabled); the stream is
            // immediately complete
            stream.mark_snapshot(start_seqno as Seqno, start_seqno as Seqno);
            stream.complete_backfill();
        }

        self.inner.streams.lock().unwrap().push(stream.clone());
        Ok(StreamHandle { inner: stream })
    }

    /// Count of streams the bucket still tracks (dead streams are
    /// reaped by the connection manager).
    pub fn num_streams(&self) -> usize {
        self.inner.streams.lock().unwrap().len()
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The xattr-preserving predicate: reject a store that would drop the
/// previous version's xattrs, so the pipeline can graft them in.
fn xattr_guard(existing: Option<&Item>) -> PredicateResult {
    match existing {
        Some(existing) if !existing.deleted && existing.has_xattr() => PredicateResult::Fail,
        _ => PredicateResult::Continue,
    }
}
