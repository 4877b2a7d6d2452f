// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The failover table: a bounded history of `(uuid, seqno)` branch
//! points, newest first. A reconnecting replica presents the uuid and
//! snapshot bounds it last saw; the table decides whether the replica's
//! history diverged and, if so, the seqno to roll back to.

use crate::Seqno;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// One branch point. `seq` is the high seqno at which the branch was
/// created.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub struct FailoverEntry {
    pub id: u64,
    pub seq: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RollbackDecision {
    NotNeeded,
    Rollback { to: u64 },
}

struct Inner {
    table: VecDeque<FailoverEntry>,
    erroneous_erased: usize,
}

pub struct FailoverTable {
    inner: Mutex<Inner>,
    latest_uuid: AtomicU64,
    max_entries: usize,
}

fn generate_uuid() -> u64 {
    loop {
        let id: u64 = rand::thread_rng().gen();
        if id != 0 {
            return id;
        }
    }
}

impl FailoverTable {
    /// A fresh table for a new vbucket: one branch point at seqno zero.
    pub fn new(max_entries: usize) -> Self {
        let entry = FailoverEntry {
            id: generate_uuid(),
            seq: 0,
        };
        Self {
            inner: Mutex::new(Inner {
                table: VecDeque::from(vec![entry]),
                erroneous_erased: 0,
            }),
            latest_uuid: AtomicU64::new(entry.id),
            max_entries,
        }
    }

    /// Restore a table from its persisted JSON form, sanitizing bad
    /// entries. An empty (or fully erased) table gets a fresh branch
    /// point so the vbucket always has a current uuid.
    pub fn from_json(json: &str, max_entries: usize) -> Result<Self, serde_json::Error> {
        let entries: Vec<FailoverEntry> = serde_json::from_str(json)?;
        let (table, erased) = sanitize(entries);
        let mut table = VecDeque::from(table);
        if erased > 0 {
            warn!("erased {} erroneous failover entries on load", erased);
        }
        if table.is_empty() {
            table.push_front(FailoverEntry {
                id: generate_uuid(),
                seq: 0,
            });
        }
        while table.len() > max_entries {
            table.pop_back();
        }
        let latest = table.front().copied().unwrap();
        Ok(Self {
            inner: Mutex::new(Inner {
                table,
                erroneous_erased: erased,
            }),
            latest_uuid: AtomicU64::new(latest.id),
            max_entries,
        })
    }

    /// The persisted JSON form: `[{"id": .., "seq": ..}, ..]`, newest
    /// first.
    pub fn to_json(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let entries: Vec<FailoverEntry> = inner.table.iter().copied().collect();
        serde_json::to_string(&entries).expect("failover table serialization cannot fail")
    }

    pub fn latest_entry(&self) -> FailoverEntry {
        let inner = self.inner.lock().unwrap();
        *inner.table.front().expect("failover table is never empty")
    }

    /// Cached current-branch uuid, readable without the table lock.
    pub fn latest_uuid(&self) -> u64 {
        self.latest_uuid.load(Ordering::Acquire)
    }

    pub fn num_entries(&self) -> usize {
        self.inner.lock().unwrap().table.len()
    }

    /// How many entries the sanitizer dropped on load.
    pub fn num_erroneous_entries_erased(&self) -> usize {
        self.inner.lock().unwrap().erroneous_erased
    }

    pub fn remove_latest_entry(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.table.pop_front();
        if let Some(front) = inner.table.front() {
            self.latest_uuid.store(front.id, Ordering::Release);
        }
    }

    /// Record a new branch point at `high_seqno`.
    ///
    /// Creating an entry at the current head's seqno is a no-op. A lower
    /// seqno evicts every entry at or above it first: those branch
    /// points describe history that no longer exists.
    pub fn create_entry(&self, high_seqno: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.table.front().map(|e| e.seq) == Some(high_seqno) {
            return;
        }
        inner.table.retain(|e| e.seq < high_seqno);
        let entry = FailoverEntry {
            id: generate_uuid(),
            seq: high_seqno,
        };
        inner.table.push_front(entry);
        while inner.table.len() > self.max_entries {
            inner.table.pop_back();
        }
        self.latest_uuid.store(entry.id, Ordering::Release);
    }

    /// Drop entries describing history above `seqno`. Used after a
    /// rollback completes.
    pub fn prune_entries(&self, seqno: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.table.retain(|e| e.seq <= seqno);
        if inner.table.is_empty() {
            inner.table.push_front(FailoverEntry {
                id: generate_uuid(),
                seq: seqno,
            });
        }
        self.latest_uuid
            .store(inner.table.front().unwrap().id, Ordering::Release);
    }

    /// Decide whether a reconnecting client must roll back, and to
    /// where.
    pub fn needs_rollback(
        &self,
        start_seqno: u64,
        cur_seqno: u64,
        client_uuid: u64,
        snap_start_seqno: u64,
        snap_end_seqno: u64,
        purge_seqno: Seqno,
    ) -> RollbackDecision {
        // starting from the beginning can never diverge
        if start_seqno == 0 {
            return RollbackDecision::NotNeeded;
        }

        // a client exactly at its snapshot end has fully received the
        // snapshot; treat the snapshot as collapsed onto that point
        let (snap_start_seqno, snap_end_seqno) = if start_seqno == snap_end_seqno {
            (start_seqno, start_seqno)
        } else {
            (snap_start_seqno, snap_end_seqno)
        };

        let inner = self.inner.lock().unwrap();
        let position = inner.table.iter().position(|e| e.id == client_uuid);

        let to = match position {
            None => 0,
            Some(i) => {
                let entry = inner.table[i];
                let upper = if i == 0 {
                    u64::MAX
                } else {
                    inner.table[i - 1].seq
                };
                if start_seqno >= entry.seq && start_seqno < upper {
                    if snap_start_seqno > cur_seqno {
                        entry.seq
                    } else if snap_end_seqno > cur_seqno {
                        snap_start_seqno
                    } else {
                        return RollbackDecision::NotNeeded;
                    }
                } else {
                    0
                }
            }
        };

        // history below the purge seqno is gone; a rollback point inside
        // it cannot be replayed
        let to = if (to as i64) < purge_seqno { 0 } else { to };
        RollbackDecision::Rollback { to }
    }
}

/// Drop malformed entries from a loaded table: a zero seqno paired with
/// a non-zero uuid, duplicated uuids, and entries out of descending
/// seqno order. Returns the surviving entries (still newest first) and
/// the number erased.
fn sanitize(entries: Vec<FailoverEntry>) -> (Vec<FailoverEntry>, usize) {
    let total = entries.len();
    let mut kept_rev: Vec<FailoverEntry> = Vec::with_capacity(total);
    let mut seen_ids = std::collections::HashSet::new();
    let mut max_later_seq: Option<u64> = None;

    // walk oldest-first so "later" entries are the ones already kept
    for entry in entries.into_iter().rev() {
        if entry.seq == 0 && entry.id != 0 {
            continue;
        }
        if let Some(max) = max_later_seq {
            if entry.seq < max {
                continue;
            }
        }
        if !seen_ids.insert(entry.id) {
            continue;
        }
        max_later_seq = Some(entry.seq);
        kept_rev.push(entry);
    }

    kept_rev.reverse();
    let erased = total - kept_rev.len();
    (kept_rev, erased)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_has_one_entry_at_zero() {
        let table = FailoverTable::new(25);
        assert_eq!(table.num_entries(), 1);
        let latest = table.latest_entry();
        assert_eq!(latest.seq, 0);
        assert_ne!(latest.id, 0);
        assert_eq!(table.latest_uuid(), latest.id);
    }

    #[test]
    fn create_entry_same_seqno_is_noop() {
        let table = FailoverTable::new(25);
        table.create_entry(100);
        let first = table.latest_entry();
        table.create_entry(100);
        assert_eq!(table.latest_entry(), first);
        assert_eq!(table.num_entries(), 2);
    }

    #[test]
    fn create_entry_lower_seqno_evicts_higher_entries() {
        let table = FailoverTable::new(25);
        table.create_entry(100);
        table.create_entry(200);
        assert_eq!(table.num_entries(), 3);
        table.create_entry(150);
        // entries at 200 is gone; 150 heads the table
        assert_eq!(table.latest_entry().seq, 150);
        let json = table.to_json();
        let entries: Vec<FailoverEntry> = serde_json::from_str(&json).unwrap();
        assert!(entries.iter().all(|e| e.seq <= 150));
    }

    #[test]
    fn capacity_is_enforced() {
        let table = FailoverTable::new(3);
        for seq in 1..=10 {
            table.create_entry(seq * 10);
        }
        assert_eq!(table.num_entries(), 3);
        assert_eq!(table.latest_entry().seq, 100);
    }

    #[test]
    fn rollback_rules() {
        // loads as [(170, 200), (187, 100)]
        let json = r#"[{"id":170,"seq":200},{"id":187,"seq":100}]"#;
        let table2 = FailoverTable::from_json(json, 25).unwrap();

        // start of zero never rolls back
        assert_eq!(
            table2.needs_rollback(0, 300, 9999, 0, 0, 0),
            RollbackDecision::NotNeeded
        );
        // unknown uuid rolls back to zero
        assert_eq!(
            table2.needs_rollback(50, 300, 9999, 50, 50, 0),
            RollbackDecision::Rollback { to: 0 }
        );
        // in-range start with a complete snapshot: no rollback
        assert_eq!(
            table2.needs_rollback(150, 300, 187, 150, 150, 0),
            RollbackDecision::NotNeeded
        );
        // in-range start, snapshot beyond the producer: roll back to the
        // snapshot start
        assert_eq!(
            table2.needs_rollback(220, 300, 170, 210, 301, 0),
            RollbackDecision::Rollback { to: 210 }
        );
        // snapshot entirely beyond the producer: roll back to the branch
        assert_eq!(
            table2.needs_rollback(220, 300, 170, 310, 320, 0),
            RollbackDecision::Rollback { to: 200 }
        );
        // start outside the matching entry's range
        assert_eq!(
            table2.needs_rollback(90, 300, 170, 90, 90, 0),
            RollbackDecision::Rollback { to: 0 }
        );
        // chosen rollback point below the purge seqno collapses to zero
        assert_eq!(
            table2.needs_rollback(220, 300, 170, 210, 301, 250),
            RollbackDecision::Rollback { to: 0 }
        );
    }

    #[test]
    fn sanitized_load() {
        let json = concat!(
            r#"[{"id":0,"seq":0},"#,
            r#"{"id":1356861809263,"seq":100},"#,
            r#"{"id":227813077095126,"seq":200},"#,
            r#"{"id":227813077095128,"seq":300},"#,
            r#"{"id":0,"seq":50},"#,
            r#"{"id":160260368866392,"seq":0}]"#
        );
        let table = FailoverTable::from_json(json, 25).unwrap();
        assert_eq!(table.num_entries(), 2);
        assert_eq!(table.num_erroneous_entries_erased(), 4);
        assert_eq!(table.latest_entry().seq, 300);
        assert_eq!(table.latest_entry().id, 227813077095128);
    }

    #[test]
    fn json_round_trip() {
        let table = FailoverTable::new(25);
        table.create_entry(10);
        table.create_entry(20);
        let restored = FailoverTable::from_json(&table.to_json(), 25).unwrap();
        // the vbucket-creation entry at seqno zero does not survive a
        // reload; the real branch points do
        assert_eq!(restored.num_entries(), 2);
        assert_eq!(restored.latest_entry(), table.latest_entry());
        assert_eq!(restored.num_erroneous_entries_erased(), 1);
    }

    #[test]
    fn prune_drops_newer_history() {
        let table = FailoverTable::new(25);
        table.create_entry(100);
        table.create_entry(200);
        table.prune_entries(150);
        assert_eq!(table.latest_entry().seq, 100);
    }
}
