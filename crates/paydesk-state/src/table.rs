// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The conversation state table: the single in-memory authority for all
//! per-user records.
//!
//! All record mutation goes through [`StateTable::with_record`], which marks
//! the table dirty for the snapshot scheduler. Per-user mutual exclusion is
//! the pipeline's job; the table itself only guarantees map-level safety.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use paydesk_core::UserId;
use tokio::sync::Notify;
use tracing::debug;

use crate::record::ConversationRecord;

/// Durable mapping from user id to conversation record.
pub struct StateTable {
    records: DashMap<String, ConversationRecord>,
    dirty: AtomicBool,
    changed: Notify,
}

impl Default for StateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTable {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            dirty: AtomicBool::new(false),
            changed: Notify::new(),
        }
    }

    /// Runs `f` against the user's record, creating a default record on first
    /// contact, and marks the table dirty.
    pub fn with_record<R>(
        &self,
        user: &UserId,
        f: impl FnOnce(&mut ConversationRecord) -> R,
    ) -> R {
        let mut entry = self.records.entry(user.0.clone()).or_default();
        let out = f(entry.value_mut());
        drop(entry);
        self.mark_dirty();
        out
    }

    /// Read-only view of a user's record, if one exists. Does not mark dirty.
    pub fn peek(&self, user: &UserId) -> Option<ConversationRecord> {
        self.records.get(&user.0).map(|r| r.value().clone())
    }

    /// Removes a user's record entirely (operator reset path).
    pub fn remove(&self, user: &UserId) -> Option<ConversationRecord> {
        let removed = self.records.remove(&user.0).map(|(_, r)| r);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Marks the table dirty and wakes the snapshot scheduler.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.changed.notify_one();
    }

    /// Clears and returns the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Waits until some mutation marks the table dirty.
    pub async fn wait_changed(&self) {
        self.changed.notified().await;
    }

    /// Clones the full table for serialization.
    pub fn export(&self) -> HashMap<String, ConversationRecord> {
        self.records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Replaces the table contents from a loaded snapshot.
    ///
    /// Keys failing the user-id shape check are discarded; each kept record
    /// was already merged over defaults by serde during deserialization.
    pub fn import(&self, loaded: HashMap<String, ConversationRecord>) {
        self.records.clear();
        let mut discarded = 0usize;
        for (key, record) in loaded {
            if UserId::is_valid_str(&key) {
                self.records.insert(key, record);
            } else {
                discarded += 1;
            }
        }
        if discarded > 0 {
            debug!(discarded, "discarded snapshot entries with invalid user ids");
        }
    }

    /// Applies the capacity policy: drop records untouched for longer than
    /// `retention_ms`, then evict least-recently-active records until the
    /// table fits under `max_records`. Returns how many records were removed.
    pub fn prune(&self, now_ms: i64, retention_ms: i64, max_records: usize) -> usize {
        let before = self.records.len();

        self.records
            .retain(|_, rec| now_ms - rec.last_activity_ms <= retention_ms);

        if self.records.len() > max_records {
            let mut by_activity: Vec<(String, i64)> = self
                .records
                .iter()
                .map(|r| (r.key().clone(), r.value().last_activity_ms))
                .collect();
            by_activity.sort_by_key(|(_, at)| *at);
            let excess = self.records.len() - max_records;
            for (key, _) in by_activity.into_iter().take(excess) {
                self.records.remove(&key);
            }
        }

        let removed = before - self.records.len();
        if removed > 0 {
            self.mark_dirty();
            debug!(removed, remaining = self.records.len(), "pruned state table");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Phase;

    fn uid(n: u8) -> UserId {
        UserId(format!("U{:032x}", n))
    }

    #[test]
    fn with_record_creates_on_first_contact() {
        let table = StateTable::new();
        let phase = table.with_record(&uid(1), |rec| rec.phase);
        assert_eq!(phase, Phase::AwaitingOrder);
        assert_eq!(table.len(), 1);
        assert!(table.take_dirty());
    }

    #[test]
    fn peek_does_not_create_or_dirty() {
        let table = StateTable::new();
        assert!(table.peek(&uid(1)).is_none());
        assert!(!table.take_dirty());
    }

    #[test]
    fn export_import_round_trip() {
        let table = StateTable::new();
        table.with_record(&uid(1), |rec| {
            rec.phase = Phase::AwaitingProof;
            rec.order_id = Some("12345".into());
        });
        let exported = table.export();

        let fresh = StateTable::new();
        fresh.import(exported);
        let rec = fresh.peek(&uid(1)).unwrap();
        assert_eq!(rec.phase, Phase::AwaitingProof);
        assert_eq!(rec.order_id.as_deref(), Some("12345"));
    }

    #[test]
    fn import_discards_invalid_keys() {
        let mut loaded = HashMap::new();
        loaded.insert(uid(1).0, ConversationRecord::default());
        loaded.insert("not-a-user".to_string(), ConversationRecord::default());
        let table = StateTable::new();
        table.import(loaded);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn prune_drops_stale_records() {
        let table = StateTable::new();
        table.with_record(&uid(1), |rec| rec.last_activity_ms = 1_000);
        table.with_record(&uid(2), |rec| rec.last_activity_ms = 500_000);
        let removed = table.prune(1_000_000, 600_000, 100);
        assert_eq!(removed, 1);
        assert!(table.peek(&uid(1)).is_none());
        assert!(table.peek(&uid(2)).is_some());
    }

    #[test]
    fn prune_evicts_least_recently_active_over_cap() {
        let table = StateTable::new();
        for n in 0..5u8 {
            table.with_record(&uid(n), |rec| rec.last_activity_ms = i64::from(n) * 1_000);
        }
        table.take_dirty();
        let removed = table.prune(10_000, i64::MAX, 3);
        assert_eq!(removed, 2);
        assert!(table.peek(&uid(0)).is_none());
        assert!(table.peek(&uid(1)).is_none());
        assert!(table.peek(&uid(4)).is_some());
        assert!(table.take_dirty());
    }
}
