// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound event deduplication.
//!
//! Webhook delivery is at-least-once; the gateway acknowledges before
//! processing, so redeliveries of already-seen events must be dropped.
//! Keys combine user id, message id, and timestamp.

use dashmap::DashMap;
use tracing::trace;

pub struct DedupeWindow {
    seen: DashMap<String, i64>,
    window_ms: i64,
}

impl DedupeWindow {
    pub fn new(window_ms: i64) -> Self {
        Self {
            seen: DashMap::new(),
            window_ms,
        }
    }

    /// Returns true iff this key has not been seen within the window.
    /// Fresh keys are recorded; stale entries are pruned opportunistically.
    pub fn check_and_insert(&self, key: &str, now_ms: i64) -> bool {
        if let Some(at) = self.seen.get(key) {
            if now_ms - *at < self.window_ms {
                trace!(key, "duplicate event dropped");
                return false;
            }
        }
        self.seen.insert(key.to_string(), now_ms);
        if self.seen.len() > 1024 {
            self.prune(now_ms);
        }
        true
    }

    fn prune(&self, now_ms: i64) {
        self.seen.retain(|_, at| now_ms - *at < self.window_ms);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.len()
    }
}
