// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The manual-handoff gate.
//!
//! Two suppression mechanisms share this module: a per-user window that
//! opens automatically when intake completes (a human is taking over, the
//! bot must go quiet for that user), and a global switch the operator flips
//! with `#manual` / `#auto`. While a per-user window is open, inbound
//! messages are absorbed and coalesced into rate-limited operator
//! notifications instead of replies.

use std::sync::atomic::{AtomicBool, Ordering};

use paydesk_config::model::ManualConfig;
use paydesk_state::record::ConversationRecord;
use tracing::debug;

/// Max chars of a suppressed message carried into an operator notification.
const SUMMARY_MAX_CHARS: usize = 60;

/// Coalesced report of messages absorbed during a manual window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstNotice {
    /// Messages absorbed since the previous notification.
    pub count: u32,
    /// Truncated text of the most recent absorbed message.
    pub summary: String,
}

pub struct ManualGate {
    window_ms: i64,
    notify_cooldown_ms: i64,
    global: AtomicBool,
}

impl ManualGate {
    pub fn new(config: &ManualConfig) -> Self {
        Self {
            window_ms: (config.window_secs * 1_000) as i64,
            notify_cooldown_ms: (config.notify_cooldown_secs * 1_000) as i64,
            global: AtomicBool::new(false),
        }
    }

    /// Opens the per-user window; called when intake completes. Restarts
    /// burst tracking for the new window.
    pub fn activate(&self, rec: &mut ConversationRecord, now_ms: i64) {
        rec.manual_until_ms = Some(now_ms + self.window_ms);
        rec.manual_burst_count = 0;
        rec.manual_last_summary = None;
        rec.manual_last_notified_ms = None;
    }

    /// Checks the per-user window, expiring it lazily. When a window is
    /// found expired, the intake flow resets so the next contact starts
    /// fresh. Returns true iff the window is still open.
    pub fn check_active(&self, rec: &mut ConversationRecord, now_ms: i64) -> bool {
        match rec.manual_until_ms {
            Some(until) if until > now_ms => true,
            Some(_) => {
                debug!("manual window expired, resetting intake");
                rec.manual_until_ms = None;
                rec.manual_burst_count = 0;
                rec.manual_last_summary = None;
                rec.manual_last_notified_ms = None;
                rec.reset_intake();
                false
            }
            None => false,
        }
    }

    /// Absorbs one suppressed message. Burst counting continues across the
    /// whole window; a notification is emitted at most once per notify
    /// cooldown, carrying everything absorbed since the previous one.
    pub fn absorb(
        &self,
        rec: &mut ConversationRecord,
        now_ms: i64,
        summary: &str,
    ) -> Option<BurstNotice> {
        rec.manual_burst_count += 1;
        rec.manual_last_summary = Some(truncate_chars(summary, SUMMARY_MAX_CHARS));

        let due = rec
            .manual_last_notified_ms
            .is_none_or(|at| now_ms - at >= self.notify_cooldown_ms);
        if !due {
            return None;
        }
        let notice = BurstNotice {
            count: rec.manual_burst_count,
            summary: rec.manual_last_summary.clone().unwrap_or_default(),
        };
        rec.manual_burst_count = 0;
        rec.manual_last_notified_ms = Some(now_ms);
        Some(notice)
    }

    /// Global switch: while set, every non-operator event is dropped.
    pub fn global_enabled(&self) -> bool {
        self.global.load(Ordering::Acquire)
    }

    pub fn set_global(&self, enabled: bool) {
        self.global.store(enabled, Ordering::Release);
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}
