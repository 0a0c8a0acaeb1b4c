// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anti-abuse counters for users waiting on a generative slot.
//!
//! Two rolling windows run per user: a short one catching rapid bursts and
//! a long one catching sustained flooding. Soft limits escalate the queue
//! notice; the hard limit puts the user into a cooldown during which
//! general-question handling is suspended.

use paydesk_config::model::AdmissionConfig;
use paydesk_state::record::ConversationRecord;
use tracing::info;

/// Outcome of counting one message from a queued user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamVerdict {
    /// Within all limits.
    Ok,
    /// A soft limit was crossed; send the escalated flood notice.
    SoftFlood,
    /// The hard limit was crossed; the cooldown has been applied.
    HardCooldown,
}

pub struct SpamGuard {
    short_window_ms: i64,
    short_soft: u32,
    long_window_ms: i64,
    long_soft: u32,
    long_hard: u32,
    cooldown_ms: i64,
    notice_interval_ms: i64,
}

impl SpamGuard {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            short_window_ms: (config.short_window_secs * 1_000) as i64,
            short_soft: config.short_soft_limit,
            long_window_ms: (config.long_window_secs * 1_000) as i64,
            long_soft: config.long_soft_limit,
            long_hard: config.long_hard_limit,
            cooldown_ms: (config.cooldown_secs * 1_000) as i64,
            notice_interval_ms: (config.notice_interval_secs * 1_000) as i64,
        }
    }

    /// Bumps both windows for one message and applies the hard cooldown when
    /// the long-window hard limit is reached.
    pub fn note_message(&self, rec: &mut ConversationRecord, now_ms: i64) -> SpamVerdict {
        let short = rec.spam_short.bump(now_ms, self.short_window_ms);
        let long = rec.spam_long.bump(now_ms, self.long_window_ms);

        if long >= self.long_hard {
            rec.cooldown_until_ms = Some(now_ms + self.cooldown_ms);
            info!(count = long, "hard flood limit reached, cooldown applied");
            return SpamVerdict::HardCooldown;
        }
        if short >= self.short_soft || long >= self.long_soft {
            return SpamVerdict::SoftFlood;
        }
        SpamVerdict::Ok
    }

    /// Rate limiter for queue/flood/cooldown notices: at most one per
    /// configured interval regardless of message volume. Stamps the record
    /// when a notice is allowed.
    pub fn may_notice(&self, rec: &mut ConversationRecord, now_ms: i64) -> bool {
        let due = rec
            .last_notice_ms
            .is_none_or(|at| now_ms - at >= self.notice_interval_ms);
        if due {
            rec.last_notice_ms = Some(now_ms);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SpamGuard {
        SpamGuard::new(&AdmissionConfig::default())
    }

    #[test]
    fn normal_pace_stays_ok() {
        let g = guard();
        let mut rec = ConversationRecord::default();
        for i in 0..5 {
            assert_eq!(g.note_message(&mut rec, i * 10_000), SpamVerdict::Ok);
        }
    }

    #[test]
    fn six_in_thirty_seconds_is_soft_flood() {
        let g = guard();
        let mut rec = ConversationRecord::default();
        for i in 0..5 {
            assert_eq!(g.note_message(&mut rec, i * 1_000), SpamVerdict::Ok);
        }
        assert_eq!(g.note_message(&mut rec, 5_000), SpamVerdict::SoftFlood);
    }

    #[test]
    fn fifteen_in_two_minutes_is_soft_flood() {
        let g = guard();
        let mut rec = ConversationRecord::default();
        // 7s apart: never 6 within any 30s short window, but 15 land in 120s.
        let mut verdicts = Vec::new();
        for i in 0..15 {
            verdicts.push(g.note_message(&mut rec, i * 7_000));
        }
        assert_eq!(*verdicts.last().unwrap(), SpamVerdict::SoftFlood);
    }

    #[test]
    fn hard_limit_applies_cooldown() {
        let g = guard();
        let mut rec = ConversationRecord::default();
        let mut last = SpamVerdict::Ok;
        for i in 0..40 {
            last = g.note_message(&mut rec, 1_000 + i * 10);
        }
        assert_eq!(last, SpamVerdict::HardCooldown);
        assert!(rec.cooldown_active(1_400));
        // 5-minute cooldown.
        assert!(rec.cooldown_active(1_390 + 299_000));
        assert!(!rec.cooldown_active(1_390 + 301_000));
    }

    #[test]
    fn windows_restart_after_elapsing() {
        let g = guard();
        let mut rec = ConversationRecord::default();
        for i in 0..5 {
            g.note_message(&mut rec, i * 1_000);
        }
        // 31s later the short window restarted; long window also elapsed at
        // 130s, so counts start over.
        assert_eq!(g.note_message(&mut rec, 131_000), SpamVerdict::Ok);
    }

    #[test]
    fn notices_rate_limited_to_one_per_interval() {
        let g = guard();
        let mut rec = ConversationRecord::default();
        assert!(g.may_notice(&mut rec, 1_000));
        assert!(!g.may_notice(&mut rec, 30_000));
        assert!(g.may_notice(&mut rec, 61_000));
    }
}
