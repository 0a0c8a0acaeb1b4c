// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user conversation record and its intake phase.
//!
//! Every field is `#[serde(default)]` so snapshots written by older builds
//! load cleanly after schema growth, and snapshots from newer builds degrade
//! to defaults instead of failing.

use serde::{Deserialize, Serialize};

/// Intake phase of a conversation.
///
/// Advances AwaitingOrder -> AwaitingProof -> Completed. The only regressions
/// are explicit resets: reset intent, manual-window expiry, phase-TTL expiry,
/// or an operator `#reset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    AwaitingOrder,
    AwaitingProof,
    Completed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::AwaitingOrder => write!(f, "awaiting_order"),
            Phase::AwaitingProof => write!(f, "awaiting_proof"),
            Phase::Completed => write!(f, "completed"),
        }
    }
}

/// Rolling counter: window start timestamp plus a count within the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    #[serde(default)]
    pub started_at_ms: i64,
    #[serde(default)]
    pub count: u32,
}

impl RateWindow {
    /// Bumps the counter, restarting the window if `window_ms` has elapsed.
    /// Returns the count after the bump.
    pub fn bump(&mut self, now_ms: i64, window_ms: i64) -> u32 {
        if now_ms - self.started_at_ms >= window_ms {
            self.started_at_ms = now_ms;
            self.count = 0;
        }
        self.count += 1;
        self.count
    }
}

/// One end-user's durable conversation state.
///
/// Owned exclusively by the state table; mutated only inside that user's
/// serialized job slot. Timestamps are unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Intake phase.
    #[serde(default)]
    pub phase: Phase,

    /// Accepted 5-digit order id; set when phase leaves AwaitingOrder.
    #[serde(default)]
    pub order_id: Option<String>,

    /// True once a proof image has been accepted. Implies `phase == Completed`
    /// and guards against double notification.
    #[serde(default)]
    pub proof_received: bool,

    /// Platform content id of the accepted proof image.
    #[serde(default)]
    pub proof_ref: Option<String>,

    /// True once the one handoff notification for this intake has been pushed.
    #[serde(default)]
    pub handoff_notified: bool,

    /// While in the future, all automated replies to this user are suppressed.
    #[serde(default)]
    pub manual_until_ms: Option<i64>,

    /// Messages absorbed since the last operator notification.
    #[serde(default)]
    pub manual_burst_count: u32,

    /// Truncated summary of the most recently absorbed message.
    #[serde(default)]
    pub manual_last_summary: Option<String>,

    /// When the operator was last notified about suppressed activity.
    #[serde(default)]
    pub manual_last_notified_ms: Option<i64>,

    /// Last inbound activity; drives phase TTLs, idle greeting, and pruning.
    #[serde(default)]
    pub last_activity_ms: i64,

    /// When the reintroduction prefix was last sent.
    #[serde(default)]
    pub last_greet_ms: Option<i64>,

    /// While in the future, general-question answering is throttled.
    #[serde(default)]
    pub cooldown_until_ms: Option<i64>,

    /// Short anti-abuse window (30s by default).
    #[serde(default)]
    pub spam_short: RateWindow,

    /// Long anti-abuse window (120s by default).
    #[serde(default)]
    pub spam_long: RateWindow,

    /// Generative-queue membership flag.
    #[serde(default)]
    pub queued: bool,

    /// When the user entered the generative queue.
    #[serde(default)]
    pub queued_at_ms: Option<i64>,

    /// When a queue/flood notice was last sent; rate-limits notices.
    #[serde(default)]
    pub last_notice_ms: Option<i64>,
}

impl ConversationRecord {
    /// Reverts the intake flow to the start, clearing order and proof fields.
    /// Does not touch the manual window or cooldown clocks.
    pub fn reset_intake(&mut self) {
        self.phase = Phase::AwaitingOrder;
        self.order_id = None;
        self.proof_received = false;
        self.proof_ref = None;
        self.handoff_notified = false;
    }

    /// True iff the manual-handoff window is active at `now_ms`.
    pub fn manual_active(&self, now_ms: i64) -> bool {
        self.manual_until_ms.is_some_and(|t| t > now_ms)
    }

    /// True iff the abuse cooldown is active at `now_ms`.
    pub fn cooldown_active(&self, now_ms: i64) -> bool {
        self.cooldown_until_ms.is_some_and(|t| t > now_ms)
    }
}
