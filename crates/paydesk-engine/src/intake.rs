// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The intake state machine.
//!
//! Walks each user through AwaitingOrder -> AwaitingProof -> Completed:
//! collect a 5-digit order id, then a payment-proof image, then hand the
//! conversation to a human. Order ids are extracted from free text with a
//! keyword-proximity heuristic; everything here is synchronous and operates
//! on the caller-locked [`ConversationRecord`].

use paydesk_config::model::{IntakeConfig, KeywordsConfig, MessagesConfig};
use paydesk_core::{InboundEvent, MessageKind};
use paydesk_state::record::{ConversationRecord, Phase};
use regex::Regex;
use tracing::debug;

/// Max distance, in chars, between an order-context keyword and a 5-digit
/// run for the run to be accepted as an order id.
const ORDER_KEYWORD_PROXIMITY: usize = 10;

/// What the intake machine decided about one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeAction {
    /// Intake consumed the event; send this reply and stop.
    Reply(String),
    /// Proof accepted: send the reply, notify the operator once, and open
    /// the manual-handoff window.
    Handoff {
        reply: String,
        order_id: String,
        proof_ref: String,
    },
    /// Plain text the intake flow does not claim; it goes on to the
    /// knowledge base and the generative fallback.
    Passthrough(String),
}

/// Pure decision logic for the intake protocol.
pub struct IntakeMachine {
    keywords: KeywordsConfig,
    messages: MessagesConfig,
    order_ttl_ms: i64,
    proof_ttl_ms: i64,
    digit_run: Regex,
}

impl IntakeMachine {
    pub fn new(intake: &IntakeConfig, keywords: KeywordsConfig, messages: MessagesConfig) -> Self {
        Self {
            keywords,
            messages,
            order_ttl_ms: (intake.order_ttl_hours * 3_600_000) as i64,
            proof_ttl_ms: (intake.proof_ttl_days * 86_400_000) as i64,
            digit_run: Regex::new(r"\d+").expect("static digit pattern compiles"),
        }
    }

    /// Applies the phase TTL before any other rule. An intake left idle past
    /// its TTL reverts to the start so a stale order id cannot be completed
    /// weeks later. Returns true if the record was reset.
    pub fn apply_ttl(&self, rec: &mut ConversationRecord, now_ms: i64) -> bool {
        if rec.last_activity_ms == 0 {
            return false;
        }
        let idle = now_ms - rec.last_activity_ms;
        let expired = match rec.phase {
            Phase::AwaitingOrder => idle >= self.order_ttl_ms,
            Phase::AwaitingProof => idle >= self.proof_ttl_ms,
            // Completed records are owned by the manual-window and
            // retention clocks, not the intake TTLs.
            Phase::Completed => false,
        };
        if expired {
            debug!(phase = %rec.phase, idle_ms = idle, "intake phase expired, resetting");
            rec.reset_intake();
        }
        expired
    }

    /// Decides what to do with one event. The TTL must already have been
    /// applied. Mutates the record for accepted transitions.
    pub fn handle(&self, rec: &mut ConversationRecord, event: &InboundEvent) -> IntakeAction {
        match (&event.kind, rec.phase) {
            (MessageKind::Text(text), phase) => self.handle_text(rec, phase, text),
            (MessageKind::Image { content_id }, Phase::AwaitingProof) => {
                self.accept_proof(rec, content_id)
            }
            // Image before an order id is on file: repeat the order prompt.
            (MessageKind::Image { .. }, Phase::AwaitingOrder) => {
                IntakeAction::Reply(self.messages.ask_order.clone())
            }
            (MessageKind::Image { .. }, Phase::Completed) => {
                // Duplicate proof after completion. Idempotent: same reply,
                // no second notification.
                IntakeAction::Reply(self.messages.completed.clone())
            }
            (MessageKind::Other, Phase::AwaitingOrder) => {
                IntakeAction::Reply(self.messages.ask_order.clone())
            }
            (MessageKind::Other, Phase::AwaitingProof) => {
                IntakeAction::Reply(self.messages.ask_proof.clone())
            }
            (MessageKind::Other, Phase::Completed) => {
                IntakeAction::Reply(self.messages.completed.clone())
            }
        }
    }

    fn handle_text(&self, rec: &mut ConversationRecord, phase: Phase, text: &str) -> IntakeAction {
        if phase != Phase::AwaitingOrder && self.has_reset_intent(text) {
            rec.reset_intake();
            return IntakeAction::Reply(self.messages.ask_order.clone());
        }
        match phase {
            Phase::AwaitingOrder => {
                // An exact 5-digit message is always an order id; it never
                // reaches the knowledge base or the generative backend.
                let trimmed = text.trim();
                if trimmed.len() == 5 && trimmed.chars().all(|c| c.is_ascii_digit()) {
                    return self.accept_order(rec, trimmed.to_string());
                }
                IntakeAction::Passthrough(text.to_string())
            }
            // Any non-reset text while a proof is pending: repeat the prompt.
            Phase::AwaitingProof => IntakeAction::Reply(self.messages.ask_proof.clone()),
            Phase::Completed => IntakeAction::Passthrough(text.to_string()),
        }
    }

    /// Payment-intent branch for free text while awaiting an order id.
    ///
    /// Runs either before or after the knowledge lookup depending on the
    /// `kb_first` policy, so it is a separate entry point from [`handle`].
    /// Returns `None` when the text carries no payment intent.
    pub fn try_payment_intent(
        &self,
        rec: &mut ConversationRecord,
        text: &str,
    ) -> Option<IntakeAction> {
        if rec.phase != Phase::AwaitingOrder || !self.has_payment_intent(text) {
            return None;
        }
        match self.extract_order_id(text) {
            Some(order_id) => Some(self.accept_order(rec, order_id)),
            // Intent without a usable id: ask for the id rather than
            // treating the message as a general question.
            None => Some(IntakeAction::Reply(self.messages.ask_order.clone())),
        }
    }

    fn accept_order(&self, rec: &mut ConversationRecord, order_id: String) -> IntakeAction {
        debug!(order_id = %order_id, "order id accepted");
        rec.order_id = Some(order_id);
        rec.phase = Phase::AwaitingProof;
        IntakeAction::Reply(self.messages.ask_proof.clone())
    }

    fn accept_proof(&self, rec: &mut ConversationRecord, content_id: &str) -> IntakeAction {
        rec.proof_received = true;
        rec.proof_ref = Some(content_id.to_string());
        rec.phase = Phase::Completed;
        IntakeAction::Handoff {
            reply: self.messages.completed.clone(),
            order_id: rec.order_id.clone().unwrap_or_default(),
            proof_ref: content_id.to_string(),
        }
    }

    pub fn has_payment_intent(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.keywords.payment_intent.iter().any(|k| lowered.contains(k.as_str()))
    }

    pub fn has_reset_intent(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.keywords.reset_intent.iter().any(|k| lowered.contains(k.as_str()))
    }

    /// Pulls a 5-digit order id out of free text.
    ///
    /// A 5-digit run within [`ORDER_KEYWORD_PROXIMITY`] chars of an
    /// order-context keyword always wins. A bare 5-digit run is accepted
    /// only when no longer run (7+ digits, phone numbers and the like)
    /// appears anywhere in the text.
    pub fn extract_order_id(&self, text: &str) -> Option<String> {
        let runs: Vec<regex::Match<'_>> = self.digit_run.find_iter(text).collect();
        let has_long_run = runs.iter().any(|m| m.as_str().len() >= 7);
        let five_runs: Vec<&regex::Match<'_>> =
            runs.iter().filter(|m| m.as_str().len() == 5).collect();
        if five_runs.is_empty() {
            return None;
        }

        let lowered = text.to_lowercase();
        for run in &five_runs {
            for keyword in &self.keywords.order_context {
                for (kw_start, matched) in lowered.match_indices(keyword.as_str()) {
                    let kw_end = kw_start + matched.len();
                    // Offsets come from the lowercased copy; lowercasing can
                    // shift byte positions for a few scripts, so slice
                    // fallibly and measure the gap on the lowered text.
                    let gap = if kw_end <= run.start() {
                        lowered.get(kw_end..run.start())
                    } else if run.end() <= kw_start {
                        lowered.get(run.end()..kw_start)
                    } else {
                        Some("")
                    };
                    if gap.is_some_and(|g| g.chars().count() <= ORDER_KEYWORD_PROXIMITY) {
                        return Some(run.as_str().to_string());
                    }
                }
            }
        }

        if !has_long_run {
            return Some(five_runs[0].as_str().to_string());
        }
        None
    }
}
