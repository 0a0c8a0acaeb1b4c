// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event pipeline: one inbound event in, at most one user-visible
//! action out.
//!
//! Stage order per event: dedupe, operator commands, the global manual
//! switch, the per-user manual gate, phase TTLs, the intake machine, then
//! general-question handling (knowledge base, admission control, generative
//! fallback). Events for the same user are serialized through a per-user
//! lock; events for different users run concurrently. A job failure is
//! logged at the task boundary and never takes the process down.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use paydesk_config::model::{MessagesConfig, PaydeskConfig};
use paydesk_core::{AnswerAdapter, InboundEvent, MessagingAdapter, PaydeskError, UserId};
use paydesk_knowledge::store::KnowledgeStore;
use paydesk_state::table::StateTable;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, QueueEligibility};
use crate::dedupe::DedupeWindow;
use crate::intake::{IntakeAction, IntakeMachine};
use crate::manual::{BurstNotice, ManualGate};
use crate::spam::{SpamGuard, SpamVerdict};

pub struct Pipeline {
    table: Arc<StateTable>,
    knowledge: Arc<KnowledgeStore>,
    messaging: Arc<dyn MessagingAdapter>,
    answer: Option<Arc<dyn AnswerAdapter>>,
    intake: IntakeMachine,
    manual: ManualGate,
    spam: SpamGuard,
    admission: AdmissionController,
    dedupe: DedupeWindow,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
    messages: MessagesConfig,
    admin: UserId,
    kb_first: bool,
    kb_top_k: usize,
    greet_idle_ms: i64,
}

/// Idle per-user locks are dropped once the map grows past this.
const USER_LOCK_HIGH_WATER: usize = 1_024;

/// What the prelude pass (manual gate, TTL, greeting, queue accounting)
/// decided.
enum Prelude {
    /// Manual window open: absorbed, optionally notify the operator.
    Suppressed(Option<BurstNotice>),
    /// Proceed; `greet` asks for the reintroduction prefix, `queued` is the
    /// flood verdict when the user is parked in the generative queue.
    Open {
        greet: bool,
        queued: Option<QueuedVerdict>,
    },
}

/// Flood accounting outcome for a queued user. Every message of any kind
/// bumps the rolling windows while the user waits for a slot.
enum QueuedVerdict {
    Waiting { flooding: bool },
    Kicked,
}

impl Pipeline {
    pub fn new(
        config: &PaydeskConfig,
        table: Arc<StateTable>,
        knowledge: Arc<KnowledgeStore>,
        messaging: Arc<dyn MessagingAdapter>,
        answer: Option<Arc<dyn AnswerAdapter>>,
        admin: UserId,
    ) -> Self {
        Self {
            table,
            knowledge,
            messaging,
            answer,
            intake: IntakeMachine::new(
                &config.intake,
                config.keywords.clone(),
                config.messages.clone(),
            ),
            manual: ManualGate::new(&config.manual),
            spam: SpamGuard::new(&config.admission),
            admission: AdmissionController::new(config.admission.max_concurrent),
            dedupe: DedupeWindow::new((config.pipeline.dedupe_window_secs * 1_000) as i64),
            user_locks: DashMap::new(),
            messages: config.messages.clone(),
            admin,
            kb_first: config.intake.kb_first,
            kb_top_k: config.knowledge.top_k,
            greet_idle_ms: (config.intake.greet_idle_hours * 3_600_000) as i64,
        }
    }

    /// Fans parsed events out into per-user serialized jobs. Returns the
    /// join handles so shutdown and tests can wait for completion; the
    /// server path drops them.
    pub fn spawn_jobs(self: &Arc<Self>, events: Vec<InboundEvent>) -> Vec<JoinHandle<()>> {
        let now = Utc::now().timestamp_millis();
        events
            .into_iter()
            .filter(|event| self.dedupe.check_and_insert(&event.dedupe_key(), now))
            .map(|event| {
                let pipeline = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(error) = pipeline.process_event(&event).await {
                        warn!(user = %event.user_id, %error, "event job failed");
                    }
                })
            })
            .collect()
    }

    /// Processes one event under that user's lock.
    pub async fn process_event(&self, event: &InboundEvent) -> Result<(), PaydeskError> {
        let lock = self.user_lock(&event.user_id);
        let _guard = lock.lock().await;
        self.handle_event(event).await
    }

    /// Global manual switch, exposed for the admin side channel.
    pub fn set_global_manual(&self, enabled: bool) {
        info!(enabled, "global manual mode changed");
        self.manual.set_global(enabled);
    }

    pub fn global_manual_enabled(&self) -> bool {
        self.manual.global_enabled()
    }

    /// Current generative load, for health output.
    pub fn active_calls(&self) -> usize {
        self.admission.active()
    }

    pub fn queue_depth(&self) -> usize {
        self.admission.queue_depth()
    }

    fn user_lock(&self, user: &UserId) -> Arc<Mutex<()>> {
        if self.user_locks.len() > USER_LOCK_HIGH_WATER {
            // A strong count of one means only the map holds the lock: no
            // job in flight, safe to drop and recreate on demand.
            self.user_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        self.user_locks
            .entry(user.0.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn handle_event(&self, event: &InboundEvent) -> Result<(), PaydeskError> {
        let now = Utc::now().timestamp_millis();
        let user = &event.user_id;

        if *user == self.admin {
            return self.handle_admin(event).await;
        }
        if self.manual.global_enabled() {
            debug!(user = %user, "global manual mode, event dropped");
            return Ok(());
        }

        let prelude = self.table.with_record(user, |rec| {
            if self.manual.check_active(rec, now) {
                let summary = event_summary(event);
                let notice = self.manual.absorb(rec, now, &summary);
                rec.last_activity_ms = now;
                return Prelude::Suppressed(notice);
            }
            let greet = rec.last_activity_ms > 0
                && now - rec.last_activity_ms >= self.greet_idle_ms
                && rec.last_greet_ms.is_none_or(|at| now - at >= self.greet_idle_ms);
            self.intake.apply_ttl(rec, now);
            // Every message of any kind counts against a queued user's
            // flood windows, whether or not intake claims it.
            let queued = rec.queued.then(|| match self.spam.note_message(rec, now) {
                SpamVerdict::HardCooldown => {
                    rec.queued = false;
                    rec.queued_at_ms = None;
                    QueuedVerdict::Kicked
                }
                SpamVerdict::SoftFlood => QueuedVerdict::Waiting { flooding: true },
                SpamVerdict::Ok => QueuedVerdict::Waiting { flooding: false },
            });
            rec.last_activity_ms = now;
            Prelude::Open { greet, queued }
        });

        let (greet, queued) = match prelude {
            Prelude::Suppressed(notice) => {
                if let Some(notice) = notice {
                    self.notify_burst(user, &notice).await;
                }
                return Ok(());
            }
            Prelude::Open { greet, queued } => (greet, queued),
        };

        let (action, advanced, cooled) = self.table.with_record(user, |rec| {
            let before = rec.phase;
            let action = self.intake.handle(rec, event);
            (action, rec.phase != before, rec.cooldown_active(now))
        });
        match action {
            IntakeAction::Reply(text) => match queued {
                // Reprompts do not break through the queue-nudge or
                // cooldown policies; state-advancing intake replies do.
                Some(verdict) if !advanced => self.queued_nudge(event, verdict, now).await,
                None if cooled && !advanced => {
                    let due =
                        self.table.with_record(user, |rec| self.spam.may_notice(rec, now));
                    if due {
                        self.reply(event, &self.messages.cooldown_notice, false, now).await
                    } else {
                        Ok(())
                    }
                }
                _ => self.reply(event, &text, greet, now).await,
            },
            IntakeAction::Handoff {
                reply,
                order_id,
                proof_ref,
            } => {
                let first = self.table.with_record(user, |rec| {
                    self.manual.activate(rec, now);
                    rec.queued = false;
                    rec.queued_at_ms = None;
                    let first = !rec.handoff_notified;
                    rec.handoff_notified = true;
                    first
                });
                self.admission.remove(user);
                self.reply(event, &reply, greet, now).await?;
                if first {
                    self.notify_handoff(user, &order_id, &proof_ref).await;
                }
                Ok(())
            }
            IntakeAction::Passthrough(text) => match queued {
                Some(verdict) => self.queued_nudge(event, verdict, now).await,
                None => self.handle_question(event, &text, now, greet).await,
            },
        }
    }

    /// Reply policy for users parked in the generative queue: rate-limited
    /// nudges while waiting, an unconditional notice on the hard-flood kick.
    async fn queued_nudge(
        &self,
        event: &InboundEvent,
        verdict: QueuedVerdict,
        now: i64,
    ) -> Result<(), PaydeskError> {
        let user = &event.user_id;
        match verdict {
            QueuedVerdict::Kicked => {
                self.admission.remove(user);
                self.reply(event, &self.messages.cooldown_notice, false, now).await
            }
            QueuedVerdict::Waiting { flooding } => {
                let due = self.table.with_record(user, |rec| self.spam.may_notice(rec, now));
                if !due {
                    return Ok(());
                }
                let text = if flooding {
                    self.messages.queued_flood.clone()
                } else {
                    self.messages.queued.clone()
                };
                self.reply(event, &text, false, now).await
            }
        }
    }

    /// Operator chat commands. Anything else from the operator is ignored;
    /// the operator is not a customer.
    async fn handle_admin(&self, event: &InboundEvent) -> Result<(), PaydeskError> {
        let Some(text) = event.text() else {
            return Ok(());
        };
        let trimmed = text.trim();
        if trimmed == "#manual" {
            self.set_global_manual(true);
            return self.send_reply(event, "已切換為人工模式，所有自動回覆已暫停。").await;
        }
        if trimmed == "#auto" {
            self.set_global_manual(false);
            return self.send_reply(event, "已切換回自動模式。").await;
        }
        if let Some(rest) = trimmed.strip_prefix("#reset") {
            let target = rest.trim();
            if UserId::is_valid_str(target) {
                let target = UserId(target.to_string());
                self.admission.remove(&target);
                self.table.remove(&target);
                info!(user = %target, "operator reset conversation");
                return self.send_reply(event, "已重置該用戶的對話狀態。").await;
            }
            return self.send_reply(event, "無效的用戶編號。").await;
        }
        Ok(())
    }

    /// General-question path: the abuse cooldown, the knowledge base, and
    /// finally the admission-controlled generative fallback. Queued users
    /// never reach here; the prelude diverts them to nudges.
    async fn handle_question(
        &self,
        event: &InboundEvent,
        text: &str,
        now: i64,
        greet: bool,
    ) -> Result<(), PaydeskError> {
        let user = &event.user_id;

        // Abuse cooldown throttles general questions only; the intake flow
        // above already ran unaffected.
        let cooled = self.table.with_record(user, |rec| {
            rec.cooldown_active(now)
                .then(|| self.spam.may_notice(rec, now).then(|| self.messages.cooldown_notice.clone()))
        });
        if let Some(notice) = cooled {
            if let Some(text) = notice {
                return self.reply(event, &text, false, now).await;
            }
            return Ok(());
        }

        // Knowledge base and payment-intent extraction; which goes first is
        // policy.
        if self.kb_first {
            if let Some(answer) = self.kb_answer(text) {
                return self.reply(event, &answer, greet, now).await;
            }
            if let Some(reply) = self.intent_reply(user, text) {
                return self.reply(event, &reply, greet, now).await;
            }
        } else {
            if let Some(reply) = self.intent_reply(user, text) {
                return self.reply(event, &reply, greet, now).await;
            }
            if let Some(answer) = self.kb_answer(text) {
                return self.reply(event, &answer, greet, now).await;
            }
        }

        self.generative(event, text, now, greet).await
    }

    fn kb_answer(&self, text: &str) -> Option<String> {
        self.knowledge
            .lookup(text, self.kb_top_k)
            .first()
            .map(|entry| entry.answer.clone())
    }

    fn intent_reply(&self, user: &UserId, text: &str) -> Option<String> {
        self.table.with_record(user, |rec| {
            self.intake.try_payment_intent(rec, text).map(|action| match action {
                IntakeAction::Reply(reply) => reply,
                // Payment intent never completes intake or passes through.
                _ => self.messages.ask_order.clone(),
            })
        })
    }

    /// The generative fallback under admission control. A claimed slot is
    /// released on every path out, including backend errors and timeouts.
    async fn generative(
        &self,
        event: &InboundEvent,
        text: &str,
        now: i64,
        greet: bool,
    ) -> Result<(), PaydeskError> {
        let user = &event.user_id;

        if !self.admission.try_acquire() {
            // The record must read as queued before the queue can surface
            // the user: a concurrent release scans eligibility by that flag
            // and would otherwise drop a freshly queued entry.
            let notice = self.table.with_record(user, |rec| {
                if !rec.queued {
                    rec.queued = true;
                    rec.queued_at_ms = Some(now);
                }
                self.spam.may_notice(rec, now)
            });
            self.admission.enqueue(user);
            debug!(user = %user, depth = self.admission.queue_depth(), "generative slots full");
            if notice {
                return self.reply(event, &self.messages.queued, false, now).await;
            }
            return Ok(());
        }

        let result = match &self.answer {
            Some(adapter) => {
                let grounding = self.knowledge.grounding_snippet(text);
                adapter.answer(text, grounding.as_deref()).await
            }
            None => Err(PaydeskError::Answer {
                message: "no answer backend configured".into(),
                source: None,
            }),
        };

        let invited = self
            .admission
            .release(|candidate| self.queue_eligibility(candidate));
        self.invite(invited).await;

        let reply_text = match result {
            Ok(answer) => answer,
            Err(error) => {
                warn!(user = %user, %error, "generative answer failed, degrading");
                self.messages.busy.clone()
            }
        };
        self.reply(event, &reply_text, greet, now).await
    }

    fn queue_eligibility(&self, user: &UserId) -> QueueEligibility {
        let now = Utc::now().timestamp_millis();
        match self.table.peek(user) {
            None => QueueEligibility::Drop,
            Some(rec) if !rec.queued => QueueEligibility::Drop,
            Some(rec) if rec.manual_active(now) => QueueEligibility::Drop,
            Some(rec) if rec.cooldown_active(now) => QueueEligibility::Requeue,
            Some(_) => QueueEligibility::Eligible,
        }
    }

    /// Invites freed-up queued users to resend their question.
    async fn invite(&self, users: Vec<UserId>) {
        for user in users {
            self.table.with_record(&user, |rec| {
                rec.queued = false;
                rec.queued_at_ms = None;
            });
            if let Err(error) = self.messaging.push(&user, &self.messages.your_turn).await {
                warn!(user = %user, %error, "failed to deliver turn notice");
            }
        }
    }

    async fn notify_handoff(&self, user: &UserId, order_id: &str, proof_ref: &str) {
        let name = self.messaging.display_name(user).await;
        let text = format!(
            "{name}（{user}）已完成訂單 {order_id} 的付款回報，截圖編號 {proof_ref}，請人工確認。"
        );
        if let Err(error) = self.messaging.push(&self.admin, &text).await {
            warn!(user = %user, %error, "failed to deliver handoff notification");
        }
    }

    async fn notify_burst(&self, user: &UserId, notice: &BurstNotice) {
        let name = self.messaging.display_name(user).await;
        let text = format!(
            "{name}（{user}）在人工處理期間傳來 {} 則訊息，最近一則：{}",
            notice.count, notice.summary
        );
        if let Err(error) = self.messaging.push(&self.admin, &text).await {
            warn!(user = %user, %error, "failed to deliver burst notification");
        }
    }

    /// Sends a reply, applying the reintroduction prefix when due.
    async fn reply(
        &self,
        event: &InboundEvent,
        text: &str,
        greet: bool,
        now: i64,
    ) -> Result<(), PaydeskError> {
        if greet {
            self.table
                .with_record(&event.user_id, |rec| rec.last_greet_ms = Some(now));
            let prefixed = format!("{}\n{text}", self.messages.greet_prefix);
            return self.send_reply(event, &prefixed).await;
        }
        self.send_reply(event, text).await
    }

    async fn send_reply(&self, event: &InboundEvent, text: &str) -> Result<(), PaydeskError> {
        self.messaging.reply(&event.reply_token, text).await
    }
}

/// One-line description of an event for operator notifications.
fn event_summary(event: &InboundEvent) -> String {
    match &event.kind {
        paydesk_core::MessageKind::Text(text) => text.clone(),
        paydesk_core::MessageKind::Image { .. } => "（圖片）".to_string(),
        paydesk_core::MessageKind::Other => "（貼圖或其他訊息）".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use paydesk_core::{MessageId, MessageKind};
    use paydesk_state::record::Phase;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct MockMessaging {
        replies: std::sync::Mutex<Vec<(String, String)>>,
        pushes: std::sync::Mutex<Vec<(UserId, String)>>,
    }

    impl MockMessaging {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                replies: std::sync::Mutex::new(Vec::new()),
                pushes: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn replies(&self) -> Vec<(String, String)> {
            self.replies.lock().unwrap().clone()
        }

        fn pushes(&self) -> Vec<(UserId, String)> {
            self.pushes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagingAdapter for MockMessaging {
        async fn reply(&self, reply_token: &str, text: &str) -> Result<(), PaydeskError> {
            self.replies
                .lock()
                .unwrap()
                .push((reply_token.to_string(), text.to_string()));
            Ok(())
        }

        async fn push(&self, user: &UserId, text: &str) -> Result<(), PaydeskError> {
            self.pushes.lock().unwrap().push((user.clone(), text.to_string()));
            Ok(())
        }

        async fn display_name(&self, _user: &UserId) -> String {
            "測試顧客".to_string()
        }
    }

    /// Answer backend that blocks until released, for queue tests.
    struct GatedAnswer {
        started: AtomicUsize,
        gate: Notify,
    }

    impl GatedAnswer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                gate: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl AnswerAdapter for GatedAnswer {
        async fn answer(&self, _q: &str, _g: Option<&str>) -> Result<String, PaydeskError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok("生成回答".to_string())
        }
    }

    /// Answer backend that blocks only its first call.
    struct FirstCallGated {
        started: AtomicUsize,
        gate: Notify,
    }

    impl FirstCallGated {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                gate: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl AnswerAdapter for FirstCallGated {
        async fn answer(&self, _q: &str, _g: Option<&str>) -> Result<String, PaydeskError> {
            if self.started.fetch_add(1, Ordering::SeqCst) == 0 {
                self.gate.notified().await;
            }
            Ok("生成回答".to_string())
        }
    }

    struct InstantAnswer;

    #[async_trait]
    impl AnswerAdapter for InstantAnswer {
        async fn answer(&self, q: &str, grounding: Option<&str>) -> Result<String, PaydeskError> {
            match grounding {
                Some(g) => Ok(format!("answer to {q} with [{g}]")),
                None => Ok(format!("answer to {q}")),
            }
        }
    }

    fn admin() -> UserId {
        UserId(format!("U{:032x}", 0xad))
    }

    fn uid(n: u8) -> UserId {
        UserId(format!("U{:032x}", n))
    }

    fn text_event(user: &UserId, msg: &str, text: &str) -> InboundEvent {
        InboundEvent {
            user_id: user.clone(),
            message_id: MessageId(msg.into()),
            reply_token: format!("rt-{msg}"),
            timestamp_ms: 0,
            kind: MessageKind::Text(text.into()),
        }
    }

    fn image_event(user: &UserId, msg: &str, content_id: &str) -> InboundEvent {
        InboundEvent {
            user_id: user.clone(),
            message_id: MessageId(msg.into()),
            reply_token: format!("rt-{msg}"),
            timestamp_ms: 0,
            kind: MessageKind::Image { content_id: content_id.into() },
        }
    }

    fn pipeline_with(
        config: PaydeskConfig,
        messaging: Arc<MockMessaging>,
        answer: Option<Arc<dyn AnswerAdapter>>,
    ) -> Arc<Pipeline> {
        let table = Arc::new(StateTable::new());
        let knowledge = Arc::new(KnowledgeStore::new("unused.json"));
        Arc::new(Pipeline::new(
            &config,
            table,
            knowledge,
            messaging,
            answer,
            admin(),
        ))
    }

    #[tokio::test]
    async fn order_id_advances_intake_and_asks_for_proof() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);

        pipeline
            .process_event(&text_event(&uid(1), "m1", "12345"))
            .await
            .unwrap();

        let replies = messaging.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, MessagesConfig::default().ask_proof);
    }

    #[tokio::test]
    async fn proof_image_completes_notifies_and_opens_manual_window() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);
        let user = uid(1);

        pipeline.process_event(&text_event(&user, "m1", "12345")).await.unwrap();
        pipeline.process_event(&image_event(&user, "m2", "proof-7")).await.unwrap();

        let replies = messaging.replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].1, MessagesConfig::default().completed);

        let pushes = messaging.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, admin());
        assert!(pushes[0].1.contains("12345"));
        assert!(pushes[0].1.contains("proof-7"));

        // The manual window is now open: further messages get no reply.
        pipeline.process_event(&text_event(&user, "m3", "請問好了嗎")).await.unwrap();
        assert_eq!(messaging.replies().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_proof_image_notifies_only_once() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);
        let user = uid(1);

        pipeline.process_event(&text_event(&user, "m1", "12345")).await.unwrap();
        pipeline.process_event(&image_event(&user, "m2", "c1")).await.unwrap();
        pipeline.process_event(&image_event(&user, "m3", "c2")).await.unwrap();

        // Second image lands inside the manual window: absorbed, and the
        // operator sees a burst notice rather than a second handoff.
        let handoffs: Vec<_> = messaging
            .pushes()
            .into_iter()
            .filter(|(_, text)| text.contains("請人工確認"))
            .collect();
        assert_eq!(handoffs.len(), 1);
    }

    #[tokio::test]
    async fn manual_window_absorbs_and_coalesces_notifications() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);
        let user = uid(1);

        pipeline.process_event(&text_event(&user, "m1", "12345")).await.unwrap();
        pipeline.process_event(&image_event(&user, "m2", "c1")).await.unwrap();
        let baseline_pushes = messaging.pushes().len();
        let baseline_replies = messaging.replies().len();

        for i in 0..10 {
            pipeline
                .process_event(&text_event(&user, &format!("s{i}"), "在嗎？"))
                .await
                .unwrap();
        }

        // Zero replies to the user; at most one burst notice in the burst
        // (the first absorbed message notifies, the rest coalesce).
        assert_eq!(messaging.replies().len(), baseline_replies);
        assert_eq!(messaging.pushes().len(), baseline_pushes + 1);
    }

    #[tokio::test]
    async fn knowledge_hit_answers_without_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(
            &path,
            serde_json::json!([{
                "id": "ship",
                "questions": ["運費怎麼算"],
                "answer": "滿千免運"
            }])
            .to_string(),
        )
        .unwrap();

        let messaging = MockMessaging::new();
        let table = Arc::new(StateTable::new());
        let knowledge = Arc::new(KnowledgeStore::new(&path));
        knowledge.load().unwrap();
        let pipeline = Arc::new(Pipeline::new(
            &PaydeskConfig::default(),
            table,
            knowledge,
            messaging.clone(),
            None,
            admin(),
        ));

        pipeline
            .process_event(&text_event(&uid(1), "m1", "運費怎麼算"))
            .await
            .unwrap();

        assert_eq!(messaging.replies()[0].1, "滿千免運");
    }

    #[tokio::test]
    async fn no_backend_and_no_match_degrades_to_busy() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);

        pipeline
            .process_event(&text_event(&uid(1), "m1", "今天天氣如何"))
            .await
            .unwrap();

        assert_eq!(messaging.replies()[0].1, MessagesConfig::default().busy);
    }

    #[tokio::test]
    async fn generative_answer_reaches_user() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(
            PaydeskConfig::default(),
            messaging.clone(),
            Some(Arc::new(InstantAnswer)),
        );

        pipeline
            .process_event(&text_event(&uid(1), "m1", "可以開發票嗎"))
            .await
            .unwrap();

        assert!(messaging.replies()[0].1.starts_with("answer to 可以開發票嗎"));
    }

    #[tokio::test]
    async fn payment_intent_with_id_is_captured_before_fallback() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(
            PaydeskConfig::default(),
            messaging.clone(),
            Some(Arc::new(InstantAnswer)),
        );
        let user = uid(1);

        pipeline
            .process_event(&text_event(&user, "m1", "我已付款，訂單 23456"))
            .await
            .unwrap();

        // Captured by intent extraction, not sent to the backend.
        assert_eq!(messaging.replies()[0].1, MessagesConfig::default().ask_proof);
    }

    #[tokio::test]
    async fn full_slots_queue_the_next_user_and_invite_on_release() {
        let mut config = PaydeskConfig::default();
        config.admission.max_concurrent = 1;

        let messaging = MockMessaging::new();
        let gated = GatedAnswer::new();
        let pipeline = pipeline_with(
            config,
            messaging.clone(),
            Some(gated.clone() as Arc<dyn AnswerAdapter>),
        );

        // User A occupies the only slot.
        let a_pipeline = Arc::clone(&pipeline);
        let a_job = tokio::spawn(async move {
            a_pipeline
                .process_event(&text_event(&uid(1), "m1", "第一個問題"))
                .await
                .unwrap();
        });
        while gated.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // User B is told to wait.
        pipeline
            .process_event(&text_event(&uid(2), "m2", "第二個問題"))
            .await
            .unwrap();
        assert_eq!(messaging.replies().last().unwrap().1, MessagesConfig::default().queued);
        assert_eq!(pipeline.queue_depth(), 1);

        // A's call completes; B is invited to resend.
        gated.gate.notify_one();
        a_job.await.unwrap();

        let pushes = messaging.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, uid(2));
        assert_eq!(pushes[0].1, MessagesConfig::default().your_turn);
        assert_eq!(pipeline.queue_depth(), 0);
        assert_eq!(pipeline.active_calls(), 0);
    }

    #[tokio::test]
    async fn queued_flooder_gets_cooldown_and_leaves_queue() {
        let mut config = PaydeskConfig::default();
        config.admission.max_concurrent = 1;

        let messaging = MockMessaging::new();
        let gated = GatedAnswer::new();
        let pipeline = pipeline_with(
            config,
            messaging.clone(),
            Some(gated.clone() as Arc<dyn AnswerAdapter>),
        );

        let a_pipeline = Arc::clone(&pipeline);
        let a_job = tokio::spawn(async move {
            let _ = a_pipeline
                .process_event(&text_event(&uid(1), "m1", "佔住名額"))
                .await;
        });
        while gated.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // User B queues, then floods past the hard limit.
        let user = uid(2);
        pipeline.process_event(&text_event(&user, "q0", "問題")).await.unwrap();
        for i in 0..40 {
            pipeline
                .process_event(&text_event(&user, &format!("f{i}"), "快點"))
                .await
                .unwrap();
        }

        assert!(messaging
            .replies()
            .iter()
            .any(|(_, text)| *text == MessagesConfig::default().cooldown_notice));
        assert_eq!(pipeline.queue_depth(), 0);

        // Further questions during cooldown get the notice at most once per
        // interval, not an answer.
        let replies_before = messaging.replies().len();
        pipeline.process_event(&text_event(&user, "m9", "還要等多久")).await.unwrap();
        assert_eq!(messaging.replies().len(), replies_before);

        gated.gate.notify_one();
        a_job.await.unwrap();
    }

    #[tokio::test]
    async fn admin_toggles_global_manual_mode() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);

        pipeline
            .process_event(&text_event(&admin(), "a1", "#manual"))
            .await
            .unwrap();
        assert!(pipeline.global_manual_enabled());

        // Customers are silently dropped.
        pipeline.process_event(&text_event(&uid(1), "m1", "12345")).await.unwrap();
        assert_eq!(messaging.replies().len(), 1); // only the admin ack

        pipeline
            .process_event(&text_event(&admin(), "a2", "#auto"))
            .await
            .unwrap();
        assert!(!pipeline.global_manual_enabled());

        pipeline.process_event(&text_event(&uid(1), "m2", "12345")).await.unwrap();
        assert_eq!(messaging.replies().len(), 3);
    }

    #[tokio::test]
    async fn admin_reset_clears_conversation() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);
        let user = uid(1);

        pipeline.process_event(&text_event(&user, "m1", "12345")).await.unwrap();
        pipeline
            .process_event(&text_event(&admin(), "a1", &format!("#reset {user}")))
            .await
            .unwrap();

        // Back to square one: next text is a general question, an image
        // would be rejected. The order prompt comes from re-intake.
        pipeline.process_event(&image_event(&user, "m2", "c1")).await.unwrap();
        assert_eq!(
            messaging.replies().last().unwrap().1,
            MessagesConfig::default().ask_order
        );
    }

    #[tokio::test]
    async fn admin_reset_rejects_malformed_target() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);

        pipeline
            .process_event(&text_event(&admin(), "a1", "#reset not-a-user"))
            .await
            .unwrap();
        assert!(messaging.replies()[0].1.contains("無效"));
    }

    #[tokio::test]
    async fn duplicate_events_are_dropped_by_spawn_jobs() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);

        let event = text_event(&uid(1), "m1", "12345");
        let handles = pipeline.spawn_jobs(vec![event.clone(), event]);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(messaging.replies().len(), 1);
    }

    #[tokio::test]
    async fn idle_user_gets_reintroduction_prefix() {
        let messaging = MockMessaging::new();
        let table = Arc::new(StateTable::new());
        let knowledge = Arc::new(KnowledgeStore::new("unused.json"));
        let pipeline = Arc::new(Pipeline::new(
            &PaydeskConfig::default(),
            Arc::clone(&table),
            knowledge,
            messaging.clone(),
            None,
            admin(),
        ));
        let user = uid(1);

        // Last contact 13 hours ago.
        let now = Utc::now().timestamp_millis();
        table.with_record(&user, |rec| rec.last_activity_ms = now - 13 * 3_600_000);

        pipeline.process_event(&image_event(&user, "m1", "c1")).await.unwrap();
        let reply = &messaging.replies()[0].1;
        assert!(reply.starts_with(&MessagesConfig::default().greet_prefix));
        assert!(reply.contains(&MessagesConfig::default().ask_order));

        // Immediately after, no prefix again.
        pipeline.process_event(&image_event(&user, "m2", "c2")).await.unwrap();
        assert_eq!(messaging.replies()[1].1, MessagesConfig::default().ask_order);
    }

    #[tokio::test]
    async fn queued_image_flood_is_throttled_and_cooled_down() {
        let mut config = PaydeskConfig::default();
        config.admission.max_concurrent = 1;

        let messaging = MockMessaging::new();
        let gated = GatedAnswer::new();
        let pipeline = pipeline_with(
            config,
            messaging.clone(),
            Some(gated.clone() as Arc<dyn AnswerAdapter>),
        );

        let a_pipeline = Arc::clone(&pipeline);
        let a_job = tokio::spawn(async move {
            let _ = a_pipeline
                .process_event(&text_event(&uid(1), "m1", "佔住名額"))
                .await;
        });
        while gated.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // User B queues, then floods with images. Each image counts against
        // the rolling windows; the replies are rate-limited nudges, not a
        // reprompt per image, and the hard limit eventually applies the
        // cooldown and evicts B from the queue.
        let user = uid(2);
        pipeline.process_event(&text_event(&user, "q0", "問題")).await.unwrap();
        let replies_before = messaging.replies().len();
        for i in 0..50 {
            pipeline
                .process_event(&image_event(&user, &format!("i{i}"), "c"))
                .await
                .unwrap();
        }

        let new_replies: Vec<_> = messaging.replies().split_off(replies_before);
        assert!(
            new_replies.len() <= 2,
            "image flood produced {} replies",
            new_replies.len()
        );
        assert!(new_replies
            .iter()
            .any(|(_, text)| *text == MessagesConfig::default().cooldown_notice));
        assert_eq!(pipeline.queue_depth(), 0);
        assert!(!pipeline.table.peek(&user).unwrap().queued);

        gated.gate.notify_one();
        a_job.await.unwrap();
    }

    #[tokio::test]
    async fn queued_user_order_id_still_advances_intake() {
        let mut config = PaydeskConfig::default();
        config.admission.max_concurrent = 1;

        let messaging = MockMessaging::new();
        let gated = GatedAnswer::new();
        let pipeline = pipeline_with(
            config,
            messaging.clone(),
            Some(gated.clone() as Arc<dyn AnswerAdapter>),
        );

        let a_pipeline = Arc::clone(&pipeline);
        let a_job = tokio::spawn(async move {
            let _ = a_pipeline
                .process_event(&text_event(&uid(1), "m1", "佔住名額"))
                .await;
        });
        while gated.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // B queues with a general question, then sends an order id. The
        // intake transition breaks through the nudge policy.
        let user = uid(2);
        pipeline.process_event(&text_event(&user, "q0", "問題")).await.unwrap();
        pipeline.process_event(&text_event(&user, "q1", "12345")).await.unwrap();

        let replies = messaging.replies();
        assert_eq!(replies.last().unwrap().1, MessagesConfig::default().ask_proof);
        let rec = pipeline.table.peek(&user).unwrap();
        assert_eq!(rec.phase, Phase::AwaitingProof);

        gated.gate.notify_one();
        a_job.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn release_racing_enqueue_never_strands_a_user() {
        for _ in 0..25 {
            let mut config = PaydeskConfig::default();
            config.admission.max_concurrent = 1;

            let messaging = MockMessaging::new();
            let gated = FirstCallGated::new();
            let pipeline = pipeline_with(
                config,
                messaging.clone(),
                Some(gated.clone() as Arc<dyn AnswerAdapter>),
            );

            let a_pipeline = Arc::clone(&pipeline);
            let a_job = tokio::spawn(async move {
                a_pipeline
                    .process_event(&text_event(&uid(1), "m1", "第一個問題"))
                    .await
                    .unwrap();
            });
            while gated.started.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }

            // B races A's release: B may grab the freed slot, get invited,
            // or stay queued for the next release.
            let b_pipeline = Arc::clone(&pipeline);
            let b_job = tokio::spawn(async move {
                b_pipeline
                    .process_event(&text_event(&uid(2), "m2", "第二個問題"))
                    .await
                    .unwrap();
            });
            gated.gate.notify_one();
            a_job.await.unwrap();
            b_job.await.unwrap();

            // One more acquire/release cycle drains anyone still waiting.
            pipeline
                .process_event(&text_event(&uid(3), "m3", "第三個問題"))
                .await
                .unwrap();

            let stranded = pipeline.table.peek(&uid(2)).unwrap().queued;
            assert!(!stranded, "user marked queued with no queue entry");
            assert_eq!(pipeline.queue_depth(), 0);
        }
    }

    #[tokio::test]
    async fn same_user_events_are_serialized_in_order() {
        let messaging = MockMessaging::new();
        let gated = GatedAnswer::new();
        let pipeline = pipeline_with(
            PaydeskConfig::default(),
            messaging.clone(),
            Some(gated.clone() as Arc<dyn AnswerAdapter>),
        );
        let user = uid(1);

        // The first job parks inside the generative call, holding the
        // user's job slot across the await.
        let first = pipeline.spawn_jobs(vec![text_event(&user, "m1", "有什麼優惠嗎")]);
        while gated.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // The second job for the same user must wait for the first to
        // finish, awaited network call included.
        let second = pipeline.spawn_jobs(vec![text_event(&user, "m2", "12345")]);
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert!(messaging.replies().is_empty());

        gated.gate.notify_one();
        for handle in first.into_iter().chain(second) {
            handle.await.unwrap();
        }

        let replies = messaging.replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].0, "rt-m1");
        assert_eq!(replies[1].1, MessagesConfig::default().ask_proof);
        let rec = pipeline.table.peek(&user).unwrap();
        assert_eq!(rec.phase, Phase::AwaitingProof);
        assert_eq!(rec.order_id.as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn handoff_notification_is_sent_once_per_intake() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);
        let user = uid(1);

        pipeline.process_event(&text_event(&user, "m1", "12345")).await.unwrap();
        pipeline.process_event(&image_event(&user, "m2", "c1")).await.unwrap();

        // A redelivered proof that slips past the dedupe window and finds
        // the manual window closed must not notify the operator again.
        pipeline.table.with_record(&user, |rec| {
            rec.manual_until_ms = None;
            rec.phase = Phase::AwaitingProof;
        });
        pipeline.process_event(&image_event(&user, "m3", "c1")).await.unwrap();

        let handoffs = messaging
            .pushes()
            .iter()
            .filter(|(_, text)| text.contains("請人工確認"))
            .count();
        assert_eq!(handoffs, 1);
    }

    #[tokio::test]
    async fn idle_user_locks_are_pruned() {
        let messaging = MockMessaging::new();
        let pipeline = pipeline_with(PaydeskConfig::default(), messaging.clone(), None);

        for n in 0..(USER_LOCK_HIGH_WATER + 10) {
            let user = UserId(format!("U{n:032x}"));
            pipeline.process_event(&text_event(&user, "m", "你好")).await.unwrap();
        }

        assert!(pipeline.user_locks.len() <= USER_LOCK_HIGH_WATER);
    }
}
