// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for Paydesk.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup. Keyword sets and user-facing reply texts are
//! deliberately configuration data rather than code: they were tuned many
//! times in production and must stay tunable without a rebuild.

use serde::{Deserialize, Serialize};

/// Top-level Paydesk configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. All sections are optional and default to sensible
/// values; only the `[line]` credentials are mandatory for serving.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PaydeskConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Messaging platform credentials and endpoints.
    #[serde(default)]
    pub line: LineConfig,

    /// Generative answer backend settings.
    #[serde(default)]
    pub answer: AnswerConfig,

    /// Knowledge base file and ranking settings.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// State table persistence settings.
    #[serde(default)]
    pub state: StateConfig,

    /// Intake protocol settings.
    #[serde(default)]
    pub intake: IntakeConfig,

    /// Manual-handoff gate settings.
    #[serde(default)]
    pub manual: ManualConfig,

    /// Generative-answer admission control and anti-abuse settings.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// HTTP gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Event pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Intent-detection keyword sets.
    #[serde(default)]
    pub keywords: KeywordsConfig,

    /// User-facing reply texts.
    #[serde(default)]
    pub messages: MessagesConfig,
}

/// Process identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name of the responder, used in logs.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_name() -> String {
    "paydesk".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Messaging platform configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LineConfig {
    /// Channel secret used to verify webhook signatures. Required for serving.
    #[serde(default)]
    pub channel_secret: Option<String>,

    /// Channel access token for reply/push/profile calls. Required for serving.
    #[serde(default)]
    pub channel_token: Option<String>,

    /// Operator identity: receives handoff notifications and may issue
    /// in-chat commands (`#manual`, `#auto`, `#reset <userId>`). Required
    /// for serving.
    #[serde(default)]
    pub admin_user_id: Option<String>,

    /// Base URL of the messaging REST API.
    #[serde(default = "default_line_api_base")]
    pub api_base: String,

    /// Profile cache time-to-live in hours.
    #[serde(default = "default_profile_cache_hours")]
    pub profile_cache_hours: u64,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_secret: None,
            channel_token: None,
            admin_user_id: None,
            api_base: default_line_api_base(),
            profile_cache_hours: default_profile_cache_hours(),
        }
    }
}

fn default_line_api_base() -> String {
    "https://api.line.me".to_string()
}

fn default_profile_cache_hours() -> u64 {
    24
}

/// Generative answer backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnswerConfig {
    /// Backend endpoint URL. `None` disables the generative fallback.
    #[serde(default)]
    pub api_url: Option<String>,

    /// Backend API key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier sent with each request.
    #[serde(default = "default_answer_model")]
    pub model: String,

    /// System instruction prepended to every request.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Hard timeout per call, in seconds. The slot is released on every
    /// path, so a stalled call cannot leak admission capacity.
    #[serde(default = "default_answer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            model: default_answer_model(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_answer_timeout_secs(),
        }
    }
}

fn default_answer_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_system_prompt() -> String {
    "你是客服助理，请用简短友善的繁体中文回答顾客的问题。".to_string()
}

fn default_answer_timeout_secs() -> u64 {
    8
}

/// Knowledge base configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeConfig {
    /// Path to the JSON entry file. Watched for changes.
    #[serde(default = "default_knowledge_path")]
    pub path: String,

    /// Reload debounce after a file change, in milliseconds.
    #[serde(default = "default_reload_debounce_ms")]
    pub reload_debounce_ms: u64,

    /// How many ranked entries to consider per lookup.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: default_knowledge_path(),
            reload_debounce_ms: default_reload_debounce_ms(),
            top_k: default_top_k(),
        }
    }
}

fn default_knowledge_path() -> String {
    "knowledge.json".to_string()
}

fn default_reload_debounce_ms() -> u64 {
    250
}

fn default_top_k() -> usize {
    3
}

/// State table persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Path to the snapshot file.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    /// Debounce after a mutation before writing, in milliseconds.
    #[serde(default = "default_snapshot_debounce_ms")]
    pub debounce_ms: u64,

    /// Unconditional periodic flush interval, in seconds.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Records untouched longer than this are pruned, in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Hard cap on table size; least-recently-active records are evicted
    /// past this.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            debounce_ms: default_snapshot_debounce_ms(),
            flush_interval_secs: default_flush_interval_secs(),
            retention_days: default_retention_days(),
            max_records: default_max_records(),
        }
    }
}

fn default_snapshot_path() -> String {
    "paydesk-state.json".to_string()
}

fn default_snapshot_debounce_ms() -> u64 {
    900
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_retention_days() -> u64 {
    10
}

fn default_max_records() -> usize {
    5000
}

/// Intake protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IntakeConfig {
    /// Consult the knowledge base before payment-intent extraction while
    /// awaiting an order id. The ordering shifted across production
    /// iterations; it is policy, not law.
    #[serde(default = "default_kb_first")]
    pub kb_first: bool,

    /// Idle TTL for records still awaiting an order id, in hours.
    #[serde(default = "default_order_ttl_hours")]
    pub order_ttl_hours: u64,

    /// Idle TTL for records awaiting a proof image, in days.
    #[serde(default = "default_proof_ttl_days")]
    pub proof_ttl_days: u64,

    /// Idle time after which the next reply gets a reintroduction prefix,
    /// in hours.
    #[serde(default = "default_greet_idle_hours")]
    pub greet_idle_hours: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            kb_first: default_kb_first(),
            order_ttl_hours: default_order_ttl_hours(),
            proof_ttl_days: default_proof_ttl_days(),
            greet_idle_hours: default_greet_idle_hours(),
        }
    }
}

fn default_kb_first() -> bool {
    true
}

fn default_order_ttl_hours() -> u64 {
    24
}

fn default_proof_ttl_days() -> u64 {
    7
}

fn default_greet_idle_hours() -> u64 {
    12
}

/// Manual-handoff gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ManualConfig {
    /// Length of the per-user suppression window, in seconds.
    #[serde(default = "default_manual_window_secs")]
    pub window_secs: u64,

    /// Minimum gap between operator notifications for one user, in seconds.
    #[serde(default = "default_notify_cooldown_secs")]
    pub notify_cooldown_secs: u64,
}

impl Default for ManualConfig {
    fn default() -> Self {
        Self {
            window_secs: default_manual_window_secs(),
            notify_cooldown_secs: default_notify_cooldown_secs(),
        }
    }
}

fn default_manual_window_secs() -> u64 {
    3600
}

fn default_notify_cooldown_secs() -> u64 {
    120
}

/// Admission control and anti-abuse configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Maximum concurrent generative backend calls.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Cooldown applied on hard-threshold abuse, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Minimum gap between queue/flood notices to one user, in seconds.
    #[serde(default = "default_notice_interval_secs")]
    pub notice_interval_secs: u64,

    /// Short rolling window length, in seconds.
    #[serde(default = "default_short_window_secs")]
    pub short_window_secs: u64,

    /// Soft limit within the short window.
    #[serde(default = "default_short_soft_limit")]
    pub short_soft_limit: u32,

    /// Long rolling window length, in seconds.
    #[serde(default = "default_long_window_secs")]
    pub long_window_secs: u64,

    /// Soft limit within the long window.
    #[serde(default = "default_long_soft_limit")]
    pub long_soft_limit: u32,

    /// Hard limit within the long window; reaching it triggers cooldown.
    #[serde(default = "default_long_hard_limit")]
    pub long_hard_limit: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            cooldown_secs: default_cooldown_secs(),
            notice_interval_secs: default_notice_interval_secs(),
            short_window_secs: default_short_window_secs(),
            short_soft_limit: default_short_soft_limit(),
            long_window_secs: default_long_window_secs(),
            long_soft_limit: default_long_soft_limit(),
            long_hard_limit: default_long_hard_limit(),
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_notice_interval_secs() -> u64 {
    60
}

fn default_short_window_secs() -> u64 {
    30
}

fn default_short_soft_limit() -> u32 {
    6
}

fn default_long_window_secs() -> u64 {
    120
}

fn default_long_soft_limit() -> u32 {
    15
}

fn default_long_hard_limit() -> u32 {
    40
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Host address to bind.
    #[serde(default = "default_gateway_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bearer token for the admin side channel. `None` disables
    /// `/admin/manual` (fail-closed).
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            admin_token: None,
        }
    }
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    8080
}

/// Event pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Inbound event dedupe window, in seconds. Upstream delivery is
    /// at-least-once.
    #[serde(default = "default_dedupe_window_secs")]
    pub dedupe_window_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedupe_window_secs: default_dedupe_window_secs(),
        }
    }
}

fn default_dedupe_window_secs() -> u64 {
    600
}

/// Intent-detection keyword sets.
///
/// Heuristic by nature; tuned in production far more often than code ships.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordsConfig {
    /// Phrases expressing pickup/payment intent while awaiting an order id.
    #[serde(default = "default_payment_intent")]
    pub payment_intent: Vec<String>,

    /// Order-context words; a 5-digit run within 10 chars of one of these
    /// is accepted as an order id.
    #[serde(default = "default_order_context")]
    pub order_context: Vec<String>,

    /// Phrases expressing a reset of the intake flow.
    #[serde(default = "default_reset_intent")]
    pub reset_intent: Vec<String>,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            payment_intent: default_payment_intent(),
            order_context: default_order_context(),
            reset_intent: default_reset_intent(),
        }
    }
}

fn default_payment_intent() -> Vec<String> {
    [
        "取貨", "取货", "付款", "已付款", "匯款", "汇款", "轉帳", "转账", "面交",
        "paid", "payment", "pickup",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_order_context() -> Vec<String> {
    ["訂單", "订单", "單號", "单号", "編號", "编号", "order"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_reset_intent() -> Vec<String> {
    ["重新", "重來", "重来", "改單", "改单", "取消", "reset", "restart"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// User-facing reply texts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MessagesConfig {
    /// Prompt for a 5-digit order id.
    #[serde(default = "default_ask_order")]
    pub ask_order: String,

    /// Prompt for the payment-proof image.
    #[serde(default = "default_ask_proof")]
    pub ask_proof: String,

    /// Reply once intake is complete and pending human review.
    #[serde(default = "default_completed")]
    pub completed: String,

    /// Reply when a question is queued for a generative slot.
    #[serde(default = "default_queued")]
    pub queued: String,

    /// Escalated notice when a queued user exceeds a soft flood limit.
    #[serde(default = "default_queued_flood")]
    pub queued_flood: String,

    /// Push telling a queued user a slot is free; they must resend.
    #[serde(default = "default_your_turn")]
    pub your_turn: String,

    /// Fixed degraded reply for any backend failure.
    #[serde(default = "default_busy")]
    pub busy: String,

    /// Fixed reply while a user is in abuse cooldown.
    #[serde(default = "default_cooldown_notice")]
    pub cooldown_notice: String,

    /// Reintroduction prefix after prolonged silence.
    #[serde(default = "default_greet_prefix")]
    pub greet_prefix: String,

    /// Display name used when a profile fetch fails.
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            ask_order: default_ask_order(),
            ask_proof: default_ask_proof(),
            completed: default_completed(),
            queued: default_queued(),
            queued_flood: default_queued_flood(),
            your_turn: default_your_turn(),
            busy: default_busy(),
            cooldown_notice: default_cooldown_notice(),
            greet_prefix: default_greet_prefix(),
            placeholder_name: default_placeholder_name(),
        }
    }
}

fn default_ask_order() -> String {
    "請提供 5 位數訂單編號，謝謝！".to_string()
}

fn default_ask_proof() -> String {
    "收到訂單編號，請上傳付款證明截圖。".to_string()
}

fn default_completed() -> String {
    "已收到，待人工確認後會盡快回覆您。".to_string()
}

fn default_queued() -> String {
    "目前詢問人數較多，已為您排隊，請勿重複發送。".to_string()
}

fn default_queued_flood() -> String {
    "訊息太頻繁了，請稍等輪到您時再發問。".to_string()
}

fn default_your_turn() -> String {
    "輪到您了，請重新傳送您的問題。".to_string()
}

fn default_busy() -> String {
    "系統忙碌中，請稍後再試。".to_string()
}

fn default_cooldown_notice() -> String {
    "訊息過於頻繁，已暫停回覆，請五分鐘後再試。".to_string()
}

fn default_greet_prefix() -> String {
    "您好，我是自動客服小幫手。".to_string()
}

fn default_placeholder_name() -> String {
    "顧客".to_string()
}
