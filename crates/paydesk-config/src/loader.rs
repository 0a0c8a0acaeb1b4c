// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./paydesk.toml` > `~/.config/paydesk/paydesk.toml`
//! > `/etc/paydesk/paydesk.toml` with environment variable overrides via the
//! `PAYDESK_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::PaydeskConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/paydesk/paydesk.toml` (system-wide)
/// 3. `~/.config/paydesk/paydesk.toml` (user XDG config)
/// 4. `./paydesk.toml` (local directory)
/// 5. `PAYDESK_*` environment variables
pub fn load_config() -> Result<PaydeskConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PaydeskConfig::default()))
        .merge(Toml::file("/etc/paydesk/paydesk.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("paydesk/paydesk.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("paydesk.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<PaydeskConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PaydeskConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<PaydeskConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PaydeskConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `PAYDESK_LINE_CHANNEL_SECRET` must map
/// to `line.channel_secret`, not `line.channel.secret`.
fn env_provider() -> Env {
    Env::prefixed("PAYDESK_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: PAYDESK_LINE_CHANNEL_SECRET -> "line_channel_secret"
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("agent_", "agent.", 1)
            .replacen("line_", "line.", 1)
            .replacen("answer_", "answer.", 1)
            .replacen("knowledge_", "knowledge.", 1)
            .replacen("state_", "state.", 1)
            .replacen("intake_", "intake.", 1)
            .replacen("manual_", "manual.", 1)
            .replacen("admission_", "admission.", 1)
            .replacen("gateway_", "gateway.", 1)
            .replacen("pipeline_", "pipeline.", 1)
            .replacen("keywords_", "keywords.", 1)
            .replacen("messages_", "messages.", 1);
        mapped.into()
    })
}
