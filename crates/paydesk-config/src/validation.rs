// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes: non-empty paths, consistent thresholds, and — for serving —
//! the presence of the platform credentials.

use paydesk_core::UserId;

use crate::diagnostic::ConfigError;
use crate::model::PaydeskConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &PaydeskConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.gateway.host.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "gateway.host must not be empty".to_string(),
        });
    }

    if config.state.snapshot_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "state.snapshot_path must not be empty".to_string(),
        });
    }

    if config.knowledge.path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "knowledge.path must not be empty".to_string(),
        });
    }

    if config.admission.max_concurrent == 0 {
        errors.push(ConfigError::Validation {
            message: "admission.max_concurrent must be at least 1".to_string(),
        });
    }

    if config.admission.long_hard_limit <= config.admission.long_soft_limit {
        errors.push(ConfigError::Validation {
            message: format!(
                "admission.long_hard_limit ({}) must exceed long_soft_limit ({})",
                config.admission.long_hard_limit, config.admission.long_soft_limit
            ),
        });
    }

    if config.answer.timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "answer.timeout_secs must be at least 1".to_string(),
        });
    }

    if config.state.max_records == 0 {
        errors.push(ConfigError::Validation {
            message: "state.max_records must be at least 1".to_string(),
        });
    }

    if let Some(admin) = &config.line.admin_user_id
        && !UserId::is_valid_str(admin)
    {
        errors.push(ConfigError::Validation {
            message: format!("line.admin_user_id `{admin}` is not a valid user id"),
        });
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validate the extra requirements for actually serving traffic.
///
/// Missing platform credentials are fatal at startup: the process must exit
/// before accepting traffic rather than reject every webhook at runtime.
pub fn validate_for_serve(config: &PaydeskConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.line.channel_secret.as_deref().unwrap_or("").is_empty() {
        errors.push(ConfigError::MissingKey {
            key: "line.channel_secret".to_string(),
        });
    }

    if config.line.channel_token.as_deref().unwrap_or("").is_empty() {
        errors.push(ConfigError::MissingKey {
            key: "line.channel_token".to_string(),
        });
    }

    if config.line.admin_user_id.as_deref().unwrap_or("").is_empty() {
        errors.push(ConfigError::MissingKey {
            key: "line.admin_user_id".to_string(),
        });
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
