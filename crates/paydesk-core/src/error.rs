// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Paydesk webhook responder.

use thiserror::Error;

/// The primary error type used across all Paydesk adapter traits and core operations.
#[derive(Debug, Error)]
pub enum PaydeskError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Messaging platform errors (reply/push delivery, profile fetch, payload format).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generative answer backend errors (API failure, malformed response).
    #[error("answer backend error: {message}")]
    Answer {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// State snapshot errors (serialization, disk write, load).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Knowledge file errors (unreadable, malformed entries).
    #[error("knowledge error: {message}")]
    Knowledge { message: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}
