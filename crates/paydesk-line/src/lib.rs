// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LINE Messaging API adapter for Paydesk.
//!
//! Implements [`paydesk_core::MessagingAdapter`] over the platform REST API,
//! verifies webhook signatures, and parses webhook payloads into
//! channel-agnostic inbound events.

pub mod client;
pub mod signature;
pub mod types;

pub use client::LineClient;
pub use signature::{sign, verify_signature};
pub use types::{WebhookPayload, to_inbound_events};
