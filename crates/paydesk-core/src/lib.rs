// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Paydesk webhook responder.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types used throughout the Paydesk workspace. The messaging platform
//! and the generative backend are reached exclusively through the traits
//! defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::PaydeskError;
pub use types::{InboundEvent, MessageId, MessageKind, UserId};

pub use traits::{AnswerAdapter, MessagingAdapter};
