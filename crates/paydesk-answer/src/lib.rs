// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generative answer backend client for Paydesk.
//!
//! Implements [`paydesk_core::AnswerAdapter`] over a chat-completion-style
//! HTTP API with a hard per-call timeout.

pub mod client;
pub mod types;

pub use client::AnswerClient;
