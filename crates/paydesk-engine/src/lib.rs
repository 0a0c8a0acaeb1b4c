// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation engine for Paydesk.
//!
//! Everything between a parsed webhook event and an outbound message lives
//! here: the intake state machine, the manual-handoff gate, anti-abuse
//! accounting, admission control for the generative backend, and the
//! per-user serialized pipeline that ties them together.

pub mod admission;
pub mod dedupe;
pub mod intake;
pub mod manual;
pub mod pipeline;
pub mod spam;

pub use pipeline::Pipeline;
