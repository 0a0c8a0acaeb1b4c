// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits implemented by the external collaborators.

pub mod answer;
pub mod messaging;

pub use answer::AnswerAdapter;
pub use messaging::MessagingAdapter;
