// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generative answer backend trait.

use async_trait::async_trait;

use crate::error::PaydeskError;

/// Adapter for the generative answer backend.
///
/// One call per admitted question. The admission controller bounds how many
/// of these run concurrently; the implementation owns the request timeout.
#[async_trait]
pub trait AnswerAdapter: Send + Sync {
    /// Produces an answer for `question`, optionally grounded on a matched
    /// knowledge snippet. Errors are mapped to the fixed busy text at the
    /// pipeline boundary, never shown to the end user.
    async fn answer(&self, question: &str, grounding: Option<&str>)
    -> Result<String, PaydeskError>;
}
