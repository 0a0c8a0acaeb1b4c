// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messaging platform adapter trait (reply, push, profile lookup).

use async_trait::async_trait;

use crate::error::PaydeskError;
use crate::types::UserId;

/// Adapter for the messaging platform's outbound surface.
///
/// All three operations are best effort from the pipeline's point of view:
/// callers log failures and carry on, they never surface delivery errors to
/// the end user.
#[async_trait]
pub trait MessagingAdapter: Send + Sync {
    /// Sends a reply bound to a single-use reply token.
    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), PaydeskError>;

    /// Pushes a message directly to a user. Implementations must validate
    /// the id shape before issuing the request.
    async fn push(&self, user: &UserId, text: &str) -> Result<(), PaydeskError>;

    /// Fetches the user's display name, degrading to a placeholder on
    /// failure. Implementations cache successful lookups.
    async fn display_name(&self, user: &UserId) -> String;
}
