// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Paydesk pipeline.

use serde::{Deserialize, Serialize};

/// Opaque stable identifier for an end user.
///
/// The platform issues ids shaped `U` followed by 32 lowercase hex digits.
/// The shape is validated before the id is used as a state-table key or as
/// a push target; the id is never trusted beyond its shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Returns true iff the id matches the expected `U` + 32 hex shape.
    pub fn is_valid(&self) -> bool {
        Self::is_valid_str(&self.0)
    }

    /// Shape check usable on raw strings (snapshot keys, payload fields).
    pub fn is_valid_str(s: &str) -> bool {
        let mut chars = s.chars();
        if chars.next() != Some('U') {
            return false;
        }
        let rest = &s[1..];
        rest.len() == 32 && rest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an inbound message, used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Content of a single inbound message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain text message.
    Text(String),
    /// Image message; carries the platform content id usable as a proof reference.
    Image { content_id: String },
    /// Sticker, location, audio, and anything else the intake flow ignores.
    Other,
}

/// One inbound message event after payload parsing, before any stateful logic.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub message_id: MessageId,
    /// Single-use handle for replying to this specific event.
    pub reply_token: String,
    /// Platform timestamp, unix milliseconds.
    pub timestamp_ms: i64,
    pub kind: MessageKind,
}

impl InboundEvent {
    /// Dedupe key: user + message id + timestamp, per at-least-once delivery.
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}:{}", self.user_id.0, self.message_id.0, self.timestamp_ms)
    }

    /// Text content, if this is a text event.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_valid_shape() {
        let id = UserId(format!("U{}", "a1b2c3d4".repeat(4)));
        assert!(id.is_valid());
    }

    #[test]
    fn user_id_rejects_wrong_prefix() {
        assert!(!UserId::is_valid_str(&format!("X{}", "a1b2c3d4".repeat(4))));
    }

    #[test]
    fn user_id_rejects_wrong_length() {
        assert!(!UserId::is_valid_str("Uabc"));
        assert!(!UserId::is_valid_str(&format!("U{}ff", "a1b2c3d4".repeat(4))));
    }

    #[test]
    fn user_id_rejects_uppercase_hex() {
        assert!(!UserId::is_valid_str(&format!("U{}", "A1B2C3D4".repeat(4))));
    }

    #[test]
    fn user_id_rejects_non_hex() {
        assert!(!UserId::is_valid_str(&format!("U{}", "g1h2i3j4".repeat(4))));
    }

    #[test]
    fn dedupe_key_includes_all_parts() {
        let ev = InboundEvent {
            user_id: UserId("Uaaaa".into()),
            message_id: MessageId("m1".into()),
            reply_token: "rt".into(),
            timestamp_ms: 1700000000000,
            kind: MessageKind::Text("hi".into()),
        };
        assert_eq!(ev.dedupe_key(), "Uaaaa:m1:1700000000000");
    }

    #[test]
    fn text_accessor_only_for_text() {
        let mut ev = InboundEvent {
            user_id: UserId("U".into()),
            message_id: MessageId("m".into()),
            reply_token: "rt".into(),
            timestamp_ms: 0,
            kind: MessageKind::Text("hello".into()),
        };
        assert_eq!(ev.text(), Some("hello"));
        ev.kind = MessageKind::Image { content_id: "c1".into() };
        assert_eq!(ev.text(), None);
    }
}
