// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook payload types and conversion into channel-agnostic events.

use paydesk_core::{InboundEvent, MessageId, MessageKind, UserId};
use serde::Deserialize;
use tracing::debug;

/// Top-level webhook body: a batch of events.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

/// One webhook event. Only `message` events carry a message body; other
/// kinds (follow, unfollow, postback) are ignored by the pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Converts a parsed payload into inbound events.
///
/// Drops non-message events, events without a usable reply token, and
/// events whose sender id fails the shape check. A bad event never aborts
/// the rest of the batch.
pub fn to_inbound_events(payload: WebhookPayload) -> Vec<InboundEvent> {
    let mut out = Vec::with_capacity(payload.events.len());

    for event in payload.events {
        if event.event_type != "message" {
            continue;
        }
        let Some(message) = event.message else {
            continue;
        };
        let Some(reply_token) = event.reply_token.filter(|t| !t.is_empty()) else {
            continue;
        };
        let Some(raw_user) = event.source.and_then(|s| s.user_id) else {
            debug!("message event without user id, skipping");
            continue;
        };
        if !UserId::is_valid_str(&raw_user) {
            debug!(user = %raw_user, "invalid user id shape, skipping event");
            continue;
        }

        let kind = match message.message_type.as_str() {
            "text" => MessageKind::Text(message.text.unwrap_or_default()),
            "image" => MessageKind::Image {
                content_id: message.id.clone(),
            },
            _ => MessageKind::Other,
        };

        out.push(InboundEvent {
            user_id: UserId(raw_user),
            message_id: MessageId(message.id),
            reply_token,
            timestamp_ms: event.timestamp,
            kind,
        });
    }

    out
}
