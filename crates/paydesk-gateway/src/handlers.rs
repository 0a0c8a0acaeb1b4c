// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the webhook gateway.
//!
//! The webhook handler acknowledges before processing: the platform
//! retries slow responses, and a retry looks exactly like a duplicate
//! delivery, which the pipeline's dedupe stage already absorbs.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use paydesk_line::signature::verify_signature;
use paydesk_line::types::{WebhookPayload, to_inbound_events};

use crate::server::GatewayState;

/// Request body for POST /admin/manual.
#[derive(Debug, Deserialize)]
pub struct ManualRequest {
    pub enabled: bool,
}

/// Response body for POST /admin/manual.
#[derive(Debug, Serialize)]
pub struct ManualResponse {
    pub manual: bool,
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_calls: usize,
    pub queue_depth: usize,
    pub manual: bool,
}

/// POST /webhook
///
/// Verifies the platform signature over the raw body, fans valid events
/// out into background jobs, and acknowledges immediately. An invalid
/// signature is the one case that must not be acknowledged.
pub async fn post_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("x-line-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !verify_signature(&state.channel_secret, &body, signature) {
        warn!("webhook signature verification failed");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%error, "signed webhook body failed to parse");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let events = to_inbound_events(payload);
    debug!(count = events.len(), "webhook events accepted");
    state.pipeline.spawn_jobs(events);

    StatusCode::OK.into_response()
}

/// POST /admin/manual — flips the global manual switch.
pub async fn post_admin_manual(
    State(state): State<GatewayState>,
    Json(body): Json<ManualRequest>,
) -> Json<ManualResponse> {
    state.pipeline.set_global_manual(body.enabled);
    Json(ManualResponse {
        manual: state.pipeline.global_manual_enabled(),
    })
}

/// GET /health — unauthenticated liveness plus load counters.
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_calls: state.pipeline.active_calls(),
        queue_depth: state.pipeline.queue_depth(),
        manual: state.pipeline.global_manual_enabled(),
    })
}
