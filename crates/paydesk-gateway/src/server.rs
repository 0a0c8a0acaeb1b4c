// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Three surfaces: the platform webhook (signature-authenticated), the
//! admin side channel (bearer-authenticated, fail-closed), and an
//! unauthenticated health endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};
use paydesk_core::PaydeskError;
use paydesk_engine::Pipeline;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<Pipeline>,
    /// Channel secret for webhook signature verification.
    pub channel_secret: String,
    pub auth: AuthConfig,
    /// Process start time for uptime reporting.
    pub start_time: Instant,
}

/// Gateway server configuration (mirrors GatewayConfig from paydesk-config).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Builds the full route tree. Separated from [`start_server`] so tests can
/// drive it without a socket.
pub fn build_router(state: GatewayState) -> Router {
    let public_routes = Router::new()
        .route("/webhook", post(handlers::post_webhook))
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/admin/manual", post(handlers::post_admin_manual))
        .route_layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new().merge(public_routes).merge(admin_routes)
}

/// Binds and serves until `cancel` fires.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), PaydeskError> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PaydeskError::Channel {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| PaydeskError::Channel {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;

    Ok(())
}
