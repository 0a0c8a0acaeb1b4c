// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway for Paydesk.
//!
//! Receives platform webhooks, verifies their signatures, and hands parsed
//! events to the engine. Also serves the admin side channel and health.

pub mod auth;
pub mod handlers;
pub mod server;

pub use server::{GatewayState, ServerConfig, build_router, start_server};
