// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server assembly: wires the state table, knowledge base, platform
//! adapters, engine, and HTTP gateway together, and coordinates shutdown.
//!
//! Shutdown order matters: the gateway stops accepting webhooks first, then
//! the cancellation token stops the background tasks, and the snapshot
//! scheduler's final flush runs before the process exits so no accepted
//! intake progress is lost.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use paydesk_answer::AnswerClient;
use paydesk_config::PaydeskConfig;
use paydesk_core::{AnswerAdapter, PaydeskError, UserId};
use paydesk_engine::Pipeline;
use paydesk_gateway::auth::AuthConfig;
use paydesk_gateway::{GatewayState, ServerConfig, start_server};
use paydesk_knowledge::store::KnowledgeStore;
use paydesk_knowledge::watcher::spawn_watcher;
use paydesk_line::client::LineClient;
use paydesk_state::snapshot::{SnapshotScheduler, SnapshotSettings, load_snapshot};
use paydesk_state::table::StateTable;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(config: PaydeskConfig) -> Result<(), PaydeskError> {
    let channel_secret = required(&config.line.channel_secret, "line.channel_secret")?;
    let channel_token = required(&config.line.channel_token, "line.channel_token")?;
    let admin_raw = required(&config.line.admin_user_id, "line.admin_user_id")?;
    let admin = UserId(admin_raw);

    let cancel = CancellationToken::new();

    // State table, restored from the last snapshot.
    let table = Arc::new(StateTable::new());
    table.import(load_snapshot(Path::new(&config.state.snapshot_path)));
    info!(records = table.len(), "state table restored");

    let scheduler = SnapshotScheduler::new(
        Arc::clone(&table),
        SnapshotSettings {
            path: config.state.snapshot_path.clone().into(),
            debounce: Duration::from_millis(config.state.debounce_ms),
            flush_interval: Duration::from_secs(config.state.flush_interval_secs),
            retention: Duration::from_secs(config.state.retention_days * 86_400),
            max_records: config.state.max_records,
        },
    );
    let snapshot_task = tokio::spawn(scheduler.run(cancel.clone()));

    // Knowledge base, hot-reloaded on file change. A missing file at boot
    // is tolerated: the set stays empty until the file appears.
    let knowledge = Arc::new(KnowledgeStore::new(&config.knowledge.path));
    if let Err(error) = knowledge.load() {
        warn!(%error, "knowledge base not loaded at startup");
    }
    let watcher_task = spawn_watcher(
        Arc::clone(&knowledge),
        Duration::from_millis(config.knowledge.reload_debounce_ms),
        cancel.clone(),
    )?;

    // Platform adapters.
    let line = Arc::new(LineClient::new(
        &channel_token,
        config.line.api_base.clone(),
        Duration::from_secs(config.line.profile_cache_hours * 3_600),
        config.messages.placeholder_name.clone(),
    )?);
    let answer: Option<Arc<dyn AnswerAdapter>> = match &config.answer.api_url {
        Some(api_url) => Some(Arc::new(AnswerClient::new(
            api_url.clone(),
            config.answer.api_key.as_deref(),
            config.answer.model.clone(),
            config.answer.system_prompt.clone(),
            Duration::from_secs(config.answer.timeout_secs),
        )?)),
        None => {
            warn!("no answer backend configured, unmatched questions get the degraded reply");
            None
        }
    };

    let pipeline = Arc::new(Pipeline::new(
        &config,
        Arc::clone(&table),
        Arc::clone(&knowledge),
        line,
        answer,
        admin,
    ));

    let state = GatewayState {
        pipeline,
        channel_secret,
        auth: AuthConfig {
            bearer_token: config.gateway.admin_token.clone(),
        },
        start_time: Instant::now(),
    };
    let server_config = ServerConfig {
        host: config.gateway.host.clone(),
        port: config.gateway.port,
    };

    // SIGINT/SIGTERM trip the cancellation token; the gateway drains via
    // graceful shutdown on the same token.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let served = start_server(&server_config, state, cancel.clone()).await;

    // Stop background tasks and wait for the final snapshot flush.
    cancel.cancel();
    if let Err(error) = snapshot_task.await {
        warn!(%error, "snapshot scheduler task failed");
    }
    if let Err(error) = watcher_task.await {
        warn!(%error, "knowledge watcher task failed");
    }
    info!("shutdown complete");

    served
}

fn required(value: &Option<String>, key: &str) -> Result<String, PaydeskError> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PaydeskError::Config(format!("{key} is required for serving")))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler, using Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
