// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Snapshot persistence for the state table.
//!
//! Two write triggers: a short debounce after any mutation (bounds write
//! amplification under bursts) and an unconditional periodic timer (bounds
//! staleness when mutations stop right after a burst). A final flush runs on
//! shutdown. The write path is temp file + fsync + rename, so a reader never
//! observes a partially written snapshot.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use paydesk_core::PaydeskError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::record::ConversationRecord;
use crate::table::StateTable;

/// Serializes the full table and atomically replaces the snapshot file.
pub fn write_snapshot(path: &Path, table: &StateTable) -> Result<(), PaydeskError> {
    let map = table.export();
    let bytes = serde_json::to_vec(&map).map_err(|e| PaydeskError::Storage {
        source: Box::new(e),
    })?;

    let tmp_path = tmp_path_for(path);
    let mut file = std::fs::File::create(&tmp_path).map_err(|e| PaydeskError::Storage {
        source: Box::new(e),
    })?;
    file.write_all(&bytes).map_err(|e| PaydeskError::Storage {
        source: Box::new(e),
    })?;
    file.sync_all().map_err(|e| PaydeskError::Storage {
        source: Box::new(e),
    })?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(|e| PaydeskError::Storage {
        source: Box::new(e),
    })?;

    debug!(records = map.len(), path = %path.display(), "snapshot written");
    Ok(())
}

/// Loads a snapshot from disk.
///
/// A missing file is a normal first boot and yields an empty map. A
/// malformed file is logged and also yields an empty map; the process never
/// crashes over bad persisted data.
pub fn load_snapshot(path: &Path) -> HashMap<String, ConversationRecord> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot file, starting empty");
            return HashMap::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read snapshot, starting empty");
            return HashMap::new();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed snapshot, starting empty");
            HashMap::new()
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Settings for the snapshot scheduler loop.
#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub path: PathBuf,
    pub debounce: Duration,
    pub flush_interval: Duration,
    pub retention: Duration,
    pub max_records: usize,
}

/// Debounced + periodic snapshot writer.
pub struct SnapshotScheduler {
    table: Arc<StateTable>,
    settings: SnapshotSettings,
}

impl SnapshotScheduler {
    pub fn new(table: Arc<StateTable>, settings: SnapshotSettings) -> Self {
        Self { table, settings }
    }

    /// Runs until cancelled, then performs a final flush.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; swallow it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.table.wait_changed() => {
                    // Coalesce the burst before writing.
                    tokio::time::sleep(self.settings.debounce).await;
                    self.flush();
                }
                _ = ticker.tick() => {
                    let retention_ms = self.settings.retention.as_millis() as i64;
                    self.table.prune(
                        chrono::Utc::now().timestamp_millis(),
                        retention_ms,
                        self.settings.max_records,
                    );
                    self.flush();
                }
                _ = cancel.cancelled() => {
                    info!("snapshot scheduler shutting down, final flush");
                    self.flush();
                    return;
                }
            }
        }
    }

    fn flush(&self) {
        self.table.take_dirty();
        if let Err(e) = write_snapshot(&self.settings.path, &self.table) {
            warn!(error = %e, "snapshot write failed");
            // Leave the table dirty so the next trigger retries.
            self.table.mark_dirty();
        }
    }
}
