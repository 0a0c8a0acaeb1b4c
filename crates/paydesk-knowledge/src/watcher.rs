// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! File watcher for the knowledge backing file.
//!
//! Watches the parent directory (editors replace files by rename, which
//! drops a watch on the file itself), debounces rapid edits, and reloads
//! the store. A failed reload keeps the previous set and is only logged.

use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use paydesk_core::PaydeskError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::KnowledgeStore;

/// Starts watching the store's backing file, reloading after `debounce`.
///
/// Returns the task handle; the watcher stops when `cancel` fires.
pub fn spawn_watcher(
    store: Arc<KnowledgeStore>,
    debounce: Duration,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>, PaydeskError> {
    let path = store.path().to_path_buf();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    let file_name = path.file_name().map(|n| n.to_os_string());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| {
        let _ = tx.send(res);
    })
    .map_err(|e| PaydeskError::Knowledge {
        message: format!("failed to create file watcher: {e}"),
    })?;

    debouncer
        .watcher()
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| PaydeskError::Knowledge {
            message: format!("failed to watch {}: {e}", dir.display()),
        })?;

    let handle = tokio::spawn(async move {
        // Keep the debouncer alive for the lifetime of the task.
        let _debouncer = debouncer;
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(Ok(events)) => {
                            let relevant = events.iter().any(|e| {
                                match (&file_name, e.path.file_name()) {
                                    (Some(want), Some(got)) => want == got,
                                    _ => true,
                                }
                            });
                            if !relevant {
                                continue;
                            }
                            match store.load() {
                                Ok(count) => {
                                    debug!(entries = count, "knowledge set reloaded after change");
                                }
                                Err(e) => {
                                    warn!(error = %e, "knowledge reload failed, keeping previous set");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "file watcher error");
                        }
                        None => return,
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    });

    Ok(handle)
}
