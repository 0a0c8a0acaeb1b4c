// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge entry set with atomic whole-set replacement.
//!
//! Entries are immutable once loaded. `load` swaps the entire set in one
//! step; readers either see the old set or the new one, never a mix. On
//! malformed input the previous good set is retained (availability over
//! freshness).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use paydesk_core::PaydeskError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::rank;

/// One question/answer entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    /// Ordered phrasings of the question.
    pub questions: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

/// In-memory knowledge set backed by a watched JSON file.
pub struct KnowledgeStore {
    path: PathBuf,
    entries: ArcSwap<Vec<KnowledgeEntry>>,
}

impl KnowledgeStore {
    /// Creates an empty store for the given backing file. Call [`load`]
    /// before first use; an empty set simply never matches.
    ///
    /// [`load`]: KnowledgeStore::load
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and replaces the entry set. On any failure the previous
    /// in-memory set stays in place and the error is returned for logging.
    pub fn load(&self) -> Result<usize, PaydeskError> {
        let bytes = std::fs::read(&self.path).map_err(|e| PaydeskError::Knowledge {
            message: format!("failed to read {}: {e}", self.path.display()),
        })?;
        let parsed: Vec<KnowledgeEntry> =
            serde_json::from_slice(&bytes).map_err(|e| PaydeskError::Knowledge {
                message: format!("malformed {}: {e}", self.path.display()),
            })?;
        let count = parsed.len();
        self.entries.store(Arc::new(parsed));
        info!(entries = count, path = %self.path.display(), "knowledge set loaded");
        Ok(count)
    }

    /// Current entry set.
    pub fn entries(&self) -> Arc<Vec<KnowledgeEntry>> {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Ranks the current set against `query`; empty result means no match
    /// confident enough to answer with.
    pub fn lookup(&self, query: &str, k: usize) -> Vec<KnowledgeEntry> {
        rank::rank_entries(&self.entries.load(), query, k)
    }

    /// Grounding snippet for the generative fallback: the best-scoring
    /// entry even when it fails the acceptance floor, rendered as a short
    /// Q/A block. `None` when nothing in the set relates to the query.
    pub fn grounding_snippet(&self, query: &str) -> Option<String> {
        let entry = rank::best_candidate(&self.entries.load(), query)?;
        let question = entry.questions.first().cloned().unwrap_or_default();
        Some(format!("Q: {question}\nA: {}", entry.answer))
    }

    #[cfg(test)]
    pub(crate) fn set_entries(&self, entries: Vec<KnowledgeEntry>) {
        self.entries.store(Arc::new(entries));
    }
}
