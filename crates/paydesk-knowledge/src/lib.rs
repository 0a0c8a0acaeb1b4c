// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge base for Paydesk: a versioned question/answer set loaded from
//! a watched JSON file, replaced atomically on reload, ranked with a
//! deliberately simple and explainable scheme.

pub mod rank;
pub mod store;
pub mod watcher;

pub use rank::rank_entries;
pub use store::{KnowledgeEntry, KnowledgeStore};
pub use watcher::spawn_watcher;
