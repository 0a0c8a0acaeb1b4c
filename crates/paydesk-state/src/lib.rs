// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable conversation state for Paydesk.
//!
//! [`StateTable`] is the single in-memory authority for per-user records;
//! [`SnapshotScheduler`] keeps it on disk with debounced, periodic, and
//! shutdown-time atomic writes.

pub mod record;
pub mod snapshot;
pub mod table;

pub use record::{ConversationRecord, Phase, RateWindow};
pub use snapshot::{SnapshotScheduler, SnapshotSettings, load_snapshot, write_snapshot};
pub use table::StateTable;
