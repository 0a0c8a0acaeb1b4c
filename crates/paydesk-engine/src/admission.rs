// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admission control for the generative answer backend.
//!
//! A fixed number of calls may run concurrently; everyone else waits in a
//! FIFO queue. Queued users are not called back automatically with an
//! answer: when a slot frees up they are invited to resend, which keeps the
//! queue honest (a user who left never consumes a slot). Eligibility is
//! re-checked at notification time because queue membership can go stale —
//! a queued user may have entered manual handoff or a cooldown since.

use std::collections::VecDeque;
use std::sync::Mutex;

use paydesk_core::UserId;
use tracing::debug;

/// Verdict on a queued user at slot-release time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEligibility {
    /// Notify the user that a slot is free.
    Eligible,
    /// Drop the entry (manual handoff, or no longer marked queued).
    Drop,
    /// Keep waiting at the back of the queue (active cooldown).
    Requeue,
}

struct Inner {
    active: usize,
    queue: VecDeque<UserId>,
}

pub struct AdmissionController {
    max_concurrent: usize,
    inner: Mutex<Inner>,
}

impl AdmissionController {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            inner: Mutex::new(Inner {
                active: 0,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Claims a slot if one is free. The caller must pair a successful claim
    /// with exactly one [`release`](Self::release) on every path.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        if inner.active < self.max_concurrent {
            inner.active += 1;
            true
        } else {
            false
        }
    }

    /// Appends a user to the wait queue. Idempotent: a user already queued
    /// keeps their original position.
    pub fn enqueue(&self, user: &UserId) -> bool {
        let mut inner = self.lock();
        if inner.queue.contains(user) {
            return false;
        }
        inner.queue.push_back(user.clone());
        debug!(user = %user, depth = inner.queue.len(), "queued for generative slot");
        true
    }

    /// Drops a user from the wait queue (cooldown kick, operator reset).
    pub fn remove(&self, user: &UserId) {
        let mut inner = self.lock();
        inner.queue.retain(|u| u != user);
    }

    /// Releases one slot and scans the queue head-to-tail for users to
    /// invite. `eligibility` is consulted per entry: ineligible entries are
    /// dropped or moved to the back, and at most as many users as there are
    /// free slots are returned for notification.
    pub fn release(
        &self,
        mut eligibility: impl FnMut(&UserId) -> QueueEligibility,
    ) -> Vec<UserId> {
        let mut inner = self.lock();
        inner.active = inner.active.saturating_sub(1);
        let free = self.max_concurrent - inner.active;

        let mut to_notify = Vec::new();
        let mut requeued = VecDeque::new();
        while to_notify.len() < free {
            let Some(user) = inner.queue.pop_front() else {
                break;
            };
            match eligibility(&user) {
                QueueEligibility::Eligible => to_notify.push(user),
                QueueEligibility::Drop => {
                    debug!(user = %user, "dropped stale queue entry");
                }
                QueueEligibility::Requeue => requeued.push_back(user),
            }
        }
        inner.queue.extend(requeued);
        to_notify
    }

    pub fn active(&self) -> usize {
        self.lock().active
    }

    pub fn queue_depth(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic while holding it; the guarded state
        // is two integers and a queue, all still structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
