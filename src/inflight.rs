// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bookkeeping for pending shadow requests.
//!
//! The [`InFlightTable`] is a fixed-capacity set of requests that have
//! been published but not yet acknowledged. Each entry pairs a request id
//! with the caller's callback and an absolute deadline. A reply releases
//! the entry via [`complete`](InFlightTable::complete); the housekeeper
//! reaps expired entries via [`sweep`](InFlightTable::sweep).
//!
//! Every entry's callback is invoked exactly once, with the table mutex
//! released first: the slot is freed and the entry moved out under the
//! lock, then the callback fires. A callback is therefore free to call
//! back into the engine (and the table) without deadlocking.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::types::{AckStatus, RequestId, ShadowAck, ShadowAction};

/// Upper bound on request id length, matching the wire contract.
pub const MAX_REQUEST_ID_LENGTH: usize = 64;

/// Callback invoked with the outcome of a shadow request.
pub(crate) type ActionCallback = Arc<dyn Fn(ShadowAction, ShadowAck) + Send + Sync>;

struct Entry {
    request_id: String,
    action: ShadowAction,
    callback: ActionCallback,
    deadline: Instant,
}

/// Fixed-capacity table of pending requests, keyed by request id.
pub(crate) struct InFlightTable {
    slots: Mutex<Vec<Option<Entry>>>,
}

impl InFlightTable {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Reserves a slot for a fresh request.
    ///
    /// Returns `false` if every slot is occupied; nothing is stored in
    /// that case.
    pub(crate) fn insert(
        &self,
        request_id: &RequestId,
        action: ShadowAction,
        callback: ActionCallback,
        timeout: Duration,
        now: Instant,
    ) -> bool {
        debug_assert!(request_id.as_str().len() <= MAX_REQUEST_ID_LENGTH);

        let mut slots = self.slots.lock();
        let Some(free) = slots.iter_mut().find(|slot| slot.is_none()) else {
            return false;
        };
        *free = Some(Entry {
            request_id: request_id.as_str().to_string(),
            action,
            callback,
            deadline: now + timeout,
        });
        true
    }

    /// Completes the pending request matching `request_id` (compared
    /// case-insensitively) and invokes its callback with an acknowledgement
    /// built from `status` and `payload`.
    ///
    /// For [`AckStatus::Accepted`] the whole payload becomes the ack
    /// document; for [`AckStatus::Rejected`] the `code` and `message`
    /// fields are extracted, falling back to empty strings when absent.
    ///
    /// Returns `false` when no live entry matches — a late reply after a
    /// timeout sweep lands here.
    pub(crate) fn complete(&self, request_id: &str, status: AckStatus, payload: &Value) -> bool {
        let entry = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.iter_mut().find(|slot| {
                slot.as_ref()
                    .is_some_and(|e| e.request_id.eq_ignore_ascii_case(request_id))
            }) else {
                return false;
            };
            slot.take()
        };

        // Lock released; safe to run user code.
        if let Some(entry) = entry {
            let ack = match status {
                AckStatus::Accepted => ShadowAck::Accepted {
                    document: payload.clone(),
                },
                AckStatus::Rejected => ShadowAck::Rejected {
                    code: json_str(payload, "code"),
                    message: json_str(payload, "message"),
                },
                AckStatus::Timeout => ShadowAck::Timeout,
            };
            (entry.callback)(entry.action, ack);
        }
        true
    }

    /// Reaps every entry whose deadline has passed as of `now`, invoking
    /// each callback with [`ShadowAck::Timeout`]. Returns the number of
    /// entries reaped.
    ///
    /// `now` is a parameter so callers (and tests) control the clock.
    pub(crate) fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<Entry> = {
            let mut slots = self.slots.lock();
            slots
                .iter_mut()
                .filter(|slot| slot.as_ref().is_some_and(|e| now >= e.deadline))
                .filter_map(Option::take)
                .collect()
        };

        for entry in &expired {
            tracing::warn!(request_id = %entry.request_id, action = %entry.action, "request timed out");
            (entry.callback)(entry.action, ShadowAck::Timeout);
        }
        expired.len()
    }

    /// Number of occupied slots.
    pub(crate) fn pending_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }
}

impl std::fmt::Debug for InFlightTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightTable")
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn json_str(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
