// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core value types shared across the library.

use serde_json::Value;
use uuid::Uuid;

/// A shadow operation kind.
///
/// Each action has its own send topic and accepted/rejected reply topics;
/// see [`TopicContract`](crate::topic::TopicContract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowAction {
    /// Push reported state to the shadow document.
    Update,
    /// Fetch the current shadow document.
    Get,
    /// Delete the shadow document.
    Delete,
}

impl ShadowAction {
    /// Returns the topic verb for this action (`update`, `get`, `delete`).
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Get => "get",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ShadowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.verb())
    }
}

/// Outcome category of a shadow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// The server accepted the request.
    Accepted,
    /// The server rejected the request.
    Rejected,
    /// No reply arrived before the request's deadline.
    Timeout,
}

/// The acknowledgement delivered to a shadow action callback.
///
/// Carries the accepted document, the rejection code and message, or
/// nothing for a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowAck {
    /// The request was accepted; `document` is the full reply payload as
    /// published by the server (including its `requestId` field).
    Accepted {
        /// The reply payload.
        document: Value,
    },
    /// The request was rejected.
    Rejected {
        /// Machine-readable rejection code.
        code: String,
        /// Human-readable rejection message.
        message: String,
    },
    /// The request timed out; there is no payload.
    Timeout,
}

impl ShadowAck {
    /// Returns the status category of this acknowledgement.
    #[must_use]
    pub const fn status(&self) -> AckStatus {
        match self {
            Self::Accepted { .. } => AckStatus::Accepted,
            Self::Rejected { .. } => AckStatus::Rejected,
            Self::Timeout => AckStatus::Timeout,
        }
    }

    /// Returns the accepted document, if this is an accepted ack.
    #[must_use]
    pub fn document(&self) -> Option<&Value> {
        match self {
            Self::Accepted { document } => Some(document),
            _ => None,
        }
    }
}

/// A request identifier correlating a publish with its reply.
///
/// Generated as a canonical lowercase UUIDv4 (36 characters). Reply
/// correlation compares ids case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a fresh random request id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares this id against another, ignoring ASCII case.
    #[must_use]
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.0
    }
}
