// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `DevShadow` library.
//!
//! Every public operation returns [`Result`]. Transport-level failures are
//! wrapped in [`ProtocolError`]; everything else is a library-level
//! condition on [`Error`]. Inbound messages that fail to parse are logged
//! and dropped rather than surfaced here.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, such as an empty device name.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The client is not both connected and subscribed.
    ///
    /// Shadow operations and delta registration require the full
    /// `SUBSCRIBED` state; a client that has connected but not yet
    /// completed its reply-topic subscriptions reports this too.
    #[error("client is not connected")]
    NotConnected,

    /// The in-flight table is full; the request was not sent.
    #[error("too many in-flight requests")]
    TooManyInFlight,

    /// The delta handler registry is full.
    #[error("too many delta handlers")]
    TooManyDeltaHandlers,

    /// The process-wide client registry is full.
    #[error("client registry is full")]
    RegistryFull,

    /// Transport-level failure not further classifiable.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors related to the MQTT transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT connection or communication failed.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An operation timed out.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Invalid broker URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
