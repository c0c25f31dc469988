// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `DevShadow` Lib - A Rust library to maintain IoT device shadows via MQTT.
//!
//! A *shadow* is a server-persisted JSON document holding a device's last
//! reported state and an optional desired target. This library lets a
//! device push reported state, fetch or delete the document, and react to
//! *deltas* — server-driven messages describing how reported state
//! diverges from desired.
//!
//! Under the hood it layers a request/response engine over MQTT's
//! fire-and-forget publish model: every request carries a fresh UUIDv4
//! `requestId`, replies on the accepted/rejected topics are correlated
//! back to the pending request, and a background housekeeper turns
//! missing replies into timeouts. Callbacks fire exactly once per
//! request.
//!
//! # Supported Features
//!
//! - **Reported state updates**: `update` publishes `{reported: …}` and
//!   delivers the server's accepted document or rejection
//! - **Document retrieval and deletion**: `get` and `delete`
//! - **Delta handling**: per-property or whole-document handlers, with
//!   handler-driven rejection reported back to the server
//! - **Timeouts**: per-request deadlines enforced by a shared sweeper
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use devshadow_lib::{DeltaError, DeltaKey, ShadowAck, ShadowClient};
//!
//! #[tokio::main]
//! async fn main() -> devshadow_lib::Result<()> {
//!     // Start the housekeeper that sweeps request timeouts.
//!     devshadow_lib::init();
//!
//!     let client = ShadowClient::builder("mqtt://192.168.1.50:1883", "dev1")
//!         .credentials("user", "password")
//!         .build()?;
//!     client.connect().await?;
//!
//!     // Push reported state; the callback fires once with the outcome.
//!     client.update(
//!         serde_json::json!({"led": "on"}),
//!         |_action, ack| match ack {
//!             ShadowAck::Accepted { document } => println!("accepted: {document}"),
//!             ShadowAck::Rejected { code, message } => println!("rejected: {code}: {message}"),
//!             ShadowAck::Timeout => println!("no reply in time"),
//!         },
//!         Duration::from_secs(10),
//!     )?;
//!
//!     // React to desired-state changes for the "led" property.
//!     client.register_delta("led", |_key, value| {
//!         if value == "on" || value == "off" {
//!             None
//!         } else {
//!             Some(DeltaError::new("E_RANGE", "led must be on or off"))
//!         }
//!     })?;
//!
//!     // Or watch the whole desired object.
//!     client.register_delta(DeltaKey::root(), |_key, desired| {
//!         println!("desired changed: {desired}");
//!         None
//!     })?;
//!
//!     client.destroy();
//!     devshadow_lib::fini();
//!     Ok(())
//! }
//! ```
//!
//! # Topics
//!
//! All traffic for a device `D` lives under `baidu/iot/shadow/D/…`; see
//! [`TopicContract`] for the full family. The client subscribes to every
//! reply topic plus `delta` with QoS 1 over a clean session, and
//! re-subscribes automatically after a reconnect.
//!
//! # Concurrency
//!
//! Shadow operations are non-blocking and thread-safe. Action callbacks
//! run on the transport's event task with no engine lock held, so they
//! may call back into the client. Delta handlers run serialized and must
//! not register further handlers.

pub mod client;
pub mod config;
pub mod delta;
pub mod error;
mod inflight;
mod registry;
pub mod topic;
mod transport;
pub mod types;

pub use client::{ShadowClient, ShadowClientBuilder};
pub use config::ShadowConfig;
pub use delta::{DeltaError, DeltaKey};
pub use error::{Error, ProtocolError, Result};
pub use inflight::MAX_REQUEST_ID_LENGTH;
pub use registry::{DEFAULT_SWEEP_INTERVAL, MAX_CLIENTS, fini, init, init_with_interval};
pub use topic::{SUBSCRIBE_TOPIC_COUNT, TOPIC_PREFIX, TopicContract};
pub use types::{AckStatus, RequestId, ShadowAck, ShadowAction};
