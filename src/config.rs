// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client configuration.

use std::time::Duration;

use rumqttc::QoS;

use crate::error::ProtocolError;

/// Configuration for a shadow client.
///
/// Defaults match the reference deployment: 30 s keep-alive, 10 s connect
/// timeout, 5 s subscribe timeout, QoS 1 everywhere, 16 in-flight slots
/// and 16 delta handlers per client.
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Maximum time to wait for the broker's connection acknowledgement.
    pub connect_timeout: Duration,
    /// Maximum time to wait for the reply-topic subscriptions to complete
    /// after the connection is up.
    pub subscribe_timeout: Duration,
    /// Quality of service for every publish and subscription.
    pub qos: QoS,
    /// Capacity of the in-flight request table.
    pub max_in_flight: usize,
    /// Capacity of the delta handler registry.
    pub max_delta_handlers: usize,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(5),
            qos: QoS::AtLeastOnce,
            max_in_flight: 16,
            max_delta_handlers: 16,
        }
    }
}

/// Parses an MQTT broker URL into host and port.
///
/// Accepts `mqtt://host:port`, `tcp://host:port`, or a bare `host[:port]`;
/// the port defaults to 1883.
pub(crate) fn parse_broker_url(url: &str) -> Result<(String, u16), ProtocolError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    if url.is_empty() {
        return Err(ProtocolError::InvalidAddress("empty broker URL".to_string()));
    }

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| ProtocolError::InvalidAddress(format!("Invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    Ok((host, port))
}
