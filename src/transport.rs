// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thin facade in front of the MQTT library.
//!
//! The engine never touches `rumqttc` directly: outbound traffic goes
//! through the [`Transport`] trait (all calls non-blocking), and inbound
//! traffic arrives through the [`TransportEvents`] callbacks driven by
//! [`run_event_loop`]. Keeping the seam here lets the engine be exercised
//! in tests with a recording transport and injected messages.

use std::sync::Weak;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS, SubscribeFilter};

use crate::error::ProtocolError;

/// Outbound operations the engine needs from the MQTT layer.
///
/// Every method only initiates work; completion (or failure) is observed
/// through [`TransportEvents`].
pub(crate) trait Transport: Send + Sync {
    /// Publishes `payload` on `topic`, non-retained.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProtocolError>;

    /// Issues a single subscribe-many for all `topics`.
    fn subscribe_many(&self, topics: &[&str]) -> Result<(), ProtocolError>;

    /// Requests a disconnect from the broker.
    fn disconnect(&self) -> Result<(), ProtocolError>;
}

/// Inbound notifications from the MQTT layer.
pub(crate) trait TransportEvents: Send + Sync {
    /// The broker acknowledged the connection (initial connect or
    /// auto-reconnect).
    fn on_connected(&self);

    /// The broker acknowledged the subscribe-many.
    fn on_subscribed(&self);

    /// The connection dropped; the transport will retry on its own.
    fn on_connection_lost(&self, reason: &str);

    /// A message arrived on a subscribed topic.
    fn on_message(&self, topic: &str, payload: &[u8]);

    /// The broker acknowledged a QoS-1 publish.
    fn on_delivery_complete(&self, pkid: u16);
}

/// Production [`Transport`] backed by a `rumqttc` client handle.
///
/// Uses the `try_` request variants throughout so the engine's publish
/// and dispatch paths never await; a full request queue surfaces as an
/// error instead of backpressure.
#[derive(Debug, Clone)]
pub(crate) struct MqttTransport {
    client: AsyncClient,
    qos: QoS,
}

impl MqttTransport {
    pub(crate) fn new(client: AsyncClient, qos: QoS) -> Self {
        Self { client, qos }
    }
}

impl Transport for MqttTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProtocolError> {
        self.client
            .try_publish(topic, self.qos, false, payload)
            .map_err(ProtocolError::Mqtt)
    }

    fn subscribe_many(&self, topics: &[&str]) -> Result<(), ProtocolError> {
        let filters: Vec<SubscribeFilter> = topics
            .iter()
            .map(|topic| SubscribeFilter::new((*topic).to_string(), self.qos))
            .collect();
        self.client
            .try_subscribe_many(filters)
            .map_err(ProtocolError::Mqtt)
    }

    fn disconnect(&self) -> Result<(), ProtocolError> {
        self.client.try_disconnect().map_err(ProtocolError::Mqtt)
    }
}

/// Drives the MQTT event loop, translating packets into
/// [`TransportEvents`] calls.
///
/// Holds only a weak reference to the event sink: when the owning client
/// is dropped the loop stops on the next event. Poll errors are reported
/// as connection loss and the loop keeps polling — `rumqttc` reconnects
/// on the next `poll`, which yields a fresh `ConnAck` and re-runs the
/// subscribe cycle.
pub(crate) async fn run_event_loop(mut event_loop: EventLoop, events: Weak<dyn TransportEvents>) {
    loop {
        let result = event_loop.poll().await;

        let Some(sink) = events.upgrade() else {
            break;
        };

        match result {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::debug!(?ack, "MQTT connected");
                sink.on_connected();
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
                sink.on_subscribed();
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                sink.on_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::PubAck(puback))) => {
                sink.on_delivery_complete(puback.pkid);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::warn!("broker requested disconnect");
                sink.on_connection_lost("server disconnect");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT event loop error");
                sink.on_connection_lost(&e.to_string());
                drop(sink);
                // The event loop reconnects on the next poll; pause so a
                // dead broker does not spin this task.
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    tracing::debug!("event loop stopped: client dropped");
}

#[cfg(test)]
pub(crate) mod testing {
    //! A recording transport for engine tests.

    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::{ProtocolError, Transport};

    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub(crate) published: Mutex<Vec<(String, Vec<u8>)>>,
        pub(crate) subscribed: Mutex<Vec<Vec<String>>>,
        pub(crate) disconnects: AtomicU32,
        pub(crate) fail_publish: AtomicBool,
    }

    impl MockTransport {
        pub(crate) fn published_on(&self, topic: &str) -> Vec<serde_json::Value> {
            self.published
                .lock()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProtocolError> {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(ProtocolError::ConnectionFailed(
                    "mock publish failure".to_string(),
                ));
            }
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }

        fn subscribe_many(&self, topics: &[&str]) -> Result<(), ProtocolError> {
            self.subscribed
                .lock()
                .push(topics.iter().map(|t| (*t).to_string()).collect());
            Ok(())
        }

        fn disconnect(&self) -> Result<(), ProtocolError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn mock_records_publishes() {
        let mock = MockTransport::default();
        mock.publish("a/b", br#"{"x":1}"#.to_vec()).unwrap();
        mock.publish("a/c", br#"{"y":2}"#.to_vec()).unwrap();

        assert_eq!(mock.published.lock().len(), 2);
        assert_eq!(mock.published_on("a/b").len(), 1);
        assert_eq!(mock.published_on("a/b")[0], serde_json::json!({"x": 1}));
    }

    #[test]
    fn mock_publish_failure() {
        let mock = MockTransport::default();
        mock.fail_publish.store(true, Ordering::SeqCst);
        assert!(mock.publish("a/b", Vec::new()).is_err());
        assert!(mock.published.lock().is_empty());
    }

    #[test]
    fn mock_records_subscriptions_and_disconnects() {
        let mock = MockTransport::default();
        mock.subscribe_many(&["t/1", "t/2"]).unwrap();
        mock.disconnect().unwrap();

        assert_eq!(mock.subscribed.lock()[0], vec!["t/1", "t/2"]);
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
    }
}
