// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The shadow client and its request/response engine.
//!
//! [`ShadowClient`] turns MQTT's fire-and-forget publishes into
//! request/reply calls: every send reserves an in-flight slot under a
//! fresh request id, publishes on the action's send topic, and the reply
//! arriving on the matching accepted/rejected topic (or the timeout
//! sweep) fires the caller's callback exactly once.
//!
//! # Connection lifecycle
//!
//! ```text
//! DISCONNECTED ──connect()──▶ CONNECTING ──ConnAck──▶ CONNECTED
//!        ▲                                               │
//!        │                                (subscribe-many one-shot)
//!        │                                               ▼
//!        │                                         SUBSCRIBED
//!        └────────────── connection lost ◀───────────────┘
//! ```
//!
//! Only the `SUBSCRIBED` state accepts shadow operations. The broker
//! session is clean, so after a connection loss the transport's reconnect
//! yields a fresh `ConnAck` and the reply-topic subscriptions are
//! re-established before the client reports ready again.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::{ShadowConfig, parse_broker_url};
use crate::delta::{DeltaError, DeltaKey, DeltaRegistry};
use crate::error::{Error, ProtocolError, Result};
use crate::inflight::{ActionCallback, InFlightTable};
use crate::registry;
use crate::topic::{Inbound, TopicContract};
use crate::transport::{MqttTransport, Transport, TransportEvents, run_event_loop};
use crate::types::{RequestId, ShadowAck, ShadowAction};

/// Connection and subscription flags, published through a watch channel
/// so `connect()` can await readiness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LinkState {
    connected: bool,
    subscribed: bool,
}

impl LinkState {
    const fn is_ready(self) -> bool {
        self.connected && self.subscribed
    }
}

/// Shared engine state behind a [`ShadowClient`].
pub(crate) struct ClientInner {
    device_name: String,
    config: ShadowConfig,
    topics: TopicContract,
    in_flight: InFlightTable,
    deltas: DeltaRegistry,
    transport: Arc<dyn Transport>,
    link_tx: watch::Sender<LinkState>,
}

impl ClientInner {
    fn new(device_name: String, config: ShadowConfig, transport: Arc<dyn Transport>) -> Self {
        let topics = TopicContract::new(&device_name);
        let (link_tx, _) = watch::channel(LinkState::default());
        Self {
            device_name,
            in_flight: InFlightTable::new(config.max_in_flight),
            deltas: DeltaRegistry::new(config.max_delta_handlers),
            config,
            topics,
            transport,
            link_tx,
        }
    }

    fn is_ready(&self) -> bool {
        self.link_tx.borrow().is_ready()
    }

    /// Sweeps expired in-flight entries; called by the housekeeper.
    pub(crate) fn sweep_in_flight(&self, now: Instant) {
        let reaped = self.in_flight.sweep(now);
        if reaped > 0 {
            tracing::debug!(device = %self.device_name, reaped, "reaped timed-out requests");
        }
    }

    fn publish_json(&self, topic: &str, payload: &Value) -> std::result::Result<(), ProtocolError> {
        let body = payload.to_string();
        tracing::trace!(topic = %topic, payload = %body, "publishing");
        self.transport.publish(topic, body.into_bytes())
    }

    /// Common send path for update/get/delete.
    fn send(
        &self,
        action: ShadowAction,
        mut payload: Map<String, Value>,
        callback: ActionCallback,
        timeout: Duration,
    ) -> Result<RequestId> {
        if !self.is_ready() {
            return Err(Error::NotConnected);
        }

        let request_id = RequestId::generate();
        if !self
            .in_flight
            .insert(&request_id, action, callback, timeout, Instant::now())
        {
            return Err(Error::TooManyInFlight);
        }

        payload.insert(
            "requestId".to_string(),
            Value::String(request_id.as_str().to_string()),
        );

        // On initiation failure the entry stays in the table; the timeout
        // sweep delivers the caller's error path.
        if let Err(e) = self.publish_json(self.topics.send_topic(action), &Value::Object(payload)) {
            tracing::error!(
                request_id = %request_id,
                action = %action,
                error = %e,
                "failed to initiate publish"
            );
            return Err(Error::Protocol(e));
        }

        Ok(request_id)
    }

    pub(crate) fn update(
        &self,
        reported: Value,
        callback: ActionCallback,
        timeout: Duration,
    ) -> Result<RequestId> {
        let mut payload = Map::new();
        payload.insert("reported".to_string(), reported);
        self.send(ShadowAction::Update, payload, callback, timeout)
    }

    pub(crate) fn get(&self, callback: ActionCallback, timeout: Duration) -> Result<RequestId> {
        self.send(ShadowAction::Get, Map::new(), callback, timeout)
    }

    pub(crate) fn delete(&self, callback: ActionCallback, timeout: Duration) -> Result<RequestId> {
        self.send(ShadowAction::Delete, Map::new(), callback, timeout)
    }

    pub(crate) fn register_delta(
        &self,
        key: DeltaKey,
        callback: crate::delta::DeltaCallback,
    ) -> Result<()> {
        // Registration before the subscribe completes would silently miss
        // early deltas, so connectivity is required up front.
        if !self.is_ready() {
            return Err(Error::NotConnected);
        }
        if self.deltas.register(key, callback) {
            Ok(())
        } else {
            Err(Error::TooManyDeltaHandlers)
        }
    }

    /// Classifies and dispatches one inbound message.
    fn handle_message(&self, topic: &str, payload: &[u8]) {
        // Undersized to be valid JSON.
        if payload.len() < 3 {
            return;
        }

        let Some(inbound) = self.topics.classify(topic) else {
            tracing::error!(device = %self.device_name, topic = %topic, "unexpected topic");
            return;
        };

        let parsed: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "failed to parse payload");
                return;
            }
        };
        tracing::trace!(topic = %topic, payload = %parsed, "message arrived");

        match inbound {
            Inbound::Delta => self.delta_arrived(&parsed),
            Inbound::Reply { action, status } => {
                let Some(request_id) = parsed.get("requestId").and_then(Value::as_str) else {
                    tracing::error!(topic = %topic, action = %action, "reply without request id");
                    return;
                };
                if !self.in_flight.complete(request_id, status, &parsed) {
                    tracing::warn!(
                        request_id = %request_id,
                        "no in-flight request matching reply"
                    );
                }
            }
        }
    }

    fn delta_arrived(&self, payload: &Value) {
        let Some(request_id) = payload.get("requestId").and_then(Value::as_str) else {
            tracing::error!(device = %self.device_name, "delta without request id");
            return;
        };
        tracing::debug!(request_id = %request_id, "received delta");

        let Some(desired) = payload.get("desired") else {
            tracing::error!(request_id = %request_id, "delta without desired state");
            return;
        };

        if let Some(error) = self.deltas.dispatch(desired) {
            tracing::debug!(
                request_id = %request_id,
                code = %error.code,
                "delta rejected by handler"
            );
            let response = json!({
                "requestId": request_id,
                "code": error.code,
                "message": error.message,
            });
            if let Err(e) = self.publish_json(self.topics.delta_rejected(), &response) {
                tracing::error!(request_id = %request_id, error = %e, "failed to publish delta rejection");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        device_name: &str,
        config: ShadowConfig,
        transport: Arc<dyn Transport>,
        ready: bool,
    ) -> Arc<Self> {
        let inner = Arc::new(Self::new(device_name.to_string(), config, transport));
        inner.link_tx.send_modify(|state| {
            state.connected = ready;
            state.subscribed = ready;
        });
        inner
    }
}

impl TransportEvents for ClientInner {
    fn on_connected(&self) {
        tracing::info!(device = %self.device_name, "MQTT connected; subscribing to shadow topics");
        self.link_tx.send_modify(|state| state.connected = true);

        // One-shot subscribe-many; the session is clean, so this runs
        // after every (re)connect.
        if let Err(e) = self.transport.subscribe_many(&self.topics.subscribe_set()) {
            tracing::error!(device = %self.device_name, error = %e, "failed to subscribe");
        }
    }

    fn on_subscribed(&self) {
        tracing::debug!(device = %self.device_name, "MQTT subscribed");
        self.link_tx.send_modify(|state| state.subscribed = true);
    }

    fn on_connection_lost(&self, reason: &str) {
        tracing::error!(device = %self.device_name, reason = %reason, "connection lost");
        self.link_tx.send_modify(|state| {
            state.connected = false;
            state.subscribed = false;
        });
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.handle_message(topic, payload);
    }

    fn on_delivery_complete(&self, pkid: u16) {
        tracing::trace!(device = %self.device_name, pkid, "delivery complete");
    }
}

impl std::fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientInner")
            .field("device_name", &self.device_name)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// A client maintaining one device's shadow document over MQTT.
///
/// Created via [`ShadowClient::builder`], registered in the process-wide
/// client registry so the housekeeper sweeps its request timeouts, and
/// torn down with [`destroy`](Self::destroy).
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use devshadow_lib::{ShadowClient, ShadowAck, ShadowAction};
///
/// #[tokio::main]
/// async fn main() -> devshadow_lib::Result<()> {
///     devshadow_lib::init();
///
///     let client = ShadowClient::builder("mqtt://broker:1883", "dev1")
///         .credentials("user", "password")
///         .build()?;
///     client.connect().await?;
///
///     client.update(
///         serde_json::json!({"led": "on"}),
///         |action, ack| match ack {
///             ShadowAck::Accepted { document } => println!("{action} accepted: {document}"),
///             ShadowAck::Rejected { code, message } => println!("rejected: {code} {message}"),
///             ShadowAck::Timeout => println!("timed out"),
///         },
///         Duration::from_secs(10),
///     )?;
///
///     client.destroy();
///     devshadow_lib::fini();
///     Ok(())
/// }
/// ```
pub struct ShadowClient {
    inner: Arc<ClientInner>,
    event_loop: Mutex<Option<EventLoop>>,
    event_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for ShadowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowClient")
            .field("device_name", &self.inner.device_name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ShadowClient {
    /// Creates a builder for a client talking to `broker_url` on behalf of
    /// `device_name`.
    #[must_use]
    pub fn builder(broker_url: impl Into<String>, device_name: impl Into<String>) -> ShadowClientBuilder {
        ShadowClientBuilder {
            broker_url: broker_url.into(),
            device_name: device_name.into(),
            username: None,
            password: None,
            config: ShadowConfig::default(),
        }
    }

    /// Returns the device name this client shadows.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.inner.device_name
    }

    /// Returns `true` when the client is connected AND has completed its
    /// reply-topic subscriptions.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.is_ready()
    }

    /// Connects to the broker and waits until the client is subscribed.
    ///
    /// The wait is bounded: the connection acknowledgement by the connect
    /// timeout, the subscription acknowledgement by the subscribe timeout.
    /// Either expiry yields [`Error::NotConnected`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the broker cannot be reached or
    /// the subscriptions do not complete in time.
    pub async fn connect(&self) -> Result<()> {
        if let Some(event_loop) = self.event_loop.lock().take() {
            tracing::info!(device = %self.inner.device_name, "connecting to broker");
            let inner_dyn: Arc<dyn TransportEvents> = self.inner.clone();
            let events: Weak<dyn TransportEvents> = Arc::downgrade(&inner_dyn);
            let task = tokio::spawn(run_event_loop(event_loop, events));
            *self.event_task.lock() = Some(task);
        }

        let mut link = self.inner.link_tx.subscribe();

        tokio::time::timeout(
            self.inner.config.connect_timeout,
            link.wait_for(|state| state.connected),
        )
        .await
        .map_err(|_| Error::NotConnected)?
        .map_err(|_| Error::NotConnected)?;

        tokio::time::timeout(
            self.inner.config.subscribe_timeout,
            link.wait_for(|state| state.subscribed),
        )
        .await
        .map_err(|_| Error::NotConnected)?
        .map_err(|_| Error::NotConnected)?;

        Ok(())
    }

    /// Pushes reported state to the shadow as `{reported: …}`.
    ///
    /// The callback fires exactly once with the accepted document, the
    /// rejection, or a timeout after `timeout` elapses without a reply.
    /// Returns the generated request id correlating this publish with its
    /// reply.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] before the client is subscribed,
    /// [`Error::TooManyInFlight`] when the in-flight table is full, or a
    /// transport error if the publish could not be initiated (the callback
    /// then still fires with a timeout).
    pub fn update<F>(&self, reported: Value, callback: F, timeout: Duration) -> Result<RequestId>
    where
        F: Fn(ShadowAction, ShadowAck) + Send + Sync + 'static,
    {
        self.inner.update(reported, Arc::new(callback), timeout)
    }

    /// Fetches the current shadow document.
    ///
    /// # Errors
    ///
    /// Same conditions as [`update`](Self::update).
    pub fn get<F>(&self, callback: F, timeout: Duration) -> Result<RequestId>
    where
        F: Fn(ShadowAction, ShadowAck) + Send + Sync + 'static,
    {
        self.inner.get(Arc::new(callback), timeout)
    }

    /// Deletes the shadow document.
    ///
    /// # Errors
    ///
    /// Same conditions as [`update`](Self::update).
    pub fn delete<F>(&self, callback: F, timeout: Duration) -> Result<RequestId>
    where
        F: Fn(ShadowAction, ShadowAck) + Send + Sync + 'static,
    {
        self.inner.delete(Arc::new(callback), timeout)
    }

    /// Registers a delta handler for `key` (a property name, or
    /// [`DeltaKey::Root`] for the whole `desired` object).
    ///
    /// Handlers are add-only and run in registration order; the first
    /// handler returning a [`DeltaError`] rejects the delta and the error
    /// is reported to the server on the `delta/rejected` topic.
    ///
    /// The client must already be connected: handlers registered before
    /// the subscriptions complete would silently miss early deltas.
    /// Handlers run with the registry lock held and must not call
    /// `register_delta` themselves.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] before the client is subscribed, or
    /// [`Error::TooManyDeltaHandlers`] when the registry is full.
    pub fn register_delta<K, F>(&self, key: K, handler: F) -> Result<()>
    where
        K: Into<DeltaKey>,
        F: Fn(&DeltaKey, &Value) -> Option<DeltaError> + Send + Sync + 'static,
    {
        self.inner.register_delta(key.into(), Arc::new(handler))
    }

    /// Tears the client down: removes it from the client registry (so
    /// future sweeps skip it), requests a transport disconnect, and stops
    /// the event task.
    ///
    /// Outstanding in-flight callbacks are not fired; pending requests are
    /// abandoned.
    pub fn destroy(&self) {
        registry::deregister(&self.inner);
        if let Err(e) = self.inner.transport.disconnect() {
            tracing::warn!(device = %self.inner.device_name, error = %e, "disconnect failed");
        }
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
        self.inner.link_tx.send_modify(|state| *state = LinkState::default());
        tracing::info!(device = %self.inner.device_name, "destroyed");
    }
}

/// Builder for [`ShadowClient`].
#[derive(Debug)]
pub struct ShadowClientBuilder {
    broker_url: String,
    device_name: String,
    username: Option<String>,
    password: Option<String>,
    config: ShadowConfig,
}

impl ShadowClientBuilder {
    /// Sets authentication credentials for the broker.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Replaces the whole configuration at once.
    #[must_use]
    pub fn config(mut self, config: ShadowConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the MQTT keep-alive interval.
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection acknowledgement timeout.
    #[must_use]
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = duration;
        self
    }

    /// Sets the subscription acknowledgement timeout.
    #[must_use]
    pub fn subscribe_timeout(mut self, duration: Duration) -> Self {
        self.config.subscribe_timeout = duration;
        self
    }

    /// Sets the capacity of the in-flight request table.
    #[must_use]
    pub fn max_in_flight(mut self, capacity: usize) -> Self {
        self.config.max_in_flight = capacity;
        self
    }

    /// Sets the capacity of the delta handler registry.
    #[must_use]
    pub fn max_delta_handlers(mut self, capacity: usize) -> Self {
        self.config.max_delta_handlers = capacity;
        self
    }

    /// Creates the client and registers it with the housekeeper.
    ///
    /// The connection is not opened until [`ShadowClient::connect`] is
    /// called.
    ///
    /// # Errors
    ///
    /// [`Error::BadArgument`] for an empty device name, an invalid broker
    /// URL error, or [`Error::RegistryFull`] when the process-wide client
    /// registry is at capacity.
    pub fn build(self) -> Result<ShadowClient> {
        if self.device_name.is_empty() {
            return Err(Error::BadArgument("device name is empty".to_string()));
        }

        let (host, port) = parse_broker_url(&self.broker_url).map_err(Error::Protocol)?;

        // The device name doubles as the MQTT client id.
        let mut options = MqttOptions::new(&self.device_name, host, port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (self.username, self.password) {
            options.set_credentials(username, password);
        }

        let (mqtt_client, event_loop) = AsyncClient::new(options, 10);
        let transport = Arc::new(MqttTransport::new(mqtt_client, self.config.qos));

        let inner = Arc::new(ClientInner::new(self.device_name, self.config, transport));
        if !registry::register(Arc::downgrade(&inner)) {
            return Err(Error::RegistryFull);
        }

        tracing::info!(
            device = %inner.device_name,
            broker = %self.broker_url,
            "created shadow client"
        );

        Ok(ShadowClient {
            inner,
            event_loop: Mutex::new(Some(event_loop)),
            event_task: Mutex::new(None),
        })
    }
}
