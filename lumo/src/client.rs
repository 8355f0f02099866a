// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The public request API.
//!
//! Every operation validates against the broker's advertised
//! capabilities, reserves its packet identifier, parks a completion
//! record in the inflight registry and hands the packet to the writer
//! queue; the connection task resolves the record when the matching
//! acknowledgement arrives.

use codec::{
    ConnectAckPacket, Packet, PacketId, PublishPacket, QoS, ReasonCode, SubscribePacket,
    SubscribeTopic, UnsubscribePacket, VarInt,
};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::cancel::CancelToken;
use crate::commands::ConnectionCmd;
use crate::connect_options::ConnectOptions;
use crate::connection::connection_task;
use crate::error::{Error, ErrorKind};
use crate::events::{EventSink, MessageHandler, MessageObservers, NullEventSink, ObserverId};
use crate::inflight::{InflightRecord, InflightRegistry, InflightResponse, PublishPhase, RecordKind};
use crate::packet_id::PacketIdAllocator;
use crate::session_state::ServerCapabilities;
use crate::status::{ConnectionState, ConnectionStatus};
use crate::subscription::SubscriptionRegistry;

/// Handle to the writer queue of the active connection.
///
/// The connection task installs a sender per connection and clears it on
/// teardown; requests sent in between fail with `NotConnected`.
#[derive(Default)]
pub(crate) struct OutboundQueue {
    tx: RwLock<Option<mpsc::Sender<Packet>>>,
}

impl OutboundQueue {
    pub(crate) fn set(&self, tx: mpsc::Sender<Packet>) {
        *self.tx.write().unwrap() = Some(tx);
    }

    pub(crate) fn clear(&self) {
        *self.tx.write().unwrap() = None;
    }

    /// Enqueue a packet for the writer, waiting when the queue is full.
    pub(crate) async fn send(&self, packet: Packet) -> Result<(), Error> {
        let tx = self.tx.read().unwrap().clone();
        match tx {
            Some(tx) => tx.send(packet).await.map_err(Error::from),
            None => Err(Error::new(ErrorKind::NotConnected, "no active connection")),
        }
    }
}

/// State shared between the facade and the connection task.
pub(crate) struct ClientInner {
    pub(crate) options: ConnectOptions,
    pub(crate) status: ConnectionStatus,
    pub(crate) capabilities: RwLock<ServerCapabilities>,
    pub(crate) assigned_client_id: RwLock<Option<String>>,
    pub(crate) allocator: PacketIdAllocator,
    pub(crate) inflight: InflightRegistry,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) observers: MessageObservers,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) outbound: OutboundQueue,
}

/// Outcome of a successful or failed connect attempt.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub reason_code: ReasonCode,
    pub session_present: bool,
    pub assigned_client_id: Option<String>,
    pub server_keep_alive: Option<u16>,
    pub capabilities: ServerCapabilities,
    pub reason_string: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

impl ConnectResult {
    pub(crate) fn from_ack(inner: &Arc<ClientInner>, ack: &ConnectAckPacket) -> Self {
        let properties = ack.properties();
        Self {
            reason_code: ack.reason_code(),
            session_present: ack.session_present(),
            assigned_client_id: properties
                .assigned_client_identifier()
                .map(str::to_string),
            server_keep_alive: properties.server_keep_alive(),
            capabilities: inner.capabilities.read().unwrap().clone(),
            reason_string: properties.reason_string().map(str::to_string),
            user_properties: properties
                .user_properties()
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }
}

/// Per-filter reason codes of a subscribe request.
#[derive(Debug, Clone)]
pub struct SubscribeResult {
    pub reasons: Vec<ReasonCode>,
    pub reason_string: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

/// Per-filter reason codes of an unsubscribe request.
#[derive(Debug, Clone)]
pub struct UnsubscribeResult {
    pub reasons: Vec<ReasonCode>,
    pub reason_string: Option<String>,
}

/// Broker outcome of a publish; QoS 0 publishes always report success.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub reason_code: ReasonCode,
    pub reason_string: Option<String>,
}

/// Asynchronous MQTT 5.0 client.
pub struct AsyncClient {
    inner: Arc<ClientInner>,
    ctrl_tx: Mutex<Option<mpsc::UnboundedSender<ConnectionCmd>>>,
}

impl AsyncClient {
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        Self::with_sink(options, Arc::new(NullEventSink))
    }

    /// Create a client with an injected event sink.
    #[must_use]
    pub fn with_sink(options: ConnectOptions, sink: Arc<dyn EventSink>) -> Self {
        let inner = Arc::new(ClientInner {
            options,
            status: ConnectionStatus::new(),
            capabilities: RwLock::new(ServerCapabilities::default()),
            assigned_client_id: RwLock::new(None),
            allocator: PacketIdAllocator::new(),
            inflight: InflightRegistry::new(),
            subscriptions: SubscriptionRegistry::new(),
            observers: MessageObservers::new(),
            sink,
            outbound: OutboundQueue::default(),
        });
        Self {
            inner,
            ctrl_tx: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.status.get()
    }

    /// Capabilities negotiated with the broker; defaults before the
    /// first CONNACK.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    #[must_use]
    pub fn capabilities(&self) -> ServerCapabilities {
        self.inner.capabilities.read().unwrap().clone()
    }

    /// Active subscriptions, exact-filter deduplicated.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.subscriptions
    }

    /// Number of packet identifiers currently allocated.
    #[must_use]
    pub fn packet_ids_in_use(&self) -> usize {
        self.inner.allocator.count()
    }

    /// Register a global message observer, fired after per-filter
    /// handlers in registration order.
    pub fn on_message(&self, handler: MessageHandler) -> ObserverId {
        self.inner.observers.subscribe(handler)
    }

    pub fn remove_observer(&self, id: ObserverId) {
        self.inner.observers.unsubscribe(id);
    }

    /// Connect to the configured broker.
    ///
    /// # Errors
    ///
    /// Fails with `ConnectRejected` on a non-success CONNACK, `Timeout`
    /// when the broker does not answer within the connect timeout, or
    /// `Transport` on socket and TLS failures.
    pub async fn connect(&self) -> Result<ConnectResult, Error> {
        self.connect_with_cancel(&CancelToken::never()).await
    }

    /// Connect, honoring a cancellation signal.
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::connect`]; additionally fails with `Cancelled`
    /// when `cancel` fires first.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub async fn connect_with_cancel(
        &self,
        cancel: &CancelToken,
    ) -> Result<ConnectResult, Error> {
        if self.state() != ConnectionState::Disconnected {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "connect while a connection is active",
            ));
        }

        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        *self.ctrl_tx.lock().unwrap() = Some(ctrl_tx.clone());
        tokio::spawn(connection_task(
            Arc::clone(&self.inner),
            ctrl_rx,
            reply_tx,
        ));

        tokio::select! {
            reply = reply_rx => reply.map_err(Error::from)?,
            () = cancel.cancelled() => {
                // Tear the attempt down; the task exits when it next
                // polls its control channel.
                let _ = ctrl_tx.send(ConnectionCmd::Disconnect {
                    reason: ReasonCode::Success,
                    reply: oneshot::channel().0,
                });
                Err(Error::new(ErrorKind::Cancelled, "connect cancelled"))
            }
        }
    }

    /// Subscribe to a single topic filter.
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::subscribe_topics`].
    pub async fn subscribe(&self, filter: &str, qos: QoS) -> Result<SubscribeResult, Error> {
        let topic = SubscribeTopic::new(filter, qos)?;
        self.subscribe_topics(vec![topic], None, None, &CancelToken::never())
            .await
    }

    /// Subscribe to a single filter with a per-filter handler.
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::subscribe_topics`].
    pub async fn subscribe_with_handler(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<SubscribeResult, Error> {
        let topic = SubscribeTopic::new(filter, qos)?;
        self.subscribe_topics(vec![topic], Some(handler), None, &CancelToken::never())
            .await
    }

    /// Subscribe to a batch of topic filters in one packet.
    ///
    /// Filters already present in the registry are replaced, keeping
    /// the newest QoS and handler. The handler applies to every filter
    /// in the batch.
    ///
    /// # Errors
    ///
    /// Fails locally with `CapabilityViolation` when a filter needs a
    /// feature the broker advertised as unavailable, `NotConnected`
    /// when there is no connection, `IdentifierExhausted` when no packet
    /// id is free, `Timeout`/`Cancelled` while awaiting SUBACK.
    pub async fn subscribe_topics(
        &self,
        topics: Vec<SubscribeTopic>,
        handler: Option<MessageHandler>,
        subscription_identifier: Option<u32>,
        cancel: &CancelToken,
    ) -> Result<SubscribeResult, Error> {
        self.ensure_connected()?;
        let capabilities = self.capabilities();
        for topic in &topics {
            if topic.filter().has_wildcard() && !capabilities.wildcard_subscription_available {
                return Err(Error::from_string(
                    ErrorKind::CapabilityViolation,
                    format!(
                        "broker does not support wildcard subscriptions: {}",
                        topic.filter()
                    ),
                ));
            }
            if topic.filter().is_shared() && !capabilities.shared_subscription_available {
                return Err(Error::from_string(
                    ErrorKind::CapabilityViolation,
                    format!(
                        "broker does not support shared subscriptions: {}",
                        topic.filter()
                    ),
                ));
            }
        }
        if subscription_identifier.is_some()
            && !capabilities.subscription_identifiers_available
        {
            return Err(Error::new(
                ErrorKind::CapabilityViolation,
                "broker does not support subscription identifiers",
            ));
        }

        let filters: Vec<String> = topics
            .iter()
            .map(|topic| topic.filter().as_str().to_string())
            .collect();
        self.inner.sink.before_subscribe(&filters);

        let packet_id = self.inner.allocator.allocate()?;
        let mut packet = SubscribePacket::with_topics(packet_id, topics.clone())?;
        if let Some(id) = subscription_identifier {
            let id = VarInt::from(id as usize).map_err(codec::EncodeError::from)?;
            packet
                .properties_mut()
                .push(codec::Property::SubscriptionIdentifier(id))?;
        }

        for topic in topics {
            self.inner.subscriptions.add(topic, handler.clone());
        }

        let (responder, response_rx) = oneshot::channel();
        self.inner.inflight.insert(
            packet_id.value(),
            InflightRecord {
                kind: RecordKind::Subscribe { filters },
                packet: Packet::Subscribe(packet.clone()),
                phase: None,
                sent_at: Instant::now(),
                retries: 0,
                responder,
                permit: None,
            },
        );

        if let Err(err) = self.inner.outbound.send(Packet::Subscribe(packet)).await {
            self.abandon(packet_id);
            return Err(err);
        }

        match self.await_response(packet_id, response_rx, cancel).await? {
            InflightResponse::Subscribe(ack) => Ok(SubscribeResult {
                reasons: ack.reasons().to_vec(),
                reason_string: ack.properties().reason_string().map(str::to_string),
                user_properties: ack
                    .properties()
                    .user_properties()
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            }),
            _ => Err(Error::new(ErrorKind::ProtocolError, "mismatched response")),
        }
    }

    /// Unsubscribe from a list of exact filter strings.
    ///
    /// # Errors
    ///
    /// Fails with `NotConnected`, `IdentifierExhausted`, `Timeout` or
    /// `Cancelled`; per-filter broker rejections come back as reason
    /// codes in the result.
    pub async fn unsubscribe(&self, filters: Vec<String>) -> Result<UnsubscribeResult, Error> {
        self.unsubscribe_with_cancel(filters, &CancelToken::never())
            .await
    }

    /// See [`AsyncClient::unsubscribe`].
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::unsubscribe`].
    pub async fn unsubscribe_with_cancel(
        &self,
        filters: Vec<String>,
        cancel: &CancelToken,
    ) -> Result<UnsubscribeResult, Error> {
        self.ensure_connected()?;
        self.inner.sink.before_unsubscribe(&filters);

        let mut topics = Vec::with_capacity(filters.len());
        for filter in &filters {
            topics.push(codec::TopicFilter::new(filter)?);
        }

        let packet_id = self.inner.allocator.allocate()?;
        let packet = UnsubscribePacket::with_topics(packet_id, topics)?;

        let (responder, response_rx) = oneshot::channel();
        self.inner.inflight.insert(
            packet_id.value(),
            InflightRecord {
                kind: RecordKind::Unsubscribe { filters },
                packet: Packet::Unsubscribe(packet.clone()),
                phase: None,
                sent_at: Instant::now(),
                retries: 0,
                responder,
                permit: None,
            },
        );

        if let Err(err) = self.inner.outbound.send(Packet::Unsubscribe(packet)).await {
            self.abandon(packet_id);
            return Err(err);
        }

        match self.await_response(packet_id, response_rx, cancel).await? {
            InflightResponse::Unsubscribe(ack) => Ok(UnsubscribeResult {
                reasons: ack.reasons().to_vec(),
                reason_string: ack.properties().reason_string().map(str::to_string),
            }),
            _ => Err(Error::new(ErrorKind::ProtocolError, "mismatched response")),
        }
    }

    /// Publish a message.
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::publish_packet`].
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
    ) -> Result<PublishResult, Error> {
        let packet = PublishPacket::new(topic, qos, payload)?;
        self.publish_packet(packet, &CancelToken::never()).await
    }

    /// Publish a fully configured packet.
    ///
    /// A QoS 0 publish resolves as soon as the packet is queued for the
    /// writer and consumes no packet identifier. QoS 1 resolves on
    /// PUBACK, QoS 2 on PUBCOMP; both respect the broker's Receive
    /// Maximum, suspending while the in-flight window is full.
    ///
    /// # Errors
    ///
    /// Fails locally with `CapabilityViolation` when the packet uses
    /// retain, a QoS or a topic alias the broker does not support;
    /// otherwise `NotConnected`, `IdentifierExhausted`, `Timeout` or
    /// `Cancelled`.
    pub async fn publish_packet(
        &self,
        mut packet: PublishPacket,
        cancel: &CancelToken,
    ) -> Result<PublishResult, Error> {
        self.ensure_connected()?;
        let capabilities = self.capabilities();
        if packet.retain() && !capabilities.retain_available {
            return Err(Error::new(
                ErrorKind::CapabilityViolation,
                "broker does not support retained messages",
            ));
        }
        if packet.qos() > capabilities.maximum_qos {
            return Err(Error::from_string(
                ErrorKind::CapabilityViolation,
                format!("broker maximum QoS is {:?}", capabilities.maximum_qos),
            ));
        }
        if let Some(alias) = packet.properties().topic_alias() {
            if alias > capabilities.topic_alias_maximum {
                return Err(Error::from_string(
                    ErrorKind::CapabilityViolation,
                    format!(
                        "topic alias {alias} above broker maximum {}",
                        capabilities.topic_alias_maximum
                    ),
                ));
            }
        }

        if packet.qos() == QoS::AtMostOnce {
            self.inner.outbound.send(Packet::Publish(packet)).await?;
            return Ok(PublishResult {
                reason_code: ReasonCode::Success,
                reason_string: None,
            });
        }

        // QoS 1/2: hold a Receive Maximum slot for the whole exchange.
        let permit = self.inner.inflight.reserve(cancel).await?;
        let packet_id = self.inner.allocator.allocate()?;
        packet.set_packet_id(packet_id);

        let phase = if packet.qos() == QoS::AtLeastOnce {
            PublishPhase::AwaitingPubAck
        } else {
            PublishPhase::AwaitingPubRec
        };
        let (responder, response_rx) = oneshot::channel();
        self.inner.inflight.insert(
            packet_id.value(),
            InflightRecord {
                kind: RecordKind::Publish,
                packet: Packet::Publish(packet.clone()),
                phase: Some(phase),
                sent_at: Instant::now(),
                retries: 0,
                responder,
                permit: Some(permit),
            },
        );

        if let Err(err) = self.inner.outbound.send(Packet::Publish(packet)).await {
            self.abandon(packet_id);
            return Err(err);
        }

        match self.await_response(packet_id, response_rx, cancel).await? {
            InflightResponse::Publish {
                reason_code,
                reason_string,
            } => Ok(PublishResult {
                reason_code,
                reason_string,
            }),
            _ => Err(Error::new(ErrorKind::ProtocolError, "mismatched response")),
        }
    }

    /// Send DISCONNECT, close the transport and disable auto-reconnect.
    /// Terminal: every pending operation fails with
    /// `DisconnectedByUser`.
    ///
    /// # Errors
    ///
    /// Fails with `NotConnected` when no connection task is running.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.disconnect_with_reason(ReasonCode::Success).await
    }

    /// See [`AsyncClient::disconnect`].
    ///
    /// # Errors
    ///
    /// See [`AsyncClient::disconnect`].
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub async fn disconnect_with_reason(&self, reason: ReasonCode) -> Result<(), Error> {
        let ctrl_tx = self.ctrl_tx.lock().unwrap().take();
        let Some(ctrl_tx) = ctrl_tx else {
            return Err(Error::new(ErrorKind::NotConnected, "never connected"));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        ctrl_tx.send(ConnectionCmd::Disconnect {
            reason,
            reply: reply_tx,
        })?;
        timeout(self.inner.options.response_timeout(), reply_rx).await??
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.inner.status.is_connected() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::NotConnected, "client is not connected"))
        }
    }

    /// Drop a request that never made it onto the wire.
    fn abandon(&self, packet_id: PacketId) {
        if self.inner.inflight.remove(packet_id.value()).is_some() {
            self.inner.allocator.release(packet_id);
        }
    }

    /// Await the completion signal parked in the inflight registry.
    ///
    /// Timeout withdraws the record; cancellation leaves it in place so
    /// a late acknowledgement still settles the exchange.
    async fn await_response(
        &self,
        packet_id: PacketId,
        response_rx: oneshot::Receiver<Result<InflightResponse, Error>>,
        cancel: &CancelToken,
    ) -> Result<InflightResponse, Error> {
        tokio::select! {
            response = timeout(self.inner.options.response_timeout(), response_rx) => {
                match response {
                    Err(_elapsed) => {
                        self.abandon(packet_id);
                        Err(Error::from_string(
                            ErrorKind::Timeout,
                            format!("no acknowledgement for packet id {packet_id}"),
                        ))
                    }
                    Ok(Err(recv_err)) => Err(recv_err.into()),
                    Ok(Ok(result)) => result,
                }
            }
            () = cancel.cancelled() => {
                Err(Error::new(ErrorKind::Cancelled, "operation cancelled"))
            }
        }
    }
}
