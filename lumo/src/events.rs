// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{
    ConnectAckPacket, Packet, PublishPacket, ReasonCode, SubscribeAckPacket,
    UnsubscribeAckPacket,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Callback invoked with an inbound application message.
pub type MessageHandler = Arc<dyn Fn(&PublishPacket) + Send + Sync>;

/// Observability hooks, injected at client construction.
///
/// Every method has a no-op default; implementations override what they
/// need. Correctness never depends on a sink.
#[allow(unused_variables)]
pub trait EventSink: Send + Sync {
    fn before_connect(&self, client_id: &str) {}
    fn after_connect(&self, ack: &ConnectAckPacket) {}
    fn before_subscribe(&self, filters: &[String]) {}
    fn after_subscribe(&self, ack: &SubscribeAckPacket) {}
    fn before_unsubscribe(&self, filters: &[String]) {}
    fn after_unsubscribe(&self, ack: &UnsubscribeAckPacket) {}
    fn on_message_received(&self, publish: &PublishPacket) {}
    fn after_disconnect(&self, reason: Option<ReasonCode>) {}

    /// One event per control packet written to the transport.
    fn on_packet_sent(&self, packet: &Packet) {}

    /// One event per control packet framed off the transport.
    fn on_packet_received(&self, packet: &Packet) {}
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {}

/// Sink that forwards events to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn before_connect(&self, client_id: &str) {
        log::debug!("connecting, client_id: {client_id}");
    }

    fn after_connect(&self, ack: &ConnectAckPacket) {
        log::debug!(
            "connected, reason: {}, session_present: {}",
            ack.reason_code(),
            ack.session_present()
        );
    }

    fn on_message_received(&self, publish: &PublishPacket) {
        log::debug!("message on {}, {} bytes", publish.topic(), publish.payload().len());
    }

    fn after_disconnect(&self, reason: Option<ReasonCode>) {
        log::debug!("disconnected, reason: {reason:?}");
    }

    fn on_packet_sent(&self, packet: &Packet) {
        log::trace!("--> {:?}", packet.packet_type());
    }

    fn on_packet_received(&self, packet: &Packet) {
        log::trace!("<-- {:?}", packet.packet_type());
    }
}

/// Handle returned by observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

/// Multicast list for the global message-received event.
///
/// Observers are invoked synchronously in registration order.
#[derive(Default)]
pub struct MessageObservers {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, MessageHandler)>>,
}

impl MessageObservers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer and return its removal handle.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    pub fn subscribe(&self, handler: MessageHandler) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().unwrap().push((id, handler));
        ObserverId(id)
    }

    /// Remove an observer; unknown ids are ignored.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers
            .lock()
            .unwrap()
            .retain(|(observer_id, _)| *observer_id != id.0);
    }

    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    pub fn notify(&self, publish: &PublishPacket) {
        let handlers: Vec<MessageHandler> = self
            .observers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(publish);
        }
    }
}
