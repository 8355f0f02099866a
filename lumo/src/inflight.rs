// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{Packet, ReasonCode, SubscribeAckPacket, UnsubscribeAckPacket};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

use crate::cancel::CancelToken;
use crate::error::{Error, ErrorKind};

/// What a completed request resolves to.
#[derive(Debug)]
pub enum InflightResponse {
    Publish {
        reason_code: ReasonCode,
        reason_string: Option<String>,
    },
    Subscribe(SubscribeAckPacket),
    Unsubscribe(UnsubscribeAckPacket),
}

/// Phase of an outbound QoS 1/2 publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPhase {
    AwaitingPubAck,
    AwaitingPubRec,
    AwaitingPubComp,
}

/// Request category stored with each record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Publish,
    Subscribe { filters: Vec<String> },
    Unsubscribe { filters: Vec<String> },
}

/// One outstanding request awaiting its terminal acknowledgement.
#[derive(Debug)]
pub struct InflightRecord {
    pub kind: RecordKind,

    /// The packet to retransmit after a reconnect with session present.
    /// For publishes this starts as the PUBLISH and becomes the PUBREL
    /// once PUBREC arrives.
    pub packet: Packet,

    pub phase: Option<PublishPhase>,
    pub sent_at: Instant,
    pub retries: u16,
    pub responder: oneshot::Sender<Result<InflightResponse, Error>>,

    /// Receive Maximum slot, held until the record resolves. Only
    /// publish records carry one.
    pub permit: Option<OwnedSemaphorePermit>,
}

/// Bounded registry of in-flight requests plus the QoS 2 receive-side id
/// set.
///
/// Capacity gates outbound QoS 1/2 publishes only; subscribe and
/// unsubscribe records are not counted against the broker's Receive
/// Maximum.
pub struct InflightRegistry {
    records: Mutex<HashMap<u16, InflightRecord>>,

    /// Replaced on every CONNACK so a new connection's Receive Maximum
    /// takes effect. Permits acquired from an older semaphore drain
    /// harmlessly with their records.
    capacity: RwLock<Arc<Semaphore>>,

    /// Packet ids of inbound QoS 2 publishes already delivered to the
    /// application and awaiting PUBREL.
    inbound_qos2: Mutex<HashSet<u16>>,
}

impl Default for InflightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InflightRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            capacity: RwLock::new(Arc::new(Semaphore::new(usize::from(u16::MAX)))),
            inbound_qos2: Mutex::new(HashSet::new()),
        }
    }

    /// Install the Receive Maximum negotiated for the current
    /// connection.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub fn set_capacity(&self, receive_maximum: u16) {
        let mut capacity = self.capacity.write().unwrap();
        *capacity = Arc::new(Semaphore::new(usize::from(receive_maximum)));
    }

    /// Acquire one Receive Maximum slot, waiting for a free one.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when `cancel` fires first.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub async fn reserve(&self, cancel: &CancelToken) -> Result<OwnedSemaphorePermit, Error> {
        let semaphore = Arc::clone(&self.capacity.read().unwrap());
        tokio::select! {
            permit = semaphore.acquire_owned() => {
                permit.map_err(|_closed| Error::new(ErrorKind::Channel, "capacity semaphore closed"))
            }
            () = cancel.cancelled() => {
                Err(Error::new(ErrorKind::Cancelled, "publish cancelled while waiting for a slot"))
            }
        }
    }

    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub fn insert(&self, id: u16, record: InflightRecord) {
        self.records.lock().unwrap().insert(id, record);
    }

    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    #[must_use]
    pub fn remove(&self, id: u16) -> Option<InflightRecord> {
        self.records.lock().unwrap().remove(&id)
    }

    /// Move a publish record into the awaiting-PUBCOMP phase, replacing
    /// its retransmission packet with `pubrel`.
    ///
    /// Returns false when no record holds this id.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub fn transition_to_pubcomp(&self, id: u16, pubrel: Packet) -> bool {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&id) {
            Some(record) if record.phase == Some(PublishPhase::AwaitingPubRec) => {
                record.phase = Some(PublishPhase::AwaitingPubComp);
                record.packet = pubrel;
                true
            }
            _ => false,
        }
    }

    /// Packets to retransmit after a reconnect with session present,
    /// oldest first.
    ///
    /// Publishes still awaiting PUBACK or PUBREC go out again with the
    /// dup flag set; records awaiting PUBCOMP resend their PUBREL.
    /// Subscribe and unsubscribe requests are not retransmitted; their
    /// futures settle by timeout if the original ack never came.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    #[must_use]
    pub fn retransmit_packets(&self) -> Vec<Packet> {
        let mut records = self.records.lock().unwrap();
        let mut entries: Vec<&mut InflightRecord> = records
            .values_mut()
            .filter(|record| record.kind == RecordKind::Publish)
            .collect();
        entries.sort_by_key(|record| record.sent_at);

        let mut packets = Vec::with_capacity(entries.len());
        for record in entries {
            record.retries += 1;
            match record.phase {
                Some(PublishPhase::AwaitingPubAck | PublishPhase::AwaitingPubRec) => {
                    if let Packet::Publish(publish) = &record.packet {
                        let mut dup = publish.clone();
                        if dup.set_dup(true).is_ok() {
                            packets.push(Packet::Publish(dup));
                        }
                    }
                }
                Some(PublishPhase::AwaitingPubComp) => {
                    packets.push(record.packet.clone());
                }
                None => (),
            }
        }
        packets
    }

    /// Take every record, oldest first. Used on connection loss.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    #[must_use]
    pub fn drain(&self) -> Vec<(u16, InflightRecord)> {
        let mut records: Vec<(u16, InflightRecord)> =
            self.records.lock().unwrap().drain().collect();
        records.sort_by_key(|(_, record)| record.sent_at);
        records
    }

    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an inbound QoS 2 publish id. Returns true when the id is
    /// new, false for a duplicate that must not be redelivered.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub fn inbound_insert(&self, id: u16) -> bool {
        self.inbound_qos2.lock().unwrap().insert(id)
    }

    /// Forget an inbound QoS 2 id on PUBREL. Returns false when the id
    /// was unknown; PUBCOMP is sent either way.
    ///
    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub fn inbound_remove(&self, id: u16) -> bool {
        self.inbound_qos2.lock().unwrap().remove(&id)
    }

    /// # Panics
    ///
    /// Panics if the inner lock is poisoned.
    pub fn inbound_clear(&self) {
        self.inbound_qos2.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{PacketId, PublishAckPacket};

    fn dummy_record(responder: oneshot::Sender<Result<InflightResponse, Error>>) -> InflightRecord {
        InflightRecord {
            kind: RecordKind::Publish,
            packet: Packet::PublishAck(PublishAckPacket::new(PacketId::new(1))),
            phase: Some(PublishPhase::AwaitingPubAck),
            sent_at: Instant::now(),
            retries: 0,
            responder,
            permit: None,
        }
    }

    #[tokio::test]
    async fn test_capacity_gates_reserve() {
        let registry = InflightRegistry::new();
        registry.set_capacity(1);

        let cancel = CancelToken::never();
        let first = registry.reserve(&cancel).await.unwrap();

        let second = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            registry.reserve(&cancel),
        )
        .await;
        assert!(second.is_err(), "second reserve should block");

        drop(first);
        let third = registry.reserve(&cancel).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_reserve_cancelled() {
        let registry = InflightRegistry::new();
        registry.set_capacity(1);
        let cancel = CancelToken::never();
        let _held = registry.reserve(&cancel).await.unwrap();

        let (canceller, token) = CancelToken::new();
        canceller.cancel();
        let err = registry.reserve(&token).await.unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_insert_remove_drain() {
        let registry = InflightRegistry::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        registry.insert(1, dummy_record(tx1));
        registry.insert(2, dummy_record(tx2));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());

        let drained = registry.drain();
        assert_eq!(drained.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_inbound_dedup() {
        let registry = InflightRegistry::new();
        assert!(registry.inbound_insert(9));
        assert!(!registry.inbound_insert(9));
        assert!(registry.inbound_remove(9));
        assert!(!registry.inbound_remove(9));
    }
}
