// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io::Write;

use crate::property::check_property_type_list;
use crate::{
    ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, PubTopic, QoS, VarIntError,
};

/// PUBLISH transports an application message in either direction.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Topic name            |
/// |                       |
/// +-----------------------+
/// | Packet id (QoS 1/2)   |
/// |                       |
/// +-----------------------+
/// | Properties ...        |
/// +-----------------------+
/// | Payload ...           |
/// +-----------------------+
/// ```
///
/// The dup flag means a possible re-delivery of an earlier attempt; it
/// MUST be 0 for QoS 0 [MQTT-3.3.1-2]. The topic name may be empty only
/// when a topic alias property carries the mapping. The response packet
/// depends on QoS: none for 0, PUBACK for 1, PUBREC for 2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishPacket {
    dup: bool,
    qos: QoS,
    retain: bool,
    topic: PubTopic,

    /// Only present when QoS is 1 or 2.
    packet_id: PacketId,

    properties: Properties,
    payload: Vec<u8>,
}

/// Properties available in publish packets.
pub const PUBLISH_PROPERTIES: &[PropertyType] = &[
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::TopicAlias,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
    PropertyType::ContentType,
];

impl PublishPacket {
    /// Create a new publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcards or is too long.
    pub fn new(topic: &str, qos: QoS, payload: &[u8]) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id: PacketId::new(0),
            properties: Properties::new(),
            payload: payload.to_vec(),
        })
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Update the dup flag.
    ///
    /// # Errors
    ///
    /// Returns error when set on a QoS 0 packet [MQTT-3.3.1-2].
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        self.dup = dup;
        Ok(self)
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Update packet id; only meaningful for QoS 1/2 packets.
    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn remaining_length(&self) -> usize {
        let mut len = self.topic.bytes() + self.properties.bytes() + self.payload.len();
        if self.qos.needs_packet_id() {
            len += PacketId::bytes();
        }
        len
    }

    fn fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        FixedHeader::new(packet_type, self.remaining_length())
    }
}

impl DecodePacket for PublishPacket {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(reader)?;
        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        let body_start = reader.offset();
        let topic = PubTopic::decode(reader)?;

        let packet_id = if qos.needs_packet_id() {
            let packet_id = PacketId::decode(reader)?;
            // A non-zero id is required once QoS is above 0
            // [MQTT-2.2.1-3].
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        } else {
            PacketId::new(0)
        };

        let properties = Properties::decode(reader)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), PUBLISH_PROPERTIES)
        {
            log::error!("publish: property {property_type:?} not allowed");
            return Err(DecodeError::PropertyNotAllowed);
        }

        // An empty topic name is only valid together with a topic alias.
        if topic.is_empty() && properties.topic_alias().is_none() {
            return Err(DecodeError::InvalidTopic);
        }

        let consumed = reader.offset() - body_start;
        let payload_len = fixed_header
            .remaining_length()
            .checked_sub(consumed)
            .ok_or(DecodeError::InvalidRemainingLength)?;
        let payload = reader.read_bytes(payload_len)?.to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            payload,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.fixed_header()?;
        fixed_header.encode(buf)?;
        self.topic.encode(buf)?;
        if self.qos.needs_packet_id() {
            self.packet_id.encode(buf)?;
        }
        self.properties.encode(buf)?;
        buf.write_all(&self.payload)?;

        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos0_round_trip() {
        let packet = PublishPacket::new("sensors/temp", QoS::AtMostOnce, b"22.5").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        // type/flags, remaining len, topic len prefix.
        assert_eq!(&buf[..4], &[0x30, 0x13, 0x00, 0x0c]);

        let mut reader = ByteReader::new(&buf);
        let decoded = PublishPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.payload(), b"22.5");
    }

    #[test]
    fn test_qos1_carries_packet_id() {
        let mut packet = PublishPacket::new("a/b", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(513));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut reader = ByteReader::new(&buf);
        let decoded = PublishPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded.packet_id(), PacketId::new(513));
        assert_eq!(decoded.qos(), QoS::AtLeastOnce);
    }

    #[test]
    fn test_qos1_zero_packet_id_rejected() {
        let mut packet = PublishPacket::new("a/b", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(0));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut reader),
            Err(DecodeError::InvalidPacketId)
        );
    }

    #[test]
    fn test_dup_on_qos0_rejected() {
        let mut packet = PublishPacket::new("a", QoS::AtMostOnce, b"").unwrap();
        assert!(packet.set_dup(true).is_err());

        // Same on the wire: dup bit set with QoS 0 flags.
        let buf = [0x38, 0x03, 0x00, 0x01, 0x61];
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut reader),
            Err(DecodeError::InvalidPacketFlags)
        );
    }

    #[test]
    fn test_empty_topic_needs_alias() {
        let packet = PublishPacket::new("", QoS::AtMostOnce, b"p").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut reader),
            Err(DecodeError::InvalidTopic)
        );

        let mut packet = PublishPacket::new("", QoS::AtMostOnce, b"p").unwrap();
        packet
            .properties_mut()
            .push(crate::Property::TopicAlias(crate::U16Data::new(4)))
            .unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut reader = ByteReader::new(&buf);
        assert!(PublishPacket::decode(&mut reader).is_ok());
    }
}
