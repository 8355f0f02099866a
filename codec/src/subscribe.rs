// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::property::{check_multiple_subscription_identifiers, check_property_type_list};
use crate::{
    ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, QoS, TopicFilter,
};

/// How retained messages are delivered when a subscription is made.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    #[default]
    SendAtSubscribe = 0,

    /// Send retained messages only if the subscription did not already
    /// exist.
    SendAtSubscribeIfNew = 1,

    /// Do not send retained messages.
    DoNotSend = 2,
}

impl TryFrom<u8> for RetainHandling {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::SendAtSubscribe),
            1 => Ok(Self::SendAtSubscribeIfNew),
            2 => Ok(Self::DoNotSend),
            _ => Err(DecodeError::InvalidPacketFlags),
        }
    }
}

/// One topic filter entry in a SUBSCRIBE packet: the filter string plus
/// its subscription options byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeTopic {
    filter: TopicFilter,
    qos: QoS,
    no_local: bool,
    retain_as_published: bool,
    retain_handling: RetainHandling,
}

impl SubscribeTopic {
    /// Create an entry with default options.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    pub fn new(filter: &str, qos: QoS) -> Result<Self, DecodeError> {
        Ok(Self {
            filter: TopicFilter::new(filter)?,
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::default(),
        })
    }

    #[must_use]
    pub const fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Do not forward messages published by this client itself.
    ///
    /// Setting no-local on a shared subscription is a Protocol Error
    /// [MQTT-3.8.3-4]; callers validate before sending.
    pub fn set_no_local(&mut self, no_local: bool) -> &mut Self {
        self.no_local = no_local;
        self
    }

    #[must_use]
    pub const fn no_local(&self) -> bool {
        self.no_local
    }

    pub fn set_retain_as_published(&mut self, retain_as_published: bool) -> &mut Self {
        self.retain_as_published = retain_as_published;
        self
    }

    #[must_use]
    pub const fn retain_as_published(&self) -> bool {
        self.retain_as_published
    }

    pub fn set_retain_handling(&mut self, retain_handling: RetainHandling) -> &mut Self {
        self.retain_handling = retain_handling;
        self
    }

    #[must_use]
    pub const fn retain_handling(&self) -> RetainHandling {
        self.retain_handling
    }

    fn options_byte(&self) -> u8 {
        let mut byte = self.qos as u8;
        if self.no_local {
            byte |= 0b0000_0100;
        }
        if self.retain_as_published {
            byte |= 0b0000_1000;
        }
        byte |= (self.retain_handling as u8) << 4;
        byte
    }

    fn bytes(&self) -> usize {
        self.filter.bytes() + 1
    }
}

impl DecodePacket for SubscribeTopic {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let filter = TopicFilter::decode(reader)?;
        let options = reader.read_byte()?;
        // Bits 6 and 7 are reserved [MQTT-3.8.3-5].
        if options & 0b1100_0000 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let qos = QoS::try_from(options & 0b0000_0011)?;
        let no_local = options & 0b0000_0100 != 0;
        let retain_as_published = options & 0b0000_1000 != 0;
        let retain_handling = RetainHandling::try_from((options & 0b0011_0000) >> 4)?;
        Ok(Self {
            filter,
            qos,
            no_local,
            retain_as_published,
            retain_handling,
        })
    }
}

impl EncodePacket for SubscribeTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let written = self.filter.encode(buf)?;
        buf.push(self.options_byte());
        Ok(written + 1)
    }
}

/// SUBSCRIBE creates one or more subscriptions in the server session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribePacket {
    packet_id: PacketId,
    properties: Properties,
    topics: Vec<SubscribeTopic>,
}

/// Properties available in subscribe packets.
pub const SUBSCRIBE_PROPERTIES: &[PropertyType] = &[
    PropertyType::SubscriptionIdentifier,
    PropertyType::UserProperty,
];

impl SubscribePacket {
    /// Create a single-filter subscribe packet.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is invalid.
    pub fn new(filter: &str, qos: QoS, packet_id: PacketId) -> Result<Self, DecodeError> {
        let topic = SubscribeTopic::new(filter, qos)?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![topic],
        })
    }

    /// Create a subscribe packet with explicit entries.
    ///
    /// # Errors
    ///
    /// Returns error if `topics` is empty [MQTT-3.8.3-2].
    pub fn with_topics(
        packet_id: PacketId,
        topics: Vec<SubscribeTopic>,
    ) -> Result<Self, DecodeError> {
        if topics.is_empty() {
            return Err(DecodeError::EmptyTopicFilter);
        }
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics,
        })
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}

impl DecodePacket for SubscribePacket {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(reader)?;
        if fixed_header.packet_type() != PacketType::Subscribe {
            return Err(DecodeError::InvalidPacketType);
        }

        let body_start = reader.offset();
        let packet_id = PacketId::decode(reader)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }

        let properties = Properties::decode(reader)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), SUBSCRIBE_PROPERTIES)
        {
            log::error!("subscribe: property {property_type:?} not allowed");
            return Err(DecodeError::PropertyNotAllowed);
        }
        if check_multiple_subscription_identifiers(properties.props()).is_err() {
            return Err(DecodeError::DuplicateProperty);
        }

        let mut topics = Vec::new();
        while reader.offset() - body_start < fixed_header.remaining_length() {
            topics.push(SubscribeTopic::decode(reader)?);
        }
        // A subscribe packet with no payload is a Protocol Error
        // [MQTT-3.8.3-2].
        if topics.is_empty() {
            return Err(DecodeError::EmptyTopicFilter);
        }

        Ok(Self {
            packet_id,
            properties,
            topics,
        })
    }
}

impl EncodePacket for SubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let remaining_length = PacketId::bytes()
            + self.properties.bytes()
            + self.topics.iter().map(SubscribeTopic::bytes).sum::<usize>();
        let fixed_header = FixedHeader::new(PacketType::Subscribe, remaining_length)?;
        let mut written = fixed_header.encode(buf)?;
        written += self.packet_id.encode(buf)?;
        written += self.properties.encode(buf)?;
        for topic in &self.topics {
            written += topic.encode(buf)?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let packet =
            SubscribePacket::new("sensors/#", QoS::AtLeastOnce, PacketId::new(2)).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x82);

        let mut reader = ByteReader::new(&buf);
        let decoded = SubscribePacket::decode(&mut reader).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.topics().len(), 1);
        assert_eq!(decoded.topics()[0].filter().as_str(), "sensors/#");
        assert_eq!(decoded.topics()[0].qos(), QoS::AtLeastOnce);
    }

    #[test]
    fn test_options_byte() {
        let mut topic = SubscribeTopic::new("a/b", QoS::ExactOnce).unwrap();
        topic
            .set_no_local(true)
            .set_retain_as_published(true)
            .set_retain_handling(RetainHandling::DoNotSend);
        let mut buf = Vec::new();
        topic.encode(&mut buf).unwrap();
        assert_eq!(buf[buf.len() - 1], 0b0010_1110);

        let mut reader = ByteReader::new(&buf);
        let decoded = SubscribeTopic::decode(&mut reader).unwrap();
        assert_eq!(decoded, topic);
    }

    #[test]
    fn test_reserved_option_bits_rejected() {
        let mut buf = Vec::new();
        let topic = SubscribeTopic::new("a", QoS::AtMostOnce).unwrap();
        topic.encode(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] |= 0b0100_0000;
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            SubscribeTopic::decode(&mut reader),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
