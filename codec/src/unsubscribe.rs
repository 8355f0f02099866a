// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::check_property_type_list;
use crate::{
    ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, TopicFilter,
};

/// UNSUBSCRIBE removes one or more subscriptions from the server session.
/// Filters are compared character-by-character against the session's
/// subscriptions [MQTT-3.10.4-1]; no wildcard matching is involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsubscribePacket {
    packet_id: PacketId,
    properties: Properties,
    topics: Vec<TopicFilter>,
}

/// Properties available in unsubscribe packets.
pub const UNSUBSCRIBE_PROPERTIES: &[PropertyType] = &[PropertyType::UserProperty];

impl UnsubscribePacket {
    /// Create a single-filter unsubscribe packet.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    pub fn new(filter: &str, packet_id: PacketId) -> Result<Self, DecodeError> {
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![TopicFilter::new(filter)?],
        })
    }

    /// Create an unsubscribe packet with explicit filters.
    ///
    /// # Errors
    ///
    /// Returns error if `topics` is empty [MQTT-3.10.3-2].
    pub fn with_topics(
        packet_id: PacketId,
        topics: Vec<TopicFilter>,
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
    pub fn topics(&self) -> &[TopicFilter] {
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

impl DecodePacket for UnsubscribePacket {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(reader)?;
        if fixed_header.packet_type() != PacketType::Unsubscribe {
            return Err(DecodeError::InvalidPacketType);
        }

        let body_start = reader.offset();
        let packet_id = PacketId::decode(reader)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }

        let properties = Properties::decode(reader)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), UNSUBSCRIBE_PROPERTIES)
        {
            log::error!("unsubscribe: property {property_type:?} not allowed");
            return Err(DecodeError::PropertyNotAllowed);
        }

        let mut topics = Vec::new();
        while reader.offset() - body_start < fixed_header.remaining_length() {
            topics.push(TopicFilter::decode(reader)?);
        }
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

impl EncodePacket for UnsubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let remaining_length = PacketId::bytes()
            + self.properties.bytes()
            + self.topics.iter().map(TopicFilter::bytes).sum::<usize>();
        let fixed_header = FixedHeader::new(PacketType::Unsubscribe, remaining_length)?;
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
        let packet = UnsubscribePacket::new("sensors/#", PacketId::new(11)).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0xa2);

        let mut reader = ByteReader::new(&buf);
        let decoded = UnsubscribePacket::decode(&mut reader).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.topics()[0].as_str(), "sensors/#");
    }
}
