// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::publish_ack::{decode_ack_body, encode_ack_body};
use crate::{
    ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, ReasonCode,
};

/// Second step of the QoS 2 delivery flow, sent in reply to a PUBREC.
///
/// The fixed-header flag nibble of PUBREL must be 0b0010; any other value
/// is malformed and closes the connection [MQTT-3.6.1-1]. A PUBREL is
/// retransmitted unchanged when a connection resumes with an unreleased
/// packet identifier outstanding.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReleasePacket {
    packet_id: PacketId,
    reason_code: ReasonCode,
    properties: Properties,
}

/// Properties available in pubrel packets.
pub const PUBLISH_RELEASE_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

/// Reason codes available in pubrel packets.
pub const PUBLISH_RELEASE_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::PacketIdentifierNotFound,
];

impl PublishReleasePacket {
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        Self {
            packet_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_reason(packet_id: PacketId, reason_code: ReasonCode) -> Self {
        Self {
            packet_id,
            reason_code,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        self.reason_code
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl DecodePacket for PublishReleasePacket {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(reader)?;
        if fixed_header.packet_type() != PacketType::PublishRelease {
            return Err(DecodeError::InvalidPacketType);
        }
        let (packet_id, reason_code, properties) = decode_ack_body(
            reader,
            &fixed_header,
            PUBLISH_RELEASE_REASONS,
            PUBLISH_RELEASE_PROPERTIES,
        )?;
        Ok(Self {
            packet_id,
            reason_code,
            properties,
        })
    }
}

impl EncodePacket for PublishReleasePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        encode_ack_body(
            buf,
            PacketType::PublishRelease,
            self.packet_id,
            self.reason_code,
            &self.properties,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_flags() {
        let packet = PublishReleasePacket::new(PacketId::new(3));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x62, 0x02, 0x00, 0x03]);
    }

    #[test]
    fn test_rejects_wrong_flags() {
        let buf = [0x60, 0x02, 0x00, 0x03];
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            PublishReleasePacket::decode(&mut reader),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
