// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::check_property_type_list;
use crate::{
    ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, ReasonCode,
};

/// Acknowledgement for a QoS 1 PUBLISH packet.
///
/// Basic structure of packet:
///
/// ```txt
///  7                  0
/// +--------------------+
/// | Fixed header       |
/// |                    |
/// +--------------------+
/// | Packet id          |
/// |                    |
/// +--------------------+
/// | Reason code        |
/// +--------------------+
/// | Properties ...     |
/// +--------------------+
/// ```
///
/// The reason code and property length can be omitted when the reason is
/// 0x00 and there are no properties [MQTT-3.4.2.1].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishAckPacket {
    packet_id: PacketId,
    reason_code: ReasonCode,
    properties: Properties,
}

/// Properties available in puback packets.
pub const PUBLISH_ACK_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

/// Reason codes available in puback packets.
pub const PUBLISH_ACK_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoMatchingSubscribers,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketIdentifierInUse,
    ReasonCode::QuotaExceeded,
    ReasonCode::PayloadFormatInvalid,
];

impl PublishAckPacket {
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

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}

/// Shared layout of the four publish acknowledgement packets.
pub(crate) fn decode_ack_body(
    reader: &mut ByteReader,
    fixed_header: &FixedHeader,
    reasons: &[ReasonCode],
    allowed_properties: &[PropertyType],
) -> Result<(PacketId, ReasonCode, Properties), DecodeError> {
    let packet_id = PacketId::decode(reader)?;
    if packet_id.value() == 0 {
        return Err(DecodeError::InvalidPacketId);
    }

    let (reason_code, properties) = match fixed_header.remaining_length() {
        2 => (ReasonCode::Success, Properties::new()),
        3 => (ReasonCode::decode(reader)?, Properties::new()),
        _ => {
            let reason_code = ReasonCode::decode(reader)?;
            let properties = Properties::decode(reader)?;
            (reason_code, properties)
        }
    };

    if !reasons.contains(&reason_code) {
        return Err(DecodeError::InvalidReasonCode);
    }
    if let Err(property_type) = check_property_type_list(properties.props(), allowed_properties) {
        log::error!("ack packet: property {property_type:?} not allowed");
        return Err(DecodeError::PropertyNotAllowed);
    }
    Ok((packet_id, reason_code, properties))
}

/// Shared encoder for the four publish acknowledgement packets.
pub(crate) fn encode_ack_body(
    buf: &mut Vec<u8>,
    packet_type: PacketType,
    packet_id: PacketId,
    reason_code: ReasonCode,
    properties: &Properties,
) -> Result<usize, EncodeError> {
    let short_form = reason_code == ReasonCode::Success && properties.is_empty();
    let remaining_length = if short_form {
        PacketId::bytes()
    } else {
        PacketId::bytes() + ReasonCode::bytes() + properties.bytes()
    };

    let fixed_header = FixedHeader::new(packet_type, remaining_length)?;
    let mut written = fixed_header.encode(buf)?;
    written += packet_id.encode(buf)?;
    if !short_form {
        written += reason_code.encode(buf)?;
        written += properties.encode(buf)?;
    }
    Ok(written)
}

impl DecodePacket for PublishAckPacket {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(reader)?;
        if fixed_header.packet_type() != PacketType::PublishAck {
            return Err(DecodeError::InvalidPacketType);
        }
        let (packet_id, reason_code, properties) = decode_ack_body(
            reader,
            &fixed_header,
            PUBLISH_ACK_REASONS,
            PUBLISH_ACK_PROPERTIES,
        )?;
        Ok(Self {
            packet_id,
            reason_code,
            properties,
        })
    }
}

impl EncodePacket for PublishAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        encode_ack_body(
            buf,
            PacketType::PublishAck,
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
    fn test_short_form() {
        let packet = PublishAckPacket::new(PacketId::new(7));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x40, 0x02, 0x00, 0x07]);

        let mut reader = ByteReader::new(&buf);
        let decoded = PublishAckPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.reason_code(), ReasonCode::Success);
    }

    #[test]
    fn test_with_reason() {
        let packet =
            PublishAckPacket::with_reason(PacketId::new(9), ReasonCode::QuotaExceeded);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut reader = ByteReader::new(&buf);
        let decoded = PublishAckPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::QuotaExceeded);
    }

    #[test]
    fn test_reason_only_form() {
        let buf = [0x40, 0x03, 0x00, 0x09, 0x10];
        let mut reader = ByteReader::new(&buf);
        let decoded = PublishAckPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::NoMatchingSubscribers);
    }

    #[test]
    fn test_rejects_zero_packet_id() {
        let buf = [0x40, 0x02, 0x00, 0x00];
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            PublishAckPacket::decode(&mut reader),
            Err(DecodeError::InvalidPacketId)
        );
    }
}
