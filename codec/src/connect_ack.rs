// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::check_property_type_list;
use crate::{
    ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, PropertyType, ReasonCode,
};

/// CONNACK is the server's reply to a CONNECT packet.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Ack flags             |
/// +-----------------------+
/// | Reason code           |
/// +-----------------------+
/// | Properties ...        |
/// +-----------------------+
/// ```
///
/// Bit 0 of the ack flags is session-present: whether the server resumed
/// an existing session for this client id. The other seven bits are
/// reserved and must be zero [MQTT-3.2.2-1].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectAckPacket {
    session_present: bool,
    reason_code: ReasonCode,
    properties: Properties,
}

/// Properties available in connack packets.
pub const CONNECT_ACK_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumQoS,
    PropertyType::RetainAvailable,
    PropertyType::MaximumPacketSize,
    PropertyType::AssignedClientIdentifier,
    PropertyType::TopicAliasMaximum,
    PropertyType::ReasonString,
    PropertyType::UserProperty,
    PropertyType::WildcardSubscriptionAvailable,
    PropertyType::SubscriptionIdentifierAvailable,
    PropertyType::SharedSubscriptionAvailable,
    PropertyType::ServerKeepAlive,
    PropertyType::ResponseInformation,
    PropertyType::ServerReference,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Reason codes available in connack packets.
pub const CONNECT_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::UnspecifiedError,
    ReasonCode::MalformedPacket,
    ReasonCode::ProtocolError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::UnsupportedProtocolVersion,
    ReasonCode::ClientIdentifierNotValid,
    ReasonCode::BadUserNameOrPassword,
    ReasonCode::NotAuthorized,
    ReasonCode::ServerUnavailable,
    ReasonCode::ServerBusy,
    ReasonCode::Banned,
    ReasonCode::BadAuthenticationMethod,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketTooLarge,
    ReasonCode::QuotaExceeded,
    ReasonCode::PayloadFormatInvalid,
    ReasonCode::RetainNotSupported,
    ReasonCode::QoSNotSupported,
    ReasonCode::UseAnotherServer,
    ReasonCode::ServerMoved,
    ReasonCode::ConnectionRateExceeded,
];

impl ConnectAckPacket {
    #[must_use]
    pub fn new(session_present: bool, reason_code: ReasonCode) -> Self {
        Self {
            session_present,
            reason_code,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
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

impl DecodePacket for ConnectAckPacket {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(reader)?;
        if fixed_header.packet_type() != PacketType::ConnectAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let ack_flags = reader.read_byte()?;
        if ack_flags & 0b1111_1110 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let session_present = ack_flags & 0b0000_0001 != 0;

        let reason_code = ReasonCode::decode(reader)?;
        if !CONNECT_REASONS.contains(&reason_code) {
            return Err(DecodeError::InvalidReasonCode);
        }
        // Session present must be zero when the connection is refused
        // [MQTT-3.2.2-6].
        if !reason_code.is_success() && session_present {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let properties = Properties::decode(reader)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), CONNECT_ACK_PROPERTIES)
        {
            log::error!("connack: property {property_type:?} not allowed");
            return Err(DecodeError::PropertyNotAllowed);
        }

        Ok(Self {
            session_present,
            reason_code,
            properties,
        })
    }
}

impl EncodePacket for ConnectAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let remaining_length = 1 + ReasonCode::bytes() + self.properties.bytes();
        let fixed_header = FixedHeader::new(PacketType::ConnectAck, remaining_length)?;
        let mut written = fixed_header.encode(buf)?;
        buf.push(u8::from(self.session_present));
        written += 1;
        written += self.reason_code.encode(buf)?;
        written += self.properties.encode(buf)?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, U16Data};

    #[test]
    fn test_round_trip() {
        let mut packet = ConnectAckPacket::new(true, ReasonCode::Success);
        packet
            .properties_mut()
            .push(Property::ReceiveMaximum(U16Data::new(10)))
            .unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut reader = ByteReader::new(&buf);
        let decoded = ConnectAckPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded, packet);
        assert!(decoded.session_present());
        assert_eq!(decoded.properties().receive_maximum(), Some(10));
    }

    #[test]
    fn test_session_present_on_failure_rejected() {
        let buf = [0x20, 0x03, 0x01, 0x87, 0x00];
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            ConnectAckPacket::decode(&mut reader),
            Err(DecodeError::InvalidPacketFlags)
        );
    }

    #[test]
    fn test_reserved_ack_flags_rejected() {
        let buf = [0x20, 0x03, 0x02, 0x00, 0x00];
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            ConnectAckPacket::decode(&mut reader),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
