// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS, VarInt,
            VarIntError};

/// Control packet type, parsed from the upper nibble of the first byte.
///
/// Publish carries its flag bits; the flag nibble of every other type is
/// reserved and must hold a fixed value [MQTT-2.1.3-1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PacketType {
    /// Client request to connect to the server.
    #[default]
    Connect,

    /// Connect acknowledgement.
    ConnectAck,

    /// Application message.
    Publish { dup: bool, qos: QoS, retain: bool },

    /// QoS 1 publish acknowledgement.
    PublishAck,

    /// QoS 2 publish received, part 1.
    PublishReceived,

    /// QoS 2 publish release, part 2.
    PublishRelease,

    /// QoS 2 publish complete, part 3.
    PublishComplete,

    /// Client subscribe request.
    Subscribe,

    /// Subscribe acknowledgement.
    SubscribeAck,

    /// Client unsubscribe request.
    Unsubscribe,

    /// Unsubscribe acknowledgement.
    UnsubscribeAck,

    /// Client ping request.
    PingRequest,

    /// Server ping response.
    PingResponse,

    /// Either side is closing the connection.
    Disconnect,

    /// Enhanced authentication exchange.
    Auth,
}

impl PacketType {
    /// Get byte length in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    /// The value the reserved flag nibble must hold for this type.
    const fn reserved_flags(type_bits: u8) -> u8 {
        match type_bits {
            // PUBREL, SUBSCRIBE and UNSUBSCRIBE use 0b0010 [MQTT-3.6.1-1].
            6 | 8 | 10 => 0b0000_0010,
            _ => 0b0000_0000,
        }
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        let type_bits: u8 = match packet_type {
            PacketType::Connect => 1,
            PacketType::ConnectAck => 2,
            PacketType::Publish { .. } => 3,
            PacketType::PublishAck => 4,
            PacketType::PublishReceived => 5,
            PacketType::PublishRelease => 6,
            PacketType::PublishComplete => 7,
            PacketType::Subscribe => 8,
            PacketType::SubscribeAck => 9,
            PacketType::Unsubscribe => 10,
            PacketType::UnsubscribeAck => 11,
            PacketType::PingRequest => 12,
            PacketType::PingResponse => 13,
            PacketType::Disconnect => 14,
            PacketType::Auth => 15,
        };

        let flag_bits = match packet_type {
            PacketType::Publish { dup, qos, retain } => {
                let dup = if dup { 0b0000_1000 } else { 0 };
                let qos = (qos as u8) << 1;
                let retain = u8::from(retain);
                dup | qos | retain
            }
            _ => PacketType::reserved_flags(type_bits),
        };
        (type_bits << 4) | flag_bits
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    /// Parse the packet type byte.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacketFlags` if a reserved flag bit is set, per
    /// [MQTT-2.2.2-2] the connection must then be closed.
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let type_bits = (v & 0b1111_0000) >> 4;
        let flag = v & 0b0000_1111;

        if type_bits == 3 {
            let dup = flag & 0b0000_1000 != 0;
            let retain = flag & 0b0000_0001 != 0;
            let qos = match flag & 0b0000_0110 {
                0b0000_0000 => QoS::AtMostOnce,
                0b0000_0010 => QoS::AtLeastOnce,
                0b0000_0100 => QoS::ExactOnce,
                // Both QoS bits set [MQTT-3.3.1-4].
                _ => return Err(DecodeError::InvalidPacketFlags),
            };
            // The DUP flag MUST be 0 for all QoS 0 messages [MQTT-3.3.1-2].
            if dup && qos == QoS::AtMostOnce {
                return Err(DecodeError::InvalidPacketFlags);
            }
            return Ok(Self::Publish { dup, qos, retain });
        }

        let packet_type = match type_bits {
            1 => Self::Connect,
            2 => Self::ConnectAck,
            4 => Self::PublishAck,
            5 => Self::PublishReceived,
            6 => Self::PublishRelease,
            7 => Self::PublishComplete,
            8 => Self::Subscribe,
            9 => Self::SubscribeAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubscribeAck,
            12 => Self::PingRequest,
            13 => Self::PingResponse,
            14 => Self::Disconnect,
            15 => Self::Auth,
            t => {
                log::error!("header: invalid packet type bits: {t:#b}");
                return Err(DecodeError::InvalidPacketType);
            }
        };
        if flag != Self::reserved_flags(type_bits) {
            log::error!("header: invalid flags {flag:#b} for {packet_type:?}");
            return Err(DecodeError::InvalidPacketFlags);
        }
        Ok(packet_type)
    }
}

/// Fixed header of a control packet.
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-------+-------+
/// | Type  | Flags |
/// +-------+-------+
/// | Remaining Len |
/// +-------+-------+
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedHeader {
    packet_type: PacketType,

    /// Number of bytes in the variable header and payload, var-int
    /// encoded in one to four bytes.
    remaining_length: VarInt,
}

impl FixedHeader {
    /// Create a new fixed header.
    ///
    /// # Errors
    ///
    /// Returns error if `remaining_length` exceeds the var-int range.
    pub fn new(packet_type: PacketType, remaining_length: usize) -> Result<Self, VarIntError> {
        let remaining_length = VarInt::from(remaining_length)?;
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }

    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    #[must_use]
    pub const fn remaining_length(&self) -> usize {
        self.remaining_length.value()
    }

    /// Get byte length in packet.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        PacketType::bytes() + self.remaining_length.bytes()
    }
}

impl DecodePacket for FixedHeader {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let flag = reader.read_byte()?;
        let packet_type = PacketType::try_from(flag)?;
        let remaining_length = VarInt::decode(reader)?;
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }
}

impl EncodePacket for FixedHeader {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(u8::from(self.packet_type));
        let len_bytes = self.remaining_length.encode(buf)?;
        Ok(PacketType::bytes() + len_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let mut buf = Vec::new();
        let fixed_header = FixedHeader::new(PacketType::PingResponse, 0).unwrap();
        assert_eq!(fixed_header.encode(&mut buf).unwrap(), 2);
        assert_eq!(&buf, &[0xd0, 0x00]);
    }

    #[test]
    fn test_decode_publish() {
        let buf = [0x3d, 0x13];
        let mut reader = ByteReader::new(&buf);
        let fixed_header = FixedHeader::decode(&mut reader).unwrap();
        assert_eq!(
            fixed_header.packet_type(),
            PacketType::Publish {
                dup: true,
                qos: QoS::ExactOnce,
                retain: true,
            }
        );
        assert_eq!(fixed_header.remaining_length(), 19);
    }

    #[test]
    fn test_decode_rejects_bad_flags() {
        // SUBSCRIBE with reserved flags all zero.
        let buf = [0x80, 0x00];
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            FixedHeader::decode(&mut reader),
            Err(DecodeError::InvalidPacketFlags)
        );

        // PUBLISH with both QoS bits set.
        let buf = [0x36, 0x00];
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            FixedHeader::decode(&mut reader),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
