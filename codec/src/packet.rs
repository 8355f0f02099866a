// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{
    AuthPacket, ByteReader, ConnectAckPacket, ConnectPacket, DecodeError, DecodePacket,
    DisconnectPacket, EncodeError, EncodePacket, PacketType, PingRequestPacket,
    PingResponsePacket, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, SubscribeAckPacket, SubscribePacket,
    UnsubscribeAckPacket, UnsubscribePacket, VarInt,
};

/// Tagged union over the fifteen control packet types.
///
/// This is what the framed reader produces and the writer queue carries;
/// the per-type structs stay the unit of encode/decode logic.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl Packet {
    /// Get the packet type tag.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnectAck(_) => PacketType::ConnectAck,
            Self::Publish(p) => PacketType::Publish {
                dup: p.dup(),
                qos: p.qos(),
                retain: p.retain(),
            },
            Self::PublishAck(_) => PacketType::PublishAck,
            Self::PublishReceived(_) => PacketType::PublishReceived,
            Self::PublishRelease(_) => PacketType::PublishRelease,
            Self::PublishComplete(_) => PacketType::PublishComplete,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubscribeAck(_) => PacketType::SubscribeAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Self::PingRequest(_) => PacketType::PingRequest,
            Self::PingResponse(_) => PacketType::PingResponse,
            Self::Disconnect(_) => PacketType::Disconnect,
            Self::Auth(_) => PacketType::Auth,
        }
    }
}

impl DecodePacket for Packet {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let start = reader.offset();
        let packet_type = PacketType::try_from(reader.read_byte()?)?;
        reader.seek(start);

        match packet_type {
            PacketType::Connect => Ok(Self::Connect(ConnectPacket::decode(reader)?)),
            PacketType::ConnectAck => Ok(Self::ConnectAck(ConnectAckPacket::decode(reader)?)),
            PacketType::Publish { .. } => Ok(Self::Publish(PublishPacket::decode(reader)?)),
            PacketType::PublishAck => Ok(Self::PublishAck(PublishAckPacket::decode(reader)?)),
            PacketType::PublishReceived => {
                Ok(Self::PublishReceived(PublishReceivedPacket::decode(reader)?))
            }
            PacketType::PublishRelease => {
                Ok(Self::PublishRelease(PublishReleasePacket::decode(reader)?))
            }
            PacketType::PublishComplete => {
                Ok(Self::PublishComplete(PublishCompletePacket::decode(reader)?))
            }
            PacketType::Subscribe => Ok(Self::Subscribe(SubscribePacket::decode(reader)?)),
            PacketType::SubscribeAck => {
                Ok(Self::SubscribeAck(SubscribeAckPacket::decode(reader)?))
            }
            PacketType::Unsubscribe => Ok(Self::Unsubscribe(UnsubscribePacket::decode(reader)?)),
            PacketType::UnsubscribeAck => {
                Ok(Self::UnsubscribeAck(UnsubscribeAckPacket::decode(reader)?))
            }
            PacketType::PingRequest => {
                Ok(Self::PingRequest(PingRequestPacket::decode(reader)?))
            }
            PacketType::PingResponse => {
                Ok(Self::PingResponse(PingResponsePacket::decode(reader)?))
            }
            PacketType::Disconnect => Ok(Self::Disconnect(DisconnectPacket::decode(reader)?)),
            PacketType::Auth => Ok(Self::Auth(AuthPacket::decode(reader)?)),
        }
    }
}

impl EncodePacket for Packet {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        match self {
            Self::Connect(p) => p.encode(buf),
            Self::ConnectAck(p) => p.encode(buf),
            Self::Publish(p) => p.encode(buf),
            Self::PublishAck(p) => p.encode(buf),
            Self::PublishReceived(p) => p.encode(buf),
            Self::PublishRelease(p) => p.encode(buf),
            Self::PublishComplete(p) => p.encode(buf),
            Self::Subscribe(p) => p.encode(buf),
            Self::SubscribeAck(p) => p.encode(buf),
            Self::Unsubscribe(p) => p.encode(buf),
            Self::UnsubscribeAck(p) => p.encode(buf),
            Self::PingRequest(p) => p.encode(buf),
            Self::PingResponse(p) => p.encode(buf),
            Self::Disconnect(p) => p.encode(buf),
            Self::Auth(p) => p.encode(buf),
        }
    }
}

macro_rules! packet_from {
    ($struct_type: ident, $variant: ident) => {
        impl From<$struct_type> for Packet {
            fn from(packet: $struct_type) -> Self {
                Self::$variant(packet)
            }
        }
    };
}

packet_from!(ConnectPacket, Connect);
packet_from!(ConnectAckPacket, ConnectAck);
packet_from!(PublishPacket, Publish);
packet_from!(PublishAckPacket, PublishAck);
packet_from!(PublishReceivedPacket, PublishReceived);
packet_from!(PublishReleasePacket, PublishRelease);
packet_from!(PublishCompletePacket, PublishComplete);
packet_from!(SubscribePacket, Subscribe);
packet_from!(SubscribeAckPacket, SubscribeAck);
packet_from!(UnsubscribePacket, Unsubscribe);
packet_from!(UnsubscribeAckPacket, UnsubscribeAck);
packet_from!(PingRequestPacket, PingRequest);
packet_from!(PingResponsePacket, PingResponse);
packet_from!(DisconnectPacket, Disconnect);
packet_from!(AuthPacket, Auth);

/// Result of probing a buffer for one whole packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// The buffer holds at least one whole packet of `total` bytes.
    Complete { total: usize },

    /// More bytes are needed before the packet can be decoded.
    Partial,
}

/// Probe `buf` for one complete control packet without decoding it.
///
/// Only the fixed header is inspected, so the cost is a few bytes
/// regardless of packet size.
///
/// # Errors
///
/// Returns error if the type byte or the remaining-length encoding is
/// malformed; the connection must then be closed.
pub fn check_frame(buf: &[u8]) -> Result<FrameState, DecodeError> {
    if buf.is_empty() {
        return Ok(FrameState::Partial);
    }
    // Surface a bad type byte before waiting for more data.
    let _packet_type = PacketType::try_from(buf[0])?;

    let mut reader = ByteReader::new(buf);
    let _ = reader.read_byte()?;
    let remaining_length = match VarInt::decode(&mut reader) {
        Ok(v) => v,
        // Fewer than four length bytes so far and none terminated.
        Err(DecodeError::OutOfRange) => return Ok(FrameState::Partial),
        Err(err) => return Err(err),
    };

    let total = reader.offset() + remaining_length.value();
    if buf.len() < total {
        Ok(FrameState::Partial)
    } else {
        Ok(FrameState::Complete { total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketId, QoS};

    fn publish_bytes() -> Vec<u8> {
        let packet = PublishPacket::new("t/1", QoS::AtMostOnce, b"hello").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_check_frame_complete() {
        let buf = publish_bytes();
        assert_eq!(
            check_frame(&buf),
            Ok(FrameState::Complete { total: buf.len() })
        );

        // Trailing bytes of the next packet do not change the result.
        let mut extended = buf.clone();
        extended.extend_from_slice(&[0xc0]);
        assert_eq!(
            check_frame(&extended),
            Ok(FrameState::Complete { total: buf.len() })
        );
    }

    #[test]
    fn test_check_frame_partial() {
        let buf = publish_bytes();
        for end in 0..buf.len() {
            assert_eq!(check_frame(&buf[..end]), Ok(FrameState::Partial));
        }
    }

    #[test]
    fn test_check_frame_malformed_length() {
        let buf = [0x30, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert_eq!(check_frame(&buf), Err(DecodeError::InvalidVarInt));
    }

    #[test]
    fn test_decode_dispatch() {
        let buf = publish_bytes();
        let mut reader = ByteReader::new(&buf);
        let packet = Packet::decode(&mut reader).unwrap();
        let Packet::Publish(publish) = packet else {
            panic!("expected publish variant");
        };
        assert_eq!(publish.topic(), "t/1");
        assert_eq!(publish.payload(), b"hello");
    }

    #[test]
    fn test_decode_stream_split_independent() {
        // Two packets back to back decode to the same sequence no matter
        // how the buffer was filled.
        let mut buf = publish_bytes();
        let ack = PublishAckPacket::new(PacketId::new(5));
        ack.encode(&mut buf).unwrap();

        let FrameState::Complete { total: first } = check_frame(&buf).unwrap() else {
            panic!("expected complete frame");
        };
        let mut reader = ByteReader::new(&buf[..first]);
        assert!(matches!(
            Packet::decode(&mut reader).unwrap(),
            Packet::Publish(_)
        ));
        let mut reader = ByteReader::new(&buf[first..]);
        assert!(matches!(
            Packet::decode(&mut reader).unwrap(),
            Packet::PublishAck(_)
        ));
    }
}
