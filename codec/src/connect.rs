// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::check_property_type_list;
use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    PacketType, Properties, PropertyType, PubTopic, QoS, StringData, U16Data,
};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 5;

/// Properties available in connect packets.
pub const CONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumPacketSize,
    PropertyType::TopicAliasMaximum,
    PropertyType::RequestResponseInformation,
    PropertyType::RequestProblemInformation,
    PropertyType::UserProperty,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Properties available in the will section of connect packets.
pub const WILL_PROPERTIES: &[PropertyType] = &[
    PropertyType::WillDelayInterval,
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::ContentType,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
];

/// Message the server publishes on the client's behalf when the
/// connection closes without a normal DISCONNECT.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WillMessage {
    qos: QoS,
    retain: bool,
    properties: Properties,
    topic: PubTopic,
    payload: BinaryData,
}

impl WillMessage {
    /// Create a new will message.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or `payload` too long.
    pub fn new(topic: &str, qos: QoS, payload: &[u8]) -> Result<Self, EncodeError> {
        Ok(Self {
            qos,
            retain: false,
            properties: Properties::new(),
            topic: PubTopic::new(topic)?,
            payload: BinaryData::from_slice(payload)?,
        })
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_ref()
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    fn bytes(&self) -> usize {
        self.properties.bytes() + self.topic.bytes() + self.payload.bytes()
    }
}

/// CONNECT is the first packet a client sends after opening the network
/// connection.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Protocol name         |
/// +-----------------------+
/// | Protocol level        |
/// +-----------------------+
/// | Connect flags         |
/// +-----------------------+
/// | Keep alive            |
/// |                       |
/// +-----------------------+
/// | Properties ...        |
/// +-----------------------+
/// | Client id             |
/// +-----------------------+
/// | Will props/topic/data |
/// +-----------------------+
/// | Username              |
/// +-----------------------+
/// | Password              |
/// +-----------------------+
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectPacket {
    /// Ask the server to discard any existing session state for this
    /// client id.
    clean_start: bool,

    /// Maximum idle interval in seconds; zero disables the keep-alive
    /// mechanism.
    keep_alive: U16Data,

    properties: Properties,
    client_id: StringData,
    will: Option<WillMessage>,
    username: Option<StringData>,
    password: Option<BinaryData>,
}

impl ConnectPacket {
    /// Create a new connect packet.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` contains invalid characters.
    pub fn new(client_id: &str) -> Result<Self, DecodeError> {
        validate_client_id(client_id)?;
        let client_id =
            StringData::from(client_id).map_err(|_e| DecodeError::InvalidClientId)?;
        Ok(Self {
            clean_start: true,
            keep_alive: U16Data::new(60),
            client_id,
            ..Self::default()
        })
    }

    pub fn set_clean_start(&mut self, clean_start: bool) -> &mut Self {
        self.clean_start = clean_start;
        self
    }

    #[must_use]
    pub const fn clean_start(&self) -> bool {
        self.clean_start
    }

    pub fn set_keep_alive(&mut self, seconds: u16) -> &mut Self {
        self.keep_alive = U16Data::new(seconds);
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive.value()
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    pub fn set_will(&mut self, will: Option<WillMessage>) -> &mut Self {
        self.will = will;
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&WillMessage> {
        self.will.as_ref()
    }

    /// Set credentials; a password without a username is valid in 5.0.
    ///
    /// # Errors
    ///
    /// Returns error if either field is too long.
    pub fn set_credentials(
        &mut self,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<&mut Self, EncodeError> {
        self.username = match username {
            Some(name) => Some(StringData::from(name)?),
            None => None,
        };
        self.password = match password {
            Some(data) => Some(BinaryData::from_slice(data)?),
            None => None,
        };
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_start {
            flags |= 0b0000_0010;
        }
        if let Some(will) = &self.will {
            flags |= 0b0000_0100;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0b0010_0000;
            }
        }
        if self.password.is_some() {
            flags |= 0b0100_0000;
        }
        if self.username.is_some() {
            flags |= 0b1000_0000;
        }
        flags
    }

    fn remaining_length(&self) -> usize {
        let mut len = 2 + PROTOCOL_NAME.len()  // protocol name
            + 1                                // protocol level
            + 1                                // connect flags
            + U16Data::bytes()                 // keep alive
            + self.properties.bytes()
            + self.client_id.bytes();
        if let Some(will) = &self.will {
            len += will.bytes();
        }
        if let Some(username) = &self.username {
            len += username.bytes();
        }
        if let Some(password) = &self.password {
            len += password.bytes();
        }
        len
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(reader)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(reader)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }
        if reader.read_byte()? != PROTOCOL_LEVEL {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let flags = reader.read_byte()?;
        // Bit 0 is reserved and must be zero [MQTT-3.1.2-3].
        if flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let clean_start = flags & 0b0000_0010 != 0;
        let has_will = flags & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((flags & 0b0001_1000) >> 3)?;
        let will_retain = flags & 0b0010_0000 != 0;
        let has_password = flags & 0b0100_0000 != 0;
        let has_username = flags & 0b1000_0000 != 0;
        // Will qos and retain must be zero without the will flag
        // [MQTT-3.1.2-11].
        if !has_will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let keep_alive = U16Data::decode(reader)?;
        let properties = Properties::decode(reader)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), CONNECT_PROPERTIES)
        {
            log::error!("connect: property {property_type:?} not allowed");
            return Err(DecodeError::PropertyNotAllowed);
        }

        let client_id = StringData::decode(reader)?;
        validate_client_id(client_id.as_ref())?;

        let will = if has_will {
            let will_properties = Properties::decode(reader)?;
            if let Err(property_type) =
                check_property_type_list(will_properties.props(), WILL_PROPERTIES)
            {
                log::error!("connect: will property {property_type:?} not allowed");
                return Err(DecodeError::PropertyNotAllowed);
            }
            let topic = PubTopic::decode(reader)?;
            if topic.is_empty() {
                return Err(DecodeError::InvalidTopic);
            }
            let payload = BinaryData::decode(reader)?;
            Some(WillMessage {
                qos: will_qos,
                retain: will_retain,
                properties: will_properties,
                topic,
                payload,
            })
        } else {
            None
        };

        let username = if has_username {
            Some(StringData::decode(reader)?)
        } else {
            None
        };
        let password = if has_password {
            Some(BinaryData::decode(reader)?)
        } else {
            None
        };

        Ok(Self {
            clean_start,
            keep_alive,
            properties,
            client_id,
            will,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        fixed_header.encode(buf)?;

        let protocol_name =
            StringData::from(PROTOCOL_NAME).map_err(|_e| EncodeError::InvalidData)?;
        protocol_name.encode(buf)?;
        buf.push(PROTOCOL_LEVEL);
        buf.push(self.connect_flags());
        self.keep_alive.encode(buf)?;
        self.properties.encode(buf)?;
        self.client_id.encode(buf)?;

        if let Some(will) = &self.will {
            will.properties.encode(buf)?;
            will.topic.encode(buf)?;
            will.payload.encode(buf)?;
        }
        if let Some(username) = &self.username {
            username.encode(buf)?;
        }
        if let Some(password) = &self.password {
            password.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, U32Data};

    #[test]
    fn test_round_trip_minimal() {
        let packet = ConnectPacket::new("lumo-test").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        // Protocol name lives right after the two header bytes.
        assert_eq!(&buf[2..8], &[0x00, 0x04, b'M', b'Q', b'T', b'T']);
        assert_eq!(buf[8], 5);

        let mut reader = ByteReader::new(&buf);
        let decoded = ConnectPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded, packet);
        assert!(decoded.clean_start());
        assert_eq!(decoded.keep_alive(), 60);
    }

    #[test]
    fn test_round_trip_full() {
        let mut packet = ConnectPacket::new("c1").unwrap();
        packet.set_clean_start(false);
        packet.set_keep_alive(30);
        packet
            .properties_mut()
            .push(Property::SessionExpiryInterval(U32Data::new(120)))
            .unwrap();
        let mut will = WillMessage::new("state/c1", QoS::AtLeastOnce, b"offline").unwrap();
        will.set_retain(true);
        packet.set_will(Some(will));
        packet
            .set_credentials(Some("user"), Some(b"secret"))
            .unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut reader = ByteReader::new(&buf);
        let decoded = ConnectPacket::decode(&mut reader).unwrap();
        assert_eq!(decoded, packet);
        let will = decoded.will().unwrap();
        assert_eq!(will.topic(), "state/c1");
        assert!(will.retain());
        assert_eq!(decoded.username(), Some("user"));
        assert_eq!(decoded.password(), Some(&b"secret"[..]));
    }

    #[test]
    fn test_reserved_flag_rejected() {
        let packet = ConnectPacket::new("c1").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        // Flags byte follows name(6), level(1) after the 2-byte header.
        buf[9] |= 0b0000_0001;
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut reader),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
