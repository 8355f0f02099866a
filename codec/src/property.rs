// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::utils::validate_client_id;
use crate::{
    BinaryData, BoolData, ByteReader, DecodeError, DecodePacket, EncodeError, EncodePacket,
    PubTopic, QoS, StringData, StringPairData, U16Data, U32Data, VarInt,
};

/// Properties that may legally appear more than once in one packet.
pub const REPEATABLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    // Repeatable only in PUBLISH packets forwarded by the server for
    // overlapping subscriptions; SUBSCRIBE allows at most one.
    PropertyType::SubscriptionIdentifier,
];

/// Subscription identifiers repeat only in server-published PUBLISH
/// packets; a SUBSCRIBE carries at most one.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_multiple_subscription_identifiers(
    properties: &[Property],
) -> Result<(), PropertyType> {
    let count = properties
        .iter()
        .filter(|p| p.property_type() == PropertyType::SubscriptionIdentifier)
        .count();
    if count > 1 {
        return Err(PropertyType::SubscriptionIdentifier);
    }
    Ok(())
}

/// Check that `properties` only holds types from `allowed`, and that no
/// non-repeatable type appears twice.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_property_type_list(
    properties: &[Property],
    allowed: &[PropertyType],
) -> Result<(), PropertyType> {
    for property in properties {
        if !allowed.contains(&property.property_type()) {
            return Err(property.property_type());
        }
    }

    for property_type in allowed {
        let count = properties
            .iter()
            .filter(|p| p.property_type() == *property_type)
            .count();
        if count > 1 && !REPEATABLE_PROPERTIES.contains(property_type) {
            return Err(*property_type);
        }
    }

    Ok(())
}

/// One-byte property identifier.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// Get byte length in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            // Unknown property ids are a Malformed Packet; there is no
            // skip-and-continue in MQTT 5.
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// A single property entry: identifier plus typed value.
///
/// Each identifier has exactly one wire type. Defaults for absent
/// properties are exposed through the `default_*` constructors below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Byte. 0 means unspecified bytes, 1 means UTF-8 payload.
    /// Used in PUBLISH and Will properties.
    PayloadFormatIndicator(BoolData),

    /// Four Byte Integer, message lifetime in seconds.
    /// Used in PUBLISH and Will properties.
    MessageExpiryInterval(U32Data),

    /// UTF-8 string describing the payload content.
    /// Used in PUBLISH and Will properties.
    ContentType(StringData),

    /// Topic name for a response message in request/response flows.
    /// Used in PUBLISH and Will properties.
    ResponseTopic(PubTopic),

    /// Binary data correlating a response with its request.
    /// Used in PUBLISH and Will properties.
    CorrelationData(BinaryData),

    /// Variable Byte Integer in 1..=268,435,455; zero is a Protocol
    /// Error. Used in PUBLISH (from server) and SUBSCRIBE.
    SubscriptionIdentifier(VarInt),

    /// Four Byte Integer, session lifetime in seconds after disconnect.
    /// 0xFFFF_FFFF means the session never expires.
    /// Used in CONNECT, CONNACK and DISCONNECT.
    SessionExpiryInterval(U32Data),

    /// Client id assigned by the server when CONNECT carried an empty
    /// one. Used in CONNACK.
    AssignedClientIdentifier(StringData),

    /// Keep-alive the server requires the client to use instead of the
    /// value sent in CONNECT [MQTT-3.2.2-21]. Used in CONNACK.
    ServerKeepAlive(U16Data),

    /// Name of the extended authentication method.
    /// Used in CONNECT, CONNACK and AUTH.
    AuthenticationMethod(StringData),

    /// Method-defined authentication payload.
    /// Used in CONNECT, CONNACK and AUTH.
    AuthenticationData(BinaryData),

    /// Byte, 0 or 1. Whether the server may send Reason String and User
    /// Property on packets other than PUBLISH, CONNACK and DISCONNECT.
    /// Used in CONNECT.
    RequestProblemInformation(BoolData),

    /// Four Byte Integer, seconds the server delays publishing the will
    /// message. Used in Will properties.
    WillDelayInterval(U32Data),

    /// Byte, 0 or 1. Whether the server may return Response Information
    /// in CONNACK. Used in CONNECT.
    RequestResponseInformation(BoolData),

    /// Basis for creating a response topic. Used in CONNACK.
    ResponseInformation(StringData),

    /// Another server the client should use, sent with reason codes
    /// 0x9C and 0x9D. Used in CONNACK and DISCONNECT.
    ServerReference(StringData),

    /// Human-readable diagnostic. Used in every acknowledgement packet.
    ReasonString(StringData),

    /// Two Byte Integer, maximum number of concurrent QoS 1/2
    /// publications; zero is a Protocol Error, absent means 65,535.
    /// Used in CONNECT and CONNACK.
    ReceiveMaximum(U16Data),

    /// Two Byte Integer, highest topic alias the sender accepts; absent
    /// means 0 (no aliases). Used in CONNECT and CONNACK.
    TopicAliasMaximum(U16Data),

    /// Two Byte Integer standing in for the topic name; zero is a
    /// Protocol Error. Used in PUBLISH.
    TopicAlias(U16Data),

    /// Byte, 0 or 1. Highest QoS the server supports; absent means 2.
    /// Used in CONNACK.
    MaximumQoS(QoS),

    /// Byte, 0 or 1. Whether the server supports retained messages;
    /// absent means supported. Used in CONNACK.
    RetainAvailable(BoolData),

    /// UTF-8 string pair; repeatable, order-preserving.
    /// Used in every packet type.
    UserProperty(StringPairData),

    /// Four Byte Integer, largest packet the sender accepts; zero is a
    /// Protocol Error. Used in CONNECT and CONNACK.
    MaximumPacketSize(U32Data),

    /// Byte, 0 or 1. Absent means supported. Used in CONNACK.
    WildcardSubscriptionAvailable(BoolData),

    /// Byte, 0 or 1. Absent means supported. Used in CONNACK.
    SubscriptionIdentifierAvailable(BoolData),

    /// Byte, 0 or 1. Absent means supported. Used in CONNACK.
    SharedSubscriptionAvailable(BoolData),
}

impl Property {
    /// Get type of the property.
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(_) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    /// Get byte length in packet, identifier byte included.
    #[allow(clippy::match_same_arms)]
    #[must_use]
    pub fn bytes(&self) -> usize {
        let value_bytes = match self {
            Self::AssignedClientIdentifier(value) => value.bytes(),
            Self::AuthenticationData(value) => value.bytes(),
            Self::AuthenticationMethod(value) => value.bytes(),
            Self::ContentType(value) => value.bytes(),
            Self::CorrelationData(value) => value.bytes(),
            Self::MaximumPacketSize(..) => U32Data::bytes(),
            Self::MaximumQoS(..) => QoS::bytes(),
            Self::MessageExpiryInterval(..) => U32Data::bytes(),
            Self::PayloadFormatIndicator(..) => BoolData::bytes(),
            Self::ReasonString(value) => value.bytes(),
            Self::ReceiveMaximum(..) => U16Data::bytes(),
            Self::RequestProblemInformation(..) => BoolData::bytes(),
            Self::RequestResponseInformation(..) => BoolData::bytes(),
            Self::ResponseInformation(value) => value.bytes(),
            Self::ResponseTopic(value) => value.bytes(),
            Self::RetainAvailable(..) => BoolData::bytes(),
            Self::ServerKeepAlive(..) => U16Data::bytes(),
            Self::ServerReference(value) => value.bytes(),
            Self::SessionExpiryInterval(..) => U32Data::bytes(),
            Self::SharedSubscriptionAvailable(..) => BoolData::bytes(),
            Self::SubscriptionIdentifier(value) => value.bytes(),
            Self::SubscriptionIdentifierAvailable(..) => BoolData::bytes(),
            Self::TopicAlias(..) => U16Data::bytes(),
            Self::TopicAliasMaximum(..) => U16Data::bytes(),
            Self::UserProperty(value) => value.bytes(),
            Self::WildcardSubscriptionAvailable(..) => BoolData::bytes(),
            Self::WillDelayInterval(..) => U32Data::bytes(),
        };

        PropertyType::bytes() + value_bytes
    }

    /// Build a user property entry.
    ///
    /// # Errors
    ///
    /// Returns error if key or value is too long.
    pub fn user(key: &str, value: &str) -> Result<Self, EncodeError> {
        Ok(Self::UserProperty(StringPairData::new(key, value)?))
    }
}

impl Property {
    #[must_use]
    pub const fn default_receive_maximum() -> u16 {
        u16::MAX
    }

    #[must_use]
    pub const fn default_topic_alias_maximum() -> u16 {
        0
    }

    #[must_use]
    pub const fn default_request_response_information() -> bool {
        false
    }

    #[must_use]
    pub const fn default_request_problem_information() -> bool {
        true
    }

    #[must_use]
    pub const fn default_will_delay_interval() -> u32 {
        0
    }

    #[must_use]
    pub const fn default_maximum_qos() -> QoS {
        QoS::ExactOnce
    }

    #[must_use]
    pub const fn default_retain_available() -> bool {
        true
    }

    #[must_use]
    pub const fn default_wildcard_subscription_available() -> bool {
        true
    }

    #[must_use]
    pub const fn default_subscription_identifier_available() -> bool {
        true
    }

    #[must_use]
    pub const fn default_shared_subscription_available() -> bool {
        true
    }
}

impl DecodePacket for Property {
    #[allow(clippy::too_many_lines)]
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let property_type = PropertyType::try_from(reader.read_byte()?)?;
        match property_type {
            PropertyType::PayloadFormatIndicator => {
                Ok(Self::PayloadFormatIndicator(BoolData::decode(reader)?))
            }
            PropertyType::MessageExpiryInterval => {
                Ok(Self::MessageExpiryInterval(U32Data::decode(reader)?))
            }
            PropertyType::ContentType => Ok(Self::ContentType(StringData::decode(reader)?)),
            PropertyType::ResponseTopic => Ok(Self::ResponseTopic(PubTopic::decode(reader)?)),
            PropertyType::CorrelationData => {
                Ok(Self::CorrelationData(BinaryData::decode(reader)?))
            }
            PropertyType::SubscriptionIdentifier => {
                let id = VarInt::decode(reader)?;
                if id.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::SubscriptionIdentifier(id))
            }
            PropertyType::SessionExpiryInterval => {
                Ok(Self::SessionExpiryInterval(U32Data::decode(reader)?))
            }
            PropertyType::AssignedClientIdentifier => {
                let client_id = StringData::decode(reader)?;
                validate_client_id(client_id.as_ref())?;
                Ok(Self::AssignedClientIdentifier(client_id))
            }
            PropertyType::ServerKeepAlive => Ok(Self::ServerKeepAlive(U16Data::decode(reader)?)),
            PropertyType::AuthenticationMethod => {
                Ok(Self::AuthenticationMethod(StringData::decode(reader)?))
            }
            PropertyType::AuthenticationData => {
                Ok(Self::AuthenticationData(BinaryData::decode(reader)?))
            }
            PropertyType::RequestProblemInformation => {
                Ok(Self::RequestProblemInformation(BoolData::decode(reader)?))
            }
            PropertyType::WillDelayInterval => {
                Ok(Self::WillDelayInterval(U32Data::decode(reader)?))
            }
            PropertyType::RequestResponseInformation => Ok(Self::RequestResponseInformation(
                BoolData::decode(reader)?,
            )),
            PropertyType::ResponseInformation => {
                Ok(Self::ResponseInformation(StringData::decode(reader)?))
            }
            PropertyType::ServerReference => {
                Ok(Self::ServerReference(StringData::decode(reader)?))
            }
            PropertyType::ReasonString => Ok(Self::ReasonString(StringData::decode(reader)?)),
            PropertyType::ReceiveMaximum => {
                let max = U16Data::decode(reader)?;
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::ReceiveMaximum(max))
            }
            PropertyType::TopicAliasMaximum => {
                Ok(Self::TopicAliasMaximum(U16Data::decode(reader)?))
            }
            PropertyType::TopicAlias => {
                let alias = U16Data::decode(reader)?;
                if alias.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::TopicAlias(alias))
            }
            PropertyType::MaximumQoS => {
                let qos = QoS::decode(reader)?;
                if qos == QoS::ExactOnce {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumQoS(qos))
            }
            PropertyType::RetainAvailable => Ok(Self::RetainAvailable(BoolData::decode(reader)?)),
            PropertyType::UserProperty => Ok(Self::UserProperty(StringPairData::decode(reader)?)),
            PropertyType::MaximumPacketSize => {
                let max = U32Data::decode(reader)?;
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumPacketSize(max))
            }
            PropertyType::WildcardSubscriptionAvailable => Ok(Self::WildcardSubscriptionAvailable(
                BoolData::decode(reader)?,
            )),
            PropertyType::SubscriptionIdentifierAvailable => Ok(
                Self::SubscriptionIdentifierAvailable(BoolData::decode(reader)?),
            ),
            PropertyType::SharedSubscriptionAvailable => Ok(Self::SharedSubscriptionAvailable(
                BoolData::decode(reader)?,
            )),
        }
    }
}

impl EncodePacket for Property {
    #[allow(clippy::match_same_arms)]
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(self.property_type() as u8);
        let value_bytes = match self {
            Self::AssignedClientIdentifier(client_id) => client_id.encode(buf)?,
            Self::AuthenticationData(data) => data.encode(buf)?,
            Self::AuthenticationMethod(method) => method.encode(buf)?,
            Self::ContentType(content_type) => content_type.encode(buf)?,
            Self::CorrelationData(data) => data.encode(buf)?,
            Self::MaximumPacketSize(max) => max.encode(buf)?,
            Self::MaximumQoS(qos) => qos.encode(buf)?,
            Self::MessageExpiryInterval(interval) => interval.encode(buf)?,
            Self::PayloadFormatIndicator(on) => on.encode(buf)?,
            Self::ReasonString(reason) => reason.encode(buf)?,
            Self::ReceiveMaximum(max) => max.encode(buf)?,
            Self::RequestProblemInformation(on) => on.encode(buf)?,
            Self::RequestResponseInformation(on) => on.encode(buf)?,
            Self::ResponseInformation(info) => info.encode(buf)?,
            Self::ResponseTopic(topic) => topic.encode(buf)?,
            Self::RetainAvailable(available) => available.encode(buf)?,
            Self::ServerKeepAlive(keep_alive) => keep_alive.encode(buf)?,
            Self::ServerReference(reference) => reference.encode(buf)?,
            Self::SessionExpiryInterval(interval) => interval.encode(buf)?,
            Self::SharedSubscriptionAvailable(available) => available.encode(buf)?,
            Self::SubscriptionIdentifier(id) => id.encode(buf)?,
            Self::SubscriptionIdentifierAvailable(available) => available.encode(buf)?,
            Self::TopicAlias(alias) => alias.encode(buf)?,
            Self::TopicAliasMaximum(value) => value.encode(buf)?,
            Self::UserProperty(pair) => pair.encode(buf)?,
            Self::WildcardSubscriptionAvailable(available) => available.encode(buf)?,
            Self::WillDelayInterval(interval) => interval.encode(buf)?,
        };
        Ok(PropertyType::bytes() + value_bytes)
    }
}

/// Ordered property list, wire-framed by a var-int byte-length prefix.
///
/// Insertion order is preserved; user properties keep their relative
/// order across encode and decode.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl AsRef<[Property]> for Properties {
    fn as_ref(&self) -> &[Property] {
        &self.0
    }
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte length of the property entries, without the length prefix.
    fn payload_bytes(&self) -> usize {
        self.0.iter().map(Property::bytes).sum()
    }

    /// Get byte length in packet, length prefix included.
    ///
    /// # Panics
    ///
    /// Panics if the property section exceeds the var-int range; `push`
    /// prevents that for lists built through the public API.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let payload = self.payload_bytes();
        let len = VarInt::from(payload).unwrap();
        len.bytes() + payload
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get a reference to property list.
    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Append a property.
    ///
    /// # Errors
    ///
    /// Returns error if the section would exceed the var-int range.
    pub fn push(&mut self, property: Property) -> Result<(), EncodeError> {
        let _len = VarInt::from(self.payload_bytes() + property.bytes())?;
        self.0.push(property);
        Ok(())
    }

    fn get(&self, property_type: PropertyType) -> Option<&Property> {
        self.0.iter().find(|p| p.property_type() == property_type)
    }

    #[must_use]
    pub fn session_expiry_interval(&self) -> Option<u32> {
        match self.get(PropertyType::SessionExpiryInterval) {
            Some(Property::SessionExpiryInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn receive_maximum(&self) -> Option<u16> {
        match self.get(PropertyType::ReceiveMaximum) {
            Some(Property::ReceiveMaximum(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn maximum_packet_size(&self) -> Option<u32> {
        match self.get(PropertyType::MaximumPacketSize) {
            Some(Property::MaximumPacketSize(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn topic_alias_maximum(&self) -> Option<u16> {
        match self.get(PropertyType::TopicAliasMaximum) {
            Some(Property::TopicAliasMaximum(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        match self.get(PropertyType::TopicAlias) {
            Some(Property::TopicAlias(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn maximum_qos(&self) -> Option<QoS> {
        match self.get(PropertyType::MaximumQoS) {
            Some(Property::MaximumQoS(v)) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn retain_available(&self) -> Option<bool> {
        match self.get(PropertyType::RetainAvailable) {
            Some(Property::RetainAvailable(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn wildcard_subscription_available(&self) -> Option<bool> {
        match self.get(PropertyType::WildcardSubscriptionAvailable) {
            Some(Property::WildcardSubscriptionAvailable(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn subscription_identifiers_available(&self) -> Option<bool> {
        match self.get(PropertyType::SubscriptionIdentifierAvailable) {
            Some(Property::SubscriptionIdentifierAvailable(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn shared_subscription_available(&self) -> Option<bool> {
        match self.get(PropertyType::SharedSubscriptionAvailable) {
            Some(Property::SharedSubscriptionAvailable(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn assigned_client_identifier(&self) -> Option<&str> {
        match self.get(PropertyType::AssignedClientIdentifier) {
            Some(Property::AssignedClientIdentifier(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        match self.get(PropertyType::ServerKeepAlive) {
            Some(Property::ServerKeepAlive(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn server_reference(&self) -> Option<&str> {
        match self.get(PropertyType::ServerReference) {
            Some(Property::ServerReference(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn reason_string(&self) -> Option<&str> {
        match self.get(PropertyType::ReasonString) {
            Some(Property::ReasonString(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// All user properties in insertion order.
    #[must_use]
    pub fn user_properties(&self) -> Vec<(&str, &str)> {
        self.0
            .iter()
            .filter_map(|p| match p {
                Property::UserProperty(pair) => {
                    Some((pair.key().as_ref(), pair.value().as_ref()))
                }
                _ => None,
            })
            .collect()
    }
}

impl DecodePacket for Properties {
    fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let section_length = VarInt::decode(reader)?;
        let mut remaining = section_length.value();
        if remaining > reader.remaining() {
            return Err(DecodeError::OutOfRange);
        }

        let mut properties = Vec::new();
        while remaining > 0 {
            let property = Property::decode(reader)?;
            remaining = remaining
                .checked_sub(property.bytes())
                .ok_or(DecodeError::InvalidRemainingLength)?;
            if !REPEATABLE_PROPERTIES.contains(&property.property_type())
                && properties
                    .iter()
                    .any(|p: &Property| p.property_type() == property.property_type())
            {
                return Err(DecodeError::DuplicateProperty);
            }
            properties.push(property);
        }

        Ok(Self(properties))
    }
}

impl EncodePacket for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let payload = self.payload_bytes();
        let len = VarInt::from(payload)?;
        let mut bytes_written = len.encode(buf)?;
        for property in &self.0 {
            bytes_written += property.encode(buf)?;
        }
        Ok(bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut properties = Properties::new();
        properties
            .push(Property::SessionExpiryInterval(U32Data::new(600)))
            .unwrap();
        properties
            .push(Property::ReceiveMaximum(U16Data::new(16)))
            .unwrap();
        properties.push(Property::user("env", "prod").unwrap()).unwrap();
        properties.push(Property::user("env", "dev").unwrap()).unwrap();

        let mut buf = Vec::new();
        let written = properties.encode(&mut buf).unwrap();
        assert_eq!(written, properties.bytes());

        let mut reader = ByteReader::new(&buf);
        let decoded = Properties::decode(&mut reader).unwrap();
        assert_eq!(decoded, properties);
        assert_eq!(decoded.session_expiry_interval(), Some(600));
        assert_eq!(decoded.receive_maximum(), Some(16));
        assert_eq!(
            decoded.user_properties(),
            vec![("env", "prod"), ("env", "dev")]
        );
    }

    #[test]
    fn test_length_prefix_counts_bytes() {
        let mut properties = Properties::new();
        properties
            .push(Property::MaximumPacketSize(U32Data::new(1024)))
            .unwrap();
        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();
        // One identifier byte plus a four-byte integer.
        assert_eq!(buf[0], 5);
    }

    #[test]
    fn test_duplicate_non_repeatable_rejected() {
        let mut properties = Properties::new();
        properties
            .push(Property::ReceiveMaximum(U16Data::new(1)))
            .unwrap();
        properties
            .push(Property::ReceiveMaximum(U16Data::new(2)))
            .unwrap();
        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();

        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            Properties::decode(&mut reader),
            Err(DecodeError::DuplicateProperty)
        );
    }

    #[test]
    fn test_unknown_property_id_rejected() {
        // Section length 2, then unknown id 0x7f.
        let buf = [0x02, 0x7f, 0x00];
        let mut reader = ByteReader::new(&buf);
        assert_eq!(
            Properties::decode(&mut reader),
            Err(DecodeError::InvalidPropertyType)
        );
    }

    #[test]
    fn test_empty_section() {
        let buf = [0x00];
        let mut reader = ByteReader::new(&buf);
        let decoded = Properties::decode(&mut reader).unwrap();
        assert!(decoded.is_empty());
    }
}
