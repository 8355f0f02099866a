// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{ConnectAckPacket, Property, QoS};

/// Capabilities the broker advertised in CONNACK.
///
/// Absent properties fall back to the protocol defaults, notably a
/// Receive Maximum of 65,535.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub receive_maximum: u16,
    pub maximum_qos: QoS,
    pub retain_available: bool,
    pub maximum_packet_size: Option<u32>,
    pub topic_alias_maximum: u16,
    pub wildcard_subscription_available: bool,
    pub subscription_identifiers_available: bool,
    pub shared_subscription_available: bool,
    pub server_keep_alive: Option<u16>,
    pub session_expiry_interval: Option<u32>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            receive_maximum: Property::default_receive_maximum(),
            maximum_qos: Property::default_maximum_qos(),
            retain_available: Property::default_retain_available(),
            maximum_packet_size: None,
            topic_alias_maximum: Property::default_topic_alias_maximum(),
            wildcard_subscription_available: Property::default_wildcard_subscription_available(),
            subscription_identifiers_available:
                Property::default_subscription_identifier_available(),
            shared_subscription_available: Property::default_shared_subscription_available(),
            server_keep_alive: None,
            session_expiry_interval: None,
        }
    }
}

impl ServerCapabilities {
    /// Build the capability cache from a CONNACK packet.
    #[must_use]
    pub fn from_connect_ack(ack: &ConnectAckPacket) -> Self {
        let properties = ack.properties();
        Self {
            receive_maximum: properties
                .receive_maximum()
                .unwrap_or_else(Property::default_receive_maximum),
            maximum_qos: properties
                .maximum_qos()
                .unwrap_or_else(Property::default_maximum_qos),
            retain_available: properties
                .retain_available()
                .unwrap_or_else(Property::default_retain_available),
            maximum_packet_size: properties.maximum_packet_size(),
            topic_alias_maximum: properties
                .topic_alias_maximum()
                .unwrap_or_else(Property::default_topic_alias_maximum),
            wildcard_subscription_available: properties
                .wildcard_subscription_available()
                .unwrap_or_else(Property::default_wildcard_subscription_available),
            subscription_identifiers_available: properties
                .subscription_identifiers_available()
                .unwrap_or_else(Property::default_subscription_identifier_available),
            shared_subscription_available: properties
                .shared_subscription_available()
                .unwrap_or_else(Property::default_shared_subscription_available),
            server_keep_alive: properties.server_keep_alive(),
            session_expiry_interval: properties.session_expiry_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{ReasonCode, U16Data};

    #[test]
    fn test_defaults() {
        let caps = ServerCapabilities::default();
        assert_eq!(caps.receive_maximum, 65_535);
        assert_eq!(caps.maximum_qos, QoS::ExactOnce);
        assert!(caps.retain_available);
        assert_eq!(caps.topic_alias_maximum, 0);
        assert!(caps.wildcard_subscription_available);
    }

    #[test]
    fn test_from_connect_ack() {
        let mut ack = ConnectAckPacket::new(false, ReasonCode::Success);
        ack.properties_mut()
            .push(Property::ReceiveMaximum(U16Data::new(3)))
            .unwrap();
        ack.properties_mut()
            .push(Property::ServerKeepAlive(U16Data::new(25)))
            .unwrap();

        let caps = ServerCapabilities::from_connect_ack(&ack);
        assert_eq!(caps.receive_maximum, 3);
        assert_eq!(caps.server_keep_alive, Some(25));
        assert!(caps.shared_subscription_available);
    }
}
