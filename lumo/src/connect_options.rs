// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::utils::random_string;
use codec::{
    BinaryData, ConnectPacket, Property, StringData, U16Data, U32Data, WillMessage,
};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// How the server certificate is validated.
#[derive(Clone, Debug)]
pub enum TlsType {
    /// Signed by a root CA from the system bundle, like `Let's Encrypt`.
    CASigned,

    /// Self-signed certificate chain; the root CA pem file is trusted
    /// explicitly.
    SelfSigned {
        root_ca_pem: PathBuf,
    },

    /// Accept any server certificate. Development only.
    Insecure,
}

/// Client certificate presented during the TLS handshake.
#[derive(Clone, Debug)]
pub struct ClientCert {
    pub cert_pem: PathBuf,
    pub key_pem: PathBuf,
}

#[derive(Clone, Debug, Default)]
pub struct MqttConnect {}

#[derive(Clone, Debug)]
pub struct MqttsConnect {
    /// Server name used for SNI and certificate validation.
    pub domain: String,
    pub tls_type: TlsType,
    pub client_cert: Option<ClientCert>,
}

/// Transport variants the client can dial.
#[derive(Clone, Debug)]
pub enum ConnectType {
    /// Raw TCP.
    Mqtt(MqttConnect),

    /// TLS over TCP.
    Mqtts(MqttsConnect),
}

/// Everything the client needs to establish and maintain a connection.
///
/// Setters follow the builder-by-mutation style; every field has a
/// usable default except the broker address.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    host: String,
    port: u16,
    connect_type: ConnectType,
    client_id: String,
    clean_start: bool,
    keep_alive: Duration,
    connect_timeout: Duration,
    response_timeout: Duration,
    session_expiry_interval: Option<u32>,
    receive_maximum: Option<u16>,
    maximum_packet_size: Option<u32>,
    topic_alias_maximum: Option<u16>,
    request_response_information: Option<bool>,
    request_problem_information: Option<bool>,
    username: Option<String>,
    password: Option<Vec<u8>>,
    will: Option<WillMessage>,
    user_properties: Vec<(String, String)>,
    authentication_method: Option<String>,
    authentication_data: Option<Vec<u8>>,
    automatic_reconnect: bool,
    reconnect_base_delay: Duration,
    reconnect_max_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            connect_type: ConnectType::Mqtt(MqttConnect {}),
            client_id: format!("lumo-{}", random_string(8)),
            clean_start: true,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(30),
            session_expiry_interval: None,
            receive_maximum: None,
            maximum_packet_size: None,
            topic_alias_maximum: None,
            request_response_information: None,
            request_problem_information: None,
            username: None,
            password: None,
            will: None,
            user_properties: Vec::new(),
            authentication_method: None,
            authentication_data: None,
            automatic_reconnect: false,
            reconnect_base_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(60),
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn set_connect_type(&mut self, connect_type: ConnectType) -> &mut Self {
        self.connect_type = connect_type;
        self
    }

    #[must_use]
    pub const fn connect_type(&self) -> &ConnectType {
        &self.connect_type
    }

    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_clean_start(&mut self, clean_start: bool) -> &mut Self {
        self.clean_start = clean_start;
        self
    }

    #[must_use]
    pub const fn clean_start(&self) -> bool {
        self.clean_start
    }

    /// Keep-alive interval; zero disables the mechanism on both ends.
    pub fn set_keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) -> &mut Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Window within which an expected acknowledgement must arrive.
    pub fn set_response_timeout(&mut self, response_timeout: Duration) -> &mut Self {
        self.response_timeout = response_timeout;
        self
    }

    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn set_session_expiry_interval(&mut self, seconds: Option<u32>) -> &mut Self {
        self.session_expiry_interval = seconds;
        self
    }

    pub fn set_receive_maximum(&mut self, receive_maximum: Option<u16>) -> &mut Self {
        self.receive_maximum = receive_maximum;
        self
    }

    pub fn set_maximum_packet_size(&mut self, bytes: Option<u32>) -> &mut Self {
        self.maximum_packet_size = bytes;
        self
    }

    pub fn set_topic_alias_maximum(&mut self, maximum: Option<u16>) -> &mut Self {
        self.topic_alias_maximum = maximum;
        self
    }

    pub fn set_request_response_information(&mut self, on: Option<bool>) -> &mut Self {
        self.request_response_information = on;
        self
    }

    pub fn set_request_problem_information(&mut self, on: Option<bool>) -> &mut Self {
        self.request_problem_information = on;
        self
    }

    pub fn set_credentials(&mut self, username: &str, password: &[u8]) -> &mut Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_vec());
        self
    }

    pub fn set_will(&mut self, will: Option<WillMessage>) -> &mut Self {
        self.will = will;
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&WillMessage> {
        self.will.as_ref()
    }

    pub fn add_user_property(&mut self, key: &str, value: &str) -> &mut Self {
        self.user_properties.push((key.to_string(), value.to_string()));
        self
    }

    pub fn set_authentication(&mut self, method: &str, data: Option<&[u8]>) -> &mut Self {
        self.authentication_method = Some(method.to_string());
        self.authentication_data = data.map(<[u8]>::to_vec);
        self
    }

    pub fn set_automatic_reconnect(&mut self, on: bool) -> &mut Self {
        self.automatic_reconnect = on;
        self
    }

    #[must_use]
    pub const fn automatic_reconnect(&self) -> bool {
        self.automatic_reconnect
    }

    pub fn set_reconnect_delays(&mut self, base: Duration, max: Duration) -> &mut Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max;
        self
    }

    #[must_use]
    pub const fn reconnect_base_delay(&self) -> Duration {
        self.reconnect_base_delay
    }

    #[must_use]
    pub const fn reconnect_max_delay(&self) -> Duration {
        self.reconnect_max_delay
    }

    /// Build the CONNECT packet for one connection attempt.
    ///
    /// Reconnect attempts pass `clean_start = false` so the broker keeps
    /// the session when it can.
    ///
    /// # Errors
    ///
    /// Returns error if an option cannot be represented on the wire.
    pub fn to_connect_packet(&self, clean_start: bool) -> Result<ConnectPacket, Error> {
        let mut packet = ConnectPacket::new(&self.client_id)?;
        packet.set_clean_start(clean_start);
        #[allow(clippy::cast_possible_truncation)]
        packet.set_keep_alive(self.keep_alive.as_secs().min(u64::from(u16::MAX)) as u16);
        packet.set_will(self.will.clone());
        packet.set_credentials(self.username.as_deref(), self.password.as_deref())?;

        let properties = packet.properties_mut();
        if let Some(seconds) = self.session_expiry_interval {
            properties.push(Property::SessionExpiryInterval(U32Data::new(seconds)))?;
        }
        if let Some(maximum) = self.receive_maximum {
            properties.push(Property::ReceiveMaximum(U16Data::new(maximum)))?;
        }
        if let Some(bytes) = self.maximum_packet_size {
            properties.push(Property::MaximumPacketSize(U32Data::new(bytes)))?;
        }
        if let Some(maximum) = self.topic_alias_maximum {
            properties.push(Property::TopicAliasMaximum(U16Data::new(maximum)))?;
        }
        if let Some(on) = self.request_response_information {
            properties.push(Property::RequestResponseInformation(codec::BoolData::new(
                on,
            )))?;
        }
        if let Some(on) = self.request_problem_information {
            properties.push(Property::RequestProblemInformation(codec::BoolData::new(
                on,
            )))?;
        }
        if let Some(method) = &self.authentication_method {
            properties.push(Property::AuthenticationMethod(
                StringData::from(method).map_err(codec::EncodeError::from)?,
            ))?;
        }
        if let Some(data) = &self.authentication_data {
            properties.push(Property::AuthenticationData(BinaryData::from_slice(data)?))?;
        }
        for (key, value) in &self.user_properties {
            properties.push(Property::user(key, value)?)?;
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectOptions::default();
        assert!(options.client_id().starts_with("lumo-"));
        assert!(options.clean_start());
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(!options.automatic_reconnect());
    }

    #[test]
    fn test_to_connect_packet() {
        let mut options = ConnectOptions::new("broker.example", 8883);
        options
            .set_client_id("c1")
            .set_keep_alive(Duration::from_secs(30))
            .set_session_expiry_interval(Some(300))
            .set_receive_maximum(Some(8))
            .set_credentials("user", b"pass");

        let packet = options.to_connect_packet(false).unwrap();
        assert_eq!(packet.client_id(), "c1");
        assert!(!packet.clean_start());
        assert_eq!(packet.keep_alive(), 30);
        assert_eq!(packet.properties().session_expiry_interval(), Some(300));
        assert_eq!(packet.properties().receive_maximum(), Some(8));
        assert_eq!(packet.username(), Some("user"));
    }
}
