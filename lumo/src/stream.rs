// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{
    Certificate, ClientConfig, OwnedTrustAnchor, PrivateKey, RootCertStore, ServerName,
};
use tokio_rustls::TlsConnector;

use crate::connect_options::{ClientCert, ConnectType, MqttsConnect, TlsType};
use crate::error::{Error, ErrorKind};

/// Duplex byte stream to the broker, TCP or TLS over TCP.
///
/// The reader and writer tasks each own one half after
/// [`tokio::io::split`]; nothing else touches the socket.
pub enum Stream {
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
}

/// Certificate verifier for the accept-invalid-certificates development
/// mode.
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)?;
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &Path) -> Result<PrivateKey, Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)?;
    keys.pop().map(PrivateKey).ok_or_else(|| {
        Error::from_string(
            ErrorKind::Transport,
            format!("no pkcs8 private key in {}", path.display()),
        )
    })
}

fn system_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));
    roots
}

fn tls_config(mqtts: &MqttsConnect) -> Result<ClientConfig, Error> {
    let builder = ClientConfig::builder().with_safe_defaults();

    let builder = match &mqtts.tls_type {
        TlsType::CASigned => builder.with_root_certificates(system_roots()),
        TlsType::SelfSigned { root_ca_pem } => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(root_ca_pem)? {
                roots.add(&cert).map_err(|err| {
                    Error::from_string(
                        ErrorKind::Transport,
                        format!("bad root certificate: {err}"),
                    )
                })?;
            }
            builder.with_root_certificates(roots)
        }
        // The verifier is replaced below; the store is never consulted.
        TlsType::Insecure => builder.with_root_certificates(RootCertStore::empty()),
    };

    let mut config = match &mqtts.client_cert {
        Some(ClientCert { cert_pem, key_pem }) => {
            let certs = load_certs(cert_pem)?;
            let key = load_private_key(key_pem)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|err| {
                    Error::from_string(
                        ErrorKind::Transport,
                        format!("bad client certificate: {err}"),
                    )
                })?
        }
        None => builder.with_no_client_auth(),
    };

    if matches!(mqtts.tls_type, TlsType::Insecure) {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyServerCert));
    }
    Ok(config)
}

impl Stream {
    /// Open a transport to `address` using the configured variant.
    ///
    /// # Errors
    ///
    /// Returns error on socket or TLS handshake failure.
    pub async fn connect(address: &str, connect_type: &ConnectType) -> Result<Self, Error> {
        match connect_type {
            ConnectType::Mqtt(_) => {
                let socket = TcpStream::connect(address).await?;
                socket.set_nodelay(true)?;
                Ok(Self::Mqtt(socket))
            }
            ConnectType::Mqtts(mqtts) => {
                let config = tls_config(mqtts)?;
                let connector = TlsConnector::from(Arc::new(config));
                let domain = ServerName::try_from(mqtts.domain.as_str()).map_err(|err| {
                    Error::from_string(
                        ErrorKind::Transport,
                        format!("invalid server name {}: {err}", mqtts.domain),
                    )
                })?;

                let socket = TcpStream::connect(address).await?;
                socket.set_nodelay(true)?;
                let tls_socket = connector.connect(domain, socket).await?;
                Ok(Self::Mqtts(Box::new(tls_socket)))
            }
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Mqtt(socket) => Pin::new(socket).poll_read(cx, buf),
            Self::Mqtts(tls_socket) => Pin::new(tls_socket.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Mqtt(socket) => Pin::new(socket).poll_write(cx, buf),
            Self::Mqtts(tls_socket) => Pin::new(tls_socket.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Mqtt(socket) => Pin::new(socket).poll_flush(cx),
            Self::Mqtts(tls_socket) => Pin::new(tls_socket.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Mqtt(socket) => Pin::new(socket).poll_shutdown(cx),
            Self::Mqtts(tls_socket) => Pin::new(tls_socket.as_mut()).poll_shutdown(cx),
        }
    }
}
