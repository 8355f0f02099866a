// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! A scripted in-process broker for end-to-end client tests.
//!
//! Each test drives the exact packet sequence it expects, so protocol
//! deviations fail loudly instead of hanging.

#![allow(dead_code)]

use codec::{
    check_frame, ByteReader, ConnectAckPacket, ConnectPacket, DecodePacket, EncodePacket,
    FrameState, Packet, ReasonCode,
};
use lumo::ConnectOptions;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Route client log output through the test harness; safe to call from
/// every test.
pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct MockBroker {
    listener: TcpListener,
}

impl MockBroker {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    pub async fn accept(&self) -> BrokerSession {
        let (socket, _addr) = self.listener.accept().await.unwrap();
        socket.set_nodelay(true).unwrap();
        BrokerSession {
            socket,
            buf: Vec::new(),
        }
    }
}

pub struct BrokerSession {
    socket: TcpStream,
    buf: Vec<u8>,
}

impl BrokerSession {
    /// Read exactly one control packet.
    pub async fn read_packet(&mut self) -> Packet {
        loop {
            if let FrameState::Complete { total } = check_frame(&self.buf).unwrap() {
                let mut reader = ByteReader::new(&self.buf[..total]);
                let packet = Packet::decode(&mut reader).unwrap();
                self.buf.drain(..total);
                return packet;
            }
            let mut chunk = [0_u8; 4096];
            let n = self.socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed the connection mid-script");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read one packet if it arrives within `window`.
    pub async fn try_read_packet(&mut self, window: Duration) -> Option<Packet> {
        tokio::time::timeout(window, self.read_packet()).await.ok()
    }

    pub async fn send(&mut self, packet: impl Into<Packet>) {
        let packet = packet.into();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        self.socket.write_all(&buf).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.socket.write_all(bytes).await.unwrap();
    }

    pub async fn expect_connect(&mut self) -> ConnectPacket {
        match self.read_packet().await {
            Packet::Connect(connect) => connect,
            other => panic!("expected CONNECT, got {other:?}"),
        }
    }

    /// CONNECT/CONNACK exchange with a success reason code.
    pub async fn handshake(&mut self, session_present: bool) -> ConnectPacket {
        self.handshake_with(ConnectAckPacket::new(session_present, ReasonCode::Success))
            .await
    }

    pub async fn handshake_with(&mut self, ack: ConnectAckPacket) -> ConnectPacket {
        let connect = self.expect_connect().await;
        self.send(ack).await;
        connect
    }
}

/// Options pointed at the mock broker, with timeouts tight enough for
/// tests.
pub fn test_options(port: u16) -> ConnectOptions {
    let mut options = ConnectOptions::new("127.0.0.1", port);
    options
        .set_client_id("lumo-test")
        .set_keep_alive(Duration::ZERO)
        .set_connect_timeout(Duration::from_secs(5))
        .set_response_timeout(Duration::from_secs(5));
    options
}
