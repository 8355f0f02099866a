// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Asynchronous MQTT 5.0 client library built on tokio.
//!
//! The [`AsyncClient`] facade drives connect, subscribe, publish,
//! unsubscribe and disconnect requests over a single broker connection,
//! while a connection task owns the transport, demultiplexes inbound
//! packets and reconnects with backoff when the link drops.

pub mod cancel;
pub mod client;
mod commands;
pub mod connect_options;
mod connection;
pub mod error;
pub mod events;
mod inflight;
mod keep_alive;
mod packet_id;
mod reconnect;
pub mod session_state;
pub mod status;
pub mod stream;
pub mod subscription;

pub use cancel::{CancelToken, Canceller};
pub use client::{
    AsyncClient, ConnectResult, PublishResult, SubscribeResult, UnsubscribeResult,
};
pub use connect_options::{ConnectOptions, ConnectType, MqttConnect, MqttsConnect, TlsType};
pub use error::{Error, ErrorKind};
pub use events::{EventSink, LogEventSink, MessageHandler, NullEventSink, ObserverId};
pub use session_state::ServerCapabilities;
pub use status::ConnectionState;
pub use subscription::AddOutcome;

// The codec crate is part of the public API surface: packets, QoS and
// reason codes appear in requests and results.
pub use codec;
