// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{Packet, ReasonCode};
use tokio::sync::oneshot;

use crate::client::ConnectResult;
use crate::error::Error;

/// Requests from the facade to the connection task.
#[derive(Debug)]
pub enum ConnectionCmd {
    /// User-initiated disconnect; terminal, auto-reconnect is skipped.
    Disconnect {
        reason: ReasonCode,
        reply: oneshot::Sender<Result<(), Error>>,
    },
}

/// Signals raised by the per-connection tasks toward the connection
/// task's dispatch loop.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Reader framed one inbound packet.
    PacketReceived(Packet),

    /// Reader or writer hit a fatal transport error or EOF.
    TransportFailed(Error),

    /// Reader framed bytes that do not form a legal packet.
    MalformedPacket(Error),

    /// Keep-alive missed its PINGRESP grace window.
    PingTimeout,
}

/// Resolves the facade's connect call with the first attempt's outcome.
pub type ConnectReply = oneshot::Sender<Result<ConnectResult, Error>>;
