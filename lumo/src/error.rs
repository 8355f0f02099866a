// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::ReasonCode;
use std::fmt::{self, Display};
use std::io;
use tokio::sync::{mpsc, oneshot};

use crate::commands::{ConnectionCmd, ConnectionEvent};

/// Represent the types of errors surfaced by client operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket or TLS failure; recoverable through reconnect.
    Transport,

    /// No connection is currently established.
    NotConnected,

    /// An expected packet did not arrive within the configured window.
    Timeout,

    /// Structurally invalid packet on the wire.
    MalformedPacket,

    /// Structurally valid but semantically illegal packet sequence.
    ProtocolError,

    /// CONNACK carried a non-success reason code.
    ConnectRejected(ReasonCode),

    /// The broker advertised the requested feature as unsupported; the
    /// request never went on the wire.
    CapabilityViolation,

    /// All 65,535 packet identifiers are in use.
    IdentifierExhausted,

    /// The operation's cancellation signal fired.
    Cancelled,

    /// The user called disconnect; terminal for this client.
    DisconnectedByUser,

    /// Reconnect succeeded but the broker kept no session state.
    SessionLost,

    /// Packet encode error.
    Encode,

    /// mpsc/oneshot channel error.
    Channel,
}

/// Error type carrying a kind plus a detail message.
#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::Transport, format!("IoError {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::Encode, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Self::from_string(ErrorKind::MalformedPacket, format!("{err:?}"))
    }
}

impl From<oneshot::error::RecvError> for Error {
    fn from(err: oneshot::error::RecvError) -> Self {
        Self::from_string(ErrorKind::Channel, format!("oneshot closed: {err}"))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorKind::Timeout, "operation timed out")
    }
}

macro_rules! convert_send_error {
    ($cmd_type: ident) => {
        impl From<mpsc::error::SendError<$cmd_type>> for Error {
            fn from(err: mpsc::error::SendError<$cmd_type>) -> Self {
                Self::from_string(
                    ErrorKind::Channel,
                    format!("{} channel error: {}", stringify!($cmd_type), err),
                )
            }
        }
    };
}

convert_send_error!(ConnectionCmd);
convert_send_error!(ConnectionEvent);

impl From<mpsc::error::SendError<codec::Packet>> for Error {
    fn from(err: mpsc::error::SendError<codec::Packet>) -> Self {
        Self::from_string(ErrorKind::Channel, format!("packet channel error: {err}"))
    }
}
