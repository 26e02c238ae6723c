//! Error types for the broker core.
//!
//! Every fallible boundary gets its own `thiserror` enum rather than a bare
//! `String`, following the shape used throughout the example pack (compare
//! `SmppError` in the SMPP client crate, or `BrokerError` in the clippy
//! broker daemon).

use thiserror::Error;

/// Errors produced while parsing or serializing a single STOMP frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The input ended before a complete frame (command + headers + body +
    /// NUL) could be read.
    #[error("incomplete frame")]
    IncompleteFrame,

    /// A `content-length` was given but the byte at that offset was not the
    /// terminating NUL.
    #[error("frame body not terminated with NUL")]
    BodyNotTerminated,

    /// No bytes were available to parse at all.
    #[error("empty buffer")]
    EmptyBuffer,

    /// The command line did not name one of the recognized STOMP commands.
    #[error("unrecognized STOMP command: {0}")]
    UnknownCommand(String),
}

/// Errors raised by the protocol state machine while dispatching a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Not connected, send CONNECT frame first")]
    NotConnected,

    #[error("missing 'destination' header")]
    MissingDestination,

    #[error("missing 'id' header")]
    MissingSubscriptionId,

    #[error("unrecognized STOMP command: {0}")]
    UnknownCommand(String),

    #[error("no protocol version specified, specify 'accept-version' header")]
    MissingAcceptVersion,

    #[error("supported protocol versions are 1.2")]
    UnsupportedVersion,

    /// A recognized but server-only command (CONNECTED, MESSAGE, ERROR,
    /// RECEIPT) was sent by a client; there is no handler for it.
    #[error("no handler for command: {0}")]
    NoHandlerForCommand(String),
}

/// Authentication failures. Kept distinct from [`ProtocolError`] so the
/// engine can decide independently whether the session may retry CONNECT.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("token is missing in the headers")]
    TokenMissing,

    #[error("authentication from token failed")]
    Rejected,
}

/// Error type for [`tokio_util::codec`]'s `Decoder`/`Encoder` impls, which
/// must be convertible from `std::io::Error`.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The union of everything that can go wrong while routing one frame.
///
/// This is the type the protocol engine's per-handler error boundary
/// converts into an ERROR frame sent back to the client (spec §7).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The transport reported EOF or a similar unrecoverable condition.
    /// Not sent to the client as an ERROR frame — it tears the session down.
    #[error("client disconnected")]
    ClientDisconnected,

    /// A downstream store or scheduler failed in a way that should be
    /// surfaced to the sending client but does not bring down the broker.
    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Other(String),
}
