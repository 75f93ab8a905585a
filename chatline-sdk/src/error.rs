//! Error taxonomy for the client.

use std::time::Duration;

use thiserror::Error;

use crate::event::EventKind;

/// Errors surfaced by the client, the event bus and the line codec.
#[derive(Debug, Error)]
pub enum Error {
    /// A required credential was missing when `connect` was called.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A line on the wire was not valid UTF-8 or exceeded the length limit.
    #[error("framing error: {0}")]
    Framing(String),

    /// An outbound command contained CR, LF or NUL and would not fit on one
    /// line.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A line matched none of the known grammars.
    #[error("unrecognized line: {0}")]
    Parse(String),

    /// A wait, accumulation or handshake deadline elapsed.
    #[error("timed out after {timeout:?} waiting for {kind:?}")]
    Timeout { kind: EventKind, timeout: Duration },

    /// The connection was closed before or while the operation ran.
    #[error("connection closed")]
    ConnectionClosed,

    /// `connect` was called on a client that is not disconnected.
    #[error("client is already connected")]
    AlreadyConnected,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
