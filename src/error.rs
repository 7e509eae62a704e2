//! Error types for multicast endpoint operations.

use std::io;

use thiserror::Error;

/// Errors that can occur during multicast operations.
#[derive(Debug, Error)]
pub enum MulticastError {
    /// Underlying socket I/O failed (creation, option, bind, send, receive).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The configured group address could not be parsed as an IPv4 address.
    #[error("invalid multicast address: {0}")]
    BadAddress(String),

    /// The transport is already configured and in use; socket options and
    /// transport injection are only valid before first use.
    #[error("transport already active")]
    TransportActive,

    /// A caller-supplied argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
