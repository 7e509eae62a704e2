//! Received datagram and sender metadata.

use std::net::SocketAddr;

/// Metadata about the sender of a received datagram.
///
/// Mirrors the address tuple reported by the OS. No reverse DNS lookup is
/// performed; `hostname` carries the same text as `ip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    /// Protocol family of the sender address (`"AF_INET"` or `"AF_INET6"`).
    pub family: &'static str,
    /// Sender port.
    pub port: u16,
    /// Sender host name (identical to `ip`, see above).
    pub hostname: String,
    /// Sender IP address in text form.
    pub ip: String,
}

impl From<SocketAddr> for SenderInfo {
    fn from(addr: SocketAddr) -> Self {
        let family = match addr {
            SocketAddr::V4(_) => "AF_INET",
            SocketAddr::V6(_) => "AF_INET6",
        };
        let ip = addr.ip().to_string();

        Self {
            family,
            port: addr.port(),
            hostname: ip.clone(),
            ip,
        }
    }
}

/// One datagram received during a listening window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Who sent it.
    pub sender: SenderInfo,
}

impl ReceivedMessage {
    pub(crate) fn new(payload: &[u8], from: SocketAddr) -> Self {
        Self {
            payload: payload.to_vec(),
            sender: SenderInfo::from(from),
        }
    }

    /// The payload interpreted as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
