//! Socket transport seam.
//!
//! [`Transport`] is the boundary between the endpoint logic and the actual
//! network. Production code uses [`UdpTransport`], which configures a raw
//! `socket2` socket and promotes it to a `tokio` socket on first I/O; tests
//! substitute [`mock::MockTransport`] to record calls and replay canned
//! datagrams.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::MulticastError;

/// A socket option applied while the transport is still unconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// Join a multicast group on the given local interface.
    JoinGroup {
        group: Ipv4Addr,
        interface: Ipv4Addr,
    },
    /// Outbound multicast TTL (hop limit).
    MulticastTtl(u32),
    /// Allow several sockets on this host to share the local address/port.
    ReuseAddress,
}

impl SocketOption {
    /// Wire payload of the join-group option: group address followed by
    /// interface address, both in network byte order. `None` for other
    /// options.
    pub fn join_payload(&self) -> Option<[u8; 8]> {
        match self {
            Self::JoinGroup { group, interface } => {
                let mut buf = [0u8; 8];
                buf[..4].copy_from_slice(&group.octets());
                buf[4..].copy_from_slice(&interface.octets());
                Some(buf)
            }
            _ => None,
        }
    }
}

/// Byte I/O and configuration surface of a UDP socket.
///
/// Option setting and binding happen before the first read or write; once
/// the socket is active, [`Transport::set_option`] is rejected and
/// [`Transport::bind`] becomes a no-op. Reads block until a datagram
/// arrives; the timed-receive window cancels a pending read from outside
/// by aborting the task that issued it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Apply a socket option. Only valid before first I/O.
    fn set_option(&self, option: SocketOption) -> Result<(), MulticastError>;

    /// Bind the socket to a local address. Idempotent: a second call on an
    /// already-bound transport is a no-op.
    fn bind(&self, addr: SocketAddrV4) -> Result<(), MulticastError>;

    /// Send one datagram, returning the number of bytes written.
    async fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> Result<usize, MulticastError>;

    /// Receive one datagram into `buf`, returning its length and sender.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), MulticastError>;
}

enum SocketState {
    /// Raw socket, still accepting options and bind.
    Raw(Socket),
    /// Registered with the tokio runtime; configuration is frozen.
    Ready(Arc<UdpSocket>),
    /// A promotion attempt failed and consumed the socket.
    Unavailable,
}

struct Inner {
    socket: SocketState,
    bound: bool,
}

/// Production transport backed by a real UDP socket.
///
/// Created raw so that options and bind can be applied in whatever order
/// the endpoint needs; converted to a non-blocking `tokio::net::UdpSocket`
/// the first time a send or receive happens.
pub struct UdpTransport {
    inner: Mutex<Inner>,
}

impl UdpTransport {
    /// Create the raw socket. No options are applied and nothing is bound.
    pub fn new() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        Ok(Self {
            inner: Mutex::new(Inner {
                socket: SocketState::Raw(socket),
                bound: false,
            }),
        })
    }

    fn unavailable() -> MulticastError {
        MulticastError::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "socket unavailable",
        ))
    }

    /// Promote the raw socket to a runtime-registered one, memoizing the
    /// result. Must be called from within a tokio runtime.
    fn socket(&self) -> Result<Arc<UdpSocket>, MulticastError> {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.socket, SocketState::Unavailable) {
            SocketState::Ready(socket) => {
                inner.socket = SocketState::Ready(socket.clone());
                Ok(socket)
            }
            SocketState::Raw(raw) => {
                // On failure the state stays Unavailable and later calls
                // surface a NotConnected error.
                raw.set_nonblocking(true)?;
                let socket = Arc::new(UdpSocket::from_std(raw.into())?);
                inner.socket = SocketState::Ready(socket.clone());
                Ok(socket)
            }
            SocketState::Unavailable => Err(Self::unavailable()),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn set_option(&self, option: SocketOption) -> Result<(), MulticastError> {
        let inner = self.inner.lock();
        let SocketState::Raw(socket) = &inner.socket else {
            return Err(MulticastError::TransportActive);
        };

        match option {
            SocketOption::JoinGroup { group, interface } => {
                socket.join_multicast_v4(&group, &interface)?
            }
            SocketOption::MulticastTtl(ttl) => socket.set_multicast_ttl_v4(ttl)?,
            SocketOption::ReuseAddress => {
                socket.set_reuse_address(true)?;
                #[cfg(unix)]
                socket.set_reuse_port(true)?;
            }
        }
        Ok(())
    }

    fn bind(&self, addr: SocketAddrV4) -> Result<(), MulticastError> {
        let mut inner = self.inner.lock();
        if inner.bound {
            return Ok(());
        }

        match &inner.socket {
            SocketState::Raw(socket) => {
                socket.bind(&SockAddr::from(addr))?;
                inner.bound = true;
                Ok(())
            }
            // Promoted without an explicit bind: the OS already picked an
            // ephemeral address and rebinding is not possible. Treated as
            // bound so the receive path can proceed.
            SocketState::Ready(_) => {
                inner.bound = true;
                Ok(())
            }
            SocketState::Unavailable => Err(Self::unavailable()),
        }
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> Result<usize, MulticastError> {
        let socket = self.socket()?;
        Ok(socket.send_to(buf, SocketAddr::V4(addr)).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), MulticastError> {
        let socket = self.socket()?;
        Ok(socket.recv_from(buf).await?)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_payload_layout() {
        let option = SocketOption::JoinGroup {
            group: Ipv4Addr::new(224, 0, 0, 1),
            interface: Ipv4Addr::UNSPECIFIED,
        };
        assert_eq!(option.join_payload(), Some([224, 0, 0, 1, 0, 0, 0, 0]));
    }

    #[test]
    fn test_join_payload_only_for_join() {
        assert_eq!(SocketOption::MulticastTtl(1).join_payload(), None);
        assert_eq!(SocketOption::ReuseAddress.join_payload(), None);
    }

    #[test]
    fn test_raw_socket_accepts_options_and_bind() {
        let transport = UdpTransport::new().unwrap();
        transport
            .set_option(SocketOption::MulticastTtl(1))
            .unwrap();
        transport.set_option(SocketOption::ReuseAddress).unwrap();

        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        transport.bind(addr).unwrap();
        // Second bind is a guarded no-op.
        transport.bind(addr).unwrap();
    }

    #[tokio::test]
    async fn test_options_rejected_after_promotion() {
        let transport = UdpTransport::new().unwrap();
        transport.bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();

        let sent = transport
            .send_to(b"x", SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1))
            .await;
        // The send itself may be refused by the OS; promotion happens
        // regardless.
        let _ = sent;

        let err = transport
            .set_option(SocketOption::MulticastTtl(1))
            .unwrap_err();
        assert!(matches!(err, MulticastError::TransportActive));
    }
}
