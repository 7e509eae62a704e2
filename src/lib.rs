//! A minimal abstraction over UDP multicast group membership, send, and
//! timed receive.
//!
//! [`MulticastEndpoint`] joins a multicast group lazily on first use,
//! broadcasts datagrams to it, and collects whatever arrives within a fixed
//! window, either as a batch ([`MulticastEndpoint::receive_all`]) or
//! streamed through a per-message callback
//! ([`MulticastEndpoint::receive_each`]).
//!
//! The underlying socket sits behind the [`Transport`] trait so tests can
//! substitute an in-memory double for the real network.

mod endpoint;
mod error;
mod message;
mod transport;

pub use endpoint::{
    DEFAULT_MAX_DATAGRAM, DEFAULT_MULTICAST_ADDRESS, DEFAULT_WINDOW, LOCAL_ADDRESS,
    MulticastEndpoint,
};
pub use error::MulticastError;
pub use message::{ReceivedMessage, SenderInfo};
pub use transport::{SocketOption, Transport, UdpTransport};
