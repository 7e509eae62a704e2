//! Multicast endpoint: lazy group join, datagram send, timed receive.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::MulticastError;
use crate::message::ReceivedMessage;
use crate::transport::{SocketOption, Transport, UdpTransport};

/// Default multicast group address.
pub const DEFAULT_MULTICAST_ADDRESS: &str = "224.0.0.1";

/// Local address used both for receiving and as the group-join interface.
pub const LOCAL_ADDRESS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Default maximum datagram size accepted by a receive window.
pub const DEFAULT_MAX_DATAGRAM: usize = 65536;

/// Default receive window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Aborts the receive worker when the window exits, whatever the path:
/// normal expiry, an error, or the caller dropping the receive future
/// mid-window. A worker left behind would keep reading the shared socket
/// and steal datagrams from later windows on the same endpoint.
struct WorkerGuard(JoinHandle<()>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum TransportSlot {
    /// Nothing yet; first use builds a [`UdpTransport`].
    Unset,
    /// A transport was injected via [`MulticastEndpoint::set_transport`]
    /// but has not been configured.
    Injected(Arc<dyn Transport>),
    /// Configured and memoized for the endpoint's lifetime.
    Ready(Arc<dyn Transport>),
}

/// A simplified interface for sending and receiving multicast UDP messages.
///
/// Construction performs no I/O; the socket is created, configured (group
/// join, TTL 1, address/port reuse) and memoized on first use. Address and
/// port are immutable after construction.
///
/// One endpoint owns one socket. Calling [`MulticastEndpoint::send`] while
/// a receive window is in flight on the same endpoint is unspecified and
/// left to the caller to avoid.
pub struct MulticastEndpoint {
    port: u16,
    address: String,
    transport: RwLock<TransportSlot>,
}

impl MulticastEndpoint {
    /// Create an endpoint on the default group [`DEFAULT_MULTICAST_ADDRESS`].
    pub fn new(port: u16) -> Self {
        Self::with_address(port, DEFAULT_MULTICAST_ADDRESS)
    }

    /// Create an endpoint on a specific multicast group.
    ///
    /// The address is not validated here; a malformed address surfaces as
    /// [`MulticastError::BadAddress`] on first send or receive.
    pub fn with_address(port: u16, address: impl Into<String>) -> Self {
        Self {
            port,
            address: address.into(),
            transport: RwLock::new(TransportSlot::Unset),
        }
    }

    /// The multicast group address this endpoint was constructed with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The multicast port this endpoint was constructed with.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Substitute the transport, e.g. with a test double.
    ///
    /// Only valid before first use; once the real transport has been built
    /// and configured this fails with [`MulticastError::TransportActive`].
    pub fn set_transport(&self, transport: Arc<dyn Transport>) -> Result<(), MulticastError> {
        let mut slot = self.transport.write();
        if matches!(&*slot, TransportSlot::Ready(_)) {
            return Err(MulticastError::TransportActive);
        }
        *slot = TransportSlot::Injected(transport);
        Ok(())
    }

    /// Broadcast one message to the group, returning the bytes written.
    ///
    /// The message goes out as a single unconnected UDP datagram; transport
    /// errors propagate immediately and nothing is retried.
    pub async fn send(&self, message: &[u8]) -> Result<usize, MulticastError> {
        let transport = self.transport()?;
        let dest = SocketAddrV4::new(self.group()?, self.port);
        let sent = transport.send_to(message, dest).await?;
        trace!(bytes = sent, %dest, "sent multicast datagram");
        Ok(sent)
    }

    /// Collect every datagram arriving within `window`, in arrival order.
    ///
    /// Returns an empty batch if nothing arrives; a timeout is not an
    /// error. The window is a hard wall-clock bound: even a continuous
    /// stream of datagrams is cut off when it expires.
    pub async fn receive_all(
        &self,
        max_len: usize,
        window: Duration,
    ) -> Result<Vec<ReceivedMessage>, MulticastError> {
        let mut responses = Vec::new();
        self.run_window(max_len, window, |message| responses.push(message))
            .await?;
        Ok(responses)
    }

    /// Stream each datagram arriving within `window` to `on_message`.
    ///
    /// Same loop and timer as [`MulticastEndpoint::receive_all`], but each
    /// message is handed to the callback as it arrives (in arrival order)
    /// instead of being buffered. Returns once the window expires.
    pub async fn receive_each<F>(
        &self,
        max_len: usize,
        window: Duration,
        on_message: F,
    ) -> Result<(), MulticastError>
    where
        F: FnMut(ReceivedMessage),
    {
        self.run_window(max_len, window, on_message).await
    }

    /// The receive window shared by both entry points.
    ///
    /// A worker task reads datagrams and forwards them over an unbounded
    /// channel; the caller drains the channel until the deadline, then
    /// aborts the worker outright. A datagram the OS has handed to the
    /// worker but that has not yet crossed the channel when the abort
    /// lands may be lost; delivery at the window edge is best effort.
    ///
    /// Read errors inside the window are logged at trace level and the
    /// loop continues, so one bad datagram can neither end the window
    /// early nor hang it.
    async fn run_window<F>(
        &self,
        max_len: usize,
        window: Duration,
        mut deliver: F,
    ) -> Result<(), MulticastError>
    where
        F: FnMut(ReceivedMessage),
    {
        if max_len == 0 {
            return Err(MulticastError::InvalidArgument("max_len must be nonzero"));
        }
        if window.is_zero() {
            return Err(MulticastError::InvalidArgument("window must be nonzero"));
        }

        let transport = self.transport()?;
        transport.bind(SocketAddrV4::new(LOCAL_ADDRESS, self.port))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reader = transport.clone();
        let worker = WorkerGuard(tokio::spawn(async move {
            let mut buf = vec![0u8; max_len];
            loop {
                match reader.recv_from(&mut buf).await {
                    Ok((n, from)) => {
                        if tx.send(ReceivedMessage::new(&buf[..n], from)).is_err() {
                            break;
                        }
                    }
                    Err(e) => trace!("ignoring receive error: {e}"),
                }
            }
        }));

        let deadline = Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(message)) => deliver(message),
                // Worker gone or deadline hit; either way the window is over.
                Ok(None) => break,
                Err(_) => break,
            }
        }
        drop(worker);
        Ok(())
    }

    fn group(&self) -> Result<Ipv4Addr, MulticastError> {
        self.address
            .parse()
            .map_err(|_| MulticastError::BadAddress(self.address.clone()))
    }

    /// Lazily build and configure the transport, memoizing the handle.
    ///
    /// Applied exactly once, in order: group join (group address plus local
    /// interface), multicast TTL 1, address/port reuse. Every later call
    /// returns the same handle.
    fn transport(&self) -> Result<Arc<dyn Transport>, MulticastError> {
        if let TransportSlot::Ready(transport) = &*self.transport.read() {
            return Ok(transport.clone());
        }

        let mut slot = self.transport.write();
        // Another caller may have configured it between the two locks.
        if let TransportSlot::Ready(transport) = &*slot {
            return Ok(transport.clone());
        }

        let group = self.group()?;
        let (transport, injected): (Arc<dyn Transport>, bool) =
            match std::mem::replace(&mut *slot, TransportSlot::Unset) {
                TransportSlot::Injected(transport) => (transport, true),
                _ => (Arc::new(UdpTransport::new()?), false),
            };

        let configured = transport
            .set_option(SocketOption::JoinGroup {
                group,
                interface: LOCAL_ADDRESS,
            })
            .and_then(|_| transport.set_option(SocketOption::MulticastTtl(1)))
            .and_then(|_| transport.set_option(SocketOption::ReuseAddress));

        if let Err(e) = configured {
            // Keep an injected double in place so a failed configuration
            // does not quietly swap it for a real socket on retry.
            if injected {
                *slot = TransportSlot::Injected(transport);
            }
            return Err(e);
        }

        debug!(group = %group, port = self.port, "multicast transport configured");
        *slot = TransportSlot::Ready(transport.clone());
        Ok(transport)
    }
}
