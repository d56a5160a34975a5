//! UDP channel: one bound datagram socket.
//!
//! The channel applies kernel socket options through `socket2` before handing
//! the socket to tokio, so the configured `SO_RCVBUF`/`SO_SNDBUF` sizes are
//! in place before the first datagram arrives. Cloning a `UdpChannel` yields
//! another handle to the same socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use packetbus_core::{TransportConfig, TransportError, TransportResult};

/// One bound UDP endpoint.
///
/// Created at bind time, registered with a [`Worker`], and closed at
/// shutdown. One channel exists per listening endpoint; per-datagram state
/// lives in [`UdpSession`], not here.
///
/// [`Worker`]: crate::worker::Worker
/// [`UdpSession`]: crate::session::UdpSession
///
/// # Examples
///
/// ```no_run
/// use packetbus_core::TransportConfig;
/// use packetbus_transport::UdpChannel;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TransportConfig::default();
/// let channel = UdpChannel::bind("127.0.0.1:0".parse()?, &config)?;
/// println!("listening on {}", channel.local_addr());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    closed: Arc<AtomicBool>,
}

impl UdpChannel {
    /// Bind a channel to the given local address.
    ///
    /// Use port 0 for an OS-assigned port. Socket buffer sizes from the
    /// configuration are applied before binding.
    ///
    /// # Errors
    /// Returns [`TransportError::BindFailed`] if socket creation, option
    /// setup, or binding fails.
    pub fn bind(addr: SocketAddr, config: &TransportConfig) -> TransportResult<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        if let Some(size) = config.socket_recv_buffer_size {
            socket
                .set_recv_buffer_size(size)
                .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        }
        if let Some(size) = config.socket_send_buffer_size {
            socket
                .set_send_buffer_size(size)
                .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        }
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .bind(&addr.into())
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket =
            UdpSocket::from_std(std_socket).map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Wrap an already-configured socket, for tests that need a socket state
    /// `bind` cannot produce (for example a connected socket with a pending
    /// ICMP error).
    #[cfg(test)]
    pub(crate) fn from_socket(socket: UdpSocket) -> TransportResult<Self> {
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bound local address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait until the socket is ready to receive.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] if the channel was closed, or the
    /// underlying I/O error from readiness polling.
    pub async fn readable(&self) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.socket.readable().await?;
        Ok(())
    }

    /// Non-blocking receive of one datagram into `buf`.
    ///
    /// # Errors
    /// `WouldBlock` when no datagram is queued; callers treat that as "stop
    /// draining". Other errors are real socket failures.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.try_recv_from(buf)
    }

    /// Send one datagram to `target`.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] after `close`, or the socket error
    /// from the send.
    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let sent = self.socket.send_to(buf, target).await?;
        Ok(sent)
    }

    /// Mark the channel closed. Subsequent sends and readiness waits fail
    /// with [`TransportError::Closed`]; the socket itself is released once
    /// the last handle drops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Whether `close` has been called on any handle to this channel.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for UdpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpChannel")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
