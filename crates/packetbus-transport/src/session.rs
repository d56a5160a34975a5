//! Per-datagram UDP session.
//!
//! UDP has no connection state, so each inbound datagram gets a fresh
//! session carrying only the remote address, the owning channel, and a pooled
//! reply buffer. The dispatch pipeline flushes and retires the session once
//! the datagram's messages have been processed; it has no identity across
//! packets.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use packetbus_core::{Session, TransportError, TransportResult, VirtualBuf};

use crate::channel::UdpChannel;

/// Ephemeral context for one received datagram.
///
/// Handlers reply by appending bytes through [`Session::write`]; everything
/// accumulated is sent to the remote peer as a single datagram on flush. The
/// write buffer is a pool lease and returns to its page when the session is
/// dropped.
pub struct UdpSession {
    remote: SocketAddr,
    channel: UdpChannel,
    /// Taken out during flush; `None` also after retire
    write_buf: Mutex<Option<VirtualBuf>>,
    retired: AtomicBool,
}

impl UdpSession {
    /// Create a session for a datagram received from `remote`.
    pub fn new(remote: SocketAddr, channel: UdpChannel, write_buf: VirtualBuf) -> Self {
        Self {
            remote,
            channel,
            write_buf: Mutex::new(Some(write_buf)),
            retired: AtomicBool::new(false),
        }
    }

    /// The channel this session's datagram arrived on.
    #[must_use]
    pub fn channel(&self) -> &UdpChannel {
        &self.channel
    }

    /// Send accumulated reply bytes to the remote peer as one datagram.
    ///
    /// A session with an empty reply buffer flushes as a no-op. After a
    /// flush the buffer is reset, so a handler may write and flush more than
    /// once; each flush produces its own datagram.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] on a retired session, or the
    /// channel's send error. The buffer is retained and reset on send
    /// failure; those bytes are dropped, not retried.
    pub async fn flush(&self) -> TransportResult<usize> {
        let mut buf = self
            .take_buf()?
            .ok_or(TransportError::Closed)?;

        let result = if buf.remaining() > 0 {
            self.channel.send_to(buf.chunk(), self.remote).await
        } else {
            Ok(0)
        };

        buf.reset();
        *self.lock_buf() = Some(buf);
        result
    }

    /// Retire the session, releasing its reply buffer back to the pool.
    ///
    /// Called by the dispatch pipeline after the final flush. Idempotent;
    /// subsequent `write` or `flush` calls fail with
    /// [`TransportError::Closed`].
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Relaxed);
        // Dropping the lease recycles the slot
        self.lock_buf().take();
    }

    /// Whether the session has been retired.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Relaxed)
    }

    fn take_buf(&self) -> TransportResult<Option<VirtualBuf>> {
        if self.is_retired() {
            return Err(TransportError::Closed);
        }
        Ok(self.lock_buf().take())
    }

    fn lock_buf(&self) -> std::sync::MutexGuard<'_, Option<VirtualBuf>> {
        // A poisoned lock only means a writer panicked mid-append; the
        // cursor state is still consistent
        self.write_buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Session for UdpSession {
    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    fn write(&self, data: &[u8]) -> TransportResult<()> {
        if self.is_retired() {
            return Err(TransportError::Closed);
        }
        let mut guard = self.lock_buf();
        match guard.as_mut() {
            Some(buf) => buf.put_slice(data),
            // Buffer is out on a concurrent flush; sessions are single-owner
            None => Err(TransportError::Closed),
        }
    }
}

impl std::fmt::Debug for UdpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpSession")
            .field("remote", &self.remote)
            .field("local", &self.channel.local_addr())
            .field("retired", &self.is_retired())
            .finish()
    }
}
