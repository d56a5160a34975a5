//! Session abstraction.
//!
//! A session is the addressing context handed to the codec and handler while
//! one unit of traffic is processed. For UDP this is ephemeral: one session
//! per received datagram, discarded after the decode/process/flush cycle.
//! The trait lives here so codecs and handlers can be written and unit-tested
//! against it without pulling in socket code.

use std::net::SocketAddr;

use crate::error::TransportResult;

/// Per-datagram addressing and reply context.
///
/// A session is owned by exactly one dispatch task at a time; implementations
/// are `Sync` so the handler can share references into spawned work, but the
/// reply buffer is not meant for concurrent writers.
pub trait Session: Send + Sync {
    /// Address of the remote peer this traffic came from.
    fn remote_addr(&self) -> SocketAddr;

    /// Local address of the channel the traffic arrived on.
    fn local_addr(&self) -> SocketAddr;

    /// Append reply bytes to the session's pooled write buffer.
    ///
    /// Bytes are not transmitted until the session is flushed; the transport
    /// flushes automatically once the handler returns.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] once the session has completed, and
    /// [`TransportError::WriteOverflow`] if the reply would exceed the
    /// configured write buffer size.
    ///
    /// [`TransportError::Closed`]: crate::error::TransportError::Closed
    /// [`TransportError::WriteOverflow`]: crate::error::TransportError::WriteOverflow
    fn write(&self, data: &[u8]) -> TransportResult<()>;
}
