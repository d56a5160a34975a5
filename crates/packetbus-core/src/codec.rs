//! Codec seam.
//!
//! The transport defines no wire format of its own - framing and message
//! encoding are entirely delegated to the `Codec` implementation, keeping the
//! transport protocol-agnostic.

use crate::buffer::VirtualBuf;
use crate::error::TransportResult;
use crate::session::Session;

/// Translates raw datagram bytes into application-level messages.
///
/// `decode` is called repeatedly against one datagram's buffer until the
/// buffer is exhausted, so a single datagram may carry several messages.
///
/// # Contract
///
/// - `Ok(Some(message))` - one complete message was decoded; the codec must
///   have advanced the buffer past the bytes it consumed.
/// - `Ok(None)` - the remaining bytes do not form a complete message. UDP
///   datagrams are expected to be self-contained, so the read path treats
///   this as a decode failure for that packet and drops the remainder.
/// - `Err(_)` - malformed input; same per-packet scoping as `Ok(None)`.
pub trait Codec: Send + Sync + 'static {
    /// Decoded application message type.
    type Message: Send + 'static;

    /// Attempt to decode one message from the buffer's unread bytes.
    ///
    /// # Errors
    /// Returns an error for malformed input. Errors are scoped to the current
    /// datagram and surfaced via `Handler::state_event`; they never take down
    /// the transport.
    fn decode(
        &self,
        buf: &mut VirtualBuf,
        session: &dyn Session,
    ) -> TransportResult<Option<Self::Message>>;
}
