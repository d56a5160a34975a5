//! Pipeline transition events.
//!
//! `TransportEvent` is a vocabulary of events raised synchronously while a
//! datagram moves through the decode/process pipeline, not a stored state
//! machine. Events are delivered to [`Handler::state_event`] as they occur,
//! scoped to the packet that triggered them.
//!
//! [`Handler::state_event`]: crate::handler::Handler::state_event

/// Transition events surfaced to `Handler::state_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEvent {
    /// The codec could not decode a complete message from a datagram.
    /// The remaining bytes of that datagram are dropped; the transport
    /// and subsequent datagrams are unaffected.
    DecodeFailure,
    /// The handler returned an error while processing a decoded message.
    /// Remaining messages in the same datagram are not attempted.
    ProcessFailure,
    /// A per-datagram session finished its decode/process/flush cycle.
    SessionClosed,
}

impl std::fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DecodeFailure => write!(f, "decode failure"),
            Self::ProcessFailure => write!(f, "process failure"),
            Self::SessionClosed => write!(f, "session closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        assert_eq!(TransportEvent::DecodeFailure.to_string(), "decode failure");
        assert_eq!(TransportEvent::ProcessFailure.to_string(), "process failure");
        assert_eq!(TransportEvent::SessionClosed.to_string(), "session closed");
    }

    #[test]
    fn test_event_equality() {
        assert_eq!(TransportEvent::DecodeFailure, TransportEvent::DecodeFailure);
        assert_ne!(TransportEvent::DecodeFailure, TransportEvent::ProcessFailure);
    }
}
