//! Error types shared across the packetbus workspace.

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur in transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind a channel to its local address
    #[error("Bind failed: {0}")]
    BindFailed(String),

    /// Underlying socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec could not produce a message from a datagram
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Handler rejected or failed to process a message
    #[error("Handler error: {0}")]
    Process(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Operation attempted on a closed transport, channel, or session
    #[error("Transport is closed")]
    Closed,

    /// Requested buffer exceeds the arena slot size
    #[error("Buffer request too large: requested {requested} bytes, slot size {slot_size}")]
    BufferTooLarge {
        /// Bytes requested from the pool
        requested: usize,
        /// Fixed slot size of the arena
        slot_size: usize,
    },

    /// Write would overflow the session's reply buffer
    #[error("Write buffer overflow: needed {needed} bytes, {available} available")]
    WriteOverflow {
        /// Bytes the caller tried to append
        needed: usize,
        /// Writable bytes remaining in the buffer
        available: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Wrap an arbitrary handler error into [`TransportError::Process`].
    pub fn process<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Process(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::BindFailed("address in use".to_string());
        assert_eq!(err.to_string(), "Bind failed: address in use");

        let err = TransportError::BufferTooLarge {
            requested: 4096,
            slot_size: 1472,
        };
        assert!(err.to_string().contains("4096"));
        assert!(err.to_string().contains("1472"));
    }

    #[test]
    fn test_process_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = TransportError::process(io);
        assert!(matches!(err, TransportError::Process(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: TransportError = io.into();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
