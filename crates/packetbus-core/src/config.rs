//! Transport configuration.
//!
//! `TransportConfig` is a plain configuration snapshot consumed at worker
//! construction. It is cloned into the worker and never consulted for
//! mutation afterwards - there is no way to reconfigure a running transport.

use crate::error::{TransportError, TransportResult};

/// Transport configuration.
///
/// Constructed with [`Default`] and adjusted field-by-field before being
/// handed to the worker. All sizes are in bytes unless noted.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Slot size of receive buffers. Datagrams larger than this are
    /// truncated by the kernel, so size it for the expected MTU.
    pub read_buffer_size: usize,
    /// Slot size of per-session reply buffers.
    pub write_buffer_size: usize,
    /// Number of buffer pages per pool.
    pub page_count: usize,
    /// Number of slots carved out of each page.
    pub slots_per_page: usize,
    /// Number of dispatch worker tasks (0 = one per CPU core).
    pub workers: usize,
    /// Capacity of the bounded dispatch queue. A full queue pauses the
    /// channel drivers (backpressure) rather than buffering unboundedly.
    pub queue_depth: usize,
    /// Maximum datagrams drained per readiness wakeup on one channel.
    pub recv_batch: usize,
    /// Kernel receive buffer size (`SO_RCVBUF`), if set.
    pub socket_recv_buffer_size: Option<usize>,
    /// Kernel send buffer size (`SO_SNDBUF`), if set.
    pub socket_send_buffer_size: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            // MTU 1500 minus IP/UDP headers
            read_buffer_size: 1472,
            write_buffer_size: 1472,
            page_count: 4,
            slots_per_page: 256,
            workers: 0,
            queue_depth: 1024,
            recv_batch: 16,
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
        }
    }
}

impl TransportConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] if any size or count that
    /// must be non-zero is zero.
    pub fn validate(&self) -> TransportResult<()> {
        if self.read_buffer_size == 0 {
            return Err(TransportError::InvalidConfig(
                "read_buffer_size must be non-zero".to_string(),
            ));
        }
        if self.write_buffer_size == 0 {
            return Err(TransportError::InvalidConfig(
                "write_buffer_size must be non-zero".to_string(),
            ));
        }
        if self.page_count == 0 || self.slots_per_page == 0 {
            return Err(TransportError::InvalidConfig(
                "buffer pool must have at least one page and one slot".to_string(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(TransportError::InvalidConfig(
                "queue_depth must be non-zero".to_string(),
            ));
        }
        if self.recv_batch == 0 {
            return Err(TransportError::InvalidConfig(
                "recv_batch must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.read_buffer_size, 1472);
        assert_eq!(config.recv_batch, 16);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = TransportConfig::default();
        config.read_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = TransportConfig::default();
        config.queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = TransportConfig::default();
        config.slots_per_page = 0;
        assert!(config.validate().is_err());

        let mut config = TransportConfig::default();
        config.recv_batch = 0;
        assert!(config.validate().is_err());
    }
}
