//! # packetbus-core
//!
//! Core contracts for the packetbus datagram transport.
//!
//! This crate provides:
//! - `Codec`, `Handler`, `Plugin`, and `Monitor` traits - the pluggable
//!   processing seams consumed by the transport
//! - `Session` - the per-datagram addressing context passed to codec and handler
//! - `TransportEvent` - the vocabulary of pipeline transition events
//! - `TransportConfig` - immutable-after-construction transport configuration
//! - `BufferPage` / `BufferPagePool` / `VirtualBuf` - pooled buffer arenas that
//!   eliminate per-packet allocation in the receive and reply paths
//! - `TransportError` - the error taxonomy shared across the workspace
//!
//! The transport itself (UDP channels, driver tasks, dispatch pool) lives in
//! `packetbus-transport`; this crate is deliberately free of socket code so
//! codecs and handlers can be written and tested without an I/O runtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod session;

pub use buffer::{BufferPage, BufferPagePool, VirtualBuf};
pub use codec::Codec;
pub use config::TransportConfig;
pub use error::{TransportError, TransportResult};
pub use event::TransportEvent;
pub use handler::{Handler, Monitor, Plugin};
pub use session::Session;
