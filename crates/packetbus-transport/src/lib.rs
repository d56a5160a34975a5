//! # packetbus-transport
//!
//! UDP transport for the packetbus pipeline.
//!
//! This crate provides:
//! - [`UdpChannel`] - one bound datagram socket with socket-option plumbing
//! - [`UdpSession`] - the ephemeral per-datagram context handed to codec and
//!   handler, carrying a pooled reply buffer
//! - [`Worker`] - the transport engine: one driver task per registered
//!   channel feeds a bounded dispatch queue drained by a pool of worker tasks
//! - [`WorkerStats`] - atomic counters over the receive and dispatch paths
//!
//! # Architecture
//!
//! ```text
//! UdpChannel ──► driver task ──┐
//! UdpChannel ──► driver task ──┤  bounded     ┌──► dispatch task ─► Codec ─► Handler
//! UdpChannel ──► driver task ──┼─ dispatch ───┼──► dispatch task ─► Codec ─► Handler
//!                              │  queue       └──► dispatch task ─► Codec ─► Handler
//!          backpressure ◄──────┘
//! ```
//!
//! Each driver owns its channel's receive loop: it drains a bounded batch of
//! datagrams per readiness wakeup into pooled buffers and pushes decode jobs
//! onto the queue. A full queue pauses the driver - the socket stops being
//! drained until the dispatch pool catches up, which is the transport's only
//! flow-control mechanism.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod session;
pub mod worker;

pub use channel::UdpChannel;
pub use session::UdpSession;
pub use worker::{Worker, WorkerBuilder, WorkerStats};
