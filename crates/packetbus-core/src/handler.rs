//! Handler, plugin, and monitor seams.
//!
//! These traits form the business-logic boundary of the transport. The
//! transport calls them; it never implements them. Monitors and plugins are
//! passed to the worker explicitly alongside the handler - there is no
//! runtime type-test deriving one from the other.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{TransportError, TransportResult};
use crate::event::TransportEvent;
use crate::session::Session;

/// Business-logic processor for decoded messages.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Message type produced by the paired codec.
    type Message: Send + 'static;

    /// Process one decoded message.
    ///
    /// Replies are written through `session.write` and flushed by the
    /// transport after the datagram's messages have been processed.
    ///
    /// # Errors
    /// An error aborts processing of the remaining messages in the same
    /// datagram and is reported back through [`state_event`] with
    /// [`TransportEvent::ProcessFailure`]. It does not affect other datagrams.
    ///
    /// [`state_event`]: Handler::state_event
    async fn process(&self, session: &dyn Session, message: Self::Message)
    -> TransportResult<()>;

    /// Observability tap for pipeline transition events.
    ///
    /// Called synchronously from the dispatch path; keep it cheap. `session`
    /// is `None` only for events that cannot be tied to a datagram. The
    /// default implementation ignores all events.
    fn state_event(
        &self,
        _session: Option<&dyn Session>,
        _event: TransportEvent,
        _cause: Option<&TransportError>,
    ) {
    }
}

/// Shared handlers delegate to the inner handler, so callers can keep an
/// inspection handle after the transport takes ownership.
#[async_trait]
impl<H: Handler> Handler for Arc<H> {
    type Message = H::Message;

    async fn process(
        &self,
        session: &dyn Session,
        message: Self::Message,
    ) -> TransportResult<()> {
        (**self).process(session, message).await
    }

    fn state_event(
        &self,
        session: Option<&dyn Session>,
        event: TransportEvent,
        cause: Option<&TransportError>,
    ) {
        (**self).state_event(session, event, cause);
    }
}

/// Instrumentation hooks around each datagram read.
///
/// Optional; the worker accepts any number of monitors, including none.
pub trait Monitor: Send + Sync + 'static {
    /// Called after a datagram has been received, before decoding starts.
    fn before_read(&self, session: &dyn Session);

    /// Called after the datagram has been fully handled, with the number of
    /// payload bytes that were received.
    fn after_read(&self, session: &dyn Session, bytes: usize);
}

/// A monitor that can also filter messages before they reach the handler.
///
/// `preprocess` runs after decode and before `Handler::process`; returning
/// `false` drops the message silently. That drop is the plugin's contract,
/// not an error, so no event is raised for it.
pub trait Plugin: Monitor {
    /// Message type produced by the paired codec.
    type Message;

    /// Decide whether a decoded message should reach the handler.
    fn preprocess(&self, session: &dyn Session, message: &Self::Message) -> bool;
}
