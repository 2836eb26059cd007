//! Event dispatch contract.
//!
//! Events are delivered by the [`Context`](crate::Context) to the handler of
//! the endpoint that owns the session. Handlers run synchronously on the
//! thread driving the context and must not block.
//!
//! # Event Order
//!
//! | Event | When | Guarantee |
//! |-------|------|-----------|
//! | [`Event::Connected`] | handshake confirmed | exactly once, after queues and user data exist |
//! | [`Event::Received`] | one inbound message queued | one per message, arrival order |
//! | [`Event::ReceiveDropped`] | inbound message discarded | queue full or message oversized |
//! | [`Event::Sent`] | one outbound message fully written | enqueue order |
//! | [`Event::ConnectionError`] | attempt failed or session aborted | connecting: per failed attempt |
//! | [`Event::Closed`] | session torn down | exactly once, before resources are released |
//!
//! A session that reached `Connected` always ends with exactly one `Closed`.

// ============================================================================
// Imports
// ============================================================================

use crate::session::Client;

// ============================================================================
// Event
// ============================================================================

/// Lifecycle event delivered to an endpoint handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The session is established and ready for `send`/`receive`.
    Connected,
    /// One message was appended to the inbound queue.
    Received,
    /// One queued message was written to the transport.
    Sent,
    /// An inbound message was discarded.
    ReceiveDropped {
        /// Length of the discarded message.
        size: usize,
    },
    /// A connection attempt failed, or the established session failed.
    ConnectionError {
        /// Transport or session supplied description.
        reason: String,
    },
    /// The session is closing; resources are released after this returns.
    Closed,
}

impl Event {
    /// Returns a short stable name for logging.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Received => "received",
            Self::Sent => "sent",
            Self::ReceiveDropped { .. } => "receive_dropped",
            Self::ConnectionError { .. } => "connection_error",
            Self::Closed => "closed",
        }
    }

    /// Creates a connection error event.
    #[inline]
    #[must_use]
    pub fn connection_error(reason: impl Into<String>) -> Self {
        Self::ConnectionError {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Disposition
// ============================================================================

/// Handler verdict, interpreted identically for every endpoint role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the session going.
    #[default]
    Continue,
    /// Close the session.
    ///
    /// On a `ConnectionError` of a session that is still connecting, this
    /// abandons further retries. Ignored on `Closed`.
    CloseSession,
}

impl Disposition {
    /// Returns `true` for [`Disposition::CloseSession`].
    #[inline]
    #[must_use]
    pub const fn is_close(self) -> bool {
        matches!(self, Self::CloseSession)
    }
}

// ============================================================================
// EventHandler
// ============================================================================

/// Endpoint handler callback type.
///
/// Called for each event of each session spawned from the endpoint.
pub type EventHandler = Box<dyn FnMut(&mut Client<'_>, &Event) -> Disposition + Send>;

// ============================================================================
// Tests
// ============================================================================
