//! Transport boundary.
//!
//! The session layer never touches sockets. It drives a [`Transport`]
//! provider and consumes the [`TransportEvent`]s the provider reports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  TransportEvent   ┌──────────────┐  Event   ┌─────────────┐
//! │  Transport   │──────────────────►│   Context    │─────────►│   handler   │
//! │  (sockets,   │                   │  (sessions,  │          │ (app code)  │
//! │   framing)   │◄──────────────────│   queues)    │◄─────────│             │
//! └──────────────┘  write / timers   └──────────────┘  send    └─────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `runtime` | [`TokioTransport`]: tokio-tungstenite provider |
//! | `connection` | Per-connection I/O loop |
//! | `server` | Listener binding and accept loop |

// ============================================================================
// Submodules
// ============================================================================

/// Per-connection WebSocket I/O loop.
pub(crate) mod connection;

/// WebSocket acceptor.
pub(crate) mod server;

/// Tokio-based transport provider.
pub mod runtime;

/// Recording test double.
#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::error::Result;
use crate::identifiers::{ConnectionHandle, EndpointId, TimerId};

// ============================================================================
// Re-exports
// ============================================================================

pub use runtime::TokioTransport;

// ============================================================================
// TransportEvent
// ============================================================================

/// Notification from the transport provider to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// WebSocket handshake completed.
    ///
    /// For listening endpoints `handle` is new; for connecting endpoints it
    /// is the handle returned by [`Transport::initiate_connection`].
    Established {
        /// Endpoint the connection belongs to.
        endpoint: EndpointId,
        /// Connection handle.
        handle: ConnectionHandle,
    },
    /// One write may be attempted without blocking.
    Writable {
        /// Connection handle.
        handle: ConnectionHandle,
    },
    /// One complete message arrived.
    Received {
        /// Connection handle.
        handle: ConnectionHandle,
        /// Message payload.
        payload: Vec<u8>,
    },
    /// A connection attempt failed, or an open connection errored.
    ConnectionError {
        /// Connection handle.
        handle: ConnectionHandle,
        /// Description of the failure.
        reason: String,
    },
    /// The connection is gone.
    Closed {
        /// Connection handle.
        handle: ConnectionHandle,
    },
    /// A timer scheduled through [`Transport::schedule_timer`] expired.
    TimerFired {
        /// Timer handle.
        timer: TimerId,
    },
}

// ============================================================================
// ConnectTarget
// ============================================================================

/// Remote address of a connecting endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Remote host name or IP.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Request path, always starting with `/`.
    pub path: String,
}

impl ConnectTarget {
    /// Creates a target, normalising `path` to start with `/`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };

        Self {
            host: host.into(),
            port,
            path,
        }
    }

    /// Returns the `ws://` URL for this target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`](crate::Error::Url) if host or path do not form a valid URL.
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("ws://{}:{}", self.host, self.port))?;
        url.set_path(&self.path);
        Ok(url)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Operations the session layer requires from a transport provider.
///
/// All methods are called from the thread driving the
/// [`Context`](crate::Context) and must not block. Results of asynchronous
/// work are reported later as [`TransportEvent`]s.
pub trait Transport {
    /// Starts accepting connections for `endpoint` on `addr`.
    ///
    /// Returns the port actually bound (relevant when `addr` has port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    fn listen(&mut self, endpoint: EndpointId, addr: SocketAddr) -> Result<u16>;

    /// Begins a connection attempt to `target` on behalf of `endpoint`.
    ///
    /// Success is reported as [`TransportEvent::Established`], failure as
    /// [`TransportEvent::ConnectionError`] carrying the returned handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt cannot even be started.
    fn initiate_connection(
        &mut self,
        endpoint: EndpointId,
        target: &ConnectTarget,
    ) -> Result<ConnectionHandle>;

    /// Asks for one [`TransportEvent::Writable`] for `handle`.
    fn request_writable(&mut self, handle: ConnectionHandle);

    /// Writes one whole message.
    ///
    /// Returns the number of payload bytes accepted. Anything less than
    /// `payload.len()` is a short write.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot accept data.
    fn write(&mut self, handle: ConnectionHandle, payload: &[u8]) -> Result<usize>;

    /// Closes the connection. A [`TransportEvent::Closed`] may follow.
    fn close(&mut self, handle: ConnectionHandle);

    /// Schedules a [`TransportEvent::TimerFired`] after `delay`.
    fn schedule_timer(&mut self, delay: Duration) -> TimerId;

    /// Cancels a timer. Unknown or already fired timers are ignored.
    fn cancel_timer(&mut self, timer: TimerId);

    /// Releases everything registered for `endpoint` (listeners).
    fn unregister(&mut self, endpoint: EndpointId);
}

// ============================================================================
// Helpers
// ============================================================================

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[inline]
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
