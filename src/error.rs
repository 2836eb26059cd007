//! Error types for the session layer.
//!
//! Queue, registry, connection and configuration failures share one enum.
//!
//! # Usage
//!
//! Back-pressure is an ordinary error value, so callers can match on it:
//!
//! ```ignore
//! use ws_session::{Error, Result};
//!
//! fn reply(ctx: &mut Context<TokioTransport>, session: SessionId) -> Result<()> {
//!     match ctx.send(session, b"pong") {
//!         Err(e) if e.is_backpressure() => Ok(()), // try again after the next `Sent`
//!         other => other,
//!     }
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Resources | [`Error::OutOfMemory`] |
//! | Queues | [`Error::QueueFull`], [`Error::PayloadTooLarge`], [`Error::BufferTooSmall`] |
//! | Registry | [`Error::EndpointNotFound`], [`Error::SessionNotFound`], [`Error::SessionNotReady`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::ShortWrite`] |
//! | Execution | [`Error::Timeout`] |
//! | External | [`Error::Io`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use url::ParseError as UrlError;

use crate::identifiers::{EndpointId, SessionId};
use crate::session::SessionState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result alias used by every fallible session-layer call.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Session-layer error.
///
/// Variants carry the ids and sizes involved.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when endpoint or context options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument.
    ///
    /// Returned when a call receives a value it can never accept.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// Backing storage could not be allocated.
    ///
    /// Returned by queue, user-data and endpoint construction. Anything
    /// already allocated for the same object has been released.
    #[error("Out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
    },

    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// No free slot is left in the queue.
    #[error("Queue full: all {capacity} slots in use")]
    QueueFull {
        /// Slot count of the queue.
        capacity: usize,
    },

    /// Payload exceeds the per-slot maximum.
    #[error("Payload too large: {size} > {max} bytes")]
    PayloadTooLarge {
        /// Length of the rejected payload.
        size: usize,
        /// Configured maximum payload size.
        max: usize,
    },

    /// Destination buffer cannot hold the pending message.
    ///
    /// The message stays queued.
    #[error("Buffer too small: message needs {required} bytes, buffer holds {capacity}")]
    BufferTooSmall {
        /// Length of the pending message.
        required: usize,
        /// Length of the caller's buffer.
        capacity: usize,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// Endpoint not found.
    #[error("Endpoint not found: {endpoint_id}")]
    EndpointNotFound {
        /// The missing endpoint ID.
        endpoint_id: EndpointId,
    },

    /// Session not found.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The missing session ID.
        session_id: SessionId,
    },

    /// Session exists but is not in the established data phase.
    #[error("Session {session_id} is not established (state: {state})")]
    SessionNotReady {
        /// The session ID.
        session_id: SessionId,
        /// Current lifecycle state.
        state: SessionState,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection attempt or transport operation failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Transport accepted fewer bytes than the full message.
    ///
    /// Fatal to the session; the partial message is never resent.
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes the transport reported as written.
        written: usize,
        /// Length of the message.
        expected: usize,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] UrlError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an out of memory error.
    #[inline]
    pub fn out_of_memory(requested: usize) -> Self {
        Self::OutOfMemory { requested }
    }

    /// Creates a queue full error.
    #[inline]
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// Creates a payload too large error.
    #[inline]
    pub fn payload_too_large(size: usize, max: usize) -> Self {
        Self::PayloadTooLarge { size, max }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(required: usize, capacity: usize) -> Self {
        Self::BufferTooSmall { required, capacity }
    }

    /// Creates an endpoint not found error.
    #[inline]
    pub fn endpoint_not_found(endpoint_id: EndpointId) -> Self {
        Self::EndpointNotFound { endpoint_id }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound { session_id }
    }

    /// Creates a session not ready error.
    #[inline]
    pub fn session_not_ready(session_id: SessionId, state: SessionState) -> Self {
        Self::SessionNotReady { session_id, state }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a short write error.
    #[inline]
    pub fn short_write(written: usize, expected: usize) -> Self {
        Self::ShortWrite { written, expected }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the error is a bounded-queue rejection.
    ///
    /// Callers implement their own backpressure on these: the session
    /// is intact and a later attempt may succeed.
    #[inline]
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::ShortWrite { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Back-pressure, timeouts and connection failures are recoverable.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_queue_errors_display() {
        assert_eq!(
            Error::queue_full(8).to_string(),
            "Queue full: all 8 slots in use"
        );
        assert_eq!(
            Error::payload_too_large(2048, 1024).to_string(),
            "Payload too large: 2048 > 1024 bytes"
        );
    }

    #[test]
    fn test_session_not_ready_display() {
        let err = Error::session_not_ready(SessionId::new(7), SessionState::Closing);
        assert_eq!(
            err.to_string(),
            "Session 7 is not established (state: closing)"
        );
    }

    #[test]
    fn test_is_backpressure() {
        assert!(Error::queue_full(4).is_backpressure());
        assert!(!Error::payload_too_large(5, 4).is_backpressure());
        assert!(!Error::ConnectionClosed.is_backpressure());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::short_write(3, 4).is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::queue_full(1).is_recoverable());
        assert!(Error::timeout("service", 10).is_recoverable());
        assert!(!Error::short_write(1, 2).is_recoverable());
        assert!(!Error::out_of_memory(16).is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::AddrInUse, "port taken");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }

    #[test]
    fn test_from_websocket_error_is_connection_error() {
        let err: Error = WsError::ConnectionClosed.into();
        assert!(matches!(err, Error::WebSocket(_)));
        assert!(err.is_connection_error());
        assert!(err.to_string().starts_with("WebSocket error: "));
    }
}
