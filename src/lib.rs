//! ws-session - Callback-driven WebSocket session layer.
//!
//! This library manages WebSocket endpoints (listening or connecting) and the
//! client sessions they spawn, with bounded per-session message queues and
//! automatic reconnection for connecting endpoints.
//!
//! # Architecture
//!
//! The crate is split at the transport boundary:
//!
//! - **Session layer (sans-IO)**: [`Context`] owns endpoints, sessions and
//!   queues and reacts to [`TransportEvent`]s
//! - **Transport provider**: anything implementing [`Transport`]; the crate
//!   ships [`TokioTransport`] on tokio-tungstenite
//!
//! Key design principles:
//!
//! - Single-threaded, cooperative: every transition happens inside
//!   [`Context::handle_event`]
//! - Fixed-size queues: `send` never blocks and reports back-pressure
//! - One handler per endpoint, one [`Disposition`] contract for both roles
//! - Allocation through an explicit [`BufferAllocator`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use ws_session::{Context, Disposition, Event, ListenOptions, Result, TokioTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut context = Context::new(TokioTransport::new()?);
//!
//!     // Echo every message back to its sender
//!     let server = context.listen(ListenOptions::new(9000), |client, event| {
//!         if *event == Event::Received {
//!             let mut buf = [0u8; 1024];
//!             if let Ok(len) = client.receive(&mut buf) {
//!                 let _ = client.send(&buf[..len]);
//!             }
//!         }
//!         Disposition::Continue
//!     })?;
//!     println!("Listening on port {:?}", context.port(server));
//!
//!     loop {
//!         context.service(Duration::from_millis(100)).await;
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`alloc`] | [`BufferAllocator`] and [`SystemAllocator`] |
//! | [`context`] | [`Context`], [`ContextBuilder`] and options |
//! | [`endpoint`] | Endpoint roles and [`RetryScheduler`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`event`] | [`Event`], [`Disposition`], [`EventHandler`] |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`session`] | [`ClientSession`], [`Client`], [`MessageQueue`] |
//! | [`transport`] | [`Transport`] boundary and [`TokioTransport`] |

// ============================================================================
// Modules
// ============================================================================

/// Buffer allocation for session storage.
pub mod alloc;

/// Session context and configuration.
///
/// Use [`Context::new()`] or [`Context::builder()`] to create one.
pub mod context;

/// Endpoint roles and retry scheduling.
pub mod endpoint;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Event dispatch contract.
pub mod event;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Client sessions and bounded queues.
pub mod session;

/// Transport boundary and the tokio provider.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Allocation
pub use alloc::{BufferAllocator, SharedAllocator, SystemAllocator};

// Context types
pub use context::{
    ConnectOptions, Context, ContextBuilder, ListenOptions, RetryPolicy, SessionLimits,
};

// Endpoint types
pub use endpoint::RetryScheduler;

// Error types
pub use error::{Error, Result};

// Event types
pub use event::{Disposition, Event, EventHandler};

// Identifier types
pub use identifiers::{ConnectionHandle, EndpointId, SessionId, TimerId};

// Session types
pub use session::{Client, ClientSession, MessageQueue, SessionState};

// Transport types
pub use transport::{ConnectTarget, TokioTransport, Transport, TransportEvent};
