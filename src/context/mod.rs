//! Session context: the single owner of endpoints and sessions.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Context`] | Endpoint registry and transport event router |
//! | [`ContextBuilder`] | Allocator and default limits |
//! | [`ListenOptions`] / [`ConnectOptions`] | Per-endpoint options |
//! | [`SessionLimits`] / [`RetryPolicy`] | Serialisable defaults |
//!
//! # Example
//!
//! ```ignore
//! use ws_session::{Context, Disposition, Event, ListenOptions, TokioTransport};
//!
//! let mut context = Context::new(TokioTransport::new());
//! let endpoint = context.listen(ListenOptions::ephemeral(), |client, event| {
//!     if *event == Event::Received {
//!         let mut buf = [0u8; 1024];
//!         if let Ok(len) = client.receive(&mut buf) {
//!             let _ = client.send(&buf[..len]);
//!         }
//!     }
//!     Disposition::Continue
//! })?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Context construction.
pub mod builder;

/// Context implementation.
pub mod core;

/// Endpoint options and limits.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ContextBuilder;
pub use core::Context;
pub use options::{
    ConnectOptions, DEFAULT_MAX_PAYLOAD, DEFAULT_RETRY_DELAY, DEFAULT_SLOT_COUNT, ListenOptions,
    RetryPolicy, SessionLimits,
};
