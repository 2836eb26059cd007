//! Client sessions and their bounded queues.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `queue` | [`MessageQueue`] fixed-slot ring buffer |
//! | `client` | [`ClientSession`] state machine and [`Client`] handler handle |

// ============================================================================
// Submodules
// ============================================================================

/// Session state and handler handle.
pub mod client;

/// Bounded message queue.
pub mod queue;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{Client, ClientSession, SessionState};
pub use queue::MessageQueue;
