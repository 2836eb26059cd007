//! Endpoints: listening and connecting roles and their sessions.
//!
//! Endpoints are created and destroyed through the
//! [`Context`](crate::Context); only the [`RetryScheduler`] of a connecting
//! endpoint is visible from outside.

// ============================================================================
// Submodules
// ============================================================================

/// Endpoint state and transitions.
pub(crate) mod core;

/// Connection retry scheduling.
pub mod retry;

// ============================================================================
// Re-exports
// ============================================================================

pub use retry::RetryScheduler;
