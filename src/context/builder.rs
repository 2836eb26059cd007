//! Builder for context configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ws_session::{Context, RetryPolicy, SessionLimits, TokioTransport};
//!
//! let context = Context::builder()
//!     .limits(SessionLimits::new(256, 4096))
//!     .retry_policy(RetryPolicy::fixed(Duration::from_secs(1)))
//!     .build(TokioTransport::new())?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::alloc::{BufferAllocator, SharedAllocator, SystemAllocator};
use crate::error::Result;
use crate::transport::Transport;

use super::core::Context;
use super::options::{RetryPolicy, SessionLimits};

// ============================================================================
// ContextBuilder
// ============================================================================

/// Builder for configuring a [`Context`].
///
/// Use [`Context::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ContextBuilder {
    /// Allocator for queues and user data; system heap when unset.
    allocator: Option<SharedAllocator>,
    /// Default limits for endpoints that set none.
    limits: SessionLimits,
    /// Default retry policy for connecting endpoints.
    retry: RetryPolicy,
}

impl ContextBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the allocator for all session storage.
    #[inline]
    #[must_use]
    pub fn allocator(mut self, allocator: impl BufferAllocator + 'static) -> Self {
        self.allocator = Some(Arc::new(allocator));
        self
    }

    /// Sets an allocator that is shared with other owners.
    #[inline]
    #[must_use]
    pub fn shared_allocator(mut self, allocator: SharedAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Sets default queue limits.
    #[inline]
    #[must_use]
    pub fn limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the default slot count, keeping the payload size.
    #[inline]
    #[must_use]
    pub fn slot_count(mut self, slot_count: usize) -> Self {
        self.limits.slot_count = slot_count;
        self
    }

    /// Sets the default maximum payload, keeping the slot count.
    #[inline]
    #[must_use]
    pub fn max_payload(mut self, max_payload: usize) -> Self {
        self.limits.max_payload = max_payload;
        self
    }

    /// Sets the default retry policy.
    #[inline]
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the context around `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the default limits
    /// are unusable.
    pub fn build<T: Transport>(self, transport: T) -> Result<Context<T>> {
        self.limits.validate()?;

        let allocator = self
            .allocator
            .unwrap_or_else(|| Arc::new(SystemAllocator));

        Ok(Context::from_parts(
            transport,
            allocator,
            self.limits,
            self.retry,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
