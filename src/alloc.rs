//! Buffer allocation for session storage.
//!
//! Every byte of per-session storage (queue slots and user data) is obtained
//! through a [`BufferAllocator`]. The allocator is chosen once, when the
//! [`Context`](crate::Context) is built, and shared read-only by every
//! endpoint and session spawned from it.
//!
//! Deallocation is ordinary `Drop` of the returned boxes.

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{Error, Result};

// ============================================================================
// BufferAllocator
// ============================================================================

/// Source of zero-initialised byte buffers.
///
/// Implementations return `None` to signal allocation failure; callers turn
/// that into [`Error::OutOfMemory`] and roll back whatever they had already
/// obtained.
pub trait BufferAllocator: Debug + Send + Sync {
    /// Allocates `len` zeroed bytes.
    fn allocate_zeroed(&self, len: usize) -> Option<Box<[u8]>>;
}

/// Shared allocator handle threaded through the context.
pub type SharedAllocator = Arc<dyn BufferAllocator>;

// ============================================================================
// SystemAllocator
// ============================================================================

/// Allocator backed by the global heap.
///
/// Uses fallible reservation so that an oversized request reports failure
/// instead of aborting the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl BufferAllocator for SystemAllocator {
    fn allocate_zeroed(&self, len: usize) -> Option<Box<[u8]>> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).ok()?;
        buffer.resize(len, 0);
        Some(buffer.into_boxed_slice())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Allocates through `allocator`, mapping failure to [`Error::OutOfMemory`].
pub(crate) fn allocate(allocator: &dyn BufferAllocator, len: usize) -> Result<Box<[u8]>> {
    allocator
        .allocate_zeroed(len)
        .ok_or_else(|| Error::out_of_memory(len))
}

// ============================================================================
// Test Allocators
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
