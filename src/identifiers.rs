//! Type-safe identifiers for endpoints, sessions and transport resources.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Assigned by | Scope |
//! |------|-------------|-------|
//! | [`EndpointId`] | [`Context`](crate::Context) | one listen/connect registration |
//! | [`SessionId`] | [`Context`](crate::Context) | one peer session, never reused |
//! | [`ConnectionHandle`] | [`Transport`](crate::Transport) | one transport connection |
//! | [`TimerId`] | [`Transport`](crate::Transport) | one scheduled timer |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Macro
// ============================================================================

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name($inner);

        impl $name {
            /// Wraps a raw value.
            #[inline]
            #[must_use]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

// ============================================================================
// Identifiers
// ============================================================================

numeric_id! {
    /// Identifies an endpoint registered with a context.
    EndpointId(u32)
}

numeric_id! {
    /// Identifies a client session.
    ///
    /// Session IDs increase monotonically within a context and are never
    /// handed out twice, so a stale ID can only miss.
    SessionId(u64)
}

numeric_id! {
    /// Transport-assigned handle for one connection.
    ConnectionHandle(u64)
}

numeric_id! {
    /// Transport-assigned handle for one scheduled timer.
    TimerId(u64)
}

// ============================================================================
// IdSequence
// ============================================================================

/// Monotonic counter handing out raw ID values starting at 1.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IdSequence(u64);

impl IdSequence {
    /// Returns the next value.
    #[inline]
    pub(crate) fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

// ============================================================================
// Tests
// ============================================================================
