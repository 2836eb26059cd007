//! Context and endpoint configuration.
//!
//! Provides type-safe options for listening and connecting endpoints, plus
//! the serialisable [`SessionLimits`] and [`RetryPolicy`] shared by both.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ws_session::{ConnectOptions, RetryPolicy, SessionLimits};
//!
//! let options = ConnectOptions::new("127.0.0.1", 9000)
//!     .with_path("/chat")
//!     .with_per_client_data_size(64)
//!     .with_limits(SessionLimits::new(256, 4096))
//!     .with_retry(RetryPolicy::fixed(Duration::from_secs(2)).with_max_attempts(5));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::ConnectTarget;

// ============================================================================
// Constants
// ============================================================================

/// Default number of slots per queue.
pub const DEFAULT_SLOT_COUNT: usize = 4096;

/// Default maximum payload per message, in bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024;

/// Default delay before a connection retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Default bind address for listening endpoints.
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// ============================================================================
// SessionLimits
// ============================================================================

/// Queue dimensions applied to every session of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Slots per queue (inbound and outbound each).
    pub slot_count: usize,
    /// Maximum payload of one message, in bytes.
    pub max_payload: usize,
}

impl SessionLimits {
    /// Creates limits with explicit dimensions.
    #[inline]
    #[must_use]
    pub const fn new(slot_count: usize, max_payload: usize) -> Self {
        Self {
            slot_count,
            max_payload,
        }
    }

    /// Checks that both dimensions are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either dimension is zero.
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(Error::config("slot_count must be at least 1"));
        }
        if self.max_payload == 0 {
            return Err(Error::config("max_payload must be at least 1"));
        }
        Ok(())
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT_COUNT, DEFAULT_MAX_PAYLOAD)
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Reconnection policy of a connecting endpoint.
///
/// Fixed backoff. With `max_attempts: None` retries never stop on their
/// own; the handler can still abandon by returning
/// [`Disposition::CloseSession`](crate::Disposition::CloseSession) from a
/// `ConnectionError` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay between a failed attempt and the next one.
    pub delay: Duration,
    /// Consecutive failed attempts after which the endpoint gives up.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Unbounded retries with a fixed `delay`.
    #[inline]
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Caps consecutive failed attempts.
    #[inline]
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Returns `true` if another attempt may follow `failures` consecutive
    /// failures.
    #[inline]
    #[must_use]
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

// ============================================================================
// ListenOptions
// ============================================================================

/// Options of a listening endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    /// Address to bind. Port 0 lets the transport pick one.
    pub bind: SocketAddr,
    /// Size of the zeroed user-data block of each session.
    pub per_client_data_size: usize,
    /// Queue limits; `None` uses the context defaults.
    pub limits: Option<SessionLimits>,
}

impl ListenOptions {
    /// Listens on `127.0.0.1:port`.
    #[inline]
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self {
            bind: SocketAddr::new(DEFAULT_BIND_IP, port),
            per_client_data_size: 0,
            limits: None,
        }
    }

    /// Listens on an ephemeral localhost port.
    #[inline]
    #[must_use]
    pub const fn ephemeral() -> Self {
        Self::new(0)
    }

    /// Sets the bind IP, keeping the port.
    #[inline]
    #[must_use]
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind.set_ip(ip);
        self
    }

    /// Sets the per-session user-data size.
    #[inline]
    #[must_use]
    pub fn with_per_client_data_size(mut self, size: usize) -> Self {
        self.per_client_data_size = size;
        self
    }

    /// Overrides queue limits for this endpoint.
    #[inline]
    #[must_use]
    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self::ephemeral()
    }
}

// ============================================================================
// ConnectOptions
// ============================================================================

/// Options of a connecting endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Request path.
    pub path: String,
    /// Size of the zeroed user-data block of the session.
    pub per_client_data_size: usize,
    /// Queue limits; `None` uses the context defaults.
    pub limits: Option<SessionLimits>,
    /// Retry policy; `None` uses the context default.
    pub retry: Option<RetryPolicy>,
}

impl ConnectOptions {
    /// Connects to `ws://host:port/`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_string(),
            per_client_data_size: 0,
            limits: None,
            retry: None,
        }
    }

    /// Sets the request path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the session user-data size.
    #[inline]
    #[must_use]
    pub fn with_per_client_data_size(mut self, size: usize) -> Self {
        self.per_client_data_size = size;
        self
    }

    /// Overrides queue limits for this endpoint.
    #[inline]
    #[must_use]
    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Overrides the retry policy for this endpoint.
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Validates host and port and builds the transport target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty host or port 0.
    pub fn target(&self) -> Result<ConnectTarget> {
        if self.host.trim().is_empty() {
            return Err(Error::config("connect host must not be empty"));
        }
        if self.port == 0 {
            return Err(Error::config("connect port must not be 0"));
        }
        Ok(ConnectTarget::new(self.host.clone(), self.port, self.path.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
