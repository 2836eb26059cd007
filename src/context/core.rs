//! Context: endpoint registry and transport event router.
//!
//! The [`Context`] owns every endpoint and, through them, every session.
//! All state changes happen inside [`Context::handle_event`] or the
//! application calls on the thread that drives the context.
//!
//! # Example
//!
//! ```ignore
//! use ws_session::{ConnectOptions, Context, Disposition, Event, TokioTransport};
//!
//! let mut context = Context::new(TokioTransport::new());
//! let endpoint = context.connect(ConnectOptions::new("127.0.0.1", 9000), |client, event| {
//!     if *event == Event::Connected {
//!         let _ = client.send(b"hello");
//!     }
//!     Disposition::Continue
//! })?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::alloc::{SharedAllocator, SystemAllocator};
use crate::endpoint::RetryScheduler;
use crate::endpoint::core::{Endpoint, Registry, Shared};
use crate::error::{Error, Result};
use crate::event::{Disposition, Event};
use crate::identifiers::{ConnectionHandle, EndpointId, IdSequence, SessionId};
use crate::session::{Client, ClientSession};
use crate::transport::{ConnectTarget, Transport, TransportEvent};

use super::builder::ContextBuilder;
use super::options::{ConnectOptions, ListenOptions, RetryPolicy, SessionLimits};

// ============================================================================
// Context
// ============================================================================

/// Owner of all endpoints and sessions driven by one transport.
pub struct Context<T: Transport> {
    /// Transport provider.
    transport: T,
    /// Allocator for all session storage.
    allocator: SharedAllocator,
    /// Limits for endpoints that set none.
    limits: SessionLimits,
    /// Retry policy for connecting endpoints that set none.
    retry: RetryPolicy,
    /// Live endpoints.
    endpoints: FxHashMap<EndpointId, Endpoint>,
    endpoint_ids: IdSequence,
    /// Handle, session and timer lookup tables.
    registry: Registry,
}

// ============================================================================
// Context - Display
// ============================================================================

impl<T: Transport> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("limits", &self.limits)
            .field("retry", &self.retry)
            .field("endpoints", &self.endpoints.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Context - Construction
// ============================================================================

impl<T: Transport> Context<T> {
    /// Creates a context with the system allocator and default limits.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::from_parts(
            transport,
            Arc::new(SystemAllocator),
            SessionLimits::default(),
            RetryPolicy::default(),
        )
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub(crate) fn from_parts(
        transport: T,
        allocator: SharedAllocator,
        limits: SessionLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            allocator,
            limits,
            retry,
            endpoints: FxHashMap::default(),
            endpoint_ids: IdSequence::default(),
            registry: Registry::default(),
        }
    }

    /// Returns the transport.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the transport mutably.
    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Returns the allocator used for session storage.
    #[inline]
    #[must_use]
    pub fn allocator(&self) -> &SharedAllocator {
        &self.allocator
    }

    /// Returns the default session limits.
    #[inline]
    #[must_use]
    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Returns the default retry policy.
    #[inline]
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

// ============================================================================
// Context - Endpoints
// ============================================================================

impl<T: Transport> Context<T> {
    /// Creates a listening endpoint.
    ///
    /// Every accepted connection becomes a session that reports to `handler`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the effective limits are unusable
    /// - the transport's error if the address cannot be bound
    pub fn listen<F>(&mut self, options: ListenOptions, handler: F) -> Result<EndpointId>
    where
        F: FnMut(&mut Client<'_>, &Event) -> Disposition + Send + 'static,
    {
        let limits = options.limits.unwrap_or(self.limits);
        limits.validate()?;

        let id = self.next_endpoint_id()?;
        let port = self.transport.listen(id, options.bind)?;

        info!(
            endpoint_id = %id,
            bind = %options.bind,
            port,
            per_client_data_size = options.per_client_data_size,
            "Listening endpoint created"
        );

        let endpoint = Endpoint::listening(
            id,
            port,
            Box::new(handler),
            options.per_client_data_size,
            limits,
        );
        self.endpoints.insert(id, endpoint);

        Ok(id)
    }

    /// Creates a connecting endpoint and issues the first attempt.
    ///
    /// A failed attempt is reported to `handler` as
    /// [`Event::ConnectionError`] and retried per the endpoint's policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty host, port 0 or unusable limits.
    pub fn connect<F>(&mut self, options: ConnectOptions, handler: F) -> Result<EndpointId>
    where
        F: FnMut(&mut Client<'_>, &Event) -> Disposition + Send + 'static,
    {
        let target = options.target()?;
        let limits = options.limits.unwrap_or(self.limits);
        limits.validate()?;
        let policy = options.retry.unwrap_or(self.retry);

        let id = self.next_endpoint_id()?;
        info!(
            endpoint_id = %id,
            host = %target.host,
            port = target.port,
            path = %target.path,
            "Connecting endpoint created"
        );

        let mut endpoint = Endpoint::connecting(
            id,
            target,
            policy,
            Box::new(handler),
            options.per_client_data_size,
            limits,
        );

        let (_, mut shared) = self.parts();
        endpoint.start(&mut shared);
        self.endpoints.insert(id, endpoint);

        Ok(id)
    }

    /// Deletes an endpoint.
    ///
    /// Cancels its retry timer and unregisters it from the transport.
    /// Sessions still open are closed and released without events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EndpointNotFound`] for an unknown ID.
    pub fn delete(&mut self, endpoint: EndpointId) -> Result<()> {
        let removed = self
            .endpoints
            .remove(&endpoint)
            .ok_or_else(|| Error::endpoint_not_found(endpoint))?;

        let (_, mut shared) = self.parts();
        removed.shutdown(&mut shared);
        Ok(())
    }

    /// Returns the number of live endpoints.
    #[inline]
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns `true` if the endpoint exists.
    #[inline]
    #[must_use]
    pub fn contains_endpoint(&self, endpoint: EndpointId) -> bool {
        self.endpoints.contains_key(&endpoint)
    }

    /// Returns the bound port of a listening endpoint or the remote port of
    /// a connecting one.
    #[must_use]
    pub fn port(&self, endpoint: EndpointId) -> Option<u16> {
        self.endpoints.get(&endpoint).map(Endpoint::port)
    }

    /// Returns the remote target of a connecting endpoint.
    #[must_use]
    pub fn target(&self, endpoint: EndpointId) -> Option<&ConnectTarget> {
        self.endpoints.get(&endpoint)?.target()
    }

    /// Returns the retry scheduler of a connecting endpoint.
    #[must_use]
    pub fn retry_scheduler(&self, endpoint: EndpointId) -> Option<&RetryScheduler> {
        self.endpoints.get(&endpoint)?.retry()
    }

    /// Returns the session of a connecting endpoint that is still waiting
    /// for its handshake.
    #[must_use]
    pub fn pending_session(&self, endpoint: EndpointId) -> Option<&ClientSession> {
        self.endpoints.get(&endpoint)?.pending()
    }

    // ------------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------------

    /// Returns the number of established or closing sessions of `endpoint`.
    #[must_use]
    pub fn client_count(&self, endpoint: EndpointId) -> usize {
        self.endpoints
            .get(&endpoint)
            .map_or(0, |endpoint| endpoint.clients().len())
    }

    /// Returns the `index`-th session of `endpoint` in registration order.
    #[must_use]
    pub fn client_at(&self, endpoint: EndpointId, index: usize) -> Option<SessionId> {
        self.endpoints.get(&endpoint)?.clients().get(index).copied()
    }

    /// Returns a snapshot of the sessions of `endpoint` in registration order.
    #[must_use]
    pub fn clients(&self, endpoint: EndpointId) -> Vec<SessionId> {
        self.endpoints
            .get(&endpoint)
            .map(|endpoint| endpoint.clients().to_vec())
            .unwrap_or_default()
    }

    fn next_endpoint_id(&mut self) -> Result<EndpointId> {
        u32::try_from(self.endpoint_ids.next())
            .map(EndpointId::new)
            .map_err(|_| Error::config("endpoint IDs exhausted"))
    }

    /// Splits the context into the endpoint table and the state lent to
    /// endpoint transitions.
    fn parts(&mut self) -> (&mut FxHashMap<EndpointId, Endpoint>, Shared<'_>) {
        (
            &mut self.endpoints,
            Shared {
                transport: &mut self.transport,
                allocator: &*self.allocator,
                registry: &mut self.registry,
            },
        )
    }
}

// ============================================================================
// Context - Sessions
// ============================================================================

impl<T: Transport> Context<T> {
    /// Returns a read-only view of a session.
    #[must_use]
    pub fn session(&self, session: SessionId) -> Option<&ClientSession> {
        let endpoint = self.registry.owner(session)?;
        self.endpoints.get(&endpoint)?.session(session)
    }

    /// Returns the endpoint that owns `session`.
    #[inline]
    #[must_use]
    pub fn owning_endpoint(&self, session: SessionId) -> Option<EndpointId> {
        self.registry.owner(session)
    }

    /// Returns the user-data block of a session mutably.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for an unknown ID.
    pub fn user_data_mut(&mut self, session: SessionId) -> Result<&mut [u8]> {
        let entry = self.session_entry(session)?;
        Ok(entry.user_data_mut())
    }

    /// Enqueues `payload` on a session.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] for an unknown ID
    /// - [`Error::SessionNotReady`] if the session is not established
    /// - [`Error::PayloadTooLarge`] / [`Error::QueueFull`] from the outbound queue
    pub fn send(&mut self, session: SessionId, payload: &[u8]) -> Result<()> {
        let endpoint = self
            .registry
            .owner(session)
            .ok_or_else(|| Error::session_not_found(session))?;

        let entry = self
            .endpoints
            .get_mut(&endpoint)
            .and_then(|endpoint| endpoint.session_mut(session))
            .ok_or_else(|| Error::session_not_found(session))?;

        entry.send(&mut self.transport, payload)
    }

    /// Consumes the oldest inbound message of a session into `buf`.
    ///
    /// Returns `Ok(0)` if nothing is pending.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] for an unknown ID
    /// - [`Error::SessionNotReady`] if the session has no queues
    /// - [`Error::BufferTooSmall`] if `buf` is shorter than the message
    pub fn receive(&mut self, session: SessionId, buf: &mut [u8]) -> Result<usize> {
        self.session_entry(session)?.receive(buf)
    }

    /// Enqueues `payload` on every established session of `endpoint`.
    ///
    /// Returns the number of sessions that accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EndpointNotFound`] for an unknown ID.
    pub fn broadcast(&mut self, endpoint: EndpointId, payload: &[u8]) -> Result<usize> {
        let entry = self
            .endpoints
            .get_mut(&endpoint)
            .ok_or_else(|| Error::endpoint_not_found(endpoint))?;

        Ok(entry.broadcast(&mut self.transport, payload))
    }

    fn session_entry(&mut self, session: SessionId) -> Result<&mut ClientSession> {
        let endpoint = self
            .registry
            .owner(session)
            .ok_or_else(|| Error::session_not_found(session))?;

        self.endpoints
            .get_mut(&endpoint)
            .and_then(|endpoint| endpoint.session_mut(session))
            .ok_or_else(|| Error::session_not_found(session))
    }
}

// ============================================================================
// Context - Event Routing
// ============================================================================

impl<T: Transport> Context<T> {
    /// Applies one transport event.
    ///
    /// Events for unknown handles, timers or endpoints are ignored; this is
    /// what makes teardown idempotent when an error and a close both arrive.
    pub fn handle_event(&mut self, event: TransportEvent) {
        let (endpoints, mut shared) = self.parts();

        match event {
            TransportEvent::Established { endpoint, handle } => {
                match endpoints.get_mut(&endpoint) {
                    Some(entry) => entry.on_established(&mut shared, handle),
                    None => {
                        debug!(endpoint_id = %endpoint, handle = %handle, "Handshake for unknown endpoint, closing");
                        shared.transport.close(handle);
                    }
                }
            }

            TransportEvent::Writable { handle } => {
                if let Some(entry) = route(endpoints, shared.registry, handle) {
                    entry.on_writable(&mut shared, handle);
                }
            }

            TransportEvent::Received { handle, payload } => {
                if let Some(entry) = route(endpoints, shared.registry, handle) {
                    entry.on_received(&mut shared, handle, &payload);
                }
            }

            TransportEvent::ConnectionError { handle, reason } => {
                if let Some(entry) = route(endpoints, shared.registry, handle) {
                    entry.on_connection_error(&mut shared, handle, reason);
                }
            }

            TransportEvent::Closed { handle } => {
                if let Some(entry) = route(endpoints, shared.registry, handle) {
                    entry.on_closed(&mut shared, handle);
                }
            }

            TransportEvent::TimerFired { timer } => {
                let Some(owner) = shared.registry.timer_owner(timer) else {
                    debug!(timer = %timer, "Ignoring unknown timer");
                    return;
                };
                if let Some(entry) = endpoints.get_mut(&owner) {
                    entry.on_timer(&mut shared, timer);
                }
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Finds the endpoint a connection handle belongs to.
fn route<'e>(
    endpoints: &'e mut FxHashMap<EndpointId, Endpoint>,
    registry: &Registry,
    handle: ConnectionHandle,
) -> Option<&'e mut Endpoint> {
    let Some(endpoint) = registry.route(handle) else {
        debug!(handle = %handle, "Ignoring event for unknown connection");
        return None;
    };
    endpoints.get_mut(&endpoint)
}

// ============================================================================
// Tests
// ============================================================================
