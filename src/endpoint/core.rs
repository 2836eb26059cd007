//! Endpoint state and per-event session transitions.
//!
//! An endpoint owns its handler, its sessions and, when connecting, the
//! pending session and its [`RetryScheduler`]. Every transition receives the
//! context state it needs through [`Shared`], so the lookup tables kept by
//! the [`Context`](crate::Context) stay consistent with endpoint ownership.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use tracing::{debug, error, info, trace, warn};

use crate::alloc::BufferAllocator;
use crate::context::{RetryPolicy, SessionLimits};
use crate::event::{Disposition, Event, EventHandler};
use crate::identifiers::{ConnectionHandle, EndpointId, IdSequence, SessionId, TimerId};
use crate::session::client::Flush;
use crate::session::{Client, ClientSession, SessionState};
use crate::transport::{ConnectTarget, Transport};

use super::retry::RetryScheduler;

// ============================================================================
// Registry
// ============================================================================

/// Cross-endpoint lookup tables kept by the context.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    /// Session ID source.
    session_ids: IdSequence,
    /// Live connection handles (established and in-flight attempts).
    routes: FxHashMap<ConnectionHandle, EndpointId>,
    /// Sessions (established and pending) by owning endpoint.
    owners: FxHashMap<SessionId, EndpointId>,
    /// Outstanding retry timers.
    timers: FxHashMap<TimerId, EndpointId>,
}

impl Registry {
    /// Returns the endpoint a connection handle belongs to.
    #[inline]
    pub(crate) fn route(&self, handle: ConnectionHandle) -> Option<EndpointId> {
        self.routes.get(&handle).copied()
    }

    /// Returns the endpoint that owns `session`.
    #[inline]
    pub(crate) fn owner(&self, session: SessionId) -> Option<EndpointId> {
        self.owners.get(&session).copied()
    }

    /// Returns the endpoint waiting on `timer`.
    #[inline]
    pub(crate) fn timer_owner(&self, timer: TimerId) -> Option<EndpointId> {
        self.timers.get(&timer).copied()
    }

    fn next_session_id(&mut self) -> SessionId {
        SessionId::new(self.session_ids.next())
    }
}

// ============================================================================
// Shared
// ============================================================================

/// Context state lent to an endpoint for one operation.
pub(crate) struct Shared<'a> {
    pub(crate) transport: &'a mut dyn Transport,
    pub(crate) allocator: &'a dyn BufferAllocator,
    pub(crate) registry: &'a mut Registry,
}

// ============================================================================
// Role
// ============================================================================

/// Connecting half of an endpoint.
struct Connector {
    target: ConnectTarget,
    retry: RetryScheduler,
    /// Session waiting for a handshake; `None` once established or abandoned.
    pending: Option<ClientSession>,
}

impl Connector {
    fn is_pending(&self, handle: ConnectionHandle) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.handle() == Some(handle))
    }
}

enum Role {
    Listening { port: u16 },
    Connecting(Connector),
}

// ============================================================================
// Endpoint
// ============================================================================

/// A listening or connecting endpoint and the sessions it spawned.
pub(crate) struct Endpoint {
    id: EndpointId,
    role: Role,
    handler: EventHandler,
    user_data_size: usize,
    limits: SessionLimits,
    /// Established and closing sessions.
    sessions: FxHashMap<SessionId, ClientSession>,
    handles: FxHashMap<ConnectionHandle, SessionId>,
    /// Registration order of `sessions`.
    order: Vec<SessionId>,
}

impl Endpoint {
    /// Creates a listening endpoint bound to `port`.
    pub(crate) fn listening(
        id: EndpointId,
        port: u16,
        handler: EventHandler,
        user_data_size: usize,
        limits: SessionLimits,
    ) -> Self {
        Self::with_role(id, Role::Listening { port }, handler, user_data_size, limits)
    }

    /// Creates a connecting endpoint. Call [`Endpoint::start`] to connect.
    pub(crate) fn connecting(
        id: EndpointId,
        target: ConnectTarget,
        policy: RetryPolicy,
        handler: EventHandler,
        user_data_size: usize,
        limits: SessionLimits,
    ) -> Self {
        let connector = Connector {
            target,
            retry: RetryScheduler::new(policy),
            pending: None,
        };
        Self::with_role(
            id,
            Role::Connecting(connector),
            handler,
            user_data_size,
            limits,
        )
    }

    fn with_role(
        id: EndpointId,
        role: Role,
        handler: EventHandler,
        user_data_size: usize,
        limits: SessionLimits,
    ) -> Self {
        Self {
            id,
            role,
            handler,
            user_data_size,
            limits,
            sessions: FxHashMap::default(),
            handles: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Bound port when listening, remote port when connecting.
    pub(crate) fn port(&self) -> u16 {
        match &self.role {
            Role::Listening { port } => *port,
            Role::Connecting(connector) => connector.target.port,
        }
    }

    pub(crate) fn is_connecting(&self) -> bool {
        matches!(self.role, Role::Connecting(_))
    }

    pub(crate) fn target(&self) -> Option<&ConnectTarget> {
        match &self.role {
            Role::Listening { .. } => None,
            Role::Connecting(connector) => Some(&connector.target),
        }
    }

    pub(crate) fn retry(&self) -> Option<&RetryScheduler> {
        match &self.role {
            Role::Listening { .. } => None,
            Role::Connecting(connector) => Some(&connector.retry),
        }
    }

    pub(crate) fn pending(&self) -> Option<&ClientSession> {
        match &self.role {
            Role::Listening { .. } => None,
            Role::Connecting(connector) => connector.pending.as_ref(),
        }
    }

    /// Established and closing sessions in registration order.
    pub(crate) fn clients(&self) -> &[SessionId] {
        &self.order
    }

    /// Looks up an established, closing or pending session.
    pub(crate) fn session(&self, id: SessionId) -> Option<&ClientSession> {
        self.sessions
            .get(&id)
            .or_else(|| self.pending().filter(|pending| pending.id() == id))
    }

    pub(crate) fn session_mut(&mut self, id: SessionId) -> Option<&mut ClientSession> {
        if let Some(session) = self.sessions.get_mut(&id) {
            return Some(session);
        }
        match &mut self.role {
            Role::Connecting(connector) => connector
                .pending
                .as_mut()
                .filter(|pending| pending.id() == id),
            Role::Listening { .. } => None,
        }
    }

    // ------------------------------------------------------------------------
    // Connecting role
    // ------------------------------------------------------------------------

    /// Creates the pending session and issues the first attempt.
    pub(crate) fn start(&mut self, shared: &mut Shared<'_>) {
        let Role::Connecting(connector) = &mut self.role else {
            return;
        };

        let id = shared.registry.next_session_id();
        shared.registry.owners.insert(id, self.id);
        connector.pending = Some(ClientSession::new(id, self.id));

        self.attempt(shared);
    }

    /// Issues one connection attempt for the pending session.
    fn attempt(&mut self, shared: &mut Shared<'_>) {
        let Role::Connecting(connector) = &mut self.role else {
            return;
        };
        let Some(pending) = connector.pending.as_mut() else {
            return;
        };

        match shared
            .transport
            .initiate_connection(self.id, &connector.target)
        {
            Ok(handle) => {
                pending.attach(handle);
                shared.registry.routes.insert(handle, self.id);
                info!(
                    endpoint_id = %self.id,
                    handle = %handle,
                    host = %connector.target.host,
                    port = connector.target.port,
                    path = %connector.target.path,
                    attempt = pending.retry_count() + 1,
                    "Connecting"
                );
            }
            Err(e) => {
                warn!(endpoint_id = %self.id, error = %e, "Connection attempt could not be started");
                self.fail_attempt(shared, e.to_string());
            }
        }
    }

    /// Reports one failed attempt and either schedules a retry or abandons.
    fn fail_attempt(&mut self, shared: &mut Shared<'_>, reason: String) {
        let Role::Connecting(connector) = &mut self.role else {
            return;
        };
        let Some(pending) = connector.pending.as_mut() else {
            return;
        };

        if let Some(handle) = pending.handle() {
            shared.registry.routes.remove(&handle);
        }
        pending.record_failed_attempt();
        let retry_allowed = connector.retry.record_failure();

        let event = Event::connection_error(reason);
        let disposition = notify(&mut self.handler, pending, &mut *shared.transport, &event);

        if disposition.is_close() || !retry_allowed {
            info!(
                endpoint_id = %self.id,
                failures = connector.retry.consecutive_failures(),
                by_handler = disposition.is_close(),
                "Connection abandoned"
            );
            if let Some(timer) = connector.retry.outstanding() {
                shared.registry.timers.remove(&timer);
            }
            connector.retry.cancel(&mut *shared.transport);
            if let Some(mut pending) = connector.pending.take() {
                shared.registry.owners.remove(&pending.id());
                pending.release();
            }
            return;
        }

        if let Some(previous) = connector.retry.outstanding() {
            shared.registry.timers.remove(&previous);
        }
        let timer = connector.retry.schedule(&mut *shared.transport);
        shared.registry.timers.insert(timer, self.id);
    }

    /// Handles an expired retry timer.
    pub(crate) fn on_timer(&mut self, shared: &mut Shared<'_>, timer: TimerId) {
        shared.registry.timers.remove(&timer);

        let Role::Connecting(connector) = &mut self.role else {
            return;
        };
        if !connector.retry.on_fired(timer) || connector.pending.is_none() {
            return;
        }

        debug!(endpoint_id = %self.id, timer = %timer, "Retry timer fired");
        self.attempt(shared);
    }

    // ------------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------------

    /// Handles a completed handshake on `handle`.
    pub(crate) fn on_established(&mut self, shared: &mut Shared<'_>, handle: ConnectionHandle) {
        if self.is_connecting() {
            self.complete(shared, handle);
        } else {
            self.accept(shared, handle);
        }
    }

    /// Registers a newly accepted connection.
    fn accept(&mut self, shared: &mut Shared<'_>, handle: ConnectionHandle) {
        let id = shared.registry.next_session_id();
        let mut session = ClientSession::new(id, self.id);

        if let Err(e) = session.establish(handle, &self.limits, self.user_data_size, shared.allocator)
        {
            error!(
                endpoint_id = %self.id,
                handle = %handle,
                error = %e,
                "Session allocation failed, dropping connection"
            );
            shared.transport.close(handle);
            return;
        }

        self.register(shared, session, handle);
    }

    /// Promotes the pending session once its attempt succeeded.
    fn complete(&mut self, shared: &mut Shared<'_>, handle: ConnectionHandle) {
        let Role::Connecting(connector) = &mut self.role else {
            return;
        };
        if !connector.is_pending(handle) {
            debug!(endpoint_id = %self.id, handle = %handle, "Ignoring handshake of unknown attempt");
            shared.transport.close(handle);
            return;
        }
        let Some(mut pending) = connector.pending.take() else {
            return;
        };

        if let Err(e) = pending.establish(handle, &self.limits, self.user_data_size, shared.allocator)
        {
            error!(
                endpoint_id = %self.id,
                handle = %handle,
                error = %e,
                "Session allocation failed, closing connection"
            );
            shared.transport.close(handle);
            connector.pending = Some(pending);
            self.fail_attempt(shared, e.to_string());
            return;
        }

        connector.retry.reset();
        self.register(shared, pending, handle);
    }

    /// Adds an established session and delivers `Connected`.
    fn register(&mut self, shared: &mut Shared<'_>, session: ClientSession, handle: ConnectionHandle) {
        let id = session.id();
        info!(
            endpoint_id = %self.id,
            session_id = %id,
            handle = %handle,
            "Session established"
        );

        shared.registry.routes.insert(handle, self.id);
        shared.registry.owners.insert(id, self.id);
        self.handles.insert(handle, id);
        self.order.push(id);
        self.sessions.insert(id, session);

        self.dispatch(shared, id, &Event::Connected);
    }

    /// Queues one inbound message.
    pub(crate) fn on_received(
        &mut self,
        shared: &mut Shared<'_>,
        handle: ConnectionHandle,
        payload: &[u8],
    ) {
        let Some(&id) = self.handles.get(&handle) else {
            debug!(endpoint_id = %self.id, handle = %handle, "Ignoring data before handshake");
            return;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        let event = match session.accept_inbound(payload) {
            Ok(()) => {
                trace!(session_id = %id, len = payload.len(), "Message received");
                Event::Received
            }
            Err(e) => {
                warn!(
                    session_id = %id,
                    size = payload.len(),
                    dropped = session.dropped_count(),
                    error = %e,
                    "Inbound message dropped"
                );
                Event::ReceiveDropped {
                    size: payload.len(),
                }
            }
        };

        self.dispatch(shared, id, &event);
    }

    /// Writes at most one queued message.
    pub(crate) fn on_writable(&mut self, shared: &mut Shared<'_>, handle: ConnectionHandle) {
        let Some(&id) = self.handles.get(&handle) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        match session.flush(&mut *shared.transport) {
            Flush::Idle => {}
            Flush::Sent => self.dispatch(shared, id, &Event::Sent),
            Flush::Failed(e) => {
                error!(session_id = %id, handle = %handle, error = %e, "Write failed, aborting session");
                self.abort(shared, id, e.to_string());
            }
        }
    }

    /// Handles a failed attempt or a failure of an established session.
    pub(crate) fn on_connection_error(
        &mut self,
        shared: &mut Shared<'_>,
        handle: ConnectionHandle,
        reason: String,
    ) {
        if let Some(&id) = self.handles.get(&handle) {
            warn!(session_id = %id, handle = %handle, reason = %reason, "Connection error");
            self.abort(shared, id, reason);
            return;
        }

        if let Role::Connecting(connector) = &self.role
            && connector.is_pending(handle)
        {
            warn!(endpoint_id = %self.id, handle = %handle, reason = %reason, "Connection attempt failed");
            self.fail_attempt(shared, reason);
            return;
        }

        debug!(endpoint_id = %self.id, handle = %handle, "Ignoring error of unknown connection");
    }

    /// Handles the transport closing `handle`.
    pub(crate) fn on_closed(&mut self, shared: &mut Shared<'_>, handle: ConnectionHandle) {
        if let Some(&id) = self.handles.get(&handle) {
            self.teardown(shared, id);
            return;
        }

        if let Role::Connecting(connector) = &self.role
            && connector.is_pending(handle)
        {
            self.fail_attempt(shared, "connection closed before handshake".to_string());
        }
    }

    // ------------------------------------------------------------------------
    // Application operations
    // ------------------------------------------------------------------------

    /// Enqueues `payload` on every established session.
    ///
    /// Returns the number of sessions that accepted it.
    pub(crate) fn broadcast(&mut self, transport: &mut dyn Transport, payload: &[u8]) -> usize {
        let mut accepted = 0;
        for id in &self.order {
            if let Some(session) = self.sessions.get_mut(id)
                && session.is_established()
                && session.send(transport, payload).is_ok()
            {
                accepted += 1;
            }
        }
        accepted
    }

    /// Tears the endpoint down.
    ///
    /// Sessions still registered are closed at the transport and released
    /// without events.
    pub(crate) fn shutdown(mut self, shared: &mut Shared<'_>) {
        if let Role::Connecting(connector) = &mut self.role {
            if let Some(timer) = connector.retry.outstanding() {
                shared.registry.timers.remove(&timer);
            }
            connector.retry.cancel(&mut *shared.transport);

            if let Some(mut pending) = connector.pending.take() {
                if let Some(handle) = pending.handle() {
                    shared.registry.routes.remove(&handle);
                    shared.transport.close(handle);
                }
                shared.registry.owners.remove(&pending.id());
                pending.release();
            }
        }

        for id in std::mem::take(&mut self.order) {
            let Some(mut session) = self.sessions.remove(&id) else {
                continue;
            };
            warn!(
                endpoint_id = %self.id,
                session_id = %id,
                state = %session.state(),
                "Session still open at endpoint deletion, releasing"
            );
            shared.registry.owners.remove(&id);
            if let Some(handle) = session.handle() {
                shared.registry.routes.remove(&handle);
                shared.transport.close(handle);
            }
            session.release();
        }

        shared.transport.unregister(self.id);
        info!(endpoint_id = %self.id, "Endpoint deleted");
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Delivers `event` to an established session and applies the verdict.
    fn dispatch(&mut self, shared: &mut Shared<'_>, id: SessionId, event: &Event) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        let disposition = notify(&mut self.handler, session, &mut *shared.transport, event);
        if disposition.is_close() {
            request_close(session, &mut *shared.transport);
        }
    }

    /// Reports `reason`, tears the session down and closes its connection.
    fn abort(&mut self, shared: &mut Shared<'_>, id: SessionId, reason: String) {
        if let Some(session) = self.sessions.get_mut(&id) {
            let event = Event::connection_error(reason);
            notify(&mut self.handler, session, &mut *shared.transport, &event);
        }

        if let Some(handle) = self.teardown(shared, id) {
            shared.transport.close(handle);
        }
    }

    /// Delivers `Closed`, then releases the session and forgets its handle.
    ///
    /// Returns the handle the session was using.
    fn teardown(&mut self, shared: &mut Shared<'_>, id: SessionId) -> Option<ConnectionHandle> {
        let mut session = self.sessions.remove(&id)?;
        self.order.retain(|other| *other != id);
        shared.registry.owners.remove(&id);

        let handle = session.handle();
        if let Some(handle) = handle {
            self.handles.remove(&handle);
            shared.registry.routes.remove(&handle);
        }

        session.begin_close();
        notify(&mut self.handler, &mut session, &mut *shared.transport, &Event::Closed);

        if session.release() {
            info!(
                endpoint_id = %self.id,
                session_id = %id,
                dropped = session.dropped_count(),
                "Session closed"
            );
        }

        handle
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("connecting", &self.is_connecting())
            .field("port", &self.port())
            .field("sessions", &self.order.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Runs the handler for one event.
fn notify(
    handler: &mut EventHandler,
    session: &mut ClientSession,
    transport: &mut dyn Transport,
    event: &Event,
) -> Disposition {
    trace!(session_id = %session.id(), event = event.name(), "Dispatching event");
    let mut client = Client::new(session, transport);
    handler(&mut client, event)
}

/// Asks the transport to close an established session.
fn request_close(session: &mut ClientSession, transport: &mut dyn Transport) {
    if session.state() != SessionState::Established {
        return;
    }

    session.begin_close();
    if let Some(handle) = session.handle() {
        debug!(session_id = %session.id(), handle = %handle, "Handler requested close");
        transport.close(handle);
    }
}
