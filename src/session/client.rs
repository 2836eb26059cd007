//! Client session state and the handler-facing [`Client`] handle.
//!
//! # State Machine
//!
//! ```text
//!  Connecting ──(handshake, queues allocated)──► Established
//!      │                                            │
//!      │ attempt failed, retries exhausted          │ transport close / error /
//!      ▼                                            ▼ CloseSession
//!  Terminated ◄──(resources released)────────── Closing
//! ```
//!
//! Only sessions of connecting endpoints pass through `Connecting`; accepted
//! sessions start out established.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::ops::Deref;

use tracing::{trace, warn};

use crate::alloc::{self, BufferAllocator};
use crate::context::SessionLimits;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionHandle, EndpointId, SessionId};
use crate::transport::Transport;

use super::queue::MessageQueue;

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connection attempt outstanding (connecting endpoints only).
    Connecting,
    /// Handshake done, queues allocated.
    Established,
    /// Close requested or in progress; no further sends.
    Closing,
    /// Resources released.
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Established => "established",
            Self::Closing => "closing",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SessionResources
// ============================================================================

/// Storage that exists exactly while the session is established.
struct SessionResources {
    inbound: MessageQueue,
    outbound: MessageQueue,
    user_data: Box<[u8]>,
}

impl SessionResources {
    /// Allocates both queues and the user-data block.
    ///
    /// A failure part way through drops whatever was already allocated.
    fn allocate(
        limits: &SessionLimits,
        user_data_size: usize,
        allocator: &dyn BufferAllocator,
    ) -> Result<Self> {
        let inbound = MessageQueue::new(limits.slot_count, limits.max_payload, allocator)?;
        let outbound = MessageQueue::new(limits.slot_count, limits.max_payload, allocator)?;
        let user_data = alloc::allocate(allocator, user_data_size)?;

        Ok(Self {
            inbound,
            outbound,
            user_data,
        })
    }
}

// ============================================================================
// Flush
// ============================================================================

/// Result of one writable opportunity.
#[derive(Debug)]
pub(crate) enum Flush {
    /// Nothing to write.
    Idle,
    /// One message written in full.
    Sent,
    /// The write failed; the session must be aborted.
    Failed(Error),
}

// ============================================================================
// ClientSession
// ============================================================================

/// One peer connection spawned from an endpoint.
///
/// Owned by its endpoint inside the [`Context`](crate::Context); applications
/// see it through [`Client`] inside handlers and through
/// [`Context::session`](crate::Context::session) outside them.
pub struct ClientSession {
    /// Session ID.
    id: SessionId,
    /// Owning endpoint (non-owning back-reference).
    endpoint: EndpointId,
    /// Lifecycle state.
    state: SessionState,
    /// Transport connection, once an attempt or accept assigned one.
    handle: Option<ConnectionHandle>,
    /// Queues and user data; `Some` exactly while established or closing.
    resources: Option<SessionResources>,
    /// Consecutive failed connection attempts before establishment.
    retry_count: u32,
    /// A writable notification is outstanding.
    write_requested: bool,
    /// Inbound messages discarded because they could not be queued.
    dropped: u64,
}

impl ClientSession {
    /// Creates a session that has not been established yet.
    pub(crate) fn new(id: SessionId, endpoint: EndpointId) -> Self {
        Self {
            id,
            endpoint,
            state: SessionState::Connecting,
            handle: None,
            resources: None,
            retry_count: 0,
            write_requested: false,
            dropped: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the endpoint that spawned this session.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the transport connection handle, if any.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.handle
    }

    /// Returns the number of consecutive failed connection attempts.
    #[inline]
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns the number of inbound messages dropped so far.
    #[inline]
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Returns `true` while sends are accepted.
    #[inline]
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Returns the number of inbound messages waiting for `receive`.
    #[must_use]
    pub fn pending_received(&self) -> usize {
        self.resources.as_ref().map_or(0, |r| r.inbound.len())
    }

    /// Returns the number of outbound messages not yet written.
    #[must_use]
    pub fn pending_send(&self) -> usize {
        self.resources.as_ref().map_or(0, |r| r.outbound.len())
    }

    /// Returns the number of free outbound slots.
    #[must_use]
    pub fn send_capacity(&self) -> usize {
        self.resources.as_ref().map_or(0, |r| r.outbound.count_free())
    }

    /// Returns the oldest inbound message without consuming it.
    #[must_use]
    pub fn peek_received(&self) -> Option<&[u8]> {
        self.resources.as_ref()?.inbound.peek_front()
    }

    /// Returns the user-data block (empty before establishment).
    #[must_use]
    pub fn user_data(&self) -> &[u8] {
        match self.resources.as_ref() {
            Some(resources) => &resources.user_data,
            None => &[],
        }
    }

    /// Returns `true` if queues and user data are currently allocated.
    #[inline]
    #[must_use]
    pub fn has_resources(&self) -> bool {
        self.resources.is_some()
    }

    // ------------------------------------------------------------------------
    // Data phase
    // ------------------------------------------------------------------------

    /// Returns the user-data block mutably (empty before establishment).
    pub fn user_data_mut(&mut self) -> &mut [u8] {
        match self.resources.as_mut() {
            Some(resources) => &mut resources.user_data,
            None => &mut [],
        }
    }

    /// Enqueues `payload` for transmission and asks for a writable slot.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotReady`] if the session is not established
    /// - [`Error::PayloadTooLarge`] if `payload` exceeds the slot size
    /// - [`Error::QueueFull`] if the outbound queue is full
    pub fn send(&mut self, transport: &mut dyn Transport, payload: &[u8]) -> Result<()> {
        let (SessionState::Established, Some(handle), Some(resources)) =
            (self.state, self.handle, self.resources.as_mut())
        else {
            return Err(Error::session_not_ready(self.id, self.state));
        };

        if let Err(e) = resources.outbound.try_enqueue(payload) {
            warn!(session_id = %self.id, error = %e, "Send rejected");
            return Err(e);
        }

        trace!(session_id = %self.id, len = payload.len(), "Message queued for send");

        if !self.write_requested {
            self.write_requested = true;
            transport.request_writable(handle);
        }

        Ok(())
    }

    /// Copies the oldest inbound message into `buf` and consumes it.
    ///
    /// Returns `Ok(0)` if nothing is pending. Works until resources are
    /// released, so a `Closed` handler can still drain the queue.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotReady`] if the session has no queues
    /// - [`Error::BufferTooSmall`] if `buf` is shorter than the message
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(resources) = self.resources.as_mut() else {
            return Err(Error::session_not_ready(self.id, self.state));
        };

        resources.inbound.pop_into(buf)
    }

    // ------------------------------------------------------------------------
    // Transitions (driven by the endpoint)
    // ------------------------------------------------------------------------

    /// Records the handle of a new connection attempt.
    pub(crate) fn attach(&mut self, handle: ConnectionHandle) {
        self.handle = Some(handle);
    }

    /// Records a failed attempt and forgets its handle.
    pub(crate) fn record_failed_attempt(&mut self) {
        self.handle = None;
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Allocates resources and enters `Established`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if any allocation fails; nothing is
    /// retained in that case and the state is unchanged.
    pub(crate) fn establish(
        &mut self,
        handle: ConnectionHandle,
        limits: &SessionLimits,
        user_data_size: usize,
        allocator: &dyn BufferAllocator,
    ) -> Result<()> {
        let resources = SessionResources::allocate(limits, user_data_size, allocator)?;

        self.handle = Some(handle);
        self.resources = Some(resources);
        self.state = SessionState::Established;
        Ok(())
    }

    /// Inserts one inbound message.
    ///
    /// # Errors
    ///
    /// Returns the queue error after counting the drop.
    pub(crate) fn accept_inbound(&mut self, payload: &[u8]) -> Result<()> {
        let Some(resources) = self.resources.as_mut() else {
            self.dropped += 1;
            return Err(Error::session_not_ready(self.id, self.state));
        };

        resources.inbound.try_enqueue(payload).inspect_err(|_| {
            self.dropped += 1;
        })
    }

    /// Handles one writable opportunity.
    ///
    /// Writes the front message in full or fails the session; never writes
    /// a partial message twice.
    pub(crate) fn flush(&mut self, transport: &mut dyn Transport) -> Flush {
        self.write_requested = false;

        let (SessionState::Established, Some(handle), Some(resources)) =
            (self.state, self.handle, self.resources.as_mut())
        else {
            return Flush::Idle;
        };

        let Some(message) = resources.outbound.peek_front() else {
            return Flush::Idle;
        };

        let expected = message.len();
        match transport.write(handle, message) {
            Ok(written) if written == expected => {}
            Ok(written) => return Flush::Failed(Error::short_write(written, expected)),
            Err(e) => return Flush::Failed(e),
        }

        resources.outbound.consume_front();
        trace!(session_id = %self.id, len = expected, "Message written");

        if !resources.outbound.is_empty() {
            self.write_requested = true;
            transport.request_writable(handle);
        }

        Flush::Sent
    }

    /// Enters `Closing`; sends are refused from here on.
    pub(crate) fn begin_close(&mut self) {
        if self.state != SessionState::Terminated {
            self.state = SessionState::Closing;
        }
    }

    /// Releases queues and user data and enters `Terminated`.
    ///
    /// Returns `true` only the first time resources were actually freed.
    pub(crate) fn release(&mut self) -> bool {
        self.state = SessionState::Terminated;
        self.write_requested = false;
        self.resources.take().is_some()
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("retry_count", &self.retry_count)
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client
// ============================================================================

/// Session handle passed to endpoint handlers.
///
/// Dereferences to [`ClientSession`] for read access; adds the operations
/// that need the transport.
pub struct Client<'a> {
    session: &'a mut ClientSession,
    transport: &'a mut dyn Transport,
}

impl<'a> Client<'a> {
    pub(crate) fn new(session: &'a mut ClientSession, transport: &'a mut dyn Transport) -> Self {
        Self { session, transport }
    }

    /// Enqueues `payload` on this session.
    ///
    /// # Errors
    ///
    /// See [`ClientSession::send`].
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.session.send(&mut *self.transport, payload)
    }

    /// Consumes the oldest inbound message into `buf`.
    ///
    /// # Errors
    ///
    /// See [`ClientSession::receive`].
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.session.receive(buf)
    }

    /// Returns the user-data block mutably.
    pub fn user_data_mut(&mut self) -> &mut [u8] {
        self.session.user_data_mut()
    }
}

impl Deref for Client<'_> {
    type Target = ClientSession;

    fn deref(&self) -> &Self::Target {
        &*self.session
    }
}

// ============================================================================
// Tests
// ============================================================================
