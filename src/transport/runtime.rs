//! Tokio and tokio-tungstenite transport provider.
//!
//! I/O tasks (accept loops, connection loops, timers) run on the tokio
//! runtime and report through one unbounded channel. The session layer pulls
//! from that channel with [`TokioTransport::next_event`] or, more commonly,
//! [`Context::service`], and never shares state with the tasks.
//!
//! # Writable Notifications
//!
//! Each connection has at most one frame in flight. A writable request made
//! while a frame is still in flight is held until the connection task reports
//! that the socket took it. A peer that stops reading therefore stalls the
//! session's outbound queue, and `send` reports [`Error::QueueFull`].
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ws_session::{Context, Disposition, ListenOptions, TokioTransport};
//!
//! let mut context = Context::new(TokioTransport::new()?);
//! let server = context.listen(ListenOptions::ephemeral(), |_, _| Disposition::Continue)?;
//! println!("listening on {:?}", context.port(server));
//!
//! loop {
//!     context.service(Duration::from_millis(100)).await;
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionHandle, EndpointId, IdSequence, TimerId};

use super::connection::{self, IoEvent, IoSender, Outgoing};
use super::millis;
use super::server::{self, HandleSource};
use super::{ConnectTarget, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Default limit for one connection attempt, handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum events applied by one [`Context::service`] call.
const MAX_BATCH: usize = 1024;

/// Longest single wait inside [`Context::run_until`].
const SERVICE_SLICE: Duration = Duration::from_millis(50);

// ============================================================================
// Link
// ============================================================================

/// Transport-side state of one open connection.
#[derive(Debug)]
struct Link {
    outgoing: Outgoing,
    /// A frame was handed to the task and has not drained yet.
    in_flight: bool,
    /// A writable request arrived while `in_flight`.
    wants_writable: bool,
}

impl Link {
    fn new(outgoing: Outgoing) -> Self {
        Self {
            outgoing,
            in_flight: false,
            wants_writable: false,
        }
    }
}

// ============================================================================
// TokioTransport
// ============================================================================

/// [`Transport`] over tokio-tungstenite WebSockets.
pub struct TokioTransport {
    /// Runtime the I/O tasks are spawned on.
    runtime: Handle,
    /// Cloned into every I/O task.
    io_tx: IoSender,
    io_rx: mpsc::UnboundedReceiver<IoEvent>,
    /// Events generated locally (writable notifications).
    ready: VecDeque<TransportEvent>,
    /// Handles with a writable notification queued in `ready`.
    writable: FxHashSet<ConnectionHandle>,
    /// Open connections.
    connections: FxHashMap<ConnectionHandle, Link>,
    /// Connection attempts still in the handshake.
    attempts: FxHashMap<ConnectionHandle, JoinHandle<()>>,
    /// Accept loops by endpoint.
    listeners: FxHashMap<EndpointId, JoinHandle<()>>,
    /// Outstanding timers.
    timers: FxHashMap<TimerId, JoinHandle<()>>,
    handles: HandleSource,
    timer_ids: IdSequence,
    connect_timeout: Duration,
}

// ============================================================================
// TokioTransport - Construction
// ============================================================================

impl TokioTransport {
    /// Creates a transport on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a tokio runtime.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::config(format!("TokioTransport needs a tokio runtime: {e}")))?;
        Ok(Self::with_runtime(runtime))
    }

    /// Creates a transport that spawns its tasks on `runtime`.
    #[must_use]
    pub fn with_runtime(runtime: Handle) -> Self {
        let (io_tx, io_rx) = mpsc::unbounded_channel();

        Self {
            runtime,
            io_tx,
            io_rx,
            ready: VecDeque::new(),
            writable: FxHashSet::default(),
            connections: FxHashMap::default(),
            attempts: FxHashMap::default(),
            listeners: FxHashMap::default(),
            timers: FxHashMap::default(),
            handles: HandleSource::default(),
            timer_ids: IdSequence::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the limit for one connection attempt.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Returns the number of open connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the number of outstanding timers.
    #[inline]
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}

impl fmt::Debug for TokioTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioTransport")
            .field("connections", &self.connections.len())
            .field("attempts", &self.attempts.len())
            .field("listeners", &self.listeners.len())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TokioTransport - Events
// ============================================================================

impl TokioTransport {
    /// Returns the next event, waiting at most `wait` for I/O.
    pub async fn next_event(&mut self, wait: Duration) -> Option<TransportEvent> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(event) = self.pop_ready() {
                return Some(event);
            }

            let io = match timeout(deadline.saturating_duration_since(Instant::now()), self.io_rx.recv())
                .await
            {
                Ok(Some(io)) => io,
                Ok(None) | Err(_) => return None,
            };

            if let Some(event) = self.absorb(io) {
                return Some(event);
            }
        }
    }

    /// Returns the next event without waiting.
    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.pop_ready() {
                return Some(event);
            }

            let io = self.io_rx.try_recv().ok()?;
            if let Some(event) = self.absorb(io) {
                return Some(event);
            }
        }
    }

    fn push_writable(&mut self, handle: ConnectionHandle) {
        if self.writable.insert(handle) {
            self.ready.push_back(TransportEvent::Writable { handle });
        }
    }

    fn pop_ready(&mut self) -> Option<TransportEvent> {
        let event = self.ready.pop_front()?;
        if let TransportEvent::Writable { handle } = &event {
            self.writable.remove(handle);
        }
        Some(event)
    }

    /// Updates bookkeeping for one I/O report.
    ///
    /// Returns `None` for reports the session layer must not see.
    fn absorb(&mut self, io: IoEvent) -> Option<TransportEvent> {
        match io {
            IoEvent::Opened {
                endpoint,
                handle,
                outgoing,
            } => {
                self.attempts.remove(&handle);
                self.connections.insert(handle, Link::new(outgoing));
                Some(TransportEvent::Established { endpoint, handle })
            }

            IoEvent::Drained { handle } => {
                let link = self.connections.get_mut(&handle)?;
                link.in_flight = false;
                if std::mem::take(&mut link.wants_writable) {
                    self.push_writable(handle);
                }
                None
            }

            IoEvent::Transport(event) => match event {
                TransportEvent::TimerFired { timer } => {
                    // Cancelled while the fire was in flight.
                    self.timers.remove(&timer).map(|_| event)
                }
                TransportEvent::ConnectionError { handle, .. } => {
                    self.attempts.remove(&handle);
                    Some(event)
                }
                TransportEvent::Closed { handle } => {
                    self.connections.remove(&handle);
                    Some(event)
                }
                other => Some(other),
            },
        }
    }
}

// ============================================================================
// TokioTransport - Transport
// ============================================================================

impl Transport for TokioTransport {
    fn listen(&mut self, endpoint: EndpointId, addr: SocketAddr) -> Result<u16> {
        let (port, task) = server::listen(
            &self.runtime,
            endpoint,
            addr,
            self.handles.clone(),
            self.io_tx.clone(),
        )?;

        if let Some(previous) = self.listeners.insert(endpoint, task) {
            previous.abort();
        }
        Ok(port)
    }

    fn initiate_connection(
        &mut self,
        endpoint: EndpointId,
        target: &ConnectTarget,
    ) -> Result<ConnectionHandle> {
        let url = target.url()?.to_string();
        let handle = self.handles.next();
        let io = self.io_tx.clone();
        let connect_timeout = self.connect_timeout;

        debug!(endpoint_id = %endpoint, handle = %handle, url = %url, "Starting connection attempt");

        let task = self.runtime.spawn(async move {
            let reason = match timeout(connect_timeout, tokio_tungstenite::connect_async(url)).await {
                Ok(Ok((ws_stream, _response))) => {
                    connection::spawn(endpoint, handle, ws_stream, io);
                    return;
                }
                Ok(Err(e)) => Error::connection(e.to_string()).to_string(),
                Err(_) => Error::timeout("connect", millis(connect_timeout)).to_string(),
            };

            let _ = io.send(IoEvent::Transport(TransportEvent::ConnectionError {
                handle,
                reason,
            }));
        });

        self.attempts.insert(handle, task);
        Ok(handle)
    }

    fn request_writable(&mut self, handle: ConnectionHandle) {
        let Some(link) = self.connections.get_mut(&handle) else {
            return;
        };

        if link.in_flight {
            trace!(handle = %handle, "Writable deferred until frame drains");
            link.wants_writable = true;
        } else {
            self.push_writable(handle);
        }
    }

    fn write(&mut self, handle: ConnectionHandle, payload: &[u8]) -> Result<usize> {
        let link = self
            .connections
            .get_mut(&handle)
            .ok_or(Error::ConnectionClosed)?;

        if link.in_flight {
            return Err(Error::connection("write before the previous frame drained"));
        }
        link.outgoing.try_frame(payload.to_vec())?;
        link.in_flight = true;

        trace!(handle = %handle, len = payload.len(), "Frame handed to connection");
        Ok(payload.len())
    }

    fn close(&mut self, handle: ConnectionHandle) {
        if let Some(link) = self.connections.remove(&handle) {
            link.outgoing.close();
        }
        if let Some(attempt) = self.attempts.remove(&handle) {
            attempt.abort();
        }
        self.writable.remove(&handle);
        self.ready
            .retain(|event| !matches!(event, TransportEvent::Writable { handle: h } if *h == handle));
    }

    fn schedule_timer(&mut self, delay: Duration) -> TimerId {
        let timer = TimerId::new(self.timer_ids.next());
        let io = self.io_tx.clone();

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = io.send(IoEvent::Transport(TransportEvent::TimerFired { timer }));
        });

        self.timers.insert(timer, task);
        timer
    }

    fn cancel_timer(&mut self, timer: TimerId) {
        if let Some(task) = self.timers.remove(&timer) {
            task.abort();
        }
    }

    fn unregister(&mut self, endpoint: EndpointId) {
        if let Some(task) = self.listeners.remove(&endpoint) {
            task.abort();
            debug!(endpoint_id = %endpoint, "Listener stopped");
        }
    }
}

impl Drop for TokioTransport {
    fn drop(&mut self) {
        for (_, link) in self.connections.drain() {
            link.outgoing.close();
        }
        for (_, task) in self.attempts.drain() {
            task.abort();
        }
        for (_, task) in self.listeners.drain() {
            task.abort();
        }
        for (_, task) in self.timers.drain() {
            task.abort();
        }
    }
}

// ============================================================================
// Context - Driving
// ============================================================================

impl Context<TokioTransport> {
    /// Waits up to `wait` for an event, then applies it and everything
    /// already queued behind it.
    ///
    /// Returns the number of events applied.
    pub async fn service(&mut self, wait: Duration) -> usize {
        let Some(first) = self.transport_mut().next_event(wait).await else {
            return 0;
        };
        self.handle_event(first);

        let mut handled = 1;
        while handled < MAX_BATCH {
            let Some(event) = self.transport_mut().poll_event() else {
                break;
            };
            self.handle_event(event);
            handled += 1;
        }

        handled
    }

    /// Services events until `done` returns `true`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if `done` is still `false` after `limit`.
    pub async fn run_until<F>(&mut self, limit: Duration, mut done: F) -> Result<()>
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = Instant::now() + limit;

        while !done(self) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(limit_ms = millis(limit), "Condition not reached in time");
                return Err(Error::timeout("run_until", millis(limit)));
            }
            self.service(remaining.min(SERVICE_SLICE)).await;
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
