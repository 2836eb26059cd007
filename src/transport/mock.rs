//! Recording transport for unit testing.
//!
//! Records every call the session layer makes and lets tests script
//! failures (connect refusal, short writes, write errors) without sockets.

use std::net::SocketAddr;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionHandle, EndpointId, IdSequence, TimerId};

use super::{ConnectTarget, Transport};

/// A [`Transport`] that performs no I/O and records all calls.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    next_handle: IdSequence,
    next_timer: IdSequence,
    listen_port: u16,
    fail_listen: bool,
    fail_connect: bool,
    fail_write: bool,
    short_write: Option<usize>,
    writes: Vec<(ConnectionHandle, Vec<u8>)>,
    writable: Vec<ConnectionHandle>,
    closed: Vec<ConnectionHandle>,
    attempts: Vec<(EndpointId, ConnectionHandle)>,
    timers: FxHashMap<TimerId, Duration>,
    cancelled: Vec<TimerId>,
    unregistered: Vec<EndpointId>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self {
            listen_port: 40_000,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------------

    pub(crate) fn set_fail_listen(&mut self, fail: bool) {
        self.fail_listen = fail;
    }

    /// Makes `initiate_connection` fail synchronously.
    pub(crate) fn set_fail_connect(&mut self, fail: bool) {
        self.fail_connect = fail;
    }

    pub(crate) fn set_fail_write(&mut self, fail: bool) {
        self.fail_write = fail;
    }

    /// Caps the bytes reported by `write`.
    pub(crate) fn set_short_write(&mut self, limit: Option<usize>) {
        self.short_write = limit;
    }

    /// Allocates a handle the way an acceptor would.
    pub(crate) fn accept(&mut self) -> ConnectionHandle {
        ConnectionHandle::new(self.next_handle.next())
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub(crate) fn written(&self, handle: ConnectionHandle) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|(h, _)| *h == handle)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub(crate) fn writable_requests(&self, handle: ConnectionHandle) -> usize {
        self.writable.iter().filter(|h| **h == handle).count()
    }

    pub(crate) fn close_count(&self, handle: ConnectionHandle) -> usize {
        self.closed.iter().filter(|h| **h == handle).count()
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.attempts.len()
    }

    pub(crate) fn last_attempt(&self) -> Option<ConnectionHandle> {
        self.attempts.last().map(|(_, handle)| *handle)
    }

    /// Timers scheduled and neither cancelled nor fired, ascending.
    pub(crate) fn active_timers(&self) -> Vec<TimerId> {
        let mut timers: Vec<_> = self.timers.keys().copied().collect();
        timers.sort();
        timers
    }

    pub(crate) fn timer_delay(&self, timer: TimerId) -> Option<Duration> {
        self.timers.get(&timer).copied()
    }

    /// Marks a timer as fired, as the event loop would before reporting it.
    pub(crate) fn fire(&mut self, timer: TimerId) -> bool {
        self.timers.remove(&timer).is_some()
    }

    pub(crate) fn cancelled_timers(&self) -> &[TimerId] {
        &self.cancelled
    }

    pub(crate) fn is_unregistered(&self, endpoint: EndpointId) -> bool {
        self.unregistered.contains(&endpoint)
    }
}

impl Transport for RecordingTransport {
    fn listen(&mut self, _endpoint: EndpointId, addr: SocketAddr) -> Result<u16> {
        if self.fail_listen {
            return Err(Error::connection("listen refused"));
        }
        Ok(if addr.port() == 0 {
            self.listen_port
        } else {
            addr.port()
        })
    }

    fn initiate_connection(
        &mut self,
        endpoint: EndpointId,
        _target: &ConnectTarget,
    ) -> Result<ConnectionHandle> {
        if self.fail_connect {
            return Err(Error::connection("connect refused"));
        }
        let handle = ConnectionHandle::new(self.next_handle.next());
        self.attempts.push((endpoint, handle));
        Ok(handle)
    }

    fn request_writable(&mut self, handle: ConnectionHandle) {
        self.writable.push(handle);
    }

    fn write(&mut self, handle: ConnectionHandle, payload: &[u8]) -> Result<usize> {
        if self.fail_write {
            return Err(Error::ConnectionClosed);
        }
        let written = self
            .short_write
            .map_or(payload.len(), |limit| limit.min(payload.len()));
        self.writes.push((handle, payload[..written].to_vec()));
        Ok(written)
    }

    fn close(&mut self, handle: ConnectionHandle) {
        self.closed.push(handle);
    }

    fn schedule_timer(&mut self, delay: Duration) -> TimerId {
        let timer = TimerId::new(self.next_timer.next());
        self.timers.insert(timer, delay);
        timer
    }

    fn cancel_timer(&mut self, timer: TimerId) {
        if self.timers.remove(&timer).is_some() {
            self.cancelled.push(timer);
        }
    }

    fn unregister(&mut self, endpoint: EndpointId) {
        self.unregistered.push(endpoint);
    }
}
