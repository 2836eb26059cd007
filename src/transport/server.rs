//! WebSocket acceptor for listening endpoints.
//!
//! # Connection Flow
//!
//! 1. The listener is bound synchronously, so the actual port is known at once
//! 2. An accept loop task takes TCP connections
//! 3. Each connection is upgraded to WebSocket on its own task
//! 4. A completed upgrade is registered with [`connection::spawn`]

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::identifiers::{ConnectionHandle, EndpointId};

use super::connection::{self, IoSender};

// ============================================================================
// Constants
// ============================================================================

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// Handle Allocation
// ============================================================================

/// Connection handle source shared by the transport and its accept loops.
#[derive(Debug, Clone, Default)]
pub(crate) struct HandleSource(Arc<AtomicU64>);

impl HandleSource {
    /// Returns a fresh handle, starting at 1.
    pub(crate) fn next(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Binds `addr` and spawns the accept loop of `endpoint` on `runtime`.
///
/// Returns the bound port and the accept loop task.
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if binding fails.
pub(crate) fn listen(
    runtime: &Handle,
    endpoint: EndpointId,
    addr: SocketAddr,
    handles: HandleSource,
    io: IoSender,
) -> Result<(u16, JoinHandle<()>)> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let actual_port = listener.local_addr()?.port();

    let listener = {
        let _guard = runtime.enter();
        TcpListener::from_std(listener)?
    };

    debug!(endpoint_id = %endpoint, port = actual_port, "WebSocket server bound");

    let task = runtime.spawn(accept_loop(endpoint, listener, handles, io));
    Ok((actual_port, task))
}

/// Accepts connections until the transport goes away.
async fn accept_loop(
    endpoint: EndpointId,
    listener: TcpListener,
    handles: HandleSource,
    io: IoSender,
) {
    while !io.is_closed() {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handle = handles.next();
                debug!(endpoint_id = %endpoint, handle = %handle, ?addr, "TCP connection accepted");
                tokio::spawn(handshake(endpoint, handle, stream, io.clone()));
            }
            Err(e) => {
                warn!(endpoint_id = %endpoint, error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    debug!(endpoint_id = %endpoint, "Accept loop terminated");
}

/// Upgrades one TCP connection to WebSocket.
async fn handshake(
    endpoint: EndpointId,
    handle: ConnectionHandle,
    stream: TcpStream,
    io: IoSender,
) {
    match tokio_tungstenite::accept_async(stream).await {
        Ok(ws_stream) => {
            info!(endpoint_id = %endpoint, handle = %handle, "WebSocket connection accepted");
            connection::spawn(endpoint, handle, ws_stream, io);
        }
        Err(e) => {
            debug!(endpoint_id = %endpoint, handle = %handle, error = %e, "WebSocket upgrade failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    use tokio::sync::mpsc;

    #[test]
    fn test_handle_source_is_shared() {
        let handles = HandleSource::default();
        let clone = handles.clone();
        assert_eq!(handles.next(), ConnectionHandle::new(1));
        assert_eq!(clone.next(), ConnectionHandle::new(2));
    }

    #[tokio::test]
    async fn test_listen_random_port() {
        let (io, _rx) = mpsc::unbounded_channel();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

        let (port, task) = listen(
            &Handle::current(),
            EndpointId::new(1),
            addr,
            HandleSource::default(),
            io,
        )
        .expect("bind should succeed");

        assert!(port > 0);
        task.abort();
    }

    #[tokio::test]
    async fn test_listen_port_in_use_fails() {
        let (io, _rx) = mpsc::unbounded_channel();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let (port, task) = listen(
            &Handle::current(),
            EndpointId::new(1),
            addr,
            HandleSource::default(),
            io.clone(),
        )
        .expect("bind should succeed");

        let taken = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let result = listen(
            &Handle::current(),
            EndpointId::new(2),
            taken,
            HandleSource::default(),
            io,
        );
        assert!(result.is_err());
        task.abort();
    }
}
