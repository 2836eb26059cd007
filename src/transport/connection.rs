//! Per-connection WebSocket I/O loop.
//!
//! Each open connection runs one tokio task that forwards inbound messages
//! to the transport as [`TransportEvent`]s and writes the outbound frames it
//! is handed.
//!
//! # Event Loop
//!
//! - Binary and text messages become [`TransportEvent::Received`]
//! - At most one outbound frame is in flight; [`IoEvent::Drained`] reports
//!   that the socket accepted it
//! - A read or write error becomes [`TransportEvent::ConnectionError`]
//! - The loop always ends with exactly one [`TransportEvent::Closed`]

// ============================================================================
// Imports
// ============================================================================

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionHandle, EndpointId};

use super::TransportEvent;

// ============================================================================
// Constants
// ============================================================================

/// Frames buffered between the transport and a connection task.
const FRAME_CAPACITY: usize = 1;

// ============================================================================
// Types
// ============================================================================

/// Command side of one connection task.
#[derive(Debug)]
pub(crate) struct Outgoing {
    frames: mpsc::Sender<Vec<u8>>,
    close: watch::Sender<bool>,
}

impl Outgoing {
    /// Hands one frame to the connection task without waiting.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the previous frame has not been taken yet
    /// - [`Error::ConnectionClosed`] if the task has stopped
    pub(crate) fn try_frame(&self, payload: Vec<u8>) -> Result<()> {
        self.frames.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => Error::connection("previous frame still in flight"),
            TrySendError::Closed(_) => Error::ConnectionClosed,
        })
    }

    /// Asks the task to send a close frame and stop, even mid-write.
    pub(crate) fn close(&self) {
        let _ = self.close.send(true);
    }
}

/// Report from an I/O task to the transport.
#[derive(Debug)]
pub(crate) enum IoEvent {
    /// A WebSocket handshake completed; frames go to `outgoing`.
    Opened {
        endpoint: EndpointId,
        handle: ConnectionHandle,
        outgoing: Outgoing,
    },
    /// The last frame handed to `handle` was written to the socket.
    Drained { handle: ConnectionHandle },
    /// Anything else, already in session-layer form.
    Transport(TransportEvent),
}

/// Sending half of the I/O channel.
pub(crate) type IoSender = mpsc::UnboundedSender<IoEvent>;

// ============================================================================
// Connection Task
// ============================================================================

/// Registers an established stream and spawns its I/O loop.
///
/// `Opened` is reported before the loop starts so it precedes every
/// message of the connection.
pub(crate) fn spawn<S>(
    endpoint: EndpointId,
    handle: ConnectionHandle,
    ws_stream: WebSocketStream<S>,
    io: IoSender,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_CAPACITY);
    let (close_tx, close_rx) = watch::channel(false);

    let opened = IoEvent::Opened {
        endpoint,
        handle,
        outgoing: Outgoing {
            frames: frames_tx,
            close: close_tx,
        },
    };
    if io.send(opened).is_err() {
        debug!(handle = %handle, "Transport dropped before connection opened");
        return;
    }

    tokio::spawn(run_event_loop(handle, ws_stream, frames_rx, close_rx, io));
}

/// Event loop that handles WebSocket I/O for one connection.
async fn run_event_loop<S>(
    handle: ConnectionHandle,
    ws_stream: WebSocketStream<S>,
    mut frames_rx: mpsc::Receiver<Vec<u8>>,
    mut close_rx: watch::Receiver<bool>,
    io: IoSender,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            // Close requested, or the transport dropped its side
            _ = close_rx.changed() => {
                debug!(handle = %handle, "Closing connection");
                let _ = ws_write.close().await;
                break;
            }

            // Incoming messages from the peer
            message = ws_read.next() => {
                let payload = match message {
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),

                    Some(Ok(Message::Close(_))) => {
                        debug!(handle = %handle, "WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(handle = %handle, error = %e, "WebSocket read error");
                        report_error(&io, handle, &Error::from(e));
                        break;
                    }

                    None => {
                        debug!(handle = %handle, "WebSocket stream ended");
                        break;
                    }

                    // Ping, Pong and raw frames
                    Some(Ok(_)) => continue,
                };

                trace!(handle = %handle, len = payload.len(), "Frame received");
                let received = TransportEvent::Received { handle, payload };
                if io.send(IoEvent::Transport(received)).is_err() {
                    break;
                }
            }

            // Next outbound frame
            frame = frames_rx.recv() => {
                let Some(payload) = frame else {
                    let _ = ws_write.close().await;
                    break;
                };

                let len = payload.len();
                tokio::select! {
                    sent = ws_write.send(Message::binary(payload)) => {
                        if let Err(e) = sent {
                            warn!(handle = %handle, error = %e, "WebSocket write error");
                            report_error(&io, handle, &Error::from(e));
                            break;
                        }
                    }
                    _ = close_rx.changed() => {
                        debug!(handle = %handle, "Closed with a frame in flight");
                        break;
                    }
                }

                trace!(handle = %handle, len, "Frame drained");
                if io.send(IoEvent::Drained { handle }).is_err() {
                    break;
                }
            }
        }
    }

    let _ = io.send(IoEvent::Transport(TransportEvent::Closed { handle }));
    debug!(handle = %handle, "Connection loop terminated");
}

fn report_error(io: &IoSender, handle: ConnectionHandle, error: &Error) {
    let _ = io.send(IoEvent::Transport(TransportEvent::ConnectionError {
        handle,
        reason: error.to_string(),
    }));
}
