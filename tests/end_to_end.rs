//! End-to-end tests over real sockets with `TokioTransport`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use ws_session::{
    ConnectOptions, Context, Disposition, Event, ListenOptions, RetryPolicy, SessionLimits,
    TokioTransport,
};

const LIMIT: Duration = Duration::from_secs(10);

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn context() -> anyhow::Result<Context<TokioTransport>> {
    init_tracing();
    Ok(Context::new(TokioTransport::new()?))
}

/// Listens on an ephemeral port and echoes every message.
fn echo_server(context: &mut Context<TokioTransport>) -> anyhow::Result<(ws_session::EndpointId, u16)> {
    let server = context.listen(ListenOptions::ephemeral(), |client, event| {
        if *event == Event::Received {
            let mut buf = [0u8; 1024];
            if let Ok(len) = client.receive(&mut buf) {
                let _ = client.send(&buf[..len]);
            }
        }
        Disposition::Continue
    })?;

    let port = context
        .port(server)
        .ok_or_else(|| anyhow::anyhow!("listening endpoint has no port"))?;
    Ok((server, port))
}

fn unused_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_ping_pong_then_disconnect() -> anyhow::Result<()> {
    let mut context = context()?;

    // Server side: every inbound message, and whether its reply was queued.
    let server_inbox = Arc::new(Mutex::new(Vec::new()));
    let pong_queued = Arc::new(AtomicUsize::new(0));
    let (inbox, queued) = (Arc::clone(&server_inbox), Arc::clone(&pong_queued));

    let server = context.listen(ListenOptions::ephemeral(), move |client, event| {
        if *event == Event::Received {
            let mut buf = [0u8; 64];
            if let Ok(len) = client.receive(&mut buf) {
                inbox.lock().unwrap().push(buf[..len].to_vec());
                if client.send(b"pong").is_ok() {
                    queued.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        Disposition::Continue
    })?;
    let port = context
        .port(server)
        .ok_or_else(|| anyhow::anyhow!("listening endpoint has no port"))?;

    let client_inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&client_inbox);

    let client = context.connect(ConnectOptions::new("127.0.0.1", port), move |client, event| {
        match event {
            Event::Connected => {
                let _ = client.send(b"ping");
                Disposition::Continue
            }
            Event::Received => {
                let mut buf = [0u8; 64];
                if let Ok(len) = client.receive(&mut buf) {
                    sink.lock().unwrap().push(buf[..len].to_vec());
                }
                Disposition::CloseSession
            }
            _ => Disposition::Continue,
        }
    })?;

    context
        .run_until(LIMIT, |ctx| {
            !client_inbox.lock().unwrap().is_empty()
                && ctx.client_count(server) == 0
                && ctx.client_count(client) == 0
        })
        .await?;

    assert_eq!(*server_inbox.lock().unwrap(), vec![b"ping".to_vec()]);
    assert_eq!(pong_queued.load(Ordering::SeqCst), 1);
    assert_eq!(*client_inbox.lock().unwrap(), vec![b"pong".to_vec()]);
    assert_eq!(context.client_count(server), 0);
    Ok(())
}

#[tokio::test]
async fn test_enumeration_after_n_connections() -> anyhow::Result<()> {
    const N: usize = 5;

    let mut context = context()?;
    let (server, port) = echo_server(&mut context)?;

    let mut clients = Vec::new();
    for _ in 0..N {
        let endpoint =
            context.connect(ConnectOptions::new("127.0.0.1", port), |_, _| Disposition::Continue)?;
        clients.push(endpoint);
    }

    context
        .run_until(LIMIT, |ctx| ctx.client_count(server) == N)
        .await?;

    let mut ids = context.clients(server);
    assert_eq!(ids.len(), N);
    for (index, id) in ids.iter().enumerate() {
        assert_eq!(context.client_at(server, index), Some(*id));
        assert_eq!(context.owning_endpoint(*id), Some(server));
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), N);

    // Deleting the connecting side closes its connections.
    for endpoint in clients {
        context.delete(endpoint)?;
    }
    context
        .run_until(LIMIT, |ctx| ctx.client_count(server) == 0)
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_retry_against_closed_port() -> anyhow::Result<()> {
    let mut context = context()?;
    let port = unused_port()?;

    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);

    let options = ConnectOptions::new("127.0.0.1", port)
        .with_retry(RetryPolicy::fixed(Duration::from_millis(50)).with_max_attempts(3));
    let endpoint = context.connect(options, move |_, event| {
        if matches!(event, Event::ConnectionError { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Disposition::Continue
    })?;

    context
        .run_until(LIMIT, |ctx| ctx.pending_session(endpoint).is_none())
        .await?;

    assert_eq!(errors.load(Ordering::SeqCst), 3);
    let retry = context
        .retry_scheduler(endpoint)
        .ok_or_else(|| anyhow::anyhow!("connecting endpoint has no scheduler"))?;
    assert_eq!(retry.scheduled(), 2);
    assert_eq!(retry.fired(), 2);
    assert_eq!(retry.outstanding(), None);
    Ok(())
}

#[tokio::test]
async fn test_inbound_overflow_is_reported() -> anyhow::Result<()> {
    let mut context = context()?;

    let received = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));
    let (seen, lost) = (Arc::clone(&received), Arc::clone(&dropped));

    // The server never drains its single inbound slot.
    let server = context.listen(
        ListenOptions::ephemeral().with_limits(SessionLimits::new(1, 64)),
        move |_, event| {
            match event {
                Event::Received => seen.fetch_add(1, Ordering::SeqCst),
                Event::ReceiveDropped { .. } => lost.fetch_add(1, Ordering::SeqCst),
                _ => 0,
            };
            Disposition::Continue
        },
    )?;
    let port = context.port(server).unwrap_or_default();

    let options =
        ConnectOptions::new("127.0.0.1", port).with_limits(SessionLimits::new(8, 64));
    context.connect(options, |client, event| {
        if *event == Event::Connected {
            for payload in [&b"one"[..], b"two", b"three"] {
                let _ = client.send(payload);
            }
        }
        Disposition::Continue
    })?;

    context
        .run_until(LIMIT, |_| {
            received.load(Ordering::SeqCst) + dropped.load(Ordering::SeqCst) == 3
        })
        .await?;

    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(dropped.load(Ordering::SeqCst), 2);

    let session = context
        .client_at(server, 0)
        .ok_or_else(|| anyhow::anyhow!("server session missing"))?;
    assert_eq!(context.session(session).map(|s| s.dropped_count()), Some(2));
    Ok(())
}

#[tokio::test]
async fn test_stalled_peer_fills_send_queue() -> anyhow::Result<()> {
    const PAYLOAD: usize = 64 * 1024;
    const MAX_SENDS: usize = 4096;

    let mut context = context()?;

    // A peer that completes the handshake and then never reads.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(ws_stream);
        anyhow::Ok(())
    });

    let options =
        ConnectOptions::new("127.0.0.1", port).with_limits(SessionLimits::new(2, PAYLOAD));
    let endpoint = context.connect(options, |_, _| Disposition::Continue)?;
    context
        .run_until(LIMIT, |ctx| ctx.client_count(endpoint) == 1)
        .await?;
    let session = context
        .client_at(endpoint, 0)
        .ok_or_else(|| anyhow::anyhow!("client session missing"))?;

    let payload = vec![7u8; PAYLOAD];
    let mut accepted = 0;
    let mut rejected = false;
    for _ in 0..MAX_SENDS {
        match context.send(session, &payload) {
            Ok(()) => accepted += 1,
            Err(e) if e.is_backpressure() => {
                rejected = true;
                break;
            }
            Err(e) => return Err(e.into()),
        }
        context.service(Duration::from_millis(1)).await;
    }

    assert!(rejected, "send never reported a full queue ({accepted} accepted)");
    assert!(accepted < MAX_SENDS);
    let pending = context.session(session).map(|s| s.pending_send());
    assert_eq!(pending, Some(2));

    peer.abort();
    Ok(())
}
