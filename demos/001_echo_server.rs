//! Echo server.
//!
//! Demonstrates:
//! - Listening on a fixed port
//! - Echoing every inbound message back to its sender
//! - Per-client user data (a message counter)
//!
//! Usage:
//!   cargo run --example 001_echo_server
//!   cargo run --example 001_echo_server -- --port 9100 --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::Args;
use ws_session::{Context, Disposition, Event, ListenOptions, Result, TokioTransport};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== 001: Echo Server ===\n");

    let mut context = Context::new(TokioTransport::new()?);

    let options = ListenOptions::new(args.port).with_per_client_data_size(8);
    let server = context.listen(options, |client, event| {
        match event {
            Event::Connected => println!("[+] Session {} connected", client.id()),
            Event::Received => {
                let mut buf = [0u8; 1024];
                if let Ok(len) = client.receive(&mut buf) {
                    let count = bump_counter(client.user_data_mut());
                    println!("    Session {} message #{count} ({len} bytes)", client.id());
                    if let Err(e) = client.send(&buf[..len]) {
                        println!("    ✗ Echo failed: {e}");
                    }
                }
            }
            Event::ReceiveDropped { size } => {
                println!("    ✗ Session {} dropped {size} bytes", client.id());
            }
            Event::ConnectionError { reason } => {
                println!("    ✗ Session {} error: {reason}", client.id());
            }
            Event::Closed => println!("[-] Session {} closed", client.id()),
            Event::Sent => {}
        }
        Disposition::Continue
    })?;

    println!("Listening on port {}", context.port(server).unwrap_or(args.port));
    println!("Press Ctrl+C to exit...\n");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = context.service(Duration::from_millis(100)) => {}
        }
    }

    println!("\n[Cleanup] Deleting endpoint...");
    context.delete(server)?;
    println!("          ✓ Done");

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Increments the little-endian counter stored in the user-data block.
fn bump_counter(data: &mut [u8]) -> u64 {
    let Some(bytes) = data.get_mut(..8) else {
        return 0;
    };
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    let count = u64::from_le_bytes(raw) + 1;
    bytes.copy_from_slice(&count.to_le_bytes());
    count
}
