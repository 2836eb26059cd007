//! Reconnecting client.
//!
//! Demonstrates:
//! - Connecting to a server with a fixed retry delay
//! - Sending a greeting once connected
//! - Automatic retry while the server is unreachable
//!
//! Start `001_echo_server` before or after this demo; the client keeps
//! retrying until it connects.
//!
//! Usage:
//!   cargo run --example 002_reconnecting_client
//!   cargo run --example 002_reconnecting_client -- --port 9100 --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::Args;
use ws_session::{
    ConnectOptions, Context, Disposition, Event, Result, RetryPolicy, TokioTransport,
};

// ============================================================================
// Constants
// ============================================================================

const RETRY_DELAY: Duration = Duration::from_secs(2);
const RUN_FOR: Duration = Duration::from_secs(60);

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
    println!("=== 002: Reconnecting Client ===\n");

    let mut context = Context::new(TokioTransport::new()?);

    let options =
        ConnectOptions::new("127.0.0.1", args.port).with_retry(RetryPolicy::fixed(RETRY_DELAY));
    let endpoint = context.connect(options, |client, event| {
        match event {
            Event::Connected => {
                println!("[+] Connected after {} retries", client.retry_count());
                if let Err(e) = client.send(b"hello from ws-session") {
                    println!("    ✗ Send failed: {e}");
                }
            }
            Event::Received => {
                let mut buf = [0u8; 1024];
                if let Ok(len) = client.receive(&mut buf) {
                    println!("    Reply: {}", String::from_utf8_lossy(&buf[..len]));
                }
            }
            Event::ConnectionError { reason } => {
                println!("    ✗ {reason} (retrying in {}s)", RETRY_DELAY.as_secs());
            }
            Event::Closed => println!("[-] Closed"),
            _ => {}
        }
        Disposition::Continue
    })?;

    let deadline = tokio::time::Instant::now() + RUN_FOR;
    while tokio::time::Instant::now() < deadline {
        context.service(Duration::from_millis(100)).await;
    }

    if let Some(retry) = context.retry_scheduler(endpoint) {
        println!(
            "\n[Stats] {} retries scheduled, {} fired",
            retry.scheduled(),
            retry.fired()
        );
    }

    context.delete(endpoint)?;
    Ok(())
}
