//! Echo server on top of the tokio poller.
//!
//! Demonstrates:
//! - Building a server with custom buffers and handshake timeout
//! - Running the poller on a shared server
//! - Reacting to events and echoing every packet back
//! - Graceful shutdown on Ctrl+C
//!
//! Usage:
//!   cargo run --example echo_server
//!   cargo run --example echo_server -- --port 9001
//!   cargo run --example echo_server -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ws_poll_server::{PeerId, Server, ServerEvent, runtime};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_PORT: u16 = 9080;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    port: u16,
}

impl Args {
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let port = match args.iter().position(|a| a == "--port") {
            Some(i) => args
                .get(i + 1)
                .context("--port needs a value")?
                .parse()
                .context("--port must be a number")?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            debug: args.iter().any(|a| a == "--debug"),
            port,
        })
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse()?;
    init_logging(args.debug);

    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<PeerId>();

    let mut server = Server::builder()
        .bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .buffers(64, 256, 64, 256)
        .handshake_timeout(Duration::from_secs(2))
        .build()?;

    server.set_event_handler(Box::new(move |event| match event {
        ServerEvent::Connected { id, .. } => info!(peer_id = %id, "Client connected"),
        ServerEvent::Disconnected { id, was_clean } => {
            info!(peer_id = %id, was_clean, "Client disconnected");
        }
        ServerEvent::DataReceived { id } => {
            let _ = ready_tx.send(id);
        }
        ServerEvent::CloseRequested { id, code, reason } => {
            info!(peer_id = %id, code, reason = %reason, "Client closing");
        }
    }));

    server
        .listen(args.port, Vec::new(), false)
        .with_context(|| format!("failed to listen on port {}", args.port))?;
    println!("Echo server on ws://{}", server.local_addr().context("no local address")?);
    println!("Press Ctrl+C to exit...");

    let shared = runtime::shared(server);
    let poller = runtime::spawn_poller(Arc::clone(&shared), runtime::DEFAULT_TICK);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(id) = ready_rx.recv() => echo(&shared, id),
        }
    }

    poller.shutdown().await?;
    shared.lock().stop();
    Ok(())
}

// ============================================================================
// Functions
// ============================================================================

/// Sends every queued packet of `id` back to it.
fn echo(shared: &runtime::SharedServer, id: PeerId) {
    let mut server = shared.lock();
    let Ok(peer) = server.get_peer_mut(id) else {
        return;
    };

    while let Some(packet) = peer.get_packet() {
        if let Err(e) = peer.put_packet(&packet) {
            warn!(peer_id = %id, error = %e, "Echo failed");
            break;
        }
    }
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "ws_poll_server=debug,echo_server=debug"
    } else {
        "ws_poll_server=info,echo_server=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
