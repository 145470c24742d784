//! Poll-driven WebSocket server.
//!
//! This library accepts TCP (or in-process) connections, upgrades them with
//! the RFC 6455 handshake and manages the resulting peers, all from a single
//! non-blocking [`Server::poll`] call made once per tick by the application.
//!
//! # Architecture
//!
//! ```text
//! Listener ──► HandshakeSession ──► PeerRegistry ──► Peer
//!                    ▲                                 ▲
//!                    └──────── Server::poll() ─────────┘
//! ```
//!
//! Key design principles:
//!
//! - Nothing blocks: "would block" means "try again next tick"
//! - The server owns every connection; callers hold [`PeerId`]s
//! - A failing handshake only ever affects its own connection
//! - Configuration is a value passed at construction, never global state
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use ws_poll_server::{Result, Server, ServerEvent};
//!
//! fn main() -> Result<()> {
//!     let mut server = Server::builder().build()?;
//!     server.set_event_handler(Box::new(|event| match event {
//!         ServerEvent::Connected { id, .. } => println!("peer {id} connected"),
//!         ServerEvent::Disconnected { id, was_clean } => {
//!             println!("peer {id} left (clean: {was_clean})");
//!         }
//!         _ => {}
//!     }));
//!     server.listen(9080, Vec::new(), false)?;
//!
//!     loop {
//!         server.poll();
//!         std::thread::sleep(Duration::from_millis(10));
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`handshake`] | Upgrade request parsing and the per-connection state machine |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`peer`] | Upgraded connections |
//! | [`runtime`] | Optional tokio poller |
//! | [`server`] | Server, configuration, registry and events |
//! | [`transport`] | Non-blocking listeners and streams |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// RFC 6455 upgrade handshake.
pub mod handshake;

/// Type-safe identifiers.
pub mod identifiers;

/// Upgraded WebSocket connections.
pub mod peer;

/// Tokio poller for a shared server.
pub mod runtime;

/// Poll-driven server.
///
/// Use [`Server::builder()`] to create a configured server instance.
pub mod server;

/// Raw stream transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Handshake types
pub use handshake::{HandshakeLimits, HandshakeSession, HandshakeState, HandshakeStatus};

// Identifier types
pub use identifiers::PeerId;

// Peer types
pub use peer::{Peer, PeerActivity};

// Runtime types
pub use runtime::{PollerHandle, SharedServer, spawn_poller};

// Server types
pub use server::{
    BufferConfig, EventHandler, PeerRegistry, Server, ServerBuilder, ServerConfig, ServerEvent,
};

// Transport types
pub use transport::{
    BoxedStream, Listener, MemoryConnector, MemoryListener, MemoryStream, RawStream, TcpTransport,
};

// Framing types used by `Peer::send`
pub use tokio_tungstenite::tungstenite::Message;
