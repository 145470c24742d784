//! Raw stream transport layer.
//!
//! The server never touches sockets directly. It talks to a [`Listener`]
//! that yields [`RawStream`]s, and every read and write on those streams is
//! expected to be non-blocking: "no data yet" is reported as
//! [`io::ErrorKind::WouldBlock`] and retried on a later poll tick.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  take_connection()  ┌──────────────────┐  on success  ┌──────────┐
//! │   Listener   │ ──────────────────► │ HandshakeSession │ ───────────► │   Peer   │
//! │ (tcp/memory) │     BoxedStream     │  (owns stream)   │  BoxedStream │          │
//! └──────────────┘                     └──────────────────┘              └──────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `tcp` | Non-blocking `std::net` TCP listener |
//! | `memory` | In-process pipe transport (tests, embedding) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr};

// ============================================================================
// Submodules
// ============================================================================

/// In-process pipe transport.
pub mod memory;

/// Non-blocking TCP transport.
pub mod tcp;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{MemoryConnector, MemoryListener, MemoryStream};
pub use tcp::TcpTransport;

// ============================================================================
// Traits
// ============================================================================

/// A bidirectional, non-blocking byte stream.
///
/// `read` returning `Ok(0)` means the remote end closed the stream.
pub trait RawStream: Read + Write + Send + Debug {
    /// Address of the remote end.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Tears the stream down immediately in both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Owned, type-erased stream handed between pending sessions and peers.
pub type BoxedStream = Box<dyn RawStream>;

/// Source of incoming connections.
pub trait Listener: Send {
    /// Starts accepting connections on `ip:port`.
    fn listen(&mut self, ip: IpAddr, port: u16) -> io::Result<()>;

    /// Returns `true` while accepting connections.
    fn is_listening(&self) -> bool;

    /// Takes the next queued connection, or `None` when the queue is empty.
    fn take_connection(&mut self) -> io::Result<Option<BoxedStream>>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Stops accepting. Queued connections are dropped.
    fn stop(&mut self);
}
