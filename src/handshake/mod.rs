//! RFC 6455 server handshake.
//!
//! Turns an accepted raw stream into an upgraded one, one poll tick at a
//! time.
//!
//! # Handshake Flow
//!
//! 1. Accumulate the request head until `\r\n\r\n` (bounded by `max_header_size`)
//! 2. Parse and validate the request line and headers
//! 3. Compute `Sec-WebSocket-Accept` and build the `101` response
//! 4. Flush the response across as many ticks as the transport needs
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | Request parsing and the header rule table |
//! | `response` | Accept key and response literal |
//! | `session` | Per-connection state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Request parsing and header validation.
pub mod request;

/// Accept-key computation and response bytes.
pub mod response;

/// Per-connection handshake state machine.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use request::{HEADER_RULES, HandshakeRequest, HeaderRule};
pub use response::{WEBSOCKET_GUID, accept_key, build_response};
pub use session::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_HEADER_SIZE, HandshakeLimits, HandshakeSession,
    HandshakeState, HandshakeStatus, Upgraded,
};
