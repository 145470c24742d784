//! Error types for the WebSocket server.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ws_poll_server::{Result, Server};
//!
//! fn start(server: &mut Server) -> Result<()> {
//!     server.set_buffers(64, 1024, 64, 1024)?;
//!     server.listen(9080, Vec::new(), false)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`], [`Error::InvalidState`], [`Error::AlreadyListening`] |
//! | Handshake | [`Error::MalformedRequest`], [`Error::MissingOrInvalidHeader`], [`Error::HeaderTooLarge`], [`Error::ConnectionTimeout`] |
//! | Connection | [`Error::ConnectionClosed`], [`Error::PeerNotFound`], [`Error::BufferFull`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! Handshake errors never reach the server's caller: the scheduler logs them
//! and drops the session.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::PeerId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a [`ServerConfig`](crate::ServerConfig) fails validation.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to a server operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Operation not allowed in the server's current state.
    ///
    /// Returned by `set_buffers` once the server is listening.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of the state conflict.
        message: String,
    },

    /// `listen` called on a server that is already listening.
    #[error("Server is already listening")]
    AlreadyListening,

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Bad request line or header syntax.
    #[error("Malformed upgrade request: {message}")]
    MalformedRequest {
        /// Description of the syntax problem.
        message: String,
    },

    /// A required header is absent or carries an unexpected value.
    #[error("Missing or invalid header '{name}', expected {expected}")]
    MissingOrInvalidHeader {
        /// Lower-cased header name.
        name: &'static str,
        /// Human readable expectation.
        expected: &'static str,
    },

    /// Accumulated request exceeded the header size bound.
    #[error("Upgrade request exceeds {limit} bytes")]
    HeaderTooLarge {
        /// Configured maximum header size.
        limit: usize,
    },

    /// Handshake not completed in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Remote end closed the stream.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Unknown peer id.
    #[error("Peer not found: {peer_id}")]
    PeerNotFound {
        /// The missing peer id.
        peer_id: PeerId,
    },

    /// Outbound packet queue of a peer is full.
    #[error("Outbound buffer full ({limit} packets queued)")]
    BufferFull {
        /// Configured outbound packet limit.
        limit: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error from the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket framing error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a malformed request error.
    #[inline]
    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
        }
    }

    /// Creates a missing or invalid header error.
    #[inline]
    pub fn missing_header(name: &'static str, expected: &'static str) -> Self {
        Self::MissingOrInvalidHeader { name, expected }
    }

    /// Creates a header too large error.
    #[inline]
    pub fn header_too_large(limit: usize) -> Self {
        Self::HeaderTooLarge { limit }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a peer not found error.
    #[inline]
    pub fn peer_not_found(peer_id: PeerId) -> Self {
        Self::PeerNotFound { peer_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error is produced by request validation.
    #[inline]
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest { .. }
                | Self::MissingOrInvalidHeader { .. }
                | Self::HeaderTooLarge { .. }
                | Self::ConnectionTimeout { .. }
        )
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Io(_)
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
