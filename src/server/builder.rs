//! Builder pattern for server configuration.
//!
//! Provides a fluent API for configuring and creating [`Server`] instances.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ws_poll_server::Server;
//!
//! let mut server = Server::builder()
//!     .buffers(128, 2048, 128, 2048)
//!     .handshake_timeout(Duration::from_secs(2))
//!     .max_peers(256)
//!     .build()?;
//! server.listen(9080, Vec::new(), false)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::Result;
use crate::transport::{Listener, TcpTransport};

use super::config::{BufferConfig, ServerConfig};
use super::core::Server;

// ============================================================================
// ServerBuilder
// ============================================================================

/// Builder for configuring a [`Server`] instance.
///
/// Use [`Server::builder()`] to create a new builder.
#[derive(Default)]
pub struct ServerBuilder {
    /// Base configuration.
    config: ServerConfig,
    /// Buffer sizes as `(in_kib, in_packets, out_kib, out_packets)`, checked on build.
    buffer_sizes: Option<(u32, u32, u32, u32)>,
    /// Connection source. Defaults to TCP.
    listener: Option<Box<dyn Listener>>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("buffer_sizes", &self.buffer_sizes)
            .field("custom_listener", &self.listener.is_some())
            .finish()
    }
}

// ============================================================================
// ServerBuilder Implementation
// ============================================================================

impl ServerBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    ///
    /// Setters called afterwards override individual fields.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the connection source.
    #[inline]
    #[must_use]
    pub fn listener(mut self, listener: impl Listener + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Sets the address the listener binds to.
    #[inline]
    #[must_use]
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.config.bind_ip = ip;
        self
    }

    /// Sets buffer sizes in KiB and packet counts.
    ///
    /// Validated by [`ServerBuilder::build`].
    #[inline]
    #[must_use]
    pub fn buffers(mut self, in_kib: u32, in_packets: u32, out_kib: u32, out_packets: u32) -> Self {
        self.buffer_sizes = Some((in_kib, in_packets, out_kib, out_packets));
        self
    }

    /// Sets the bound on the upgrade request head.
    #[inline]
    #[must_use]
    pub fn max_header_size(mut self, bytes: usize) -> Self {
        self.config.max_header_size = bytes;
        self
    }

    /// Sets the time a client has to deliver its upgrade request.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Caps pending plus registered connections.
    #[inline]
    #[must_use]
    pub fn max_peers(mut self, max: usize) -> Self {
        self.config.max_peers = Some(max);
        self
    }

    /// Builds the server with validation.
    ///
    /// The server is created stopped; call [`Server::listen`] to start it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`](crate::Error::InvalidArgument) for invalid buffer sizes
    /// - [`Error::Config`](crate::Error::Config) if the configuration fails validation
    pub fn build(self) -> Result<Server> {
        let mut config = self.config;
        if let Some((in_kib, in_packets, out_kib, out_packets)) = self.buffer_sizes {
            config.buffers = BufferConfig::from_sizes(in_kib, in_packets, out_kib, out_packets)?;
        }

        let listener = self
            .listener
            .unwrap_or_else(|| Box::new(TcpTransport::new()));
        Server::new(config, listener)
    }
}

// ============================================================================
// Tests
// ============================================================================
