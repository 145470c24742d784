//! Non-blocking TCP transport.
//!
//! Wraps `std::net::TcpListener` in non-blocking mode so that
//! [`Listener::take_connection`] never parks the polling thread.

// ============================================================================
// Imports
// ============================================================================

use std::io::{self, ErrorKind};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info, trace};

use super::{BoxedStream, Listener, RawStream};

// ============================================================================
// RawStream for TcpStream
// ============================================================================

impl RawStream for TcpStream {
    #[inline]
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

// ============================================================================
// TcpTransport
// ============================================================================

/// TCP listener that accepts without blocking.
///
/// Accepted streams are switched to non-blocking mode with `TCP_NODELAY`.
#[derive(Debug, Default)]
pub struct TcpTransport {
    /// Bound listener, `None` while stopped.
    listener: Option<TcpListener>,
}

impl TcpTransport {
    /// Creates a stopped transport.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Listener for TcpTransport {
    fn listen(&mut self, ip: IpAddr, port: u16) -> io::Result<()> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port))?;
        listener.set_nonblocking(true)?;

        info!(addr = ?listener.local_addr().ok(), "TCP transport listening");

        self.listener = Some(listener);
        Ok(())
    }

    #[inline]
    fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    fn take_connection(&mut self) -> io::Result<Option<BoxedStream>> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(None);
        };

        match listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                trace!(?addr, "TCP connection accepted");
                Ok(Some(Box::new(stream)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn stop(&mut self) {
        if self.listener.take().is_some() {
            debug!("TCP transport stopped");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
