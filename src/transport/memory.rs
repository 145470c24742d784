//! In-process pipe transport.
//!
//! A [`MemoryListener`] hands out the server half of a pipe pair every time a
//! [`MemoryConnector`] connects. Both halves are [`MemoryStream`]s with the
//! same non-blocking contract as a TCP socket: an empty pipe reports
//! `WouldBlock`, a closed pipe reports end-of-stream, and a receive capacity
//! can be set to force partial writes.
//!
//! # Example
//!
//! ```ignore
//! let listener = MemoryListener::new();
//! let connector = listener.connector();
//!
//! let mut server = Server::builder().listener(listener).build()?;
//! server.listen(80, Vec::new(), false)?;
//!
//! let mut client = connector.connect()?;
//! client.write_all(request)?;
//! server.poll();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{BoxedStream, Listener, RawStream};

// ============================================================================
// Constants
// ============================================================================

/// First port assigned to connecting clients.
const FIRST_CLIENT_PORT: u16 = 49152;

/// Port reported when listening on port 0.
const DEFAULT_LISTEN_PORT: u16 = 8080;

// ============================================================================
// Pipe
// ============================================================================

/// One direction of a memory stream.
#[derive(Debug, Default)]
struct Pipe {
    data: VecDeque<u8>,
    /// Set once either end is dropped or shut down.
    closed: bool,
    /// Maximum bytes buffered before writes report `WouldBlock`.
    capacity: Option<usize>,
}

type SharedPipe = Arc<Mutex<Pipe>>;

// ============================================================================
// MemoryStream
// ============================================================================

/// One end of an in-process, non-blocking byte pipe.
#[derive(Debug)]
pub struct MemoryStream {
    inbound: SharedPipe,
    outbound: SharedPipe,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl MemoryStream {
    /// Creates a connected pair of streams.
    #[must_use]
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let a_to_b = SharedPipe::default();
        let b_to_a = SharedPipe::default();

        let first = Self {
            inbound: Arc::clone(&b_to_a),
            outbound: Arc::clone(&a_to_b),
            local_addr: a,
            peer_addr: b,
        };
        let second = Self {
            inbound: a_to_b,
            outbound: b_to_a,
            local_addr: b,
            peer_addr: a,
        };
        (first, second)
    }

    /// Limits how many unread bytes the other end may queue towards us.
    ///
    /// `None` removes the limit.
    pub fn set_receive_capacity(&self, capacity: Option<usize>) {
        self.inbound.lock().capacity = capacity;
    }

    /// Drains every byte currently readable.
    pub fn read_available(&mut self) -> Vec<u8> {
        self.inbound.lock().data.drain(..).collect()
    }

    /// Number of bytes waiting to be read.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inbound.lock().data.len()
    }

    /// Returns `true` once either direction has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inbound.lock().closed || self.outbound.lock().closed
    }

    /// Local address of this end.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes both directions.
    pub fn close(&self) {
        self.inbound.lock().closed = true;
        self.outbound.lock().closed = true;
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.inbound.lock();
        if pipe.data.is_empty() {
            if pipe.closed {
                return Ok(0);
            }
            return Err(ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(pipe.data.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.outbound.lock();
        if pipe.closed {
            return Err(ErrorKind::BrokenPipe.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let room = pipe
            .capacity
            .map_or(usize::MAX, |cap| cap.saturating_sub(pipe.data.len()));
        if room == 0 {
            return Err(ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(room);
        pipe.data.extend(&buf[..n]);
        Ok(n)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RawStream for MemoryStream {
    #[inline]
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer_addr)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.close();
        Ok(())
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// MemoryListener
// ============================================================================

#[derive(Debug)]
struct ListenerShared {
    local_addr: Option<SocketAddr>,
    backlog: VecDeque<MemoryStream>,
    next_client_port: u16,
}

/// In-process [`Listener`] fed by [`MemoryConnector::connect`].
#[derive(Debug)]
pub struct MemoryListener {
    shared: Arc<Mutex<ListenerShared>>,
}

impl MemoryListener {
    /// Creates a stopped listener.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(ListenerShared {
                local_addr: None,
                backlog: VecDeque::new(),
                next_client_port: FIRST_CLIENT_PORT,
            })),
        }
    }

    /// Returns a handle that opens connections to this listener.
    #[must_use]
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for MemoryListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener for MemoryListener {
    fn listen(&mut self, ip: IpAddr, port: u16) -> io::Result<()> {
        let port = if port == 0 { DEFAULT_LISTEN_PORT } else { port };
        self.shared.lock().local_addr = Some(SocketAddr::new(ip, port));
        Ok(())
    }

    fn is_listening(&self) -> bool {
        self.shared.lock().local_addr.is_some()
    }

    fn take_connection(&mut self) -> io::Result<Option<BoxedStream>> {
        let next = self.shared.lock().backlog.pop_front();
        Ok(next.map(|stream| Box::new(stream) as BoxedStream))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().local_addr
    }

    fn stop(&mut self) {
        let mut shared = self.shared.lock();
        shared.local_addr = None;
        shared.backlog.clear();
    }
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// Client-side handle for a [`MemoryListener`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Mutex<ListenerShared>>,
}

impl MemoryConnector {
    /// Queues a new connection and returns the client end.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionRefused` if the listener is not listening.
    pub fn connect(&self) -> io::Result<MemoryStream> {
        let mut shared = self.shared.lock();
        let Some(server_addr) = shared.local_addr else {
            return Err(ErrorKind::ConnectionRefused.into());
        };

        let port = shared.next_client_port;
        shared.next_client_port = port.checked_add(1).unwrap_or(FIRST_CLIENT_PORT);
        let client_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);

        let (client, server) = MemoryStream::pair(client_addr, server_addr);
        shared.backlog.push_back(server);

        trace!(?client_addr, "Memory connection queued");
        Ok(client)
    }

    /// Number of connections waiting to be taken.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.shared.lock().backlog.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn test_empty_pipe_would_block() {
        let (mut a, _b) = MemoryStream::pair(addr(1), addr(2));
        let mut buf = [0u8; 8];
        let err = a.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_bytes_flow_both_ways() {
        let (mut a, mut b) = MemoryStream::pair(addr(1), addr(2));
        a.write_all(b"ping").unwrap();
        b.write_all(b"pong").unwrap();

        assert_eq!(b.read_available(), b"ping");
        assert_eq!(a.read_available(), b"pong");
        assert_eq!(a.peer_addr().unwrap(), addr(2));
        assert_eq!(b.peer_addr().unwrap(), addr(1));
    }

    #[test]
    fn test_drop_signals_end_of_stream() {
        let (mut a, b) = MemoryStream::pair(addr(1), addr(2));
        drop(b);

        let mut buf = [0u8; 8];
        assert_eq!(a.read(&mut buf).unwrap(), 0);
        assert_eq!(a.write(b"x").unwrap_err().kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_pending_data_readable_after_close() {
        let (mut a, b) = MemoryStream::pair(addr(1), addr(2));
        let mut writer = b;
        writer.write_all(b"tail").unwrap();
        drop(writer);

        let mut buf = [0u8; 8];
        assert_eq!(a.read(&mut buf).unwrap(), 4);
        assert_eq!(a.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_receive_capacity_forces_partial_writes() {
        let (mut a, mut b) = MemoryStream::pair(addr(1), addr(2));
        b.set_receive_capacity(Some(3));

        assert_eq!(a.write(b"hello").unwrap(), 3);
        assert_eq!(a.write(b"lo").unwrap_err().kind(), ErrorKind::WouldBlock);

        assert_eq!(b.read_available(), b"hel");
        assert_eq!(a.write(b"lo").unwrap(), 2);
    }

    #[test]
    fn test_connect_requires_listening() {
        let listener = MemoryListener::new();
        let connector = listener.connector();
        let err = connector.connect().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_listener_queues_connections() {
        let mut listener = MemoryListener::new();
        let connector = listener.connector();
        listener.listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000).unwrap();

        let client = connector.connect().unwrap();
        assert_eq!(connector.backlog(), 1);

        let server_end = listener.take_connection().unwrap().expect("queued");
        assert_eq!(server_end.peer_addr().unwrap(), client.local_addr());
        assert!(listener.take_connection().unwrap().is_none());
    }

    #[test]
    fn test_stop_drops_backlog() {
        let mut listener = MemoryListener::new();
        let connector = listener.connector();
        listener.listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), DEFAULT_LISTEN_PORT);

        let client = connector.connect().unwrap();
        listener.stop();

        assert!(!listener.is_listening());
        assert!(client.is_closed());
    }
}
