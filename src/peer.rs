//! An upgraded WebSocket connection owned by the server.
//!
//! A [`Peer`] frames and de-frames messages over a non-blocking stream using
//! `tungstenite`. It never blocks: reads stop at `WouldBlock`, and writes
//! that cannot complete stay buffered until the next [`Peer::poll`].
//!
//! # Buffering
//!
//! | Direction | Bound |
//! |-----------|-------|
//! | Inbound | At most `2^in_packet_shift` complete packets queued, each up to `2^in_buffer_shift` bytes |
//! | Outbound | At most `2^out_packet_shift` packets pending flush, each up to [`BufferConfig::max_packet_size`] bytes |

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes, WebSocket};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::handshake::Upgraded;
use crate::identifiers::PeerId;
use crate::server::BufferConfig;
use crate::transport::{BoxedStream, RawStream};

// ============================================================================
// Constants
// ============================================================================

/// Close code reported when a close frame carries no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

// ============================================================================
// PeerActivity
// ============================================================================

/// What happened on a peer during one [`Peer::poll`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerActivity {
    /// Data packets queued during this poll.
    pub received: usize,
    /// Close handshake started by the remote end: `(code, reason)`.
    pub close_request: Option<(u16, String)>,
}

impl PeerActivity {
    /// Returns `true` if nothing was received.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.received == 0 && self.close_request.is_none()
    }
}

// ============================================================================
// Peer
// ============================================================================

/// A registered WebSocket connection.
pub struct Peer {
    id: PeerId,
    socket: WebSocket<BoxedStream>,
    remote_addr: Option<SocketAddr>,
    requested_protocols: Vec<String>,
    inbound: VecDeque<Vec<u8>>,
    in_packet_limit: usize,
    out_packet_limit: usize,
    max_packet_size: usize,
    /// Packets written since the last successful flush.
    queued_packets: usize,
    connected: bool,
    /// Set once we sent a close frame.
    closing: bool,
    close_code: Option<u16>,
    close_reason: String,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("connected", &self.connected)
            .field("inbound", &self.inbound.len())
            .field("queued_packets", &self.queued_packets)
            .field("close_code", &self.close_code)
            .finish_non_exhaustive()
    }
}

impl Peer {
    /// Creates a peer from a completed handshake.
    ///
    /// Bytes the client sent after its request head are fed to the framer
    /// before anything is read from the stream.
    #[must_use]
    pub fn new(id: PeerId, upgraded: Upgraded, buffers: &BufferConfig) -> Self {
        let Upgraded {
            stream,
            leftover,
            request,
        } = upgraded;

        let remote_addr = stream.peer_addr().ok();
        let socket =
            WebSocket::from_partially_read(stream, leftover, Role::Server, Some(socket_config(buffers)));

        debug!(peer_id = %id, ?remote_addr, "Peer created");

        Self {
            id,
            socket,
            remote_addr,
            requested_protocols: request.protocols().to_vec(),
            inbound: VecDeque::new(),
            in_packet_limit: buffers.in_packet_limit(),
            out_packet_limit: buffers.out_packet_limit(),
            max_packet_size: buffers.max_packet_size(),
            queued_packets: 0,
            connected: true,
            closing: false,
            close_code: None,
            close_reason: String::new(),
        }
    }

    /// Peer id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote address, if the transport reported one.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Subprotocols listed in the client's `Sec-WebSocket-Protocol` header.
    #[inline]
    #[must_use]
    pub fn requested_protocols(&self) -> &[String] {
        &self.requested_protocols
    }

    /// Returns `true` until the connection ends.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Close code received from the remote end, if any.
    #[inline]
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        self.close_code
    }

    /// Close reason received from the remote end.
    #[inline]
    #[must_use]
    pub fn close_reason(&self) -> &str {
        &self.close_reason
    }

    /// Returns `true` if the connection ended with a close handshake.
    #[inline]
    #[must_use]
    pub fn was_clean(&self) -> bool {
        self.close_code.is_some()
    }

    /// Number of packets waiting in the inbound queue.
    #[inline]
    #[must_use]
    pub fn available_packets(&self) -> usize {
        self.inbound.len()
    }

    /// Largest payload accepted by [`Peer::put_packet`].
    #[inline]
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Pops the oldest inbound packet.
    pub fn get_packet(&mut self) -> Option<Vec<u8>> {
        self.inbound.pop_front()
    }
}

// ============================================================================
// Peer - I/O
// ============================================================================

impl Peer {
    /// Reads available frames and flushes pending output.
    ///
    /// Data arriving while the inbound queue is full is dropped; close
    /// frames and connection errors are still observed.
    pub fn poll(&mut self) -> PeerActivity {
        let mut activity = PeerActivity::default();
        if !self.connected {
            return activity;
        }

        while self.connected {
            match self.socket.read() {
                Ok(Message::Text(text)) => self.enqueue(text.as_bytes(), &mut activity),
                Ok(Message::Binary(data)) => self.enqueue(&data, &mut activity),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    debug!(peer_id = %self.id, code, reason = %reason, "Close frame received");
                    self.close_code = Some(code);
                    self.close_reason.clone_from(&reason);
                    if !self.closing {
                        activity.close_request = Some((code, reason));
                    }
                }
                Ok(_) => {}
                Err(WsError::Io(e)) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => self.on_read_error(e),
            }
        }

        if self.connected {
            self.flush();
        }

        if activity.received > 0 {
            trace!(peer_id = %self.id, received = activity.received, "Packets queued");
        }
        activity
    }

    /// Sends one message.
    ///
    /// A message the transport cannot take right now stays queued and is
    /// flushed by later polls.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the peer is disconnected
    /// - [`Error::BufferFull`] if the outbound queue is at its limit
    /// - [`Error::WebSocket`] on a framing or transport error
    pub fn send(&mut self, message: Message) -> Result<()> {
        if !self.connected {
            return Err(Error::ConnectionClosed);
        }
        if self.queued_packets >= self.out_packet_limit {
            return Err(Error::BufferFull {
                limit: self.out_packet_limit,
            });
        }

        match self.socket.write(message) {
            Ok(()) => {}
            Err(WsError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
            Err(WsError::WriteBufferFull(..)) => {
                return Err(Error::BufferFull {
                    limit: self.out_packet_limit,
                });
            }
            Err(e) => return Err(e.into()),
        }
        self.queued_packets += 1;

        match self.socket.flush() {
            Ok(()) => self.queued_packets = 0,
            Err(WsError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Sends `data` as one binary packet.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `data` exceeds [`Peer::max_packet_size`]
    /// - any error from [`Peer::send`]
    pub fn put_packet(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_packet_size {
            return Err(Error::invalid_argument(format!(
                "packet of {} bytes exceeds maximum of {}",
                data.len(),
                self.max_packet_size
            )));
        }
        self.send(Message::binary(data.to_vec()))
    }

    /// Starts the close handshake.
    ///
    /// The peer stays connected until the remote end answers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the close frame cannot be queued.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        debug!(peer_id = %self.id, code, reason, "Closing peer");
        self.closing = true;

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Utf8Bytes::from(reason.to_owned()),
        };
        match self.socket.close(Some(frame)) {
            Ok(()) => Ok(()),
            Err(WsError::Io(e)) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                self.connected = false;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops the connection without a close handshake.
    pub fn close_now(&mut self) {
        if !self.connected {
            return;
        }
        if let Err(e) = self.socket.get_mut().shutdown() {
            trace!(peer_id = %self.id, error = %e, "Shutdown failed");
        }
        self.connected = false;
        debug!(peer_id = %self.id, "Peer closed");
    }

    fn enqueue(&mut self, data: &[u8], activity: &mut PeerActivity) {
        if self.inbound.len() >= self.in_packet_limit {
            debug!(
                peer_id = %self.id,
                len = data.len(),
                limit = self.in_packet_limit,
                "Inbound queue full, packet dropped"
            );
            return;
        }
        self.inbound.push_back(data.to_vec());
        activity.received += 1;
    }

    fn flush(&mut self) {
        match self.socket.flush() {
            Ok(()) => self.queued_packets = 0,
            Err(WsError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => self.on_read_error(e),
        }
    }

    fn on_read_error(&mut self, error: WsError) {
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                trace!(peer_id = %self.id, "Connection closed");
            }
            e => debug!(peer_id = %self.id, error = %e, "Peer connection lost"),
        }
        self.connected = false;
    }
}

/// Framer limits derived from the buffer configuration.
fn socket_config(buffers: &BufferConfig) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.read_buffer_size = buffers.in_buffer_size();
    config.max_message_size = Some(buffers.in_buffer_size());
    config.max_frame_size = Some(buffers.in_buffer_size());
    config.write_buffer_size = 0;
    config.max_write_buffer_size = buffers.out_buffer_size();
    config
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    use crate::handshake::HandshakeRequest;
    use crate::transport::MemoryStream;

    const REQUEST: &[u8] = b"GET / HTTP/1.1\r\n\
                             Upgrade: websocket\r\n\
                             Connection: Upgrade\r\n\
                             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                             Sec-WebSocket-Protocol: chat, superchat\r\n\
                             Sec-WebSocket-Version: 13\r\n\r\n";

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50001),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9080),
        )
    }

    fn upgraded(stream: MemoryStream, leftover: Vec<u8>) -> Upgraded {
        Upgraded {
            stream: Box::new(stream),
            leftover,
            request: HandshakeRequest::parse(REQUEST).unwrap(),
        }
    }

    fn peer_pair(buffers: &BufferConfig) -> (Peer, WebSocket<MemoryStream>) {
        let (client_addr, server_addr) = addrs();
        let (client, server) = MemoryStream::pair(client_addr, server_addr);
        let peer = Peer::new(PeerId::new(2).unwrap(), upgraded(server, Vec::new()), buffers);
        let client = WebSocket::from_raw_socket(client, Role::Client, None);
        (peer, client)
    }

    fn client_read(client: &mut WebSocket<MemoryStream>) -> Option<Message> {
        match client.read() {
            Ok(message) => Some(message),
            Err(WsError::Io(e)) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => panic!("unexpected client error: {e}"),
        }
    }

    #[test]
    fn test_new_peer_metadata() {
        let (peer, _client) = peer_pair(&BufferConfig::default());
        assert_eq!(peer.id().as_u32(), 2);
        assert_eq!(peer.remote_addr(), Some(addrs().0));
        assert_eq!(peer.requested_protocols(), ["chat", "superchat"]);
        assert!(peer.is_connected());
        assert_eq!(peer.available_packets(), 0);
        assert!(!peer.was_clean());
    }

    #[test]
    fn test_receive_packets() {
        let (mut peer, mut client) = peer_pair(&BufferConfig::default());
        client.send(Message::text(String::from("hello"))).unwrap();
        client.send(Message::binary(vec![1u8, 2, 3])).unwrap();

        let activity = peer.poll();
        assert_eq!(activity.received, 2);
        assert!(activity.close_request.is_none());
        assert_eq!(peer.get_packet(), Some(b"hello".to_vec()));
        assert_eq!(peer.get_packet(), Some(vec![1, 2, 3]));
        assert_eq!(peer.get_packet(), None);
    }

    #[test]
    fn test_idle_poll() {
        let (mut peer, _client) = peer_pair(&BufferConfig::default());
        let activity = peer.poll();
        assert!(activity.is_idle());
        assert!(peer.is_connected());
    }

    #[test]
    fn test_inbound_queue_is_bounded() {
        let buffers = BufferConfig::from_sizes(64, 2, 64, 16).unwrap();
        let (mut peer, mut client) = peer_pair(&buffers);
        for i in 0..3u8 {
            client.send(Message::binary(vec![i])).unwrap();
        }

        assert_eq!(peer.poll().received, 2);
        assert_eq!(peer.available_packets(), 2);
        assert_eq!(peer.get_packet(), Some(vec![0]));
        assert_eq!(peer.get_packet(), Some(vec![1]));

        client.send(Message::binary(vec![3u8])).unwrap();
        assert_eq!(peer.poll().received, 1);
        assert_eq!(peer.get_packet(), Some(vec![3]));
    }

    #[test]
    fn test_full_queue_still_sees_disconnect() {
        let buffers = BufferConfig::from_sizes(64, 2, 64, 16).unwrap();
        let (mut peer, mut client) = peer_pair(&buffers);
        for i in 0..3u8 {
            client.send(Message::binary(vec![i])).unwrap();
        }
        drop(client);

        assert_eq!(peer.poll().received, 2);
        assert!(!peer.is_connected());
        assert!(!peer.was_clean());
        assert_eq!(peer.available_packets(), 2);
    }

    #[test]
    fn test_full_queue_still_sees_close() {
        let buffers = BufferConfig::from_sizes(64, 1, 64, 16).unwrap();
        let (mut peer, mut client) = peer_pair(&buffers);
        client.send(Message::binary(vec![1u8])).unwrap();
        client.send(Message::binary(vec![2u8])).unwrap();
        client.close(None).unwrap();

        let activity = peer.poll();
        assert_eq!(activity.received, 1);
        assert_eq!(activity.close_request, Some((CLOSE_NO_STATUS, String::new())));
        assert!(!peer.is_connected());
        assert!(peer.was_clean());
    }

    #[test]
    fn test_leftover_bytes_are_framed() {
        let (client_addr, server_addr) = addrs();
        let (client, mut server) = MemoryStream::pair(client_addr, server_addr);
        let mut client = WebSocket::from_raw_socket(client, Role::Client, None);
        client.send(Message::binary(vec![9u8, 9])).unwrap();

        let early = server.read_available();
        let mut peer = Peer::new(
            PeerId::new(3).unwrap(),
            upgraded(server, early),
            &BufferConfig::default(),
        );

        assert_eq!(peer.poll().received, 1);
        assert_eq!(peer.get_packet(), Some(vec![9, 9]));
    }

    #[test]
    fn test_put_packet_reaches_client() {
        let (mut peer, mut client) = peer_pair(&BufferConfig::default());
        peer.put_packet(b"pong").unwrap();

        assert_eq!(client_read(&mut client), Some(Message::binary(b"pong".to_vec())));
    }

    #[test]
    fn test_put_packet_rejects_oversized() {
        let buffers = BufferConfig::from_sizes(1, 16, 1, 16).unwrap();
        let (mut peer, _client) = peer_pair(&buffers);
        let max = peer.max_packet_size();
        assert_eq!(max, 1024 - 8);

        let err = peer.put_packet(&vec![0u8; max + 1]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(peer.put_packet(&vec![0u8; max]).is_ok());
    }

    #[test]
    fn test_outbound_packet_limit() {
        let buffers = BufferConfig::from_sizes(64, 16, 64, 2).unwrap();
        let (client_addr, server_addr) = addrs();
        let (client, server) = MemoryStream::pair(client_addr, server_addr);
        client.set_receive_capacity(Some(0));
        let mut peer = Peer::new(PeerId::new(2).unwrap(), upgraded(server, Vec::new()), &buffers);

        peer.put_packet(b"a").unwrap();
        peer.put_packet(b"b").unwrap();
        let err = peer.put_packet(b"c").unwrap_err();
        assert!(matches!(err, Error::BufferFull { limit: 2 }));

        client.set_receive_capacity(None);
        peer.poll();
        assert!(peer.put_packet(b"c").is_ok());
    }

    #[test]
    fn test_client_close_is_clean() {
        let (mut peer, mut client) = peer_pair(&BufferConfig::default());
        client
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: Utf8Bytes::from(String::from("bye")),
            }))
            .unwrap();

        let activity = peer.poll();
        assert_eq!(activity.close_request, Some((1000, "bye".to_owned())));
        assert!(!peer.is_connected());
        assert!(peer.was_clean());
        assert_eq!(peer.close_code(), Some(1000));
        assert_eq!(peer.close_reason(), "bye");
    }

    #[test]
    fn test_close_without_status() {
        let (mut peer, mut client) = peer_pair(&BufferConfig::default());
        client.close(None).unwrap();

        let activity = peer.poll();
        assert_eq!(activity.close_request, Some((CLOSE_NO_STATUS, String::new())));
        assert_eq!(peer.close_code(), Some(CLOSE_NO_STATUS));
    }

    #[test]
    fn test_dropped_client_is_unclean() {
        let (mut peer, client) = peer_pair(&BufferConfig::default());
        drop(client);

        peer.poll();
        assert!(!peer.is_connected());
        assert!(!peer.was_clean());
    }

    #[test]
    fn test_server_close_handshake() {
        let (mut peer, mut client) = peer_pair(&BufferConfig::default());
        peer.close(4000, "done").unwrap();
        assert!(peer.is_connected());

        match client_read(&mut client) {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), 4000);
                assert_eq!(frame.reason.as_str(), "done");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        // Reply queued by the client on read; flushing delivers it.
        let _ = client.flush();

        let activity = peer.poll();
        assert!(activity.close_request.is_none());
        assert!(!peer.is_connected());
        assert_eq!(peer.close_code(), Some(4000));
    }

    #[test]
    fn test_close_now() {
        let (mut peer, client) = peer_pair(&BufferConfig::default());
        let raw = client.get_ref();
        peer.close_now();

        assert!(!peer.is_connected());
        assert!(raw.is_closed());
        assert!(matches!(peer.put_packet(b"x"), Err(Error::ConnectionClosed)));
        assert!(peer.poll().is_idle());
    }
}
