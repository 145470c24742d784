//! Poll-driven WebSocket server.
//!
//! The [`Server`] owns the listener, every pending handshake session and the
//! peer registry. Nothing happens in the background: each call to
//! [`Server::poll`] performs one tick of work and returns.
//!
//! # Tick Order
//!
//! 1. Peers: read frames, flush output, remove disconnected peers
//! 2. Pending sessions: advance handshakes, promote completed ones
//! 3. Listener: admit newly accepted connections as pending sessions
//!
//! # Example
//!
//! ```ignore
//! use ws_poll_server::{Server, ServerEvent};
//!
//! let mut server = Server::builder().build()?;
//! server.set_event_handler(Box::new(|event| println!("{event:?}")));
//! server.listen(9080, Vec::new(), false)?;
//!
//! loop {
//!     server.poll();
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::handshake::{HandshakeSession, HandshakeStatus};
use crate::identifiers::PeerId;
use crate::peer::Peer;
use crate::transport::{Listener, RawStream};

use super::builder::ServerBuilder;
use super::config::{BufferConfig, ServerConfig};
use super::events::{EventHandler, ServerEvent};
use super::registry::PeerRegistry;

// ============================================================================
// Server
// ============================================================================

/// WebSocket server driven by periodic [`Server::poll`] calls.
pub struct Server {
    config: ServerConfig,
    listener: Box<dyn Listener>,
    pending: Vec<HandshakeSession>,
    peers: PeerRegistry<Peer>,
    protocols: Vec<String>,
    multiplayer: bool,
    refuse_new_connections: bool,
    handler: Option<EventHandler>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("listening", &self.is_listening())
            .field("local_addr", &self.local_addr())
            .field("pending", &self.pending.len())
            .field("peers", &self.peers.len())
            .field("multiplayer", &self.multiplayer)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Creates a configuration builder for the server.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Creates a stopped server over `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn new(config: ServerConfig, listener: Box<dyn Listener>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            listener,
            pending: Vec::new(),
            peers: PeerRegistry::new(),
            protocols: Vec::new(),
            multiplayer: false,
            refuse_new_connections: false,
            handler: None,
        })
    }
}

// ============================================================================
// Server - Lifecycle
// ============================================================================

impl Server {
    /// Starts accepting connections on `port`.
    ///
    /// In multiplayer mode id 1 is reserved for the server and peers are
    /// numbered from 2.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyListening`] if already listening
    /// - [`Error::Io`] if the transport cannot bind
    pub fn listen(&mut self, port: u16, protocols: Vec<String>, multiplayer: bool) -> Result<()> {
        if self.listener.is_listening() {
            return Err(Error::AlreadyListening);
        }

        self.listener.listen(self.config.bind_ip, port)?;
        self.protocols = protocols;
        self.multiplayer = multiplayer;
        self.peers.set_reserve_server_id(multiplayer);

        info!(
            addr = ?self.listener.local_addr(),
            multiplayer,
            "Server listening"
        );
        Ok(())
    }

    /// Stops listening and drops every connection.
    ///
    /// Peers are closed without a close handshake and no events are emitted.
    /// Calling this on a stopped server does nothing.
    pub fn stop(&mut self) {
        let was_listening = self.listener.is_listening();
        if was_listening {
            self.listener.stop();
        }

        let peers = self.peers.len();
        for (_, mut peer) in self.peers.drain() {
            peer.close_now();
        }
        let pending = mem::take(&mut self.pending).len();

        if was_listening || peers > 0 || pending > 0 {
            info!(peers, pending, "Server stopped");
        }
    }

    /// Returns `true` while accepting connections.
    #[inline]
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.is_listening()
    }

    /// Address the listener is bound to.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }
}

// ============================================================================
// Server - Scheduler
// ============================================================================

impl Server {
    /// Runs one tick using the current time.
    pub fn poll(&mut self) {
        self.poll_at(Instant::now());
    }

    /// Runs one tick as of `now`.
    ///
    /// Sessions accepted during this tick are stamped with `now`.
    pub fn poll_at(&mut self, now: Instant) {
        self.poll_peers();
        self.poll_pending(now);
        self.accept_connections(now);
    }

    fn poll_peers(&mut self) {
        for id in self.peers.ids() {
            let Ok(peer) = self.peers.get_mut(id) else {
                continue;
            };
            let activity = peer.poll();
            let connected = peer.is_connected();
            let was_clean = peer.was_clean();

            if activity.received > 0 {
                self.emit(ServerEvent::DataReceived { id });
            }
            if let Some((code, reason)) = activity.close_request {
                self.emit(ServerEvent::CloseRequested { id, code, reason });
            }
            if !connected {
                info!(peer_id = %id, was_clean, "Peer disconnected");
                self.emit(ServerEvent::Disconnected { id, was_clean });
                self.peers.unregister(id);
            }
        }
    }

    fn poll_pending(&mut self, now: Instant) {
        for mut session in mem::take(&mut self.pending) {
            match session.advance_at(now) {
                HandshakeStatus::Busy => self.pending.push(session),
                HandshakeStatus::Done => self.promote(session),
                HandshakeStatus::Failed(e) => {
                    debug!(addr = ?session.peer_addr(), error = %e, "Handshake failed");
                }
                HandshakeStatus::TimedOut => {
                    let e = session.timeout_error();
                    debug!(addr = ?session.peer_addr(), error = %e, "Handshake timed out");
                }
            }
        }
    }

    fn promote(&mut self, session: HandshakeSession) {
        let upgraded = match session.into_upgraded() {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(error = %e, "Completed handshake could not be upgraded");
                return;
            }
        };

        let id = match self.peers.allocate_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Dropping upgraded connection");
                return;
            }
        };

        let peer = Peer::new(id, upgraded, &self.config.buffers);
        let addr = peer.remote_addr();
        if let Err(e) = self.peers.register(id, peer) {
            warn!(peer_id = %id, error = %e, "Peer registration failed");
            return;
        }

        info!(peer_id = %id, ?addr, "Peer connected");
        self.emit(ServerEvent::Connected {
            id,
            protocol: String::new(),
        });
    }

    fn accept_connections(&mut self, now: Instant) {
        if !self.listener.is_listening() {
            return;
        }

        loop {
            match self.listener.take_connection() {
                Ok(Some(mut stream)) => {
                    let addr = stream.peer_addr().ok();
                    if !self.admits_connection() {
                        debug!(?addr, "Connection refused");
                        if let Err(e) = stream.shutdown() {
                            trace!(error = %e, "Shutdown of refused connection failed");
                        }
                        continue;
                    }

                    trace!(?addr, "Connection accepted");
                    self.pending.push(HandshakeSession::new(
                        stream,
                        now,
                        self.config.handshake_limits(),
                    ));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    fn admits_connection(&self) -> bool {
        if self.refuse_new_connections {
            return false;
        }
        self.config
            .max_peers
            .is_none_or(|max| self.pending.len() + self.peers.len() < max)
    }

    fn emit(&mut self, event: ServerEvent) {
        if let Some(handler) = self.handler.as_mut() {
            handler(event);
        }
    }
}

// ============================================================================
// Server - Peers
// ============================================================================

impl Server {
    /// Returns `true` if `id` is a registered peer.
    #[inline]
    #[must_use]
    pub fn has_peer(&self, id: PeerId) -> bool {
        self.peers.contains(id)
    }

    /// Looks up a peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerNotFound`] if `id` is not registered.
    pub fn get_peer(&self, id: PeerId) -> Result<&Peer> {
        self.peers.get(id)
    }

    /// Looks up a peer mutably.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerNotFound`] if `id` is not registered.
    pub fn get_peer_mut(&mut self, id: PeerId) -> Result<&mut Peer> {
        self.peers.get_mut(id)
    }

    /// Remote IP address of a peer.
    ///
    /// # Errors
    ///
    /// - [`Error::PeerNotFound`] if `id` is not registered
    /// - [`Error::InvalidState`] if the transport reported no address
    pub fn peer_address(&self, id: PeerId) -> Result<IpAddr> {
        self.peer_socket_addr(id).map(|addr| addr.ip())
    }

    /// Remote port of a peer.
    ///
    /// # Errors
    ///
    /// Same as [`Server::peer_address`].
    pub fn peer_port(&self, id: PeerId) -> Result<u16> {
        self.peer_socket_addr(id).map(|addr| addr.port())
    }

    /// Starts a close handshake with a peer.
    ///
    /// The peer is removed on a later poll, once the connection ends.
    ///
    /// # Errors
    ///
    /// - [`Error::PeerNotFound`] if `id` is not registered
    /// - [`Error::WebSocket`] if the close frame cannot be queued
    pub fn disconnect_peer(&mut self, id: PeerId, code: u16, reason: &str) -> Result<()> {
        self.peers.get_mut(id)?.close(code, reason)
    }

    /// Registered peer ids in ascending order.
    #[inline]
    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.ids()
    }

    /// Number of registered peers.
    #[inline]
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of connections still in their handshake.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn peer_socket_addr(&self, id: PeerId) -> Result<SocketAddr> {
        self.peers
            .get(id)?
            .remote_addr()
            .ok_or_else(|| Error::invalid_state(format!("peer {id} has no remote address")))
    }
}

// ============================================================================
// Server - Settings
// ============================================================================

impl Server {
    /// Sets the buffer sizes used for peers created from now on.
    ///
    /// # Arguments
    ///
    /// * `in_kib` - Inbound buffer size in KiB
    /// * `in_packets` - Inbound packet queue length
    /// * `out_kib` - Outbound buffer size in KiB
    /// * `out_packets` - Outbound packet queue length
    ///
    /// Every value is rounded up to a power of two.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] while listening
    /// - [`Error::InvalidArgument`] for zero or oversized values
    pub fn set_buffers(
        &mut self,
        in_kib: u32,
        in_packets: u32,
        out_kib: u32,
        out_packets: u32,
    ) -> Result<()> {
        if self.listener.is_listening() {
            return Err(Error::invalid_state(
                "buffers cannot be changed while listening",
            ));
        }
        self.config.buffers = BufferConfig::from_sizes(in_kib, in_packets, out_kib, out_packets)?;
        Ok(())
    }

    /// Largest payload a peer can send in one packet.
    #[inline]
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.config.buffers.max_packet_size()
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Subprotocols passed to [`Server::listen`].
    #[inline]
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Returns `true` if id 1 is reserved for the server.
    #[inline]
    #[must_use]
    pub fn is_multiplayer(&self) -> bool {
        self.multiplayer
    }

    /// Drops every newly accepted connection while `refuse` is `true`.
    pub fn set_refuse_new_connections(&mut self, refuse: bool) {
        self.refuse_new_connections = refuse;
    }

    /// Returns `true` if new connections are being refused.
    #[inline]
    #[must_use]
    pub fn is_refusing_new_connections(&self) -> bool {
        self.refuse_new_connections
    }

    /// Installs the callback receiving [`ServerEvent`]s.
    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.handler = Some(handler);
    }

    /// Removes the event callback.
    pub fn clear_event_handler(&mut self) {
        self.handler = None;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================
