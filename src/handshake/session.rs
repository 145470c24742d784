//! Incremental handshake state machine for one accepted connection.
//!
//! # States
//!
//! ```text
//! AwaitingRequest ──(request parsed)──► SendingResponse ──(flushed)──► Done
//!        │                                     │
//!        ├──(timeout)──► TimedOut              └──(write error)──► Failed
//!        └──(read error / too large / invalid)──► Failed
//! ```
//!
//! Each call to [`HandshakeSession::advance`] does as much work as the
//! stream allows without blocking and reports [`HandshakeStatus::Busy`] when
//! it has to wait for the next poll tick.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::{BoxedStream, RawStream};

use super::request::{HEADER_TERMINATOR, HandshakeRequest, find_terminator};
use super::response::build_response;

// ============================================================================
// Constants
// ============================================================================

/// Default bound on the request head, in bytes.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 4096;

/// Default time a client has to deliver its request.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Bytes requested per read call.
const READ_CHUNK: usize = 512;

// ============================================================================
// Types
// ============================================================================

/// Limits applied to every handshake session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeLimits {
    /// Maximum bytes accumulated before the request is rejected.
    pub max_header_size: usize,
    /// Time allowed to receive the complete request.
    pub timeout: Duration,
}

impl Default for HandshakeLimits {
    fn default() -> Self {
        Self {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Lifecycle state of a [`HandshakeSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Reading the HTTP request head.
    AwaitingRequest,
    /// Writing the `101 Switching Protocols` response.
    SendingResponse,
    /// Response fully flushed; the stream is ready for framing.
    Done,
    /// Request invalid or transport error.
    Failed,
    /// Request not received within the timeout.
    TimedOut,
}

/// Outcome of one [`HandshakeSession::advance`] call.
#[derive(Debug)]
pub enum HandshakeStatus {
    /// Waiting on the transport; call again next tick.
    Busy,
    /// Upgrade complete.
    Done,
    /// Session must be discarded.
    Failed(Error),
    /// Session must be discarded.
    TimedOut,
}

/// Parts of a completed session, handed to the new peer.
#[derive(Debug)]
pub struct Upgraded {
    /// The upgraded connection.
    pub stream: BoxedStream,
    /// Bytes received after the request head (early frames).
    pub leftover: Vec<u8>,
    /// The validated request.
    pub request: HandshakeRequest,
}

// ============================================================================
// HandshakeSession
// ============================================================================

/// A pending connection being upgraded to WebSocket.
pub struct HandshakeSession {
    stream: BoxedStream,
    started: Instant,
    limits: HandshakeLimits,
    state: HandshakeState,
    /// Request head received so far, never longer than `limits.max_header_size`.
    request: Vec<u8>,
    /// Bytes read past the terminator.
    leftover: Vec<u8>,
    parsed: Option<HandshakeRequest>,
    /// Empty until the request has been validated.
    response: Vec<u8>,
    response_sent: usize,
}

impl fmt::Debug for HandshakeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeSession")
            .field("state", &self.state)
            .field("received", &self.request.len())
            .field("response_sent", &self.response_sent)
            .finish_non_exhaustive()
    }
}

impl HandshakeSession {
    /// Creates a session for a freshly accepted stream.
    #[must_use]
    pub fn new(stream: BoxedStream, started: Instant, limits: HandshakeLimits) -> Self {
        Self {
            stream,
            started,
            limits,
            state: HandshakeState::AwaitingRequest,
            request: Vec::new(),
            leftover: Vec::new(),
            parsed: None,
            response: Vec::new(),
            response_sent: 0,
        }
    }

    /// Advances the handshake using the current time.
    pub fn advance(&mut self) -> HandshakeStatus {
        self.advance_at(Instant::now())
    }

    /// Advances the handshake as of `now`.
    pub fn advance_at(&mut self, now: Instant) -> HandshakeStatus {
        match self.state {
            HandshakeState::AwaitingRequest => {
                if now.saturating_duration_since(self.started) > self.limits.timeout {
                    self.state = HandshakeState::TimedOut;
                    return HandshakeStatus::TimedOut;
                }

                match self.read_request() {
                    Ok(true) => self.send_response(),
                    Ok(false) => HandshakeStatus::Busy,
                    Err(e) => self.fail(e),
                }
            }
            HandshakeState::SendingResponse => self.send_response(),
            HandshakeState::Done => HandshakeStatus::Done,
            HandshakeState::TimedOut => HandshakeStatus::TimedOut,
            HandshakeState::Failed => {
                HandshakeStatus::Failed(Error::invalid_state("handshake session already failed"))
            }
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// When the session was created.
    #[inline]
    #[must_use]
    pub fn started(&self) -> Instant {
        self.started
    }

    /// The client key, once the request has been validated.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.parsed.as_ref().map(HandshakeRequest::key)
    }

    /// The validated request, if parsing has completed.
    #[inline]
    #[must_use]
    pub fn request(&self) -> Option<&HandshakeRequest> {
        self.parsed.as_ref()
    }

    /// The precomputed response; empty until the request is validated.
    #[inline]
    #[must_use]
    pub fn response(&self) -> &[u8] {
        &self.response
    }

    /// Number of request bytes buffered.
    #[inline]
    #[must_use]
    pub fn bytes_received(&self) -> usize {
        self.request.len()
    }

    /// Remote address of the connection.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// The error describing an expired session.
    #[must_use]
    pub fn timeout_error(&self) -> Error {
        let timeout_ms = u64::try_from(self.limits.timeout.as_millis()).unwrap_or(u64::MAX);
        Error::connection_timeout(timeout_ms)
    }

    /// Consumes a completed session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the state is [`HandshakeState::Done`].
    pub fn into_upgraded(self) -> Result<Upgraded> {
        if self.state != HandshakeState::Done {
            return Err(Error::invalid_state(format!(
                "handshake not complete ({:?})",
                self.state
            )));
        }
        let request = self
            .parsed
            .ok_or_else(|| Error::invalid_state("handshake completed without a request"))?;

        Ok(Upgraded {
            stream: self.stream,
            leftover: self.leftover,
            request,
        })
    }
}

// ============================================================================
// HandshakeSession - I/O
// ============================================================================

impl HandshakeSession {
    /// Reads until the request head is complete or the stream would block.
    ///
    /// Returns `Ok(true)` once the request is parsed and the response built.
    fn read_request(&mut self) -> Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let room = self.limits.max_header_size.saturating_sub(self.request.len());
            if room == 0 {
                return Err(Error::header_too_large(self.limits.max_header_size));
            }

            let read = match self.stream.read(&mut chunk[..room.min(READ_CHUNK)]) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            let scan_from = self
                .request
                .len()
                .saturating_sub(HEADER_TERMINATOR.len() - 1);
            self.request.extend_from_slice(&chunk[..read]);

            if let Some(end) = find_terminator(&self.request, scan_from) {
                self.leftover = self.request.split_off(end);

                let request = HandshakeRequest::parse(&self.request)?;
                debug!(
                    target_path = request.target(),
                    key = request.key(),
                    "Upgrade request parsed"
                );

                self.response = build_response(request.key());
                self.parsed = Some(request);
                self.state = HandshakeState::SendingResponse;
                return Ok(true);
            }
        }
    }

    /// Writes the unsent remainder of the response.
    fn send_response(&mut self) -> HandshakeStatus {
        while self.response_sent < self.response.len() {
            match self.stream.write(&self.response[self.response_sent..]) {
                Ok(0) => return HandshakeStatus::Busy,
                Ok(n) => {
                    self.response_sent += n;
                    trace!(
                        sent = self.response_sent,
                        total = self.response.len(),
                        "Response bytes written"
                    );
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return HandshakeStatus::Busy,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return self.fail(e.into()),
            }
        }

        match self.stream.flush() {
            Ok(()) => {
                self.state = HandshakeState::Done;
                HandshakeStatus::Done
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => HandshakeStatus::Busy,
            Err(e) => self.fail(e.into()),
        }
    }

    fn fail(&mut self, error: Error) -> HandshakeStatus {
        self.state = HandshakeState::Failed;
        HandshakeStatus::Failed(error)
    }
}

// ============================================================================
// Tests
// ============================================================================
