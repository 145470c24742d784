//! Server configuration.
//!
//! Every value the server needs is supplied here at construction time; there
//! is no global settings lookup. [`ServerConfig`] deserializes with `serde`
//! and any missing field falls back to its documented default.
//!
//! # Example
//!
//! ```ignore
//! use ws_poll_server::ServerConfig;
//!
//! let config = ServerConfig::from_json(r#"{ "max_peers": 512, "handshake_timeout_ms": 2000 }"#)?;
//! assert_eq!(config.max_header_size, 4096);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::handshake::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_HEADER_SIZE, HandshakeLimits};

// ============================================================================
// Constants
// ============================================================================

/// Bookkeeping bytes reserved per outbound packet.
pub const PACKET_OVERHEAD: usize = 8;

/// Default inbound/outbound buffer size in KiB.
pub const DEFAULT_BUFFER_KIB: u32 = 64;

/// Default inbound/outbound packet count.
pub const DEFAULT_PACKETS: u32 = 1024;

/// Largest accepted buffer size in KiB (1 GiB).
const MAX_BUFFER_KIB: u32 = 1 << 20;

/// Largest accepted packet count.
const MAX_PACKETS: u32 = 1 << 20;

/// Buffer exponents are KiB exponents plus this.
const KIB_SHIFT: u8 = 10;

/// Smallest header bound that can hold a request line and terminator.
const MIN_HEADER_SIZE: usize = 64;

// ============================================================================
// BufferConfig
// ============================================================================

/// Power-of-two sizing applied to every peer created by the server.
///
/// Stored as exponents: a buffer of `2^in_buffer_shift` bytes, at most
/// `2^in_packet_shift` queued packets, and likewise outbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Inbound buffer exponent (bytes).
    pub in_buffer_shift: u8,
    /// Inbound packet count exponent.
    pub in_packet_shift: u8,
    /// Outbound buffer exponent (bytes).
    pub out_buffer_shift: u8,
    /// Outbound packet count exponent.
    pub out_packet_shift: u8,
}

impl BufferConfig {
    /// Builds a configuration from buffer sizes in KiB and packet counts,
    /// each rounded up to the next power of two.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for zero or oversized values.
    pub fn from_sizes(in_kib: u32, in_packets: u32, out_kib: u32, out_packets: u32) -> Result<Self> {
        Ok(Self {
            in_buffer_shift: buffer_shift("inbound buffer", in_kib)?,
            in_packet_shift: packet_shift("inbound packets", in_packets)?,
            out_buffer_shift: buffer_shift("outbound buffer", out_kib)?,
            out_packet_shift: packet_shift("outbound packets", out_packets)?,
        })
    }

    /// Inbound buffer size in bytes.
    #[inline]
    #[must_use]
    pub const fn in_buffer_size(&self) -> usize {
        pow2(self.in_buffer_shift)
    }

    /// Maximum queued inbound packets.
    #[inline]
    #[must_use]
    pub const fn in_packet_limit(&self) -> usize {
        pow2(self.in_packet_shift)
    }

    /// Outbound buffer size in bytes.
    #[inline]
    #[must_use]
    pub const fn out_buffer_size(&self) -> usize {
        pow2(self.out_buffer_shift)
    }

    /// Maximum queued outbound packets.
    #[inline]
    #[must_use]
    pub const fn out_packet_limit(&self) -> usize {
        pow2(self.out_packet_shift)
    }

    /// Largest payload a single outbound packet may carry.
    #[inline]
    #[must_use]
    pub const fn max_packet_size(&self) -> usize {
        self.out_buffer_size().saturating_sub(PACKET_OVERHEAD)
    }

    /// Checks that every exponent is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first out-of-range exponent.
    pub fn validate(&self) -> Result<()> {
        let max_buffer = nearest_shift(MAX_BUFFER_KIB - 1) + KIB_SHIFT;
        let max_packets = nearest_shift(MAX_PACKETS - 1);

        for (name, shift, min, max) in [
            ("in_buffer_shift", self.in_buffer_shift, KIB_SHIFT, max_buffer),
            ("in_packet_shift", self.in_packet_shift, 0, max_packets),
            ("out_buffer_shift", self.out_buffer_shift, KIB_SHIFT, max_buffer),
            ("out_packet_shift", self.out_packet_shift, 0, max_packets),
        ] {
            if !(min..=max).contains(&shift) {
                return Err(Error::config(format!(
                    "{name} must be within {min}..={max}, got {shift}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        let packets = nearest_shift(DEFAULT_PACKETS - 1);
        let buffer = nearest_shift(DEFAULT_BUFFER_KIB - 1) + KIB_SHIFT;
        Self {
            in_buffer_shift: buffer,
            in_packet_shift: packets,
            out_buffer_shift: buffer,
            out_packet_shift: packets,
        }
    }
}

/// Bit length of `n`: the exponent of the smallest power of two above `n`.
#[inline]
/// `2^shift`, saturating at `usize::MAX` for unvalidated exponents.
const fn pow2(shift: u8) -> usize {
    match 1usize.checked_shl(shift as u32) {
        Some(value) => value,
        None => usize::MAX,
    }
}

const fn nearest_shift(n: u32) -> u8 {
    (u32::BITS - n.leading_zeros()) as u8
}

fn buffer_shift(name: &str, kib: u32) -> Result<u8> {
    if kib == 0 || kib > MAX_BUFFER_KIB {
        return Err(Error::invalid_argument(format!(
            "{name} must be within 1..={MAX_BUFFER_KIB} KiB, got {kib}"
        )));
    }
    Ok(nearest_shift(kib - 1) + KIB_SHIFT)
}

fn packet_shift(name: &str, count: u32) -> Result<u8> {
    if count == 0 || count > MAX_PACKETS {
        return Err(Error::invalid_argument(format!(
            "{name} must be within 1..={MAX_PACKETS}, got {count}"
        )));
    }
    Ok(nearest_shift(count - 1))
}

// ============================================================================
// ServerConfig
// ============================================================================

/// Complete server configuration with documented defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to. Default: `0.0.0.0`.
    pub bind_ip: IpAddr,

    /// Per-peer buffer sizing. Default: 64 KiB / 1024 packets each way.
    pub buffers: BufferConfig,

    /// Bound on the upgrade request head in bytes. Default: 4096.
    pub max_header_size: usize,

    /// Time a client has to deliver its upgrade request. Default: 1000 ms.
    pub handshake_timeout_ms: u64,

    /// Refuse new connections once pending plus registered reaches this.
    /// Default: unlimited.
    pub max_peers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            buffers: BufferConfig::default(),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            max_peers: None,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration with default values.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document does not deserialize
    /// - [`Error::Config`] if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Handshake timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Limits handed to each handshake session.
    #[inline]
    #[must_use]
    pub fn handshake_limits(&self) -> HandshakeLimits {
        HandshakeLimits {
            max_header_size: self.max_header_size,
            timeout: self.handshake_timeout(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.buffers.validate()?;

        if self.max_header_size < MIN_HEADER_SIZE {
            return Err(Error::config(format!(
                "max_header_size must be at least {MIN_HEADER_SIZE}, got {}",
                self.max_header_size
            )));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(Error::config("handshake_timeout_ms must be greater than zero"));
        }
        if self.max_peers == Some(0) {
            return Err(Error::config("max_peers must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_shift() {
        assert_eq!(nearest_shift(0), 0);
        assert_eq!(nearest_shift(1), 1);
        assert_eq!(nearest_shift(63), 6);
        assert_eq!(nearest_shift(64), 7);
        assert_eq!(nearest_shift(1023), 10);
    }

    #[test]
    fn test_default_buffers() {
        let buffers = BufferConfig::default();
        assert_eq!(buffers.in_buffer_size(), 64 * 1024);
        assert_eq!(buffers.in_packet_limit(), 1024);
        assert_eq!(buffers.out_buffer_size(), 64 * 1024);
        assert_eq!(buffers.out_packet_limit(), 1024);
        assert_eq!(buffers.max_packet_size(), 64 * 1024 - PACKET_OVERHEAD);
    }

    #[test]
    fn test_from_sizes_rounds_up() {
        let buffers = BufferConfig::from_sizes(100, 1000, 1, 1).unwrap();
        assert_eq!(buffers.in_buffer_size(), 128 * 1024);
        assert_eq!(buffers.in_packet_limit(), 1024);
        assert_eq!(buffers.out_buffer_size(), 1024);
        assert_eq!(buffers.out_packet_limit(), 1);
    }

    #[test]
    fn test_from_sizes_matches_default() {
        let buffers =
            BufferConfig::from_sizes(DEFAULT_BUFFER_KIB, DEFAULT_PACKETS, DEFAULT_BUFFER_KIB, DEFAULT_PACKETS)
                .unwrap();
        assert_eq!(buffers, BufferConfig::default());
    }

    #[test]
    fn test_from_sizes_rejects_zero() {
        let err = BufferConfig::from_sizes(0, 16, 16, 16).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(BufferConfig::from_sizes(16, 0, 16, 16).is_err());
    }

    #[test]
    fn test_from_sizes_rejects_oversized() {
        assert!(BufferConfig::from_sizes(MAX_BUFFER_KIB, 1, 1, 1).is_ok());
        assert!(BufferConfig::from_sizes(MAX_BUFFER_KIB + 1, 1, 1, 1).is_err());
        assert!(BufferConfig::from_sizes(1, 1, 1, MAX_PACKETS + 1).is_err());
    }

    #[test]
    fn test_buffer_validate() {
        let mut buffers = BufferConfig::default();
        assert!(buffers.validate().is_ok());
        buffers.out_buffer_shift = 4;
        assert!(matches!(buffers.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_oversized_shift_saturates() {
        let buffers = BufferConfig {
            in_buffer_shift: 200,
            in_packet_shift: 64,
            out_buffer_shift: u8::MAX,
            out_packet_shift: 3,
        };

        assert_eq!(buffers.in_buffer_size(), usize::MAX);
        assert_eq!(buffers.in_packet_limit(), usize::MAX);
        assert_eq!(buffers.out_buffer_size(), usize::MAX);
        assert_eq!(buffers.out_packet_limit(), 8);
        assert_eq!(buffers.max_packet_size(), usize::MAX - PACKET_OVERHEAD);
        assert!(buffers.validate().is_err());
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::new();
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.max_header_size, 4096);
        assert_eq!(config.handshake_timeout(), Duration::from_millis(1000));
        assert!(config.max_peers.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            ServerConfig::from_json(r#"{ "max_peers": 8, "bind_ip": "127.0.0.1" }"#).unwrap();
        assert_eq!(config.max_peers, Some(8));
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.buffers, BufferConfig::default());
    }

    #[test]
    fn test_from_json_rejects_invalid_values() {
        let err = ServerConfig::from_json(r#"{ "handshake_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = ServerConfig::from_json(r#"{ "max_header_size": 8 }"#).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_from_json_rejects_syntax_errors() {
        let err = ServerConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_handshake_limits() {
        let config = ServerConfig {
            max_header_size: 1024,
            handshake_timeout_ms: 250,
            ..ServerConfig::default()
        };
        let limits = config.handshake_limits();
        assert_eq!(limits.max_header_size, 1024);
        assert_eq!(limits.timeout, Duration::from_millis(250));
    }
}
