//! WebSocket server module.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Server`] | Listener, pending handshakes and peers, advanced by `poll` |
//! | [`ServerBuilder`] | Fluent configuration builder |
//! | [`ServerConfig`] | Serializable configuration with defaults |
//! | [`BufferConfig`] | Per-peer buffer sizing |
//! | [`PeerRegistry`] | Id allocation and peer ownership |
//! | [`ServerEvent`] | Notifications emitted during `poll` |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for server configuration.
pub mod builder;

/// Config.
pub mod config;

/// Core server implementation.
pub mod core;

/// Server events and callback type.
pub mod events;

/// Peer id allocation and ownership.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ServerBuilder;
pub use config::{BufferConfig, PACKET_OVERHEAD, ServerConfig};
pub use core::Server;
pub use events::{EventHandler, ServerEvent};
pub use registry::PeerRegistry;
