//! Background polling on a tokio runtime.
//!
//! The server itself never spawns anything. When an application would rather
//! not drive [`Server::poll`] from its own loop, [`spawn_poller`] runs a task
//! that locks the shared server and polls it once per tick.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ws_poll_server::{Server, runtime};
//!
//! let mut server = Server::builder().build()?;
//! server.listen(9080, Vec::new(), false)?;
//!
//! let shared = runtime::shared(server);
//! let poller = runtime::spawn_poller(Arc::clone(&shared), Duration::from_millis(10));
//! // ... use `shared.lock()` to send packets ...
//! poller.shutdown().await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::error::{Error, Result};
use crate::server::Server;

// ============================================================================
// Constants
// ============================================================================

/// Suggested poll interval.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Shortest accepted poll interval.
const MIN_TICK: Duration = Duration::from_millis(1);

// ============================================================================
// Types
// ============================================================================

/// Server shared between the poller task and API callers.
pub type SharedServer = Arc<Mutex<Server>>;

/// Wraps a server for sharing.
#[inline]
#[must_use]
pub fn shared(server: Server) -> SharedServer {
    Arc::new(Mutex::new(server))
}

// ============================================================================
// PollerHandle
// ============================================================================

/// Handle to a running poller task.
///
/// Dropping the handle also stops the task.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Returns `true` once the task has exited.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stops the poller and waits for it to exit.
    ///
    /// The server is left as is; call [`Server::stop`] to close connections.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.join)
            .await
            .map_err(|e| Error::invalid_state(format!("poller task failed: {e}")))
    }
}

// ============================================================================
// Poller
// ============================================================================

/// Spawns a task calling [`Server::poll`] every `tick`.
///
/// Must be called from within a tokio runtime. Ticks that fall behind are
/// delayed rather than bursted.
#[must_use]
pub fn spawn_poller(server: SharedServer, tick: Duration) -> PollerHandle {
    let (tx, rx) = oneshot::channel();
    let join = tokio::spawn(run_poller(server, tick.max(MIN_TICK), rx));

    PollerHandle {
        shutdown: Some(tx),
        join,
    }
}

async fn run_poller(server: SharedServer, tick: Duration, mut shutdown: oneshot::Receiver<()>) {
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(tick_ms = tick.as_millis() as u64, "Poller started");

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => server.lock().poll(),
        }
    }

    debug!("Poller stopped");
}

// ============================================================================
// Tests
// ============================================================================
