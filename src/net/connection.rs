//! Live connection accounting for listeners.
//!
//! # Responsibilities
//! - Count accepted sockets that have not closed yet
//! - Let `close` wait until every accepted socket has drained
//!
//! A guard is taken when a client is accepted and released when its socket
//! reaches `Closed`, not when the last reference to it goes away.

use std::sync::Arc;
use tokio::sync::watch;

use crate::transport::ConnHandle;

/// Tracks live accepted connections for one listener.
///
/// Uses a watch channel so waiters observe the count reaching zero.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new live connection. Returns a guard that releases it on drop.
    pub fn track(&self, conn: ConnHandle) -> ConnectionGuard {
        self.active.send_modify(|count| *count += 1);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            conn,
        }
    }

    /// Current live connection count.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until every tracked connection has been released.
    pub async fn wait_drained(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds one slot in a [`ConnectionTracker`].
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    conn: ConnHandle,
}

impl ConnectionGuard {
    /// The connection this guard accounts for.
    pub fn conn(&self) -> ConnHandle {
        self.conn
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count = count.saturating_sub(1));
        tracing::trace!(conn = %self.conn, "Connection released");
    }
}
