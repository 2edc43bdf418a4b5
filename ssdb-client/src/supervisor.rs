//! # Reconnect Supervisor
//!
//! Purpose: Bring a connection back after a network failure without the
//! caller having to notice.
//!
//! ## Design Principles
//! 1. **One Per Connection**: An atomic flag admits a single supervisor; later
//!    failures while it runs are absorbed.
//! 2. **Never Gives Up**: Dial, sleep a fixed backoff, repeat, until the
//!    connection is back, closed, or dropped.
//! 3. **Weak Ownership**: The task holds a weak handle between attempts so a
//!    discarded connection ends its supervisor.

use std::sync::atomic::Ordering;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::connection::{Connection, ConnectionState, WeakConnection};

/// Starts a supervisor for `conn` unless one is already running.
///
/// Returns `true` when a new task was spawned. Outside a tokio runtime (a
/// connection dropped during runtime shutdown) nothing is spawned.
pub(crate) fn start(conn: &Connection) -> bool {
    let runtime = match Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => return false,
    };
    if conn.recovery_flag().swap(true, Ordering::AcqRel) {
        return false;
    }
    runtime.spawn(supervise(conn.downgrade()));
    true
}

async fn supervise(weak: WeakConnection) {
    loop {
        heal(&weak).await;

        let conn = match weak.upgrade() {
            Some(conn) => conn,
            None => return,
        };
        conn.recovery_flag().store(false, Ordering::Release);

        // A failure between the last successful dial and clearing the flag
        // would otherwise find the flag set and never be healed.
        if conn.state() != ConnectionState::Disconnected
            || conn.recovery_flag().swap(true, Ordering::AcqRel)
        {
            return;
        }
    }
}

async fn heal(weak: &WeakConnection) {
    let mut attempt: u64 = 0;
    loop {
        let conn = match weak.upgrade() {
            Some(conn) => conn,
            None => return,
        };
        match conn.state() {
            ConnectionState::Connected | ConnectionState::Closed => return,
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        attempt += 1;
        match conn.reconnect().await {
            Ok(()) => {
                info!(id = conn.id(), attempt, "reconnected");
                return;
            }
            Err(err) => {
                if conn.state() == ConnectionState::Closed {
                    return;
                }
                warn!(id = conn.id(), attempt, error = %err, "reconnect failed, backing off");
            }
        }

        let backoff = conn.config().reconnect_backoff();
        drop(conn);
        tokio::time::sleep(backoff).await;
    }
}
