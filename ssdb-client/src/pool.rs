//! # Connection Pool
//!
//! Purpose: Keep a bounded set of connections to one endpoint, evict the dead
//! and idle ones on a timer, and report aggregate counters.
//!
//! ## Design Principles
//! 1. **Slot Reservation**: A slot is reserved before dialing and released if
//!    the dial fails, so concurrent acquires never overshoot the limit.
//! 2. **Minimal Locking**: The member list lock covers list edits only; dials
//!    and socket shutdowns happen outside it.
//! 3. **Explicit Ownership**: A pool is built and passed around by the caller;
//!    the recycler holds a weak handle and stops with the pool.
//! 4. **Dedicated Slots**: `acquire` always dials; members are not handed out
//!    twice. The pool exists for recycling and statistics.

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{ClientConfig, PoolConfig};
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::transport::Dialer;

struct PoolState {
    members: Vec<Connection>,
    /// Slots reserved by dials still in progress.
    pending: usize,
}

struct PoolInner {
    dialer: Arc<dyn Dialer>,
    client: ClientConfig,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Point-in-time summary of pool members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Current member count.
    pub members: usize,
    /// Members in the middle of a request.
    pub in_use: usize,
    /// Connected members with no request running.
    pub idle: usize,
    /// Members that are not connected.
    pub closed: usize,
    /// Requests started across all members.
    pub attempts: u64,
    /// Requests that got a reply.
    pub successes: u64,
    /// `attempts - successes`.
    pub failures: u64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool={} use={} idle={} closed={} total={} success={} failed={}",
            self.members,
            self.in_use,
            self.idle,
            self.closed,
            self.attempts,
            self.successes,
            self.failures
        )
    }
}

/// Connection pool handle.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates an empty pool. Nothing is dialed until `acquire`.
    pub fn new(dialer: Arc<dyn Dialer>, client: ClientConfig, config: PoolConfig) -> Self {
        let state = PoolState {
            members: Vec::with_capacity(config.max_connections.min(64)),
            pending: 0,
        };
        Pool {
            inner: Arc::new(PoolInner {
                dialer,
                client,
                config,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Dials a new member, registers it, and hands it to the caller.
    pub async fn acquire(&self) -> ClientResult<Connection> {
        if !self.try_reserve() {
            return Err(ClientError::PoolExhausted);
        }

        match Connection::open(Arc::clone(&self.inner.dialer), self.inner.client.clone()).await {
            Ok(conn) => {
                let mut state = self.inner.state.lock();
                state.pending = state.pending.saturating_sub(1);
                state.members.push(conn.clone());
                Ok(conn)
            }
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.members.len() + state.pending >= self.inner.config.max_connections {
            return false;
        }
        state.pending += 1;
        true
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.pending = state.pending.saturating_sub(1);
    }

    /// Runs one recycling pass and returns how many members were evicted.
    ///
    /// A member goes when it is not connected or has been idle longer than
    /// `idle_timeout_secs`. Survivors keep their relative order. Evicted
    /// members are closed on spawned tasks, so this needs a tokio runtime.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.inner.config.idle_timeout();

        let evicted: Vec<Connection> = {
            let mut state = self.inner.state.lock();
            let (evicted, kept) = mem::take(&mut state.members).into_iter().partition(|conn| {
                !conn.is_connected() || now.saturating_duration_since(conn.last_active()) > idle_timeout
            });
            state.members = kept;
            evicted
        };

        for conn in &evicted {
            debug!(id = conn.id(), state = ?conn.state(), idle = ?conn.idle_for(), "evicting pool member");
            let conn = conn.clone();
            tokio::spawn(async move { conn.close().await });
        }
        evicted.len()
    }

    /// Sweeps every `sweep_interval_secs` until the pool is dropped.
    pub fn spawn_recycler(&self) -> JoinHandle<()> {
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pool = match weak.upgrade() {
                    Some(inner) => Pool { inner },
                    None => break,
                };
                let evicted = pool.sweep();
                debug!(evicted, stats = %pool.stats(), "pool sweep");
            }
        })
    }

    /// Summarizes member states and counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        let mut stats = PoolStats {
            members: state.members.len(),
            ..PoolStats::default()
        };
        for conn in &state.members {
            if !conn.is_connected() {
                stats.closed += 1;
            } else if conn.is_busy() {
                stats.in_use += 1;
            } else {
                stats.idle += 1;
            }
            stats.attempts += conn.attempts();
            stats.successes += conn.successes();
        }
        stats.failures = stats.attempts.saturating_sub(stats.successes);
        stats
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and closes every member.
    pub async fn shutdown(&self) {
        let members = mem::take(&mut self.inner.state.lock().members);
        for conn in members {
            conn.close().await;
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("dialer", &self.inner.dialer)
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::connection::ConnectionState;
    use crate::testing::{script, wait_for, MockDialer, Script};

    fn pool_with(max_connections: usize) -> (Pool, Arc<MockDialer>) {
        let dialer = MockDialer::new(script(|_| Script::reply(&["ok", "1"])));
        let config = PoolConfig {
            max_connections,
            idle_timeout_secs: 30,
            sweep_interval_secs: 1,
        };
        (Pool::new(dialer.clone(), ClientConfig::default(), config), dialer)
    }

    #[tokio::test]
    async fn acquire_dials_fresh_members_up_to_limit() {
        let (pool, dialer) = pool_with(2);
        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(pool.len(), 2);
        assert!(matches!(pool.acquire().await, Err(ClientError::PoolExhausted)));
        assert_eq!(dialer.dials(), 2);
    }

    #[tokio::test]
    async fn failed_dial_releases_slot() {
        let (pool, dialer) = pool_with(1);
        dialer.fail_next(1);
        assert!(matches!(pool.acquire().await, Err(ClientError::Dial(_))));
        assert!(pool.is_empty());
        pool.acquire().await.unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn sweep_evicts_idle_and_dead_members() {
        let (pool, _dialer) = pool_with(4);
        let fresh_a = pool.acquire().await.unwrap();
        let idle = pool.acquire().await.unwrap();
        let fresh_b = pool.acquire().await.unwrap();
        let dead = pool.acquire().await.unwrap();

        idle.backdate(Duration::from_secs(31));
        dead.close().await;

        assert_eq!(pool.sweep(), 2);
        let ids: Vec<u64> = pool.inner.state.lock().members.iter().map(Connection::id).collect();
        assert_eq!(ids, vec![fresh_a.id(), fresh_b.id()]);

        wait_for(|| idle.state() == ConnectionState::Closed).await;
        assert!(fresh_a.is_connected());
        assert_eq!(pool.sweep(), 0);
    }

    #[tokio::test]
    async fn sweep_evicts_member_still_reconnecting() {
        let dialer = MockDialer::new(script(|_| Script::reply(&["ok", "1"])));
        let client = ClientConfig::default().with_reconnect_backoff(Duration::from_millis(10));
        let pool = Pool::new(dialer.clone(), client, PoolConfig::default());
        let healthy = pool.acquire().await.unwrap();
        let broken = pool.acquire().await.unwrap();

        dialer.fail_next(usize::MAX);
        let reset = ClientError::from_io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(broken.check_and_recover(&reset).await);
        wait_for(|| dialer.dials() >= 4).await;
        assert!(!broken.is_connected());
        assert!(broken.is_recovering());

        assert_eq!(pool.sweep(), 1);
        let ids: Vec<u64> = pool.inner.state.lock().members.iter().map(Connection::id).collect();
        assert_eq!(ids, vec![healthy.id()]);

        wait_for(|| broken.state() == ConnectionState::Closed).await;
        wait_for(|| !broken.is_recovering()).await;
        let dials = dialer.dials();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dialer.dials(), dials);
        assert!(healthy.is_connected());
    }

    #[tokio::test]
    async fn stats_aggregate_counters() {
        let (pool, _dialer) = pool_with(3);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        a.execute("set", &["k".into(), "v".into()]).await.unwrap();
        a.execute("get", &["k".into()]).await.unwrap();
        b.execute("get", &["k".into()]).await.unwrap();
        b.close().await;

        let stats = pool.stats();
        assert_eq!(stats.members, 2);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.successes, 3);
        assert_eq!(stats.failures, 0);
        assert!(stats.to_string().contains("pool=2"));
    }

    #[tokio::test]
    async fn recycler_runs_on_interval() {
        let (pool, _dialer) = pool_with(2);
        let conn = pool.acquire().await.unwrap();
        let handle = pool.spawn_recycler();
        conn.close().await;

        wait_for(|| pool.is_empty()).await;
        drop(pool);
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("recycler stops once the pool is dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let (pool, _dialer) = pool_with(2);
        let conn = pool.acquire().await.unwrap();
        pool.shutdown().await;
        assert!(pool.is_empty());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
