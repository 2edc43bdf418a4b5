//! # Connection
//!
//! Purpose: Own one byte stream to the server, run request/response round
//! trips over it, and track the lifecycle the pool and the reconnect
//! supervisor act on.
//!
//! ## Design Principles
//! 1. **One Request In Flight**: The stream and its buffers sit behind an
//!    async mutex; a round trip holds it from write to complete reply.
//! 2. **Lock-Free Observation**: State, counters and timestamps are atomics
//!    (or a tiny sync mutex) so the pool can inspect members without ever
//!    waiting on a socket.
//! 3. **Buffer Reuse**: Each connection keeps its read and write buffers.
//! 4. **Heal, Then Report**: Network failures tear the stream down and start
//!    background recovery, but are still returned to the caller.
//!
//! ## Lifecycle
//!
//! ```text
//!                 dial ok
//! Disconnected ──► Connecting ──► Connected
//!      ▲               │              │
//!      └── dial err ───┘   net error  │
//!      ▲──────────────────────────────┘
//!
//! close() from any state ──► Closed (terminal)
//! ```

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, trace, warn};

use ssdb_proto::{decode, decompress, encode_request, Frame, Value};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::reply::{self, Reply};
use crate::supervisor;
use crate::transport::{BoxedStream, Dialer};

const READ_BUFFER_CAPACITY: usize = 8 * 1024;
const WRITE_BUFFER_CAPACITY: usize = 256;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Terminal: the socket is released and no further transitions happen.
    Closed = 3,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Closed,
        }
    }
}

/// Handle to one server session.
///
/// Clones share the same session; the pool, the caller and fan-out workers
/// all hold clones. The stream is released on `close()` or when the last
/// clone is dropped.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// Weak handle used by background tasks so they never keep a discarded
/// connection alive.
pub(crate) struct WeakConnection(Weak<Shared>);

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|shared| Connection { shared })
    }
}

struct Shared {
    id: u64,
    dialer: Arc<dyn Dialer>,
    config: ClientConfig,
    state: AtomicU8,
    io: AsyncMutex<Option<Io>>,
    last_active: Mutex<Instant>,
    attempts: AtomicU64,
    successes: AtomicU64,
    busy: AtomicBool,
    recovering: AtomicBool,
}

/// Stream plus the buffers reused across round trips.
struct Io {
    stream: BoxedStream,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Dials the server and returns a connected session.
    ///
    /// When a password is configured, `auth` is sent right away. A rejected
    /// password is logged but leaves the connection `Connected`.
    pub async fn open(dialer: Arc<dyn Dialer>, config: ClientConfig) -> ClientResult<Self> {
        let conn = Connection::new(dialer, config);
        conn.reconnect().await?;
        Ok(conn)
    }

    /// Like [`Connection::open`], but a failed first dial still yields the
    /// connection, with the reconnect supervisor already working on it.
    ///
    /// The dial error is returned once alongside the handle.
    pub async fn open_or_recover(
        dialer: Arc<dyn Dialer>,
        config: ClientConfig,
    ) -> (Self, Option<ClientError>) {
        let conn = Connection::new(dialer, config);
        match conn.reconnect().await {
            Ok(()) => (conn, None),
            Err(err) => {
                supervisor::start(&conn);
                (conn, Some(err))
            }
        }
    }

    pub(crate) fn new(dialer: Arc<dyn Dialer>, config: ClientConfig) -> Self {
        Connection {
            shared: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                dialer,
                config,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                io: AsyncMutex::new(None),
                last_active: Mutex::new(Instant::now()),
                attempts: AtomicU64::new(0),
                successes: AtomicU64::new(0),
                busy: AtomicBool::new(false),
                recovering: AtomicBool::new(false),
            }),
        }
    }

    /// Dials a fresh stream if the connection is `Disconnected`.
    ///
    /// Returns immediately when already connected and fails with
    /// `LostConnection` once closed.
    pub async fn reconnect(&self) -> ClientResult<()> {
        let mut slot = self.shared.io.lock().await;
        match self.transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
            Ok(()) => {}
            Err(ConnectionState::Connected) => return Ok(()),
            Err(_) => return Err(ClientError::LostConnection),
        }

        let stream = match self.shared.dialer.dial().await {
            Ok(stream) => stream,
            Err(err) => {
                let _ = self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                warn!(id = self.id(), dialer = ?self.shared.dialer, error = %err, "dial failed");
                return Err(ClientError::Dial(err));
            }
        };

        *slot = Some(Io {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            write_buf: Vec::with_capacity(WRITE_BUFFER_CAPACITY),
        });
        // close() may have landed while the dial was pending.
        if self
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
            .is_err()
        {
            *slot = None;
            return Err(ClientError::LostConnection);
        }
        drop(slot);

        self.touch();
        info!(id = self.id(), dialer = ?self.shared.dialer, "connected");

        if let Some(password) = self.shared.config.password.as_deref() {
            match self.execute("auth", &[Value::from(password)]).await {
                Ok(Reply::Bool(true)) => debug!(id = self.id(), "authenticated"),
                Ok(reply) => warn!(id = self.id(), ?reply, "auth rejected"),
                Err(err) => warn!(id = self.id(), error = %err, "auth failed"),
            }
        }
        Ok(())
    }

    /// Sends `[command] + args` and waits for the typed reply.
    ///
    /// **Logic**:
    /// 1. Require `Connected`; otherwise `LostConnection`.
    /// 2. Encode, write, then read until one frame decodes.
    /// 3. Expand `zip` replies and classify by command.
    ///
    /// Network failures close the stream and start background recovery
    /// before the error is returned. Protocol errors leave the stream open.
    ///
    /// Dropping the returned future mid round trip (e.g. under
    /// `tokio::time::timeout`) abandons the stream: a late reply could
    /// otherwise be read as the answer to the next command.
    pub async fn execute(&self, command: &str, args: &[Value]) -> ClientResult<Reply> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::LostConnection);
        }

        let mut slot = self.shared.io.lock().await;
        let io = match slot.as_mut() {
            Some(io) if self.state() == ConnectionState::Connected => io,
            _ => return Err(ClientError::LostConnection),
        };

        self.shared.attempts.fetch_add(1, Ordering::Relaxed);
        let guard = RoundTripGuard::enter(self, command);
        let result = io.round_trip(command, args).await;
        guard.finish();

        let frame = match result {
            Ok(frame) => frame,
            Err(err) => {
                if err.is_transient() {
                    warn!(id = self.id(), command, error = %err, "network error, reconnecting");
                    self.teardown(&mut slot);
                    drop(slot);
                    supervisor::start(self);
                } else {
                    debug!(id = self.id(), command, error = %err, "request failed");
                }
                return Err(err);
            }
        };
        drop(slot);

        self.shared.successes.fetch_add(1, Ordering::Relaxed);
        self.touch();

        let reply = reply::classify(command, &frame);
        if let Err(err) = &reply {
            if reply::reports_lost_connection(err) {
                warn!(id = self.id(), command, error = %err, "server reported lost connection");
                self.check_and_recover(err).await;
            }
        }
        reply
    }

    /// Closes the stream and starts background recovery when `err` is a
    /// network failure (or a reply reporting one). Returns whether recovery
    /// was triggered; other errors have no side effects.
    pub async fn check_and_recover(&self, err: &ClientError) -> bool {
        if !err.is_transient() && !reply::reports_lost_connection(err) {
            return false;
        }
        let mut slot = self.shared.io.lock().await;
        self.teardown(&mut slot);
        drop(slot);
        supervisor::start(self);
        true
    }

    /// Releases the stream and moves to `Closed`. Idempotent.
    ///
    /// Waits for an in-flight request to finish before the socket is shut.
    pub async fn close(&self) {
        let previous = self
            .shared
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if ConnectionState::from_u8(previous) == ConnectionState::Closed {
            return;
        }

        let mut slot = self.shared.io.lock().await;
        if let Some(mut io) = slot.take() {
            let _ = io.stream.shutdown().await;
        }
        debug!(id = self.id(), "closed");
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True while a round trip is in progress.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// True while a reconnect supervisor is running.
    pub fn is_recovering(&self) -> bool {
        self.shared.recovering.load(Ordering::Acquire)
    }

    /// Requests started on this connection.
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Requests that produced a reply frame.
    pub fn successes(&self) -> u64 {
        self.shared.successes.load(Ordering::Relaxed)
    }

    pub fn last_active(&self) -> Instant {
        *self.shared.last_active.lock()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active().elapsed()
    }

    pub(crate) fn dialer(&self) -> Arc<dyn Dialer> {
        Arc::clone(&self.shared.dialer)
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.shared))
    }

    pub(crate) fn recovery_flag(&self) -> &AtomicBool {
        &self.shared.recovering
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: Duration) {
        let mut last = self.shared.last_active.lock();
        *last = last.checked_sub(by).unwrap_or(*last);
    }

    fn touch(&self) {
        *self.shared.last_active.lock() = Instant::now();
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> Result<(), ConnectionState> {
        self.shared
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }

    /// Drops the stream and marks the session `Disconnected` (unless closed).
    fn teardown(&self, slot: &mut Option<Io>) {
        let _ = self.transition(ConnectionState::Connected, ConnectionState::Disconnected);
        *slot = None;
    }

    /// Marks the session `Disconnected` without touching the io lock; the
    /// stale stream is replaced on the next successful dial.
    fn abandon(&self) {
        if self
            .transition(ConnectionState::Connected, ConnectionState::Disconnected)
            .is_ok()
        {
            supervisor::start(self);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .field("successes", &self.successes())
            .finish()
    }
}

impl Io {
    async fn round_trip(&mut self, command: &str, args: &[Value]) -> ClientResult<Frame> {
        self.write_buf.clear();
        encode_request(command, args, &mut self.write_buf)?;
        trace!(command, bytes = self.write_buf.len(), "send");

        self.stream
            .write_all(&self.write_buf)
            .await
            .map_err(ClientError::from_io)?;
        self.stream.flush().await.map_err(ClientError::from_io)?;

        loop {
            match decode(&self.read_buf) {
                Ok(Some((frame, consumed))) => {
                    self.read_buf.advance(consumed);
                    trace!(command, fields = frame.len(), consumed, "recv");
                    return Ok(decompress(frame)?);
                }
                Ok(None) => {}
                Err(err) => {
                    // Unparseable bytes would fail every later read too.
                    self.read_buf.clear();
                    return Err(err.into());
                }
            }

            let read = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(ClientError::from_io)?;
            if read == 0 {
                return Err(ClientError::Transient(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }
        }
    }
}

/// Marks a connection busy for the duration of a round trip and abandons
/// the stream if the round trip never finishes.
struct RoundTripGuard<'a> {
    conn: &'a Connection,
    command: &'a str,
    finished: bool,
}

impl<'a> RoundTripGuard<'a> {
    fn enter(conn: &'a Connection, command: &'a str) -> Self {
        conn.shared.busy.store(true, Ordering::Release);
        RoundTripGuard {
            conn,
            command,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for RoundTripGuard<'_> {
    fn drop(&mut self) {
        self.conn.shared.busy.store(false, Ordering::Release);
        if !self.finished {
            warn!(
                id = self.conn.id(),
                command = self.command,
                "request cancelled mid round trip, reconnecting"
            );
            self.conn.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::testing::{script, wait_for, MockDialer, Script};

    fn fast_config() -> ClientConfig {
        ClientConfig::default().with_reconnect_backoff(Duration::from_millis(10))
    }

    fn kv_server() -> Arc<MockDialer> {
        MockDialer::new(script(|args| match args[0].as_str() {
            "set" => Script::reply(&["ok", "1"]),
            "get" if args[1] == "missing" => Script::reply(&["not_found"]),
            "get" => Script::reply(&["ok", "value"]),
            "boom" => Script::Hangup,
            "garbage" => Script::Raw(b"xx\n".to_vec()),
            "lost" => Script::reply(&["error", "connection to backend lost"]),
            _ => Script::reply(&["client_error", "unknown command"]),
        }))
    }

    #[tokio::test]
    async fn executes_round_trips() {
        let dialer = kv_server();
        let conn = Connection::open(dialer.clone(), fast_config()).await.unwrap();
        assert!(conn.is_connected());

        let reply = conn.execute("set", &["key".into(), "value".into()]).await.unwrap();
        assert_eq!(reply, Reply::Bool(true));
        let reply = conn.execute("get", &["key".into()]).await.unwrap();
        assert_eq!(reply, Reply::Text("value".to_string()));
        let reply = conn.execute("get", &["missing".into()]).await.unwrap();
        assert!(reply.is_nil());

        assert_eq!(conn.attempts(), 3);
        assert_eq!(conn.successes(), 3);
        assert!(!conn.is_busy());
    }

    #[tokio::test]
    async fn ids_increase() {
        let dialer = kv_server();
        let first = Connection::open(dialer.clone(), fast_config()).await.unwrap();
        let second = Connection::open(dialer, fast_config()).await.unwrap();
        assert!(second.id() > first.id());
    }

    #[tokio::test]
    async fn bad_status_keeps_connection() {
        let conn = Connection::open(kv_server(), fast_config()).await.unwrap();
        let err = conn.execute("nope", &[]).await.unwrap_err();
        assert!(matches!(err, ClientError::BadResponse { .. }));
        assert!(conn.is_connected());
        assert!(!conn.is_recovering());
    }

    #[tokio::test]
    async fn protocol_error_leaves_connection_open() {
        let conn = Connection::open(kv_server(), fast_config()).await.unwrap();
        let err = conn.execute("garbage", &[]).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert!(conn.is_connected());

        let reply = conn.execute("get", &["key".into()]).await.unwrap();
        assert_eq!(reply.as_text(), Some("value"));
    }

    #[tokio::test]
    async fn closed_connection_rejects_commands() {
        let conn = Connection::open(kv_server(), fast_config()).await.unwrap();
        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(
            conn.execute("get", &["key".into()]).await,
            Err(ClientError::LostConnection)
        ));
        assert!(matches!(conn.reconnect().await, Err(ClientError::LostConnection)));
    }

    #[tokio::test]
    async fn network_error_reconnects_in_background() {
        let dialer = kv_server();
        let conn = Connection::open(dialer.clone(), fast_config()).await.unwrap();

        let err = conn.execute("boom", &[]).await.unwrap_err();
        assert!(err.is_transient());
        assert_ne!(conn.state(), ConnectionState::Connected);

        wait_for(|| conn.is_connected() && !conn.is_recovering()).await;
        assert_eq!(dialer.dials(), 2);
        let reply = conn.execute("get", &["key".into()]).await.unwrap();
        assert_eq!(reply.as_text(), Some("value"));
    }

    #[tokio::test]
    async fn connection_error_reply_triggers_recovery() {
        let dialer = kv_server();
        let conn = Connection::open(dialer.clone(), fast_config()).await.unwrap();

        let err = conn.execute("lost", &[]).await.unwrap_err();
        assert!(matches!(err, ClientError::BadResponse { .. }));

        wait_for(|| dialer.dials() == 2 && conn.is_connected()).await;
    }

    #[tokio::test]
    async fn open_or_recover_heals_after_dial_failures() {
        let dialer = kv_server();
        dialer.fail_next(3);

        let (conn, err) = Connection::open_or_recover(dialer.clone(), fast_config()).await;
        assert!(matches!(err, Some(ClientError::Dial(_))));
        assert!(!conn.is_connected());

        wait_for(|| conn.is_connected()).await;
        wait_for(|| !conn.is_recovering()).await;
        assert_eq!(dialer.dials(), 4);
    }

    #[tokio::test]
    async fn repeated_failures_start_one_supervisor() {
        let dialer = kv_server();
        let conn = Connection::open(dialer.clone(), fast_config()).await.unwrap();
        dialer.fail_next(3);

        let err = ClientError::from_io(io::Error::from(io::ErrorKind::ConnectionReset));
        for _ in 0..5 {
            assert!(conn.check_and_recover(&err).await);
        }

        wait_for(|| conn.is_connected() && !conn.is_recovering()).await;
        // 1 initial dial, 3 failures, 1 success.
        assert_eq!(dialer.dials(), 5);
    }

    #[tokio::test]
    async fn non_network_errors_do_not_recover() {
        let dialer = kv_server();
        let conn = Connection::open(dialer.clone(), fast_config()).await.unwrap();
        assert!(!conn.check_and_recover(&ClientError::LostConnection).await);
        assert!(conn.is_connected());
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test]
    async fn authenticates_after_dial() {
        let auths = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&auths);
        let dialer = MockDialer::new(script(move |args| {
            if args[0] == "auth" {
                seen.fetch_add(1, Ordering::SeqCst);
                assert_eq!(args[1], "secret");
                return Script::reply(&["ok", "1"]);
            }
            Script::reply(&["ok", "v"])
        }));

        let config = fast_config().with_password("secret");
        let conn = Connection::open(dialer, config).await.unwrap();
        assert_eq!(auths.load(Ordering::SeqCst), 1);
        assert_eq!(conn.attempts(), 1);
    }

    fn slow_echo_server() -> Arc<MockDialer> {
        MockDialer::new(script(|args| {
            let fields = vec!["ok".to_string(), format!("reply-to-{}", args[1])];
            Script::Delayed(Duration::from_millis(100), fields)
        }))
    }

    #[tokio::test]
    async fn cancelled_request_never_leaks_its_reply() {
        let dialer = slow_echo_server();
        let conn = Connection::open(dialer.clone(), fast_config()).await.unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), conn.execute("get", &["a".into()])).await;
        assert!(cancelled.is_err());
        assert!(!conn.is_busy());
        assert_ne!(conn.state(), ConnectionState::Connected);

        wait_for(|| dialer.dials() == 2 && conn.is_connected()).await;
        let reply = conn.execute("get", &["b".into()]).await.unwrap();
        assert_eq!(reply.as_text(), Some("reply-to-b"));
    }

    #[tokio::test]
    async fn completed_request_keeps_stream() {
        let dialer = slow_echo_server();
        let conn = Connection::open(dialer.clone(), fast_config()).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), conn.execute("get", &["a".into()]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.as_text(), Some("reply-to-a"));
        assert!(conn.is_connected());
        assert!(!conn.is_recovering());
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test]
    async fn rejected_auth_stays_connected() {
        let dialer = MockDialer::new(script(|_| Script::reply(&["error", "invalid password"])));
        let config = fast_config().with_password("wrong");
        let conn = Connection::open(dialer, config).await.unwrap();
        assert!(conn.is_connected());
    }
}
