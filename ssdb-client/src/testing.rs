//! In-memory server doubles for unit tests.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use ssdb_proto::{decode, encode, Value};

use crate::transport::{BoxedStream, Dialer};

/// What the fake server does with one request.
pub(crate) enum Script {
    Reply(Vec<String>),
    /// Reply after a pause, as a slow server would.
    Delayed(Duration, Vec<String>),
    Raw(Vec<u8>),
    Hangup,
}

impl Script {
    pub(crate) fn reply(fields: &[&str]) -> Self {
        Script::Reply(fields.iter().map(|field| field.to_string()).collect())
    }
}

pub(crate) type Handler = Arc<dyn Fn(&[String]) -> Script + Send + Sync>;

pub(crate) fn script<F>(handler: F) -> Handler
where
    F: Fn(&[String]) -> Script + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Dialer whose every stream is served by `handler` on a background task.
pub(crate) struct MockDialer {
    handler: Handler,
    dials: AtomicUsize,
    failures: AtomicUsize,
}

impl std::fmt::Debug for MockDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDialer")
            .field("dials", &self.dials())
            .finish()
    }
}

impl MockDialer {
    pub(crate) fn new(handler: Handler) -> Arc<Self> {
        Arc::new(MockDialer {
            handler,
            dials: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }

    /// Makes the next `count` dials fail with `ConnectionRefused`.
    pub(crate) fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Dial attempts so far, failed ones included.
    pub(crate) fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self) -> io::Result<BoxedStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, Arc::clone(&self.handler)));
        Ok(Box::new(client))
    }
}

async fn serve(mut stream: DuplexStream, handler: Handler) {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        while let Ok(Some((frame, consumed))) = decode(&buf) {
            buf.advance(consumed);
            let fields = match handler(&frame.to_strings()) {
                Script::Reply(fields) => fields,
                Script::Delayed(pause, fields) => {
                    tokio::time::sleep(pause).await;
                    fields
                }
                Script::Raw(bytes) => {
                    if stream.write_all(&bytes).await.is_err() {
                        return;
                    }
                    continue;
                }
                Script::Hangup => return,
            };
            let values: Vec<Value> = fields.into_iter().map(Value::from).collect();
            let mut bytes = Vec::new();
            if encode(&values, &mut bytes).is_err() {
                return;
            }
            if stream.write_all(&bytes).await.is_err() {
                return;
            }
        }

        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub(crate) async fn wait_for<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
