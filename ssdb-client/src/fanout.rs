//! # Fan-out Dispatcher
//!
//! Purpose: Spread one large batch of `hset` writes over several parallel
//! connections to the same server.
//!
//! ## Design Principles
//! 1. **Contiguous Chunks**: Input is split into near-equal slices; each
//!    worker owns one slice and one connection.
//! 2. **Private Results**: Workers return their own replies and error; the
//!    merge happens only after every worker has been joined.
//! 3. **Borrow the Caller's Slot**: The caller's connection serves the last
//!    chunk and stays open; extra connections are dialed and closed here.

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use ssdb_proto::Value;

use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::reply::Reply;

/// One `hset` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    pub hash: String,
    pub field: String,
    pub value: String,
}

impl HashEntry {
    pub fn new(hash: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        HashEntry {
            hash: hash.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Splits `len` items into at most `workers` contiguous ranges.
///
/// At least one range is returned (possibly empty) and never more ranges
/// than items. Sizes differ by at most one; the trailing ranges take the
/// remainder.
pub fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    let chunks = workers.min(len).max(1);
    let base = len / chunks;
    let remainder = len % chunks;

    let mut ranges = Vec::with_capacity(chunks);
    let mut start = 0;
    for idx in 0..chunks {
        let size = base + usize::from(idx >= chunks - remainder);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

struct WorkerOutcome {
    replies: Vec<Reply>,
    error: Option<ClientError>,
}

impl Connection {
    /// Writes every entry with `hset`, using up to `workers` connections in
    /// parallel.
    ///
    /// **Logic**:
    /// 1. Partition `entries` into contiguous chunks.
    /// 2. Dial one extra connection per chunk beyond the first, with this
    ///    connection's dialer and credentials; a dial failure aborts before
    ///    any write.
    /// 3. Run one task per chunk, issuing its `hset`s in order and stopping
    ///    at the first error.
    /// 4. Join all tasks, close the extra connections, and return the first
    ///    error (in chunk order) or all replies in chunk order.
    pub async fn bulk_hash_set(&self, entries: &[HashEntry], workers: usize) -> ClientResult<Vec<Reply>> {
        if workers == 0 {
            return Err(ClientError::InvalidArgument(
                "bulk_hash_set needs at least one worker".to_string(),
            ));
        }

        let ranges = partition(entries.len(), workers);
        let extras = self.dial_extras(ranges.len() - 1).await?;
        debug!(
            id = self.id(),
            entries = entries.len(),
            workers = ranges.len(),
            "bulk hset"
        );

        let entries: Arc<[HashEntry]> = Arc::from(entries);
        let connections = extras.iter().cloned().chain(std::iter::once(self.clone()));
        let handles: Vec<_> = ranges
            .into_iter()
            .zip(connections)
            .map(|(range, conn)| {
                let entries = Arc::clone(&entries);
                tokio::spawn(async move { run_worker(&conn, &entries[range]).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await);
        }

        for conn in &extras {
            conn.close().await;
        }

        let mut replies = Vec::with_capacity(entries.len());
        for outcome in outcomes {
            let outcome = outcome.map_err(|err| ClientError::Worker(err.to_string()))?;
            if let Some(err) = outcome.error {
                return Err(err);
            }
            replies.extend(outcome.replies);
        }
        Ok(replies)
    }

    async fn dial_extras(&self, count: usize) -> ClientResult<Vec<Connection>> {
        let mut extras = Vec::with_capacity(count);
        for _ in 0..count {
            match Connection::open(self.dialer(), self.config().clone()).await {
                Ok(conn) => extras.push(conn),
                Err(err) => {
                    for conn in &extras {
                        conn.close().await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(extras)
    }
}

async fn run_worker(conn: &Connection, chunk: &[HashEntry]) -> WorkerOutcome {
    let mut replies = Vec::with_capacity(chunk.len());
    for entry in chunk {
        let args = [
            Value::from(entry.hash.as_str()),
            Value::from(entry.field.as_str()),
            Value::from(entry.value.as_str()),
        ];
        match conn.execute("hset", &args).await {
            Ok(reply) => replies.push(reply),
            Err(err) => {
                return WorkerOutcome {
                    replies,
                    error: Some(err),
                }
            }
        }
    }
    WorkerOutcome {
        replies,
        error: None,
    }
}
