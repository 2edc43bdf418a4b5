//! # SSDB Async Client
//!
//! Purpose: Provide the transport core of a client for the length-prefixed
//! SSDB protocol: connections that heal themselves, a recycling pool, and a
//! parallel bulk writer.
//!
//! ## Design Principles
//! 1. **One Entry Point**: Every command goes through
//!    [`Connection::execute`]; convenience wrappers live with callers.
//! 2. **Transport Agnostic**: Connections run over any [`Dialer`]; TCP and
//!    local sockets come built in via [`Endpoint`].
//! 3. **Explicit Ownership**: Pools are constructed and owned by the caller.
//! 4. **Fail Loud, Heal Quietly**: Errors always reach the caller; network
//!    errors additionally trigger background reconnection.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ssdb_client::{ClientConfig, Connection, Endpoint};
//!
//! # async fn demo() -> ssdb_client::ClientResult<()> {
//! let endpoint: Endpoint = "127.0.0.1:8888".parse()?;
//! let conn = Connection::open(Arc::new(endpoint), ClientConfig::default()).await?;
//! conn.execute("set", &["key".into(), "value".into()]).await?;
//! let value = conn.execute("get", &["key".into()]).await?;
//! assert_eq!(value.as_text(), Some("value"));
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod error;
mod fanout;
mod pool;
mod reply;
mod supervisor;
mod transport;

#[cfg(test)]
mod testing;

pub use config::{ClientConfig, PoolConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{ClientError, ClientResult};
pub use fanout::{partition, HashEntry};
pub use pool::{Pool, PoolStats};
pub use reply::{classify, Reply};
pub use transport::{BoxedStream, ByteStream, Dialer, Endpoint};

pub use ssdb_proto::{Frame, ProtoError, Value};
