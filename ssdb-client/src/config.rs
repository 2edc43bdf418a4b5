//! # Client and Pool Configuration
//!
//! Plain data, deserializable from JSON/TOML via serde, with defaults that
//! match the server's usual deployment (60s reconnect backoff, 100 pooled
//! connections, 30s idle timeout, 10s sweep).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Sent with `auth` right after every successful dial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Pause between reconnect attempts, in milliseconds.
    pub reconnect_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            password: None,
            reconnect_backoff_ms: 60_000,
        }
    }
}

impl ClientConfig {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Pool sizing and recycling policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on pool membership.
    pub max_connections: usize,
    /// Members idle (or dead) longer than this are evicted.
    pub idle_timeout_secs: u64,
    /// Recycling cadence.
    pub sweep_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: 100,
            idle_timeout_secs: 30,
            sweep_interval_secs: 10,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // A zero interval would spin the recycler.
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
