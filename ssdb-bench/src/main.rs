//! # Client Benchmark Harness
//!
//! Purpose: Drive a live server through the pool and the fan-out writer so
//! bulk-write throughput and round-trip latency can be compared over time.
//!
//! ## Usage
//!
//! ```text
//! ssdb-bench [endpoint] [entries] [workers] [config.json]
//! RUST_LOG=debug ssdb-bench 127.0.0.1:8888 100000 8
//! ```
//!
//! `config.json` may hold `{"client": {...}, "pool": {...}}`; missing fields
//! fall back to defaults.

use std::env;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ssdb_client::{ClientConfig, Endpoint, HashEntry, Pool, PoolConfig};

const DEFAULT_ENDPOINT: &str = "127.0.0.1:8888";
const DEFAULT_ENTRY_COUNT: usize = 10_000;
const DEFAULT_WORKERS: usize = 4;
const HASH_NAME: &str = "ssdb-bench";
const SAMPLE_READS: usize = 1_000;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    client: ClientConfig,
    pool: PoolConfig,
}

struct BenchConfig {
    endpoint: Endpoint,
    entries: usize,
    workers: usize,
    file: FileConfig,
}

impl BenchConfig {
    fn from_args() -> anyhow::Result<Self> {
        let mut args = env::args().skip(1);
        let endpoint = args
            .next()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .parse::<Endpoint>()?;
        let entries = parse_usize(args.next(), DEFAULT_ENTRY_COUNT);
        let workers = parse_usize(args.next(), DEFAULT_WORKERS);
        let file = match args.next() {
            Some(path) => {
                let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?
            }
            None => FileConfig::default(),
        };

        if workers == 0 {
            bail!("workers must be at least 1");
        }

        Ok(BenchConfig {
            endpoint,
            entries,
            workers,
            file,
        })
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops.max(1) as f64);
    info!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {micros_per_op:.1} us/op)");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        eprintln!("ssdb-bench failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = BenchConfig::from_args()?;
    info!(
        endpoint = %config.endpoint,
        entries = config.entries,
        workers = config.workers,
        "starting"
    );

    let pool = Pool::new(
        Arc::new(config.endpoint.clone()),
        config.file.client.clone(),
        config.file.pool.clone(),
    );
    let recycler = pool.spawn_recycler();
    let conn = pool.acquire().await.context("connecting")?;

    let entries: Vec<HashEntry> = (0..config.entries)
        .map(|idx| HashEntry::new(HASH_NAME, format!("field:{idx:08}"), format!("value:{idx}")))
        .collect();

    let start = Instant::now();
    let replies = conn.bulk_hash_set(&entries, config.workers).await?;
    report("HSET (fan-out)", replies.len(), start.elapsed());

    let reads = SAMPLE_READS.min(entries.len());
    let start = Instant::now();
    for entry in entries.iter().take(reads) {
        let value = conn
            .execute("hget", &[entry.hash.as_str().into(), entry.field.as_str().into()])
            .await?;
        if value.as_text() != Some(entry.value.as_str()) {
            bail!("hget {} returned {:?}", entry.field, value);
        }
    }
    report("HGET", reads, start.elapsed());

    info!(stats = %pool.stats(), "done");
    pool.shutdown().await;
    recycler.abort();
    Ok(())
}
