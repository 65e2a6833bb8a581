//! Address repository: the pool of candidate peers.
//!
//! The repository ingests gossiped and DNS-seeded addresses, keeps per-address
//! attempt/connect/success counters, and hands the manager candidates biased
//! away from dead nodes. The table can optionally be persisted across runs.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("table encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Construction-time options for the repository.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// DNS seed hostnames resolved at bootstrap.
    pub seeds: Vec<String>,
    /// Port joined with seed hostnames during resolution.
    pub default_port: u16,
    /// Load the persisted table at construction.
    pub restore: bool,
    /// Location of the persisted table.
    pub path: PathBuf,
    /// Base backoff between attempts against the same address.
    pub backoff: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            default_port: 8333,
            restore: false,
            path: PathBuf::from("addresses.json"),
            backoff: Duration::from_secs(120),
        }
    }
}

/// One known address with its bookkeeping counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressEntry {
    pub addr: SocketAddr,
    pub attempted: u32,
    pub connected: u32,
    pub succeeded: u32,
    pub last_attempted: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    last_offered: Option<Instant>,
}

impl AddressEntry {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            attempted: 0,
            connected: 0,
            succeeded: 0,
            last_attempted: None,
            last_seen: Utc::now(),
            last_offered: None,
        }
    }

    /// Fraction of attempts that reached the handshake; never-attempted
    /// addresses rank as if they would succeed.
    fn success_ratio(&self) -> f64 {
        if self.attempted == 0 {
            1.0
        } else {
            f64::from(self.succeeded) / f64::from(self.attempted)
        }
    }

    /// Exponential backoff window scaled by the attempt count.
    fn backoff_window(&self, base: Duration) -> Duration {
        base.saturating_mul(1u32 << self.attempted.min(8))
    }
}

/// Grace period before the same address may be offered again.
const OFFER_GRACE: Duration = Duration::from_secs(10);

/// The address pool and success-tracking store.
pub struct Repository {
    config: RepositoryConfig,
    table: Mutex<HashMap<String, AddressEntry>>,
    /// Our own advertised addresses, never offered as candidates.
    excluded: Mutex<HashSet<String>>,
}

impl Repository {
    /// Creates the repository, restoring the persisted table when enabled.
    pub fn new(config: RepositoryConfig) -> Result<Arc<Self>, RepoError> {
        let mut table = HashMap::new();
        if config.restore {
            match std::fs::read(&config.path) {
                Ok(bytes) => {
                    let entries: Vec<AddressEntry> = serde_json::from_slice(&bytes)?;
                    info!(count = entries.len(), path = %config.path.display(), "address table restored");
                    table = entries
                        .into_iter()
                        .map(|entry| (entry.addr.to_string(), entry))
                        .collect();
                }
                Err(err) => {
                    warn!(path = %config.path.display(), %err, "could not restore address table");
                }
            }
        }
        Ok(Arc::new(Self {
            config,
            table: Mutex::new(table),
            excluded: Mutex::new(HashSet::new()),
        }))
    }

    /// Spawns the DNS-seed bootstrap task.
    pub fn start(self: &Arc<Self>) {
        let repo = Arc::clone(self);
        tokio::spawn(async move {
            repo.bootstrap().await;
        });
    }

    async fn bootstrap(&self) {
        let port = self.config.default_port;
        for seed in &self.config.seeds {
            match tokio::net::lookup_host((seed.as_str(), port)).await {
                Ok(resolved) => {
                    let addrs: Vec<SocketAddr> = resolved.collect();
                    debug!(seed, count = addrs.len(), "seed resolved");
                    self.discovered(&addrs);
                }
                Err(err) => {
                    warn!(seed, %err, "seed resolution failed");
                }
            }
        }
        info!(known = self.len(), "bootstrap finished");
    }

    /// Registers one of our own addresses; it will never be offered.
    pub fn exclude(&self, addr: SocketAddr) {
        self.excluded.lock().insert(addr.to_string());
    }

    /// Ingests gossiped addresses, de-duplicating by canonical string.
    pub fn discovered(&self, addrs: &[SocketAddr]) {
        let excluded = self.excluded.lock();
        let mut table = self.table.lock();
        for addr in addrs {
            if addr.ip().is_unspecified() || addr.port() == 0 {
                continue;
            }
            let key = addr.to_string();
            if excluded.contains(&key) {
                continue;
            }
            table
                .entry(key)
                .and_modify(|entry| entry.last_seen = Utc::now())
                .or_insert_with(|| AddressEntry::new(*addr));
        }
    }

    /// Records that a connection attempt against `addr` started.
    pub fn attempted(&self, addr: &SocketAddr) {
        let mut table = self.table.lock();
        let entry = table
            .entry(addr.to_string())
            .or_insert_with(|| AddressEntry::new(*addr));
        entry.attempted += 1;
        entry.last_attempted = Some(Utc::now());
    }

    /// Records that TCP connected.
    pub fn connected(&self, addr: &SocketAddr) {
        let mut table = self.table.lock();
        let entry = table
            .entry(addr.to_string())
            .or_insert_with(|| AddressEntry::new(*addr));
        entry.connected += 1;
        entry.last_seen = Utc::now();
    }

    /// Records that the handshake completed.
    pub fn succeeded(&self, addr: &SocketAddr) {
        let mut table = self.table.lock();
        let entry = table
            .entry(addr.to_string())
            .or_insert_with(|| AddressEntry::new(*addr));
        entry.succeeded += 1;
        entry.last_seen = Utc::now();
    }

    /// Places the best current candidate on `sink`, if any.
    ///
    /// `in_use` is the caller's view of which address keys already have a
    /// live peer; those are never offered. Among the rest, prefers high
    /// success ratios, skips addresses still inside their backoff window,
    /// and breaks ties towards the least recently attempted. An empty pool
    /// simply produces nothing.
    pub async fn retrieve(&self, sink: &mpsc::Sender<SocketAddr>, in_use: impl Fn(&str) -> bool) {
        let candidate = self.select(in_use);
        if let Some(addr) = candidate {
            let _ = sink.send(addr).await;
        }
    }

    fn select(&self, in_use: impl Fn(&str) -> bool) -> Option<SocketAddr> {
        let now = Utc::now();
        let base = self.config.backoff;
        let excluded = self.excluded.lock();
        let mut table = self.table.lock();

        let mut best_key: Option<String> = None;
        let mut best_rank: Option<(f64, Option<DateTime<Utc>>)> = None;
        for (key, entry) in table.iter() {
            if excluded.contains(key) || in_use(key) {
                continue;
            }
            if let Some(offered) = entry.last_offered {
                if offered.elapsed() < OFFER_GRACE {
                    continue;
                }
            }
            if let Some(last) = entry.last_attempted {
                let window = entry.backoff_window(base);
                let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
                if elapsed < window {
                    continue;
                }
            }
            let rank = (entry.success_ratio(), entry.last_attempted);
            let better = match &best_rank {
                None => true,
                Some((ratio, attempted)) => {
                    rank.0 > *ratio || (rank.0 == *ratio && rank.1 < *attempted)
                }
            };
            if better {
                best_rank = Some(rank);
                best_key = Some(key.clone());
            }
        }

        let key = best_key?;
        let entry = table.get_mut(&key)?;
        entry.last_offered = Some(Instant::now());
        Some(entry.addr)
    }

    /// Writes the table to the configured persistence path.
    pub fn save(&self) -> Result<(), RepoError> {
        let entries: Vec<AddressEntry> = self.table.lock().values().cloned().collect();
        let bytes = serde_json::to_vec_pretty(&entries)?;
        std::fs::write(&self.config.path, bytes)?;
        info!(count = entries.len(), path = %self.config.path.display(), "address table saved");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, addr: &SocketAddr) -> Option<AddressEntry> {
        self.table.lock().get(&addr.to_string()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Arc<Repository> {
        Repository::new(RepositoryConfig::default()).unwrap()
    }

    fn addr(last: u8, port: u16) -> SocketAddr {
        format!("10.0.0.{last}:{port}").parse().unwrap()
    }

    #[test]
    fn test_discovered_deduplicates() {
        let repo = repo();
        let a = addr(1, 8333);
        repo.discovered(&[a, a, addr(2, 8333)]);
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn test_discovered_skips_unroutable_and_excluded() {
        let repo = repo();
        let own = addr(9, 8333);
        repo.exclude(own);
        repo.discovered(&[
            "0.0.0.0:8333".parse().unwrap(),
            addr(1, 0),
            own,
            addr(1, 8333),
        ]);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_prefers_untried_then_backs_off() {
        let repo = repo();
        let fresh = addr(1, 8333);
        let tried = addr(2, 8333);
        repo.discovered(&[fresh, tried]);
        repo.attempted(&tried);

        let (tx, mut rx) = mpsc::channel(1);
        repo.retrieve(&tx, |_| false).await;
        assert_eq!(rx.recv().await.unwrap(), fresh);

        // The fresh address was just offered and the tried one is inside its
        // backoff window, so nothing else comes out.
        let (tx, mut rx) = mpsc::channel(1);
        repo.retrieve(&tx, |_| false).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_retrieve_prefers_higher_success_ratio() {
        let repo = Repository::new(RepositoryConfig {
            backoff: Duration::ZERO,
            ..RepositoryConfig::default()
        })
        .unwrap();
        let good = addr(1, 8333);
        let bad = addr(2, 8333);
        repo.discovered(&[good, bad]);
        repo.attempted(&good);
        repo.succeeded(&good);
        repo.attempted(&bad);

        let (tx, mut rx) = mpsc::channel(1);
        repo.retrieve(&tx, |_| false).await;
        assert_eq!(rx.recv().await.unwrap(), good);
    }

    #[tokio::test]
    async fn test_in_use_addresses_never_offered() {
        let repo = repo();
        let busy = addr(1, 8333);
        let idle = addr(2, 8333);
        repo.discovered(&[busy, idle]);

        let busy_key = busy.to_string();
        let (tx, mut rx) = mpsc::channel(1);
        repo.retrieve(&tx, |key| key == busy_key).await;
        assert_eq!(rx.recv().await.unwrap(), idle);

        // With every other candidate spoken for, nothing comes out.
        let (tx, mut rx) = mpsc::channel(1);
        repo.retrieve(&tx, |_| true).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_excluded_address_never_offered() {
        let repo = repo();
        let own = addr(3, 8333);
        repo.discovered(&[own]);
        repo.exclude(own);

        let (tx, mut rx) = mpsc::channel(1);
        repo.retrieve(&tx, |_| false).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_pool_produces_nothing() {
        let repo = repo();
        let (tx, mut rx) = mpsc::channel(1);
        repo.retrieve(&tx, |_| false).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_counters() {
        let repo = repo();
        let a = addr(5, 8333);
        repo.attempted(&a);
        repo.connected(&a);
        repo.succeeded(&a);

        let entry = repo.entry(&a).unwrap();
        assert_eq!(entry.attempted, 1);
        assert_eq!(entry.connected, 1);
        assert_eq!(entry.succeeded, 1);
        assert!(entry.last_attempted.is_some());
    }

    #[test]
    fn test_save_and_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addresses.json");

        let repo = Repository::new(RepositoryConfig {
            path: path.clone(),
            ..RepositoryConfig::default()
        })
        .unwrap();
        let a = addr(7, 8333);
        repo.discovered(&[a]);
        repo.attempted(&a);
        repo.save().unwrap();

        let restored = Repository::new(RepositoryConfig {
            path,
            restore: true,
            ..RepositoryConfig::default()
        })
        .unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.entry(&a).unwrap().attempted, 1);
    }
}
