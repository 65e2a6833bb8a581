//! Peer manager: listeners, outbound attempts, state transitions, shutdown.
//!
//! The manager owns the peer index and all lifecycle decisions. It runs one
//! task per concern: an accept loop per listener, an address ticker feeding
//! candidates from the repository, and an event loop multiplexing candidate
//! addresses, accepted sockets, and peer state transitions. Shutdown closes
//! the signal channel, stops every peer, and drains the event channels until
//! the index is empty.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::{RngCore, rng};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::filter::Processor;
use crate::map::ShardedMap;
use crate::network::Network;
use crate::peer::{Peer, PeerContext, PeerSink};
use crate::repo::Repository;
use crate::tracker::Tracker;
use crate::PROTOCOL_VERSION;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    #[error("manager already started")]
    AlreadyStarted,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Construction-time options for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub network: Network,
    /// Maximum protocol version to negotiate.
    pub version: u32,
    /// Pause between outbound connection attempts.
    pub conn_rate: Duration,
    /// Pause between aggregate status log lines.
    pub info_rate: Duration,
    /// Maximum number of simultaneous peers, connecting included.
    pub conn_limit: usize,
    /// Addresses to listen on; empty means wildcard IPv4 and IPv6 at the
    /// network default port.
    pub listen: Vec<SocketAddr>,
    /// When non-empty, inbound connections are only accepted from these
    /// remote ports.
    pub accept_ports: Vec<u16>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet3,
            version: PROTOCOL_VERSION,
            conn_rate: Duration::from_millis(40),
            info_rate: Duration::from_secs(5),
            conn_limit: 100,
            listen: Vec::new(),
            accept_ports: Vec::new(),
        }
    }
}

/// The central coordinator owning the peer index.
pub struct Manager {
    config: ManagerConfig,
    repo: Arc<Repository>,
    tracker: Arc<Tracker>,
    processor: Arc<dyn Processor>,

    /// Advertised in every `version`; a peer echoing it back is ourselves.
    nonce: u64,
    peers: ShardedMap<Arc<Peer>>,
    listeners: Mutex<HashMap<String, SocketAddr>>,

    addr_tx: mpsc::Sender<SocketAddr>,
    conn_tx: mpsc::Sender<TcpStream>,
    sink: PeerSink,
    intake: Mutex<Option<Intake>>,

    sig_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    done: AtomicBool,
}

/// Receive sides of the event channels, consumed by the event loop.
struct Intake {
    addr_rx: mpsc::Receiver<SocketAddr>,
    conn_rx: mpsc::Receiver<TcpStream>,
    connected_rx: mpsc::Receiver<Arc<Peer>>,
    ready_rx: mpsc::Receiver<Arc<Peer>>,
    stopped_rx: mpsc::Receiver<Arc<Peer>>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        repo: Arc<Repository>,
        tracker: Arc<Tracker>,
        processor: Arc<dyn Processor>,
    ) -> Result<Arc<Manager>, ManagerError> {
        if config.conn_limit == 0 {
            return Err(ManagerError::Config("connection limit must be positive"));
        }
        if config.conn_rate.is_zero() || config.info_rate.is_zero() {
            return Err(ManagerError::Config("tick rates must be positive"));
        }

        let (addr_tx, addr_rx) = mpsc::channel(1);
        let (conn_tx, conn_rx) = mpsc::channel(1);
        let (connected_tx, connected_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let (stopped_tx, stopped_rx) = mpsc::channel(1);
        let (sig_tx, _) = watch::channel(false);

        Ok(Arc::new(Manager {
            config,
            repo,
            tracker,
            processor,
            nonce: rng().next_u64(),
            peers: ShardedMap::default(),
            listeners: Mutex::new(HashMap::new()),
            addr_tx,
            conn_tx,
            sink: PeerSink::new(connected_tx, ready_tx, stopped_tx),
            intake: Mutex::new(Some(Intake {
                addr_rx,
                conn_rx,
                connected_rx,
                ready_rx,
                stopped_rx,
            })),
            sig_tx,
            tasks: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
        }))
    }

    /// Binds the listeners and launches the accept, address and event tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), ManagerError> {
        let intake = self
            .intake
            .lock()
            .take()
            .ok_or(ManagerError::AlreadyStarted)?;

        let port = self.config.network.default_port();
        let listen = if self.config.listen.is_empty() {
            vec![
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
                SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
            ]
        } else {
            self.config.listen.clone()
        };

        for addr in listen {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let bound = listener.local_addr()?;
                    info!(%bound, "listening");
                    self.listeners.lock().insert(bound.to_string(), bound);
                    self.repo.exclude(bound);
                    let mgr = Arc::clone(self);
                    self.tasks
                        .lock()
                        .push(tokio::spawn(async move { mgr.accept_loop(listener).await }));
                }
                Err(err) => {
                    warn!(%addr, %err, "could not bind listener");
                }
            }
        }

        let mgr = Arc::clone(self);
        self.tasks
            .lock()
            .push(tokio::spawn(async move { mgr.address_loop().await }));

        let mgr = Arc::clone(self);
        self.tasks
            .lock()
            .push(tokio::spawn(async move { mgr.event_loop(intake).await }));

        Ok(())
    }

    /// The addresses actually bound, for tests and for self-exclusion.
    pub fn listener_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.lock().values().copied().collect()
    }

    /// Current size of the peer index.
    pub fn peer_count(&self) -> usize {
        self.peers.count()
    }

    /// Idempotent shutdown: signal every task, stop every peer, then wait
    /// for the event loop to drain the index and for all tasks to exit.
    pub async fn stop(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("manager shutting down");
        let _ = self.sig_tx.send(true);
        for peer in self.peers.iter() {
            peer.stop();
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("manager stopped");
    }

    fn context(&self) -> PeerContext {
        PeerContext {
            magic: self.config.network.magic(),
            version: self.config.version,
            nonce: self.nonce,
            sink: self.sink.clone(),
            repo: Arc::clone(&self.repo),
            tracker: Arc::clone(&self.tracker),
            processor: Arc::clone(&self.processor),
        }
    }

    /// Requests candidates from the repository at the configured rate while
    /// below the connection limit.
    async fn address_loop(self: Arc<Self>) {
        let mut sig_rx = self.sig_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.conn_rate);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!("address routine started");
        loop {
            tokio::select! {
                _ = sig_rx.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {
                    if self.peers.count() >= self.config.conn_limit {
                        continue;
                    }
                }
            }
            self.repo
                .retrieve(&self.addr_tx, |key| self.peers.has_key(key))
                .await;
        }
        debug!("address routine stopped");
    }

    /// Accepts inbound connections on one listener and hands them to the
    /// event loop. Dropping the listener on shutdown breaks the loop.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut sig_rx = self.sig_tx.subscribe();
        debug!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "connection routine started");
        loop {
            let stream = tokio::select! {
                _ = sig_rx.wait_for(|stop| *stop) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        if !self.config.accept_ports.is_empty()
                            && !self.config.accept_ports.contains(&remote.port())
                        {
                            debug!(%remote, "rejected by port policy");
                            continue;
                        }
                        stream
                    }
                    Err(err) => {
                        warn!(%err, "could not accept connection");
                        break;
                    }
                }
            };
            if self.conn_tx.send(stream).await.is_err() {
                break;
            }
        }
        debug!("connection routine stopped");
    }

    /// Multiplexes candidate addresses, accepted sockets and peer events,
    /// then drains everything on shutdown until the index is empty.
    async fn event_loop(self: Arc<Self>, mut intake: Intake) {
        let mut sig_rx = self.sig_tx.subscribe();
        let mut info_ticker = tokio::time::interval(self.config.info_rate);
        info_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!("peer routine started");

        loop {
            tokio::select! {
                _ = sig_rx.wait_for(|stop| *stop) => break,
                _ = info_ticker.tick() => {
                    info!(peers = self.peers.count(), known = self.repo.len(), "status");
                }
                Some(addr) = intake.addr_rx.recv() => self.candidate(addr),
                Some(conn) = intake.conn_rx.recv() => self.inbound(conn),
                Some(peer) = intake.connected_rx.recv() => self.peer_connected(peer),
                Some(peer) = intake.ready_rx.recv() => self.peer_ready(peer),
                Some(peer) = intake.stopped_rx.recv() => self.peer_stopped(peer),
            }
        }

        // Shutdown: every peer in the index was (or is being) stopped; keep
        // consuming events until each of them reported Stopped.
        for peer in self.peers.iter() {
            peer.stop();
        }
        while self.peers.count() > 0 {
            tokio::select! {
                Some(_) = intake.addr_rx.recv() => {}
                Some(conn) = intake.conn_rx.recv() => drop(conn),
                Some(peer) = intake.connected_rx.recv() => peer.stop(),
                Some(peer) = intake.ready_rx.recv() => peer.stop(),
                Some(peer) = intake.stopped_rx.recv() => {
                    self.peers.remove(&peer);
                }
            }
        }
        debug!("peer routine stopped");
    }

    /// A candidate address from the repository becomes an outbound peer.
    fn candidate(&self, addr: SocketAddr) {
        let key = addr.to_string();
        if self.peers.has_key(&key) {
            debug!(%addr, "already tracked");
            return;
        }
        if self.peers.count() >= self.config.conn_limit {
            debug!(%addr, "discarded, limit reached");
            return;
        }
        let peer = Peer::new_outbound(self.context(), addr);
        debug!(peer = %peer, "created");
        self.peers.insert(Arc::clone(&peer));
        self.repo.attempted(&addr);
        peer.connect();
    }

    /// An accepted socket becomes an inbound peer, unless it would be a
    /// duplicate or push the index over the limit.
    fn inbound(&self, stream: TcpStream) {
        let Ok(addr) = stream.peer_addr() else {
            return;
        };
        if self.peers.has_key(&addr.to_string()) {
            debug!(%addr, "duplicate inbound dropped");
            return;
        }
        if self.peers.count() >= self.config.conn_limit {
            debug!(%addr, "inbound dropped, limit reached");
            return;
        }
        match Peer::new_inbound(self.context(), stream) {
            Ok(peer) => {
                debug!(peer = %peer, "accepted");
                self.peers.insert(Arc::clone(&peer));
                self.repo.attempted(&addr);
                self.repo.connected(&addr);
                peer.start();
            }
            Err(err) => {
                warn!(%addr, %err, "inbound peer failed");
            }
        }
    }

    fn peer_connected(&self, peer: Arc<Peer>) {
        if !self.peers.has(&peer) {
            warn!(peer = %peer, "connected unknown");
            peer.stop();
            return;
        }
        debug!(peer = %peer, "connected");
        self.repo.connected(&peer.addr());
        peer.start();
        peer.greet();
    }

    fn peer_ready(&self, peer: Arc<Peer>) {
        if !self.peers.has(&peer) {
            warn!(peer = %peer, "ready unknown");
            peer.stop();
            return;
        }
        debug!(peer = %peer, "ready");
        self.repo.succeeded(&peer.addr());
        peer.poll();
    }

    fn peer_stopped(&self, peer: Arc<Peer>) {
        if !self.peers.has(&peer) {
            warn!(peer = %peer, "stopped unknown");
            return;
        }
        debug!(peer = %peer, "removed");
        self.peers.remove(&peer);
    }
}
