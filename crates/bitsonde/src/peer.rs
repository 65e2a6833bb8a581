//! A single peer connection: dial, handshake, message loops, lifecycle.
//!
//! A peer advances Idle → Connecting → Connected → Ready → Stopped and never
//! moves backwards. It owns its socket and its two I/O tasks exclusively and
//! reports state transitions to the manager through an opaque event sink, so
//! nothing here requires the manager to outlive it. All transport and
//! protocol failures are fatal to the individual peer; reconnection policy
//! lives in the repository and manager.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use bitcoin::consensus::encode;
use bitcoin::p2p::address::Address;
use bitcoin::p2p::message::{NetworkMessage, RawNetworkMessage};
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::{Magic, ServiceFlags};
use chrono::Utc;
use parking_lot::Mutex;
use rand::{RngCore, rng};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::filter::Processor;
use crate::map::Keyed;
use crate::record::Record;
use crate::repo::Repository;
use crate::tracker::Tracker;
use crate::{MAX_MESSAGE_SIZE, MIN_PROTOCOL_VERSION, USER_AGENT};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(120);
const OUT_QUEUE: usize = 8;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode: {0}")]
    Decode(#[from] encode::Error),
    #[error("wrong network magic {0}")]
    WrongMagic(String),
    #[error("oversized payload: {0} bytes")]
    Oversize(u32),
    #[error("self connection detected")]
    SelfConnect,
    #[error("protocol version {0} below floor")]
    VersionTooOld(u32),
    #[error("duplicate version message")]
    DuplicateVersion,
    #[error("{0} received before version")]
    HandshakeOrder(String),
    #[error("outbound queue closed")]
    QueueClosed,
}

impl PeerError {
    /// Protocol violations are logged louder than plain transport failures.
    fn is_protocol(&self) -> bool {
        !matches!(self, PeerError::Io(_) | PeerError::QueueClosed)
    }
}

/// Lifecycle states, strictly advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum State {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Ready = 3,
    Stopped = 4,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Idle,
            1 => State::Connecting,
            2 => State::Connected,
            3 => State::Ready,
            _ => State::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Event channels from peers to the manager. Handed to each peer at
/// construction so the peer holds no reference to the manager itself.
#[derive(Clone)]
pub struct PeerSink {
    connected: mpsc::Sender<Arc<Peer>>,
    ready: mpsc::Sender<Arc<Peer>>,
    stopped: mpsc::Sender<Arc<Peer>>,
}

impl PeerSink {
    pub fn new(
        connected: mpsc::Sender<Arc<Peer>>,
        ready: mpsc::Sender<Arc<Peer>>,
        stopped: mpsc::Sender<Arc<Peer>>,
    ) -> Self {
        Self {
            connected,
            ready,
            stopped,
        }
    }
}

/// Shared wiring a peer is constructed with.
#[derive(Clone)]
pub struct PeerContext {
    pub magic: Magic,
    pub version: u32,
    pub nonce: u64,
    pub sink: PeerSink,
    pub repo: Arc<Repository>,
    pub tracker: Arc<Tracker>,
    pub processor: Arc<dyn Processor>,
}

pub struct Peer {
    ctx: PeerContext,
    addr: SocketAddr,
    local: Mutex<Option<SocketAddr>>,
    direction: Direction,

    state: AtomicU8,
    done: AtomicBool,
    version_seen: AtomicBool,
    verack_seen: AtomicBool,

    /// Negotiated protocol version, 0 until the peer's version arrives.
    protocol: AtomicU32,
    services: AtomicU64,
    agent: Mutex<String>,

    out_tx: mpsc::Sender<NetworkMessage>,
    out_rx: Mutex<Option<mpsc::Receiver<NetworkMessage>>>,
    stream: Mutex<Option<TcpStream>>,
    done_tx: watch::Sender<bool>,
}

impl Peer {
    /// Creates an outbound peer in the Idle state; `connect` dials it.
    pub fn new_outbound(ctx: PeerContext, addr: SocketAddr) -> Arc<Peer> {
        Arc::new(Self::build(ctx, addr, None, Direction::Outbound, State::Idle))
    }

    /// Creates an inbound peer from an accepted socket; it is already
    /// Connected and only needs `start`.
    pub fn new_inbound(ctx: PeerContext, stream: TcpStream) -> Result<Arc<Peer>, PeerError> {
        let addr = stream.peer_addr()?;
        let local = stream.local_addr().ok();
        let peer = Self::build(ctx, addr, Some(stream), Direction::Inbound, State::Connected);
        *peer.local.lock() = local;
        Ok(Arc::new(peer))
    }

    fn build(
        ctx: PeerContext,
        addr: SocketAddr,
        stream: Option<TcpStream>,
        direction: Direction,
        state: State,
    ) -> Peer {
        let (out_tx, out_rx) = mpsc::channel(OUT_QUEUE);
        let (done_tx, _) = watch::channel(false);
        Peer {
            ctx,
            addr,
            local: Mutex::new(None),
            direction,
            state: AtomicU8::new(state as u8),
            done: AtomicBool::new(false),
            version_seen: AtomicBool::new(false),
            verack_seen: AtomicBool::new(false),
            protocol: AtomicU32::new(0),
            services: AtomicU64::new(0),
            agent: Mutex::new(String::new()),
            out_tx,
            out_rx: Mutex::new(Some(out_rx)),
            stream: Mutex::new(stream),
            done_tx,
        }
    }

    /// The remote endpoint, the peer's identity.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local.lock()
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Negotiated protocol version; 0 before the handshake.
    pub fn protocol_version(&self) -> u32 {
        self.protocol.load(Ordering::SeqCst)
    }

    pub fn services(&self) -> u64 {
        self.services.load(Ordering::SeqCst)
    }

    pub fn user_agent(&self) -> String {
        self.agent.lock().clone()
    }

    fn advance(&self, from: State, to: State) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Dials the remote endpoint on a background task. On success the peer
    /// becomes Connected and the manager is notified; any failure stops it.
    pub fn connect(self: &Arc<Self>) {
        if !self.advance(State::Idle, State::Connecting) {
            return;
        }
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            match timeout(DIAL_TIMEOUT, TcpStream::connect(peer.addr)).await {
                Ok(Ok(stream)) => {
                    if peer.done.load(Ordering::SeqCst) {
                        return;
                    }
                    *peer.local.lock() = stream.local_addr().ok();
                    *peer.stream.lock() = Some(stream);
                    if peer.advance(State::Connecting, State::Connected) {
                        let _ = peer.ctx.sink.connected.send(Arc::clone(&peer)).await;
                    }
                }
                Ok(Err(err)) => {
                    debug!(peer = %peer, %err, "dial failed");
                    peer.stop();
                }
                Err(_) => {
                    debug!(peer = %peer, "dial timed out");
                    peer.stop();
                }
            }
        });
    }

    /// Launches the receive and send loops plus the handshake watchdog.
    pub fn start(self: &Arc<Self>) {
        let stream = self.stream.lock().take();
        let out_rx = self.out_rx.lock().take();
        let (Some(stream), Some(out_rx)) = (stream, out_rx) else {
            debug!(peer = %self, "nothing to start");
            self.stop();
            return;
        };
        let (rd, wr) = stream.into_split();

        let peer = Arc::clone(self);
        tokio::spawn(async move { peer.recv_loop(rd).await });

        let peer = Arc::clone(self);
        tokio::spawn(async move { peer.send_loop(wr, out_rx).await });

        let peer = Arc::clone(self);
        tokio::spawn(async move {
            let mut done_rx = peer.done_tx.subscribe();
            tokio::select! {
                _ = done_rx.wait_for(|stopped| *stopped) => {}
                _ = tokio::time::sleep(HANDSHAKE_TIMEOUT) => {
                    if peer.state() < State::Ready {
                        debug!(peer = %peer, "handshake timed out");
                        peer.stop();
                    }
                }
            }
        });
    }

    /// Queues our `version`; the handshake completes in the receive loop.
    pub fn greet(self: &Arc<Self>) {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            let version = peer.version_message();
            if peer.out_tx.send(version).await.is_err() {
                peer.stop();
            }
        });
    }

    /// Begins periodic traffic once Ready: one `getaddr`, then pings.
    pub fn poll(self: &Arc<Self>) {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            if peer.out_tx.send(NetworkMessage::GetAddr).await.is_err() {
                return;
            }
            let mut done_rx = peer.done_tx.subscribe();
            let start = tokio::time::Instant::now() + PING_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, PING_INTERVAL);
            loop {
                let nonce = tokio::select! {
                    _ = done_rx.wait_for(|stopped| *stopped) => break,
                    _ = ticker.tick() => rng().next_u64(),
                };
                if peer.out_tx.send(NetworkMessage::Ping(nonce)).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Stops the peer: idempotent, closes the socket by cancelling both I/O
    /// tasks, and emits Stopped exactly once.
    pub fn stop(self: &Arc<Self>) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.store(State::Stopped as u8, Ordering::SeqCst);
        let _ = self.done_tx.send(true);
        // Drop a socket that never made it into the I/O loops.
        *self.stream.lock() = None;

        let peer = Arc::clone(self);
        tokio::spawn(async move {
            let _ = peer.ctx.sink.stopped.send(Arc::clone(&peer)).await;
        });
        debug!(peer = %self, "stopped");
    }

    fn version_message(&self) -> NetworkMessage {
        let local = self
            .local_addr()
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0));
        NetworkMessage::Version(VersionMessage {
            version: self.ctx.version,
            services: ServiceFlags::NONE,
            timestamp: Utc::now().timestamp(),
            receiver: Address::new(&self.addr, ServiceFlags::NONE),
            sender: Address::new(&local, ServiceFlags::NONE),
            nonce: self.ctx.nonce,
            user_agent: USER_AGENT.to_string(),
            start_height: 0,
            relay: false,
        })
    }

    async fn recv_loop(self: Arc<Self>, mut rd: OwnedReadHalf) {
        let mut done_rx = self.done_tx.subscribe();
        loop {
            let result = tokio::select! {
                _ = done_rx.wait_for(|stopped| *stopped) => break,
                result = Self::read_message(&mut rd, self.ctx.magic) => result,
            };
            let err = match result {
                Ok(msg) => match self.handle_message(msg).await {
                    Ok(()) => continue,
                    Err(err) => err,
                },
                Err(err) => err,
            };
            if err.is_protocol() {
                warn!(peer = %self, %err, "protocol failure");
            } else {
                debug!(peer = %self, %err, "receive failure");
            }
            break;
        }
        self.stop();
    }

    /// Reads one framed message: header first, validated, then the payload
    /// handed to the wire codec (which also verifies the checksum).
    async fn read_message(
        rd: &mut OwnedReadHalf,
        magic: Magic,
    ) -> Result<NetworkMessage, PeerError> {
        let mut header = [0u8; 24];
        rd.read_exact(&mut header).await?;

        let got = Magic::from_bytes([header[0], header[1], header[2], header[3]]);
        if got != magic {
            return Err(PeerError::WrongMagic(hex::encode(got.to_bytes())));
        }
        let length = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::Oversize(length));
        }

        let mut frame = vec![0u8; 24 + length as usize];
        frame[..24].copy_from_slice(&header);
        rd.read_exact(&mut frame[24..]).await?;

        let raw: RawNetworkMessage = encode::deserialize(&frame)?;
        Ok(raw.into_payload())
    }

    /// Applies a received message: handshake bookkeeping, side effects, then
    /// the record into the processing chain. An error is fatal to the peer.
    async fn handle_message(self: &Arc<Self>, msg: NetworkMessage) -> Result<(), PeerError> {
        trace!(peer = %self, cmd = msg.cmd(), "message received");
        match &msg {
            NetworkMessage::Version(version) => {
                if version.nonce == self.ctx.nonce {
                    return Err(PeerError::SelfConnect);
                }
                if self.version_seen.swap(true, Ordering::SeqCst) {
                    return Err(PeerError::DuplicateVersion);
                }
                let negotiated = version.version.min(self.ctx.version);
                if negotiated < MIN_PROTOCOL_VERSION {
                    return Err(PeerError::VersionTooOld(negotiated));
                }
                self.protocol.store(negotiated, Ordering::SeqCst);
                self.services
                    .store(version.services.to_u64(), Ordering::SeqCst);
                *self.agent.lock() = version.user_agent.clone();

                // Inbound side replies with its own version first.
                if self.direction == Direction::Inbound {
                    self.queue(self.version_message()).await?;
                }
                self.queue(NetworkMessage::Verack).await?;
            }
            NetworkMessage::Verack => {
                // The peer must introduce itself before acknowledging us.
                if !self.version_seen.load(Ordering::SeqCst) {
                    return Err(PeerError::HandshakeOrder("verack".to_string()));
                }
                self.verack_seen.store(true, Ordering::SeqCst);
            }
            other if !self.version_seen.load(Ordering::SeqCst) => {
                return Err(PeerError::HandshakeOrder(other.cmd().to_string()));
            }
            NetworkMessage::Ping(nonce) => {
                self.queue(NetworkMessage::Pong(*nonce)).await?;
            }
            NetworkMessage::Inv(inventory) => {
                for item in inventory {
                    use bitcoin::p2p::message_blockdata::Inventory;
                    match item {
                        Inventory::Transaction(txid) | Inventory::WitnessTransaction(txid) => {
                            self.ctx.tracker.claim_tx(*txid);
                        }
                        Inventory::Block(hash) | Inventory::WitnessBlock(hash) => {
                            self.ctx.tracker.claim_block(*hash);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        let local = self
            .local_addr()
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0));
        let record = Record::from_message(&msg, self.addr, local);
        if let Record::Addr(addr_record) = &record {
            let endpoints: Vec<SocketAddr> = addr_record.endpoints().collect();
            self.ctx.repo.discovered(&endpoints);
        }
        self.ctx.processor.process(record).await;

        self.maybe_ready().await;
        Ok(())
    }

    /// Emits Ready once both the peer's `version` and a `verack` arrived.
    async fn maybe_ready(self: &Arc<Self>) {
        if self.version_seen.load(Ordering::SeqCst)
            && self.verack_seen.load(Ordering::SeqCst)
            && !self.done.load(Ordering::SeqCst)
            && self.advance(State::Connected, State::Ready)
        {
            let _ = self.ctx.sink.ready.send(Arc::clone(self)).await;
        }
    }

    async fn queue(&self, msg: NetworkMessage) -> Result<(), PeerError> {
        self.out_tx
            .send(msg)
            .await
            .map_err(|_| PeerError::QueueClosed)
    }

    async fn send_loop(
        self: Arc<Self>,
        mut wr: tokio::net::tcp::OwnedWriteHalf,
        mut out_rx: mpsc::Receiver<NetworkMessage>,
    ) {
        let mut done_rx = self.done_tx.subscribe();
        loop {
            let next = tokio::select! {
                _ = done_rx.wait_for(|stopped| *stopped) => break,
                next = out_rx.recv() => next,
            };
            let Some(msg) = next else { break };
            let cmd = msg.cmd();
            let raw = RawNetworkMessage::new(self.ctx.magic, msg);
            let bytes = encode::serialize(&raw);
            match timeout(WRITE_TIMEOUT, wr.write_all(&bytes)).await {
                Ok(Ok(())) => {
                    if let Err(err) = wr.flush().await {
                        debug!(peer = %self, %err, "flush failed");
                        break;
                    }
                    trace!(peer = %self, cmd, "message sent");
                }
                Ok(Err(err)) => {
                    debug!(peer = %self, %err, "write failed");
                    break;
                }
                Err(_) => {
                    debug!(peer = %self, "write timed out");
                    break;
                }
            }
        }
        self.stop();
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

impl Keyed for Arc<Peer> {
    fn key(&self) -> String {
        self.addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(State::Idle < State::Connecting);
        assert!(State::Connecting < State::Connected);
        assert!(State::Connected < State::Ready);
        assert!(State::Ready < State::Stopped);
        assert_eq!(State::from_u8(3), State::Ready);
    }
}
