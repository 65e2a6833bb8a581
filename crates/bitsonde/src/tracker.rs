//! Deduplication of inventory hashes seen across peers.
//!
//! When several peers gossip the same transaction or block, the first peer
//! claims the hash and the others skip re-fetching. Entries are add-only for
//! the lifetime of the process.

use bitcoin::{BlockHash, Txid};

use crate::map::{Keyed, ShardedMap};

impl Keyed for Txid {
    fn key(&self) -> String {
        self.to_string()
    }
}

impl Keyed for BlockHash {
    fn key(&self) -> String {
        self.to_string()
    }
}

/// Add-only transaction and block hash sets, backed by sharded maps.
#[derive(Debug, Default)]
pub struct Tracker {
    txs: ShardedMap<Txid>,
    blocks: ShardedMap<BlockHash>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tx(&self, hash: Txid) {
        self.txs.insert(hash);
    }

    pub fn knows_tx(&self, hash: &Txid) -> bool {
        self.txs.has(hash)
    }

    pub fn add_block(&self, hash: BlockHash) {
        self.blocks.insert(hash);
    }

    pub fn knows_block(&self, hash: &BlockHash) -> bool {
        self.blocks.has(hash)
    }

    /// Claims a transaction hash; returns false if another peer got there
    /// first. Atomic, so racing peers see exactly one winner.
    pub fn claim_tx(&self, hash: Txid) -> bool {
        self.txs.insert_if_absent(hash)
    }

    /// Claims a block hash; returns false if another peer got there first.
    pub fn claim_block(&self, hash: BlockHash) -> bool {
        self.blocks.insert_if_absent(hash)
    }
}
