//! Record of a received `tx` message.

use std::net::SocketAddr;

use bitcoin::Transaction;
use bitcoin::hashes::Hash as _;

use super::{ByteReader, Command, DELIM1, Meta, RecordError};

/// Transaction summary: identity plus shape, not the full witness data.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRecord {
    pub meta: Meta,
    pub txid: [u8; 32],
    pub inputs: u32,
    pub outputs: u32,
    /// Sum of output values in satoshi.
    pub value: u64,
    pub lock_time: u32,
}

impl TxRecord {
    pub fn new(tx: &Transaction, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            meta: Meta::new(Command::Tx, remote, local),
            txid: tx.compute_txid().to_byte_array(),
            inputs: tx.input.len() as u32,
            outputs: tx.output.len() as u32,
            value: tx.output.iter().map(|out| out.value.to_sat()).sum(),
            lock_time: tx.lock_time.to_consensus_u32(),
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        for field in [
            hex::encode(self.txid),
            self.inputs.to_string(),
            self.outputs.to_string(),
            self.value.to_string(),
            self.lock_time.to_string(),
        ] {
            out.push(DELIM1);
            out.push_str(&field);
        }
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.txid);
        out.extend_from_slice(&self.inputs.to_le_bytes());
        out.extend_from_slice(&self.outputs.to_le_bytes());
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        Ok(Self {
            meta,
            txid: reader.read_array::<32>()?,
            inputs: reader.read_u32()?,
            outputs: reader.read_u32()?,
            value: reader.read_u64()?,
            lock_time: reader.read_u32()?,
        })
    }
}
