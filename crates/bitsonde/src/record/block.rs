//! Record of a received `block` message.

use std::net::SocketAddr;

use bitcoin::Block;
use bitcoin::hashes::Hash as _;

use super::{ByteReader, Command, DELIM1, Meta, RecordError};

/// Block summary: header fields plus the transaction count.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRecord {
    pub meta: Meta,
    pub hash: [u8; 32],
    pub prev: [u8; 32],
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub tx_count: u32,
}

impl BlockRecord {
    pub fn new(block: &Block, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            meta: Meta::new(Command::Block, remote, local),
            hash: block.block_hash().to_byte_array(),
            prev: block.header.prev_blockhash.to_byte_array(),
            merkle_root: block.header.merkle_root.to_byte_array(),
            time: block.header.time,
            bits: block.header.bits.to_consensus(),
            nonce: block.header.nonce,
            tx_count: block.txdata.len() as u32,
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        for field in [
            hex::encode(self.hash),
            hex::encode(self.prev),
            hex::encode(self.merkle_root),
            self.time.to_string(),
            self.bits.to_string(),
            self.nonce.to_string(),
            self.tx_count.to_string(),
        ] {
            out.push(DELIM1);
            out.push_str(&field);
        }
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&self.prev);
        out.extend_from_slice(&self.merkle_root);
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.tx_count.to_le_bytes());
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        Ok(Self {
            meta,
            hash: reader.read_array::<32>()?,
            prev: reader.read_array::<32>()?,
            merkle_root: reader.read_array::<32>()?,
            time: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
            tx_count: reader.read_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::block::{Header, Version};
    use bitcoin::{BlockHash, CompactTarget, TxMerkleNode};

    use super::super::Record;
    use super::*;

    fn sample_block() -> Block {
        Block {
            header: Header {
                version: Version::TWO,
                prev_blockhash: BlockHash::from_byte_array([0x11; 32]),
                merkle_root: TxMerkleNode::from_byte_array([0x22; 32]),
                time: 1_700_000_000,
                bits: CompactTarget::from_consensus(0x1d00_ffff),
                nonce: 2_083_236_893,
            },
            txdata: Vec::new(),
        }
    }

    #[test]
    fn test_binary_roundtrip() {
        let record = Record::Block(BlockRecord::new(
            &sample_block(),
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        ));
        let decoded = Record::from_bytes(&record.to_bytes()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_header_fields_captured() {
        let block = sample_block();
        let record = BlockRecord::new(
            &block,
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        );
        assert_eq!(record.prev, [0x11; 32]);
        assert_eq!(record.bits, 0x1d00_ffff);
        assert_eq!(record.tx_count, 0);
        assert_eq!(record.hash, block.block_hash().to_byte_array());
    }
}
