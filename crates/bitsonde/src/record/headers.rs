//! Record of a received `headers` message.

use std::fmt::Write as _;
use std::net::SocketAddr;

use bitcoin::block::Header;
use bitcoin::hashes::Hash as _;

use super::{ByteReader, Command, DELIM1, DELIM2, DELIM3, Meta, RecordError};

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderEntry {
    pub hash: [u8; 32],
    pub prev: [u8; 32],
    pub time: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadersRecord {
    pub meta: Meta,
    pub entries: Vec<HeaderEntry>,
}

impl HeadersRecord {
    pub fn new(headers: &[Header], remote: SocketAddr, local: SocketAddr) -> Self {
        let entries = headers
            .iter()
            .map(|header| HeaderEntry {
                hash: header.block_hash().to_byte_array(),
                prev: header.prev_blockhash.to_byte_array(),
                time: header.time,
            })
            .collect();
        Self {
            meta: Meta::new(Command::Headers, remote, local),
            entries,
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        out.push(DELIM1);
        out.push_str(&self.entries.len().to_string());
        for (i, entry) in self.entries.iter().enumerate() {
            out.push(if i == 0 { DELIM1 } else { DELIM2 });
            let _ = write!(
                out,
                "{}{DELIM3}{}{DELIM3}{}",
                hex::encode(entry.hash),
                hex::encode(entry.prev),
                entry.time
            );
        }
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.hash);
            out.extend_from_slice(&entry.prev);
            out.extend_from_slice(&entry.time.to_le_bytes());
        }
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        let count = reader.read_u32()?;
        let mut entries = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            entries.push(HeaderEntry {
                hash: reader.read_array::<32>()?,
                prev: reader.read_array::<32>()?,
                time: reader.read_u32()?,
            });
        }
        Ok(Self { meta, entries })
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::block::Version;
    use bitcoin::{BlockHash, CompactTarget, TxMerkleNode};

    use super::super::Record;
    use super::*;

    #[test]
    fn test_binary_roundtrip() {
        let headers = vec![
            Header {
                version: Version::ONE,
                prev_blockhash: BlockHash::from_byte_array([0x01; 32]),
                merkle_root: TxMerkleNode::from_byte_array([0x02; 32]),
                time: 1_600_000_000,
                bits: CompactTarget::from_consensus(0x1d00_ffff),
                nonce: 1,
            },
            Header {
                version: Version::TWO,
                prev_blockhash: BlockHash::from_byte_array([0x03; 32]),
                merkle_root: TxMerkleNode::from_byte_array([0x04; 32]),
                time: 1_600_000_600,
                bits: CompactTarget::from_consensus(0x1d00_ffff),
                nonce: 2,
            },
        ];
        let record = Record::Headers(HeadersRecord::new(
            &headers,
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        ));
        let decoded = Record::from_bytes(&record.to_bytes()).unwrap();
        assert_eq!(decoded, record);
    }
}
