//! Records of `inv`, `getdata` and `notfound` messages.

use std::fmt::Write as _;
use std::net::SocketAddr;

use bitcoin::hashes::Hash as _;
use bitcoin::p2p::message_blockdata::Inventory;

use super::{ByteReader, Command, DELIM1, DELIM2, DELIM3, Meta, RecordError};

/// One-byte tag for the inventory vector type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InvKind {
    Error = 0,
    Transaction = 1,
    Block = 2,
    CompactBlock = 3,
    WTx = 4,
    WitnessTransaction = 5,
    WitnessBlock = 6,
    Unknown = 255,
}

impl InvKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InvKind::Error => "error",
            InvKind::Transaction => "tx",
            InvKind::Block => "block",
            InvKind::CompactBlock => "cmpctblock",
            InvKind::WTx => "wtx",
            InvKind::WitnessTransaction => "wtx-tx",
            InvKind::WitnessBlock => "wtx-block",
            InvKind::Unknown => "unknown",
        }
    }

    fn from_code(code: u8) -> InvKind {
        match code {
            0 => InvKind::Error,
            1 => InvKind::Transaction,
            2 => InvKind::Block,
            3 => InvKind::CompactBlock,
            4 => InvKind::WTx,
            5 => InvKind::WitnessTransaction,
            6 => InvKind::WitnessBlock,
            _ => InvKind::Unknown,
        }
    }
}

/// One advertised inventory vector.
#[derive(Debug, Clone, PartialEq)]
pub struct InvEntry {
    pub kind: InvKind,
    pub hash: [u8; 32],
}

impl InvEntry {
    fn from_inventory(inv: &Inventory) -> Self {
        let (kind, hash) = match inv {
            Inventory::Error => (InvKind::Error, [0u8; 32]),
            Inventory::Transaction(txid) => (InvKind::Transaction, txid.to_byte_array()),
            Inventory::Block(hash) => (InvKind::Block, hash.to_byte_array()),
            Inventory::CompactBlock(hash) => (InvKind::CompactBlock, hash.to_byte_array()),
            Inventory::WTx(wtxid) => (InvKind::WTx, wtxid.to_byte_array()),
            Inventory::WitnessTransaction(txid) => {
                (InvKind::WitnessTransaction, txid.to_byte_array())
            }
            Inventory::WitnessBlock(hash) => (InvKind::WitnessBlock, hash.to_byte_array()),
            Inventory::Unknown { hash, .. } => (InvKind::Unknown, *hash),
        };
        Self { kind, hash }
    }
}

/// The shared shape of `inv`, `getdata` and `notfound`; the meta command
/// distinguishes them.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryRecord {
    pub meta: Meta,
    pub entries: Vec<InvEntry>,
}

impl InventoryRecord {
    pub fn new(
        command: Command,
        inventory: &[Inventory],
        remote: SocketAddr,
        local: SocketAddr,
    ) -> Self {
        Self {
            meta: Meta::new(command, remote, local),
            entries: inventory.iter().map(InvEntry::from_inventory).collect(),
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        out.push(DELIM1);
        out.push_str(&self.entries.len().to_string());
        for (i, entry) in self.entries.iter().enumerate() {
            out.push(if i == 0 { DELIM1 } else { DELIM2 });
            let _ = write!(out, "{}{DELIM3}{}", entry.kind.as_str(), hex::encode(entry.hash));
        }
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            out.push(entry.kind as u8);
            out.extend_from_slice(&entry.hash);
        }
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        let count = reader.read_u32()?;
        let mut entries = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            entries.push(InvEntry {
                kind: InvKind::from_code(reader.read_u8()?),
                hash: reader.read_array::<32>()?,
            });
        }
        Ok(Self { meta, entries })
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{BlockHash, Txid};

    use super::super::Record;
    use super::*;

    fn sample(command: Command) -> InventoryRecord {
        let inventory = vec![
            Inventory::Transaction(Txid::from_byte_array([0xaa; 32])),
            Inventory::Block(BlockHash::from_byte_array([0xbb; 32])),
        ];
        InventoryRecord::new(
            command,
            &inventory,
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        )
    }

    #[test]
    fn test_binary_roundtrip_all_commands() {
        for command in [Command::Inv, Command::GetData, Command::NotFound] {
            let record = Record::Inventory(sample(command));
            let decoded = Record::from_bytes(&record.to_bytes()).unwrap();
            assert_eq!(decoded, record);
            assert_eq!(decoded.command(), command);
        }
    }

    #[test]
    fn test_text_entries() {
        let record = sample(Command::Inv);
        let mut line = String::new();
        record.write_text(&mut line);

        let fields: Vec<&str> = line.split(DELIM1).collect();
        assert_eq!(fields[1], "inv");
        assert_eq!(fields[4], "2");
        let entries: Vec<&str> = fields[5].split(DELIM2).collect();
        assert_eq!(entries[0], format!("tx,{}", "aa".repeat(32)));
        assert_eq!(entries[1], format!("block,{}", "bb".repeat(32)));
    }
}
