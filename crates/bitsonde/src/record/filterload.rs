//! Record of a received `filterload` message.

use std::net::SocketAddr;

use bitcoin::p2p::message_bloom::{BloomFlags, FilterLoad};

use super::{ByteReader, Command, DELIM1, Meta, RecordError};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterLoadRecord {
    pub meta: Meta,
    pub filter: Vec<u8>,
    pub hash_funcs: u32,
    pub tweak: u32,
    pub flags: u8,
}

impl FilterLoadRecord {
    pub fn new(msg: &FilterLoad, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            meta: Meta::new(Command::FilterLoad, remote, local),
            filter: msg.filter.clone(),
            hash_funcs: msg.hash_funcs,
            tweak: msg.tweak,
            flags: match msg.flags {
                BloomFlags::None => 0,
                BloomFlags::All => 1,
                BloomFlags::PubkeyOnly => 2,
            },
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        for field in [
            self.filter.len().to_string(),
            self.hash_funcs.to_string(),
            self.tweak.to_string(),
            self.flags.to_string(),
        ] {
            out.push(DELIM1);
            out.push_str(&field);
        }
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.hash_funcs.to_le_bytes());
        out.extend_from_slice(&self.tweak.to_le_bytes());
        out.push(self.flags);
        super::write_blob(out, &self.filter);
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        let hash_funcs = reader.read_u32()?;
        let tweak = reader.read_u32()?;
        let flags = reader.read_u8()?;
        let filter = super::read_blob(reader)?;
        Ok(Self {
            meta,
            filter,
            hash_funcs,
            tweak,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::Record;
    use super::*;

    #[test]
    fn test_binary_roundtrip() {
        let msg = FilterLoad {
            filter: vec![0xb5, 0x0f],
            hash_funcs: 11,
            tweak: 0xdead_beef,
            flags: BloomFlags::All,
        };
        let record = Record::FilterLoad(FilterLoadRecord::new(
            &msg,
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        ));
        assert_eq!(Record::from_bytes(&record.to_bytes()).unwrap(), record);
    }
}
