//! Records of `ping` and `pong` messages.

use std::net::SocketAddr;

use super::{ByteReader, Command, DELIM1, Meta, RecordError};

#[derive(Debug, Clone, PartialEq)]
pub struct PingRecord {
    pub meta: Meta,
    pub nonce: u64,
}

impl PingRecord {
    pub fn new(nonce: u64, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            meta: Meta::new(Command::Ping, remote, local),
            nonce,
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        out.push(DELIM1);
        out.push_str(&self.nonce.to_string());
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.nonce.to_le_bytes());
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        Ok(Self {
            meta,
            nonce: reader.read_u64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PongRecord {
    pub meta: Meta,
    pub nonce: u64,
}

impl PongRecord {
    pub fn new(nonce: u64, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            meta: Meta::new(Command::Pong, remote, local),
            nonce,
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        out.push(DELIM1);
        out.push_str(&self.nonce.to_string());
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.nonce.to_le_bytes());
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        Ok(Self {
            meta,
            nonce: reader.read_u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::{META_SIZE, Record};
    use super::*;

    #[test]
    fn test_pong_binary_layout() {
        let remote = "203.0.113.7:8333".parse().unwrap();
        let local = "10.0.0.1:50000".parse().unwrap();
        let record = Record::Pong(PongRecord::new(0x0102_0304_0506_0708, remote, local));
        let bytes = record.to_bytes();

        // 45-byte header plus the 8-byte nonce.
        assert_eq!(bytes.len(), META_SIZE + 8);
        assert_eq!(bytes[0], Command::Pong as u8);
        assert_eq!(
            u64::from_le_bytes(bytes[META_SIZE..].try_into().unwrap()),
            0x0102_0304_0506_0708
        );

        let decoded = Record::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, record);
    }
}
