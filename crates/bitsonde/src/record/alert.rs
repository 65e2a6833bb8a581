//! Record of a received `alert` message.
//!
//! The alert system is long retired; the wire library hands us the signed
//! payload as raw bytes, which is exactly what gets recorded.

use std::net::SocketAddr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::{ByteReader, Command, DELIM1, Meta, RecordError};

#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub meta: Meta,
    pub payload: Vec<u8>,
}

impl AlertRecord {
    pub fn new(payload: Vec<u8>, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            meta: Meta::new(Command::Alert, remote, local),
            payload,
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        out.push(DELIM1);
        out.push_str(&BASE64.encode(&self.payload));
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        super::write_blob(out, &self.payload);
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        Ok(Self {
            meta,
            payload: super::read_blob(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::Record;
    use super::*;

    #[test]
    fn test_roundtrip_and_base64_text() {
        let record = AlertRecord::new(
            vec![0x00, 0x01, 0xff, 0xfe],
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        );
        let mut line = String::new();
        record.write_text(&mut line);
        let last = line.rsplit(DELIM1).next().unwrap();
        assert_eq!(BASE64.decode(last).unwrap(), record.payload);

        let wrapped = Record::Alert(record);
        assert_eq!(Record::from_bytes(&wrapped.to_bytes()).unwrap(), wrapped);
    }
}
