//! Record of a received `reject` message.

use std::net::SocketAddr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::hashes::Hash as _;
use bitcoin::p2p::message_network::{Reject, RejectReason};

use super::{ByteReader, Command, DELIM1, Meta, RecordError};

fn reason_code(reason: RejectReason) -> u8 {
    match reason {
        RejectReason::Malformed => 0x01,
        RejectReason::Invalid => 0x10,
        RejectReason::Obsolete => 0x11,
        RejectReason::Duplicate => 0x12,
        RejectReason::NonStandard => 0x40,
        RejectReason::Dust => 0x41,
        RejectReason::Fee => 0x42,
        RejectReason::Checkpoint => 0x43,
        #[allow(unreachable_patterns)]
        _ => 0x00,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectRecord {
    pub meta: Meta,
    /// The wire reject code.
    pub code: u8,
    /// Tag of the command the peer rejected.
    pub rejected: Command,
    pub hash: [u8; 32],
    pub reason: String,
}

impl RejectRecord {
    pub fn new(msg: &Reject, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            meta: Meta::new(Command::Reject, remote, local),
            code: reason_code(msg.ccode),
            rejected: Command::from_wire(&msg.message),
            hash: msg.hash.to_byte_array(),
            reason: msg.reason.to_string(),
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        for field in [
            self.code.to_string(),
            self.rejected.as_str().to_string(),
            hex::encode(self.hash),
            BASE64.encode(self.reason.as_bytes()),
        ] {
            out.push(DELIM1);
            out.push_str(&field);
        }
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.push(self.code);
        out.push(self.rejected as u8);
        out.extend_from_slice(&self.hash);
        super::write_blob(out, self.reason.as_bytes());
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        let code = reader.read_u8()?;
        let rejected = Command::from_code(reader.read_u8()?)?;
        let hash = reader.read_array::<32>()?;
        let reason = String::from_utf8(super::read_blob(reader)?)
            .map_err(|_| RecordError::Malformed("reason"))?;
        Ok(Self {
            meta,
            code,
            rejected,
            hash,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use bitcoin::hashes::sha256d;

    use super::super::Record;
    use super::*;

    fn sample() -> RejectRecord {
        let msg = Reject {
            message: Cow::Borrowed("tx"),
            ccode: RejectReason::Dust,
            reason: Cow::Borrowed("dust output"),
            hash: sha256d::Hash::from_byte_array([0xcc; 32]),
        };
        RejectRecord::new(
            &msg,
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        )
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(reason_code(RejectReason::Malformed), 0x01);
        assert_eq!(reason_code(RejectReason::Checkpoint), 0x43);
    }

    #[test]
    fn test_binary_roundtrip() {
        let record = Record::Reject(sample());
        assert_eq!(Record::from_bytes(&record.to_bytes()).unwrap(), record);
    }

    #[test]
    fn test_text_fields() {
        let record = sample();
        let mut line = String::new();
        record.write_text(&mut line);
        let fields: Vec<&str> = line.split(DELIM1).collect();
        assert_eq!(fields[4], "65");
        assert_eq!(fields[5], "tx");
        assert_eq!(BASE64.decode(fields[7]).unwrap(), b"dust output");
    }
}
