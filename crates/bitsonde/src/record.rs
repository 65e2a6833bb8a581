//! Records of received wire messages.
//!
//! Every message read from a peer is snapshotted into an immutable record
//! carrying the arrival timestamp, the remote and local endpoints, and the
//! message-specific fields. A record serializes to a delimited text line and
//! to a compact little-endian binary form; both carry the same semantic
//! information and can be re-derived from one another.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use bitcoin::p2p::message::NetworkMessage;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

pub mod addr;
pub mod alert;
pub mod block;
pub mod filterload;
pub mod headers;
pub mod inventory;
pub mod ping;
pub mod plain;
pub mod reject;
pub mod tx;
pub mod version;

pub use addr::AddrRecord;
pub use alert::AlertRecord;
pub use block::BlockRecord;
pub use filterload::FilterLoadRecord;
pub use headers::HeadersRecord;
pub use inventory::InventoryRecord;
pub use ping::{PingRecord, PongRecord};
pub use plain::PlainRecord;
pub use reject::RejectRecord;
pub use tx::TxRecord;
pub use version::VersionRecord;

/// Primary field delimiter in the textual form.
pub const DELIM1: char = ' ';
/// Separates elements of a list field.
pub const DELIM2: char = '|';
/// Separates subfields inside a list element.
pub const DELIM3: char = ',';

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record truncated at offset {0}")]
    Truncated(usize),
    #[error("unknown command code {0}")]
    UnknownCommand(u8),
    #[error("malformed {0} field")]
    Malformed(&'static str),
}

/// One-byte command tag derived from the wire command string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Command {
    Unknown = 0,
    Version = 1,
    Verack = 2,
    Ping = 3,
    Pong = 4,
    GetAddr = 5,
    Addr = 6,
    Inv = 7,
    GetData = 8,
    NotFound = 9,
    Tx = 10,
    Block = 11,
    MerkleBlock = 12,
    Headers = 13,
    GetBlocks = 14,
    GetHeaders = 15,
    MemPool = 16,
    FilterLoad = 17,
    FilterAdd = 18,
    FilterClear = 19,
    Reject = 20,
    Alert = 21,
    SendHeaders = 22,
}

impl Command {
    /// The wire command string for this tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Unknown => "unknown",
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::GetAddr => "getaddr",
            Command::Addr => "addr",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::NotFound => "notfound",
            Command::Tx => "tx",
            Command::Block => "block",
            Command::MerkleBlock => "merkleblock",
            Command::Headers => "headers",
            Command::GetBlocks => "getblocks",
            Command::GetHeaders => "getheaders",
            Command::MemPool => "mempool",
            Command::FilterLoad => "filterload",
            Command::FilterAdd => "filteradd",
            Command::FilterClear => "filterclear",
            Command::Reject => "reject",
            Command::Alert => "alert",
            Command::SendHeaders => "sendheaders",
        }
    }

    /// Maps a wire command string to its tag; anything unrecognized is
    /// [`Command::Unknown`].
    pub fn from_wire(cmd: &str) -> Command {
        match cmd {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "getaddr" => Command::GetAddr,
            "addr" => Command::Addr,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "notfound" => Command::NotFound,
            "tx" => Command::Tx,
            "block" => Command::Block,
            "merkleblock" => Command::MerkleBlock,
            "headers" => Command::Headers,
            "getblocks" => Command::GetBlocks,
            "getheaders" => Command::GetHeaders,
            "mempool" => Command::MemPool,
            "filterload" => Command::FilterLoad,
            "filteradd" => Command::FilterAdd,
            "filterclear" => Command::FilterClear,
            "reject" => Command::Reject,
            "alert" => Command::Alert,
            "sendheaders" => Command::SendHeaders,
            _ => Command::Unknown,
        }
    }

    pub fn from_code(code: u8) -> Result<Command, RecordError> {
        Ok(match code {
            0 => Command::Unknown,
            1 => Command::Version,
            2 => Command::Verack,
            3 => Command::Ping,
            4 => Command::Pong,
            5 => Command::GetAddr,
            6 => Command::Addr,
            7 => Command::Inv,
            8 => Command::GetData,
            9 => Command::NotFound,
            10 => Command::Tx,
            11 => Command::Block,
            12 => Command::MerkleBlock,
            13 => Command::Headers,
            14 => Command::GetBlocks,
            15 => Command::GetHeaders,
            16 => Command::MemPool,
            17 => Command::FilterLoad,
            18 => Command::FilterAdd,
            19 => Command::FilterClear,
            20 => Command::Reject,
            21 => Command::Alert,
            22 => Command::SendHeaders,
            other => return Err(RecordError::UnknownCommand(other)),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields common to every record: arrival time, endpoints, command tag.
///
/// The binary layout of the meta header is fixed at 45 bytes: 1-byte command
/// code, 8-byte unix-nanosecond timestamp, 16-byte IPv6-mapped remote IP,
/// 2-byte remote port, 16-byte IPv6-mapped local IP, 2-byte local port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub stamp: DateTime<Utc>,
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub command: Command,
}

/// Size of the encoded meta header in bytes.
pub const META_SIZE: usize = 45;

impl Meta {
    pub fn new(command: Command, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            stamp: Utc::now(),
            remote,
            local,
            command,
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        out.push_str(&self.stamp.to_rfc3339_opts(SecondsFormat::Nanos, true));
        out.push(DELIM1);
        out.push_str(self.command.as_str());
        out.push(DELIM1);
        out.push_str(&self.remote.to_string());
        out.push(DELIM1);
        out.push_str(&self.local.to_string());
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.push(self.command as u8);
        out.extend_from_slice(
            &self
                .stamp
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_le_bytes(),
        );
        write_endpoint(out, &self.remote);
        write_endpoint(out, &self.local);
    }

    pub(crate) fn read_bytes(reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        let command = Command::from_code(reader.read_u8()?)?;
        let nanos = reader.read_i64()?;
        let remote = read_endpoint(reader)?;
        let local = read_endpoint(reader)?;
        Ok(Self {
            stamp: DateTime::from_timestamp_nanos(nanos),
            remote,
            local,
            command,
        })
    }
}

/// Maps an endpoint IP to its 16-byte IPv6 form (IPv4 becomes v4-mapped).
pub fn ip_to_bytes(addr: &SocketAddr) -> [u8; 16] {
    match addr.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// Recovers an IP from its 16-byte form, unmapping v4-mapped addresses.
pub fn ip_from_bytes(bytes: [u8; 16]) -> IpAddr {
    let v6 = Ipv6Addr::from(bytes);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

pub(crate) fn write_endpoint(out: &mut Vec<u8>, addr: &SocketAddr) {
    out.extend_from_slice(&ip_to_bytes(addr));
    out.extend_from_slice(&addr.port().to_le_bytes());
}

pub(crate) fn read_endpoint(reader: &mut ByteReader<'_>) -> Result<SocketAddr, RecordError> {
    let ip = ip_from_bytes(reader.read_array::<16>()?);
    let port = reader.read_u16()?;
    Ok(SocketAddr::new(ip, port))
}

/// Writes a `u32` length prefix followed by the raw bytes.
pub(crate) fn write_blob(out: &mut Vec<u8>, blob: &[u8]) {
    out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
    out.extend_from_slice(blob);
}

pub(crate) fn read_blob(reader: &mut ByteReader<'_>) -> Result<Vec<u8>, RecordError> {
    let len = reader.read_u32()? as usize;
    Ok(reader.read_exact(len)?.to_vec())
}

/// Little-endian cursor over a byte slice.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn read_exact(&mut self, len: usize) -> Result<&'a [u8], RecordError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(RecordError::Truncated(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], RecordError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_exact(N)?);
        Ok(array)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, RecordError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, RecordError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, RecordError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, RecordError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32, RecordError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64, RecordError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }
}

/// An immutable, timestamped descriptor of one received wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Version(VersionRecord),
    Ping(PingRecord),
    Pong(PongRecord),
    Addr(AddrRecord),
    Inventory(InventoryRecord),
    Tx(TxRecord),
    Block(BlockRecord),
    Headers(HeadersRecord),
    Reject(RejectRecord),
    Alert(AlertRecord),
    FilterLoad(FilterLoadRecord),
    Plain(PlainRecord),
}

impl Record {
    /// Builds the record matching a received message.
    pub fn from_message(msg: &NetworkMessage, remote: SocketAddr, local: SocketAddr) -> Record {
        match msg {
            NetworkMessage::Version(version) => {
                Record::Version(VersionRecord::new(version, remote, local))
            }
            NetworkMessage::Ping(nonce) => Record::Ping(PingRecord::new(*nonce, remote, local)),
            NetworkMessage::Pong(nonce) => Record::Pong(PongRecord::new(*nonce, remote, local)),
            NetworkMessage::Addr(entries) => Record::Addr(AddrRecord::new(entries, remote, local)),
            NetworkMessage::Inv(inventory) => {
                Record::Inventory(InventoryRecord::new(Command::Inv, inventory, remote, local))
            }
            NetworkMessage::GetData(inventory) => Record::Inventory(InventoryRecord::new(
                Command::GetData,
                inventory,
                remote,
                local,
            )),
            NetworkMessage::NotFound(inventory) => Record::Inventory(InventoryRecord::new(
                Command::NotFound,
                inventory,
                remote,
                local,
            )),
            NetworkMessage::Tx(tx) => Record::Tx(TxRecord::new(tx, remote, local)),
            NetworkMessage::Block(block) => Record::Block(BlockRecord::new(block, remote, local)),
            NetworkMessage::Headers(list) => {
                Record::Headers(HeadersRecord::new(list, remote, local))
            }
            NetworkMessage::Reject(reject) => {
                Record::Reject(RejectRecord::new(reject, remote, local))
            }
            NetworkMessage::Alert(payload) => {
                Record::Alert(AlertRecord::new(payload.clone(), remote, local))
            }
            NetworkMessage::FilterLoad(filter) => {
                Record::FilterLoad(FilterLoadRecord::new(filter, remote, local))
            }
            other => {
                let cmd = other.command().to_string();
                Record::Plain(PlainRecord::new(
                    Command::from_wire(&cmd),
                    cmd,
                    remote,
                    local,
                ))
            }
        }
    }

    pub fn meta(&self) -> &Meta {
        match self {
            Record::Version(r) => &r.meta,
            Record::Ping(r) => &r.meta,
            Record::Pong(r) => &r.meta,
            Record::Addr(r) => &r.meta,
            Record::Inventory(r) => &r.meta,
            Record::Tx(r) => &r.meta,
            Record::Block(r) => &r.meta,
            Record::Headers(r) => &r.meta,
            Record::Reject(r) => &r.meta,
            Record::Alert(r) => &r.meta,
            Record::FilterLoad(r) => &r.meta,
            Record::Plain(r) => &r.meta,
        }
    }

    /// The one-byte command tag.
    pub fn command(&self) -> Command {
        self.meta().command
    }

    /// The command string used in the textual form.
    pub fn cmd(&self) -> &str {
        match self {
            Record::Plain(r) => r.wire_cmd(),
            other => other.command().as_str(),
        }
    }

    /// The compact little-endian binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(META_SIZE + 16);
        self.meta().write_bytes(&mut out);
        match self {
            Record::Version(r) => r.write_bytes(&mut out),
            Record::Ping(r) => r.write_bytes(&mut out),
            Record::Pong(r) => r.write_bytes(&mut out),
            Record::Addr(r) => r.write_bytes(&mut out),
            Record::Inventory(r) => r.write_bytes(&mut out),
            Record::Tx(r) => r.write_bytes(&mut out),
            Record::Block(r) => r.write_bytes(&mut out),
            Record::Headers(r) => r.write_bytes(&mut out),
            Record::Reject(r) => r.write_bytes(&mut out),
            Record::Alert(r) => r.write_bytes(&mut out),
            Record::FilterLoad(r) => r.write_bytes(&mut out),
            Record::Plain(_) => {}
        }
        out
    }

    /// Decodes a record from its binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Record, RecordError> {
        let mut reader = ByteReader::new(bytes);
        let meta = Meta::read_bytes(&mut reader)?;
        Ok(match meta.command {
            Command::Version => Record::Version(VersionRecord::read_bytes(meta, &mut reader)?),
            Command::Ping => Record::Ping(PingRecord::read_bytes(meta, &mut reader)?),
            Command::Pong => Record::Pong(PongRecord::read_bytes(meta, &mut reader)?),
            Command::Addr => Record::Addr(AddrRecord::read_bytes(meta, &mut reader)?),
            Command::Inv | Command::GetData | Command::NotFound => {
                Record::Inventory(InventoryRecord::read_bytes(meta, &mut reader)?)
            }
            Command::Tx => Record::Tx(TxRecord::read_bytes(meta, &mut reader)?),
            Command::Block => Record::Block(BlockRecord::read_bytes(meta, &mut reader)?),
            Command::Headers => Record::Headers(HeadersRecord::read_bytes(meta, &mut reader)?),
            Command::Reject => Record::Reject(RejectRecord::read_bytes(meta, &mut reader)?),
            Command::Alert => Record::Alert(AlertRecord::read_bytes(meta, &mut reader)?),
            Command::FilterLoad => {
                Record::FilterLoad(FilterLoadRecord::read_bytes(meta, &mut reader)?)
            }
            _ => Record::Plain(PlainRecord::from_meta(meta)),
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = String::with_capacity(96);
        match self {
            Record::Version(r) => r.write_text(&mut line),
            Record::Ping(r) => r.write_text(&mut line),
            Record::Pong(r) => r.write_text(&mut line),
            Record::Addr(r) => r.write_text(&mut line),
            Record::Inventory(r) => r.write_text(&mut line),
            Record::Tx(r) => r.write_text(&mut line),
            Record::Block(r) => r.write_text(&mut line),
            Record::Headers(r) => r.write_text(&mut line),
            Record::Reject(r) => r.write_text(&mut line),
            Record::Alert(r) => r.write_text(&mut line),
            Record::FilterLoad(r) => r.write_text(&mut line),
            Record::Plain(r) => r.write_text(&mut line),
        }
        f.write_str(&line)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn endpoints() -> (SocketAddr, SocketAddr) {
        (
            "203.0.113.7:8333".parse().unwrap(),
            "192.168.1.2:50001".parse().unwrap(),
        )
    }

    #[test]
    fn test_command_code_string_roundtrip() {
        for code in 0..=22u8 {
            let cmd = Command::from_code(code).unwrap();
            assert_eq!(cmd as u8, code);
            if cmd != Command::Unknown {
                assert_eq!(Command::from_wire(cmd.as_str()), cmd);
            }
        }
        assert!(Command::from_code(200).is_err());
        assert_eq!(Command::from_wire("sendcmpct"), Command::Unknown);
    }

    #[test]
    fn test_ip_mapping_roundtrip() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        let addr = SocketAddr::new(v4, 8333);
        let bytes = ip_to_bytes(&addr);
        assert_eq!(ip_from_bytes(bytes), v4);

        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        let addr = SocketAddr::new(v6, 18333);
        assert_eq!(ip_from_bytes(ip_to_bytes(&addr)), v6);
    }

    #[test]
    fn test_meta_binary_layout() {
        let (remote, local) = endpoints();
        let meta = Meta::new(Command::Pong, remote, local);
        let mut out = Vec::new();
        meta.write_bytes(&mut out);

        assert_eq!(out.len(), META_SIZE);
        assert_eq!(out[0], Command::Pong as u8);
        let nanos = i64::from_le_bytes(out[1..9].try_into().unwrap());
        assert_eq!(nanos, meta.stamp.timestamp_nanos_opt().unwrap());
        // v4-mapped remote IP at offset 9, port at 25 (little-endian).
        assert_eq!(&out[9..21], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff]);
        assert_eq!(&out[21..25], &[203, 0, 113, 7]);
        assert_eq!(u16::from_le_bytes(out[25..27].try_into().unwrap()), 8333);
        assert_eq!(&out[43..45], &50001u16.to_le_bytes());
    }

    #[test]
    fn test_meta_binary_roundtrip() {
        let (remote, local) = endpoints();
        let meta = Meta::new(Command::Inv, remote, local);
        let mut out = Vec::new();
        meta.write_bytes(&mut out);

        let decoded = Meta::read_bytes(&mut ByteReader::new(&out)).unwrap();
        assert_eq!(decoded.command, meta.command);
        assert_eq!(decoded.remote, meta.remote);
        assert_eq!(decoded.local, meta.local);
        assert_eq!(
            decoded.stamp.timestamp_nanos_opt(),
            meta.stamp.timestamp_nanos_opt()
        );
    }

    #[test]
    fn test_text_leading_fields() {
        let (remote, local) = endpoints();
        let record = Record::Ping(PingRecord::new(42, remote, local));
        let line = record.to_string();
        let fields: Vec<&str> = line.split(DELIM1).collect();

        assert!(fields[0].ends_with('Z'));
        assert_eq!(fields[1], "ping");
        assert_eq!(fields[2], "203.0.113.7:8333");
        assert_eq!(fields[3], "192.168.1.2:50001");
        assert_eq!(fields[4], "42");
    }

    #[test]
    fn test_unknown_message_becomes_plain() {
        let (remote, local) = endpoints();
        let msg = NetworkMessage::SendHeaders;
        let record = Record::from_message(&msg, remote, local);
        assert_eq!(record.command(), Command::SendHeaders);
        assert_eq!(record.cmd(), "sendheaders");

        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), META_SIZE);
        let decoded = Record::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.command(), Command::SendHeaders);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let (remote, local) = endpoints();
        let record = Record::Ping(PingRecord::new(7, remote, local));
        let bytes = record.to_bytes();
        assert!(matches!(
            Record::from_bytes(&bytes[..bytes.len() - 1]),
            Err(RecordError::Truncated(_))
        ));
    }
}
