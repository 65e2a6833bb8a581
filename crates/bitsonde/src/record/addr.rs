//! Record of a received `addr` message.

use std::fmt::Write as _;
use std::net::SocketAddr;

use bitcoin::p2p::address::Address;

use super::{
    ByteReader, Command, DELIM1, DELIM2, DELIM3, Meta, RecordError, read_endpoint, write_endpoint,
};

/// One gossiped address entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AddrEntry {
    /// Last-seen time reported by the gossiping peer (unix seconds).
    pub stamp: u32,
    pub services: u64,
    pub endpoint: SocketAddr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddrRecord {
    pub meta: Meta,
    pub entries: Vec<AddrEntry>,
}

impl AddrRecord {
    pub fn new(entries: &[(u32, Address)], remote: SocketAddr, local: SocketAddr) -> Self {
        let entries = entries
            .iter()
            .filter_map(|(stamp, addr)| {
                // Non-IP entries (e.g. onion addresses) have no socket form.
                let endpoint = addr.socket_addr().ok()?;
                Some(AddrEntry {
                    stamp: *stamp,
                    services: addr.services.to_u64(),
                    endpoint,
                })
            })
            .collect();
        Self {
            meta: Meta::new(Command::Addr, remote, local),
            entries,
        }
    }

    /// The endpoints carried by this record, for repository intake.
    pub fn endpoints(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.entries.iter().map(|entry| entry.endpoint)
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
                entry.stamp, entry.services, entry.endpoint
            );
        }
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.stamp.to_le_bytes());
            out.extend_from_slice(&entry.services.to_le_bytes());
            write_endpoint(out, &entry.endpoint);
        }
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        let count = reader.read_u32()?;
        let mut entries = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            entries.push(AddrEntry {
                stamp: reader.read_u32()?,
                services: reader.read_u64()?,
                endpoint: read_endpoint(reader)?,
            });
        }
        Ok(Self { meta, entries })
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::p2p::ServiceFlags;

    use super::super::Record;
    use super::*;

    fn sample() -> AddrRecord {
        let gossiped: Vec<(u32, Address)> = vec![
            (
                1_700_000_000,
                Address::new(&"8.8.8.8:8333".parse().unwrap(), ServiceFlags::NETWORK),
            ),
            (
                1_700_000_100,
                Address::new(&"[2001:db8::5]:18333".parse().unwrap(), ServiceFlags::NONE),
            ),
        ];
        AddrRecord::new(
            &gossiped,
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        )
    }

    #[test]
    fn test_binary_roundtrip() {
        let record = Record::Addr(sample());
        let decoded = Record::from_bytes(&record.to_bytes()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_text_list_delimiters() {
        let record = sample();
        let mut line = String::new();
        record.write_text(&mut line);

        let fields: Vec<&str> = line.split(DELIM1).collect();
        assert_eq!(fields[4], "2");
        let entries: Vec<&str> = fields[5].split(DELIM2).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], "1700000000,1,8.8.8.8:8333");
        assert!(entries[1].ends_with("[2001:db8::5]:18333"));
    }

    #[test]
    fn test_empty_addr_list() {
        let record = AddrRecord::new(
            &[],
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        );
        let mut line = String::new();
        record.write_text(&mut line);
        assert!(line.ends_with(" 0"));

        let wrapped = Record::Addr(record);
        assert_eq!(Record::from_bytes(&wrapped.to_bytes()).unwrap(), wrapped);
    }
}
