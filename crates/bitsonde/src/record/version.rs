//! Record of a received `version` message.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::p2p::message_network::VersionMessage;

use super::{ByteReader, Command, DELIM1, Meta, RecordError, read_endpoint, write_endpoint};

/// Fields advertised by the peer during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRecord {
    pub meta: Meta,
    pub version: u32,
    pub services: u64,
    /// Peer-reported send time (unix seconds).
    pub sent: i64,
    /// Our address as the peer sees it.
    pub addr_recv: SocketAddr,
    /// The peer's own advertised address.
    pub addr_from: SocketAddr,
    pub start_height: i32,
    pub relay: bool,
    pub nonce: u64,
    pub user_agent: String,
}

fn net_address_to_socket(addr: &bitcoin::p2p::address::Address) -> SocketAddr {
    addr.socket_addr()
        .unwrap_or_else(|_| SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0))
}

impl VersionRecord {
    pub fn new(msg: &VersionMessage, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            meta: Meta::new(Command::Version, remote, local),
            version: msg.version,
            services: msg.services.to_u64(),
            sent: msg.timestamp,
            addr_recv: net_address_to_socket(&msg.receiver),
            addr_from: net_address_to_socket(&msg.sender),
            start_height: msg.start_height,
            relay: msg.relay,
            nonce: msg.nonce,
            user_agent: msg.user_agent.clone(),
        }
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        self.meta.write_text(out);
        for field in [
            self.version.to_string(),
            self.services.to_string(),
            self.sent.to_string(),
            self.addr_recv.to_string(),
            self.addr_from.to_string(),
            self.start_height.to_string(),
            self.relay.to_string(),
            self.nonce.to_string(),
            BASE64.encode(self.user_agent.as_bytes()),
        ] {
            out.push(DELIM1);
            out.push_str(&field);
        }
    }

    pub(crate) fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.sent.to_le_bytes());
        write_endpoint(out, &self.addr_recv);
        write_endpoint(out, &self.addr_from);
        out.extend_from_slice(&self.start_height.to_le_bytes());
        out.push(u8::from(self.relay));
        out.extend_from_slice(&self.nonce.to_le_bytes());
        super::write_blob(out, self.user_agent.as_bytes());
    }

    pub(crate) fn read_bytes(meta: Meta, reader: &mut ByteReader<'_>) -> Result<Self, RecordError> {
        let version = reader.read_u32()?;
        let services = reader.read_u64()?;
        let sent = reader.read_i64()?;
        let addr_recv = read_endpoint(reader)?;
        let addr_from = read_endpoint(reader)?;
        let start_height = reader.read_i32()?;
        let relay = reader.read_u8()? != 0;
        let nonce = reader.read_u64()?;
        let user_agent = String::from_utf8(super::read_blob(reader)?)
            .map_err(|_| RecordError::Malformed("user_agent"))?;
        Ok(Self {
            meta,
            version,
            services,
            sent,
            addr_recv,
            addr_from,
            start_height,
            relay,
            nonce,
            user_agent,
        })
    }
}
