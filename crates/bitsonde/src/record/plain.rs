//! Header-only record for messages without interesting payload fields
//! (`verack`, `getaddr`, `mempool`, `merkleblock`, unrecognized commands...).

use std::net::SocketAddr;

use chrono::SecondsFormat;

use super::{Command, DELIM1, Meta};

#[derive(Debug, Clone, PartialEq)]
pub struct PlainRecord {
    pub meta: Meta,
    /// The command string as it appeared on the wire; differs from the tag's
    /// string only for commands outside the tag enum.
    wire: String,
}

impl PlainRecord {
    pub fn new(command: Command, wire: String, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            meta: Meta::new(command, remote, local),
            wire,
        }
    }

    pub(crate) fn from_meta(meta: Meta) -> Self {
        let wire = meta.command.as_str().to_string();
        Self { meta, wire }
    }

    pub fn wire_cmd(&self) -> &str {
        &self.wire
    }

    pub(crate) fn write_text(&self, out: &mut String) {
        out.push_str(
            &self
                .meta
                .stamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        );
        out.push(DELIM1);
        out.push_str(&self.wire);
        out.push(DELIM1);
        out.push_str(&self.meta.remote.to_string());
        out.push(DELIM1);
        out.push_str(&self.meta.local.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_wire_command_shows_in_text() {
        let record = PlainRecord::new(
            Command::Unknown,
            "sendcmpct".to_string(),
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        );
        let mut line = String::new();
        record.write_text(&mut line);
        let fields: Vec<&str> = line.split(DELIM1).collect();
        assert_eq!(fields[1], "sendcmpct");
        assert_eq!(fields.len(), 4);
    }
}
