//! Bitcoin network selection: magic bytes, default ports, DNS seeds.

use std::str::FromStr;

use bitcoin::p2p::Magic;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum NetworkError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}

/// The Bitcoin network a crawl targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Network {
    /// The main Bitcoin network.
    Mainnet,
    /// The third iteration of the test network.
    Testnet3,
    /// Local regression test network.
    Regtest,
}

impl Network {
    /// Magic bytes prefixing every wire message on this network.
    pub fn magic(self) -> Magic {
        match self {
            Network::Mainnet => Magic::from_bytes([0xf9, 0xbe, 0xb4, 0xd9]),
            Network::Testnet3 => Magic::from_bytes([0x0b, 0x11, 0x09, 0x07]),
            Network::Regtest => Magic::from_bytes([0xfa, 0xbf, 0xb5, 0xda]),
        }
    }

    /// Default TCP port peers listen on.
    pub fn default_port(self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet3 => 18333,
            Network::Regtest => 18444,
        }
    }

    /// DNS seed hostnames used to bootstrap the address pool.
    pub fn dns_seeds(self) -> &'static [&'static str] {
        match self {
            Network::Mainnet => &[
                "seed.bitcoin.sipa.be",
                "dnsseed.bluematt.me",
                "dnsseed.bitcoin.dashjr.org",
                "seed.bitcoinstats.com",
                "seed.bitcoin.jonasschnelli.ch",
                "seed.btc.petertodd.org",
            ],
            Network::Testnet3 => &[
                "testnet-seed.bitcoin.jonasschnelli.ch",
                "seed.tbtc.petertodd.org",
                "testnet-seed.bluematt.me",
            ],
            Network::Regtest => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet3 => "testnet3",
            Network::Regtest => "regtest",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Network::Mainnet),
            "testnet3" | "testnet" | "test" => Ok(Network::Testnet3),
            "regtest" => Ok(Network::Regtest),
            other => Err(NetworkError::UnknownNetwork(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_bytes() {
        assert_eq!(
            Network::Mainnet.magic().to_bytes(),
            [0xf9, 0xbe, 0xb4, 0xd9]
        );
        assert_eq!(
            Network::Testnet3.magic().to_bytes(),
            [0x0b, 0x11, 0x09, 0x07]
        );
        assert_eq!(
            Network::Regtest.magic().to_bytes(),
            [0xfa, 0xbf, 0xb5, 0xda]
        );
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Network::Mainnet.default_port(), 8333);
        assert_eq!(Network::Testnet3.default_port(), 18333);
        assert_eq!(Network::Regtest.default_port(), 18444);
    }

    #[test]
    fn test_parse() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("testnet".parse::<Network>().unwrap(), Network::Testnet3);
        assert_eq!("regtest".parse::<Network>().unwrap(), Network::Regtest);
        assert!("signet".parse::<Network>().is_err());
    }

    #[test]
    fn test_regtest_has_no_seeds() {
        assert!(Network::Regtest.dns_seeds().is_empty());
        assert!(!Network::Mainnet.dns_seeds().is_empty());
    }
}
