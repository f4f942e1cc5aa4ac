//! # Peer Registry
//!
//! Static mapping between configured peer names and Meshtastic node
//! addresses, loaded once from the `[peers]` config table and immutable for
//! the life of the run. Also answers "which configured peer am I" once the
//! link reports the local node address, which is what flips the station from
//! point-to-point into fan-out mode (see [`crate::station::fanout`]).
//!
//! Addresses accept both decimal and the `!xxxxxxxx` hex form the Meshtastic
//! tooling prints.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub address: u32,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Lookup of a name that is not in the configured peer set. This is a
    /// caller/configuration bug, never an expected runtime condition.
    #[error("unknown peer '{0}'")]
    UnknownPeer(String),
}

/// Parse a node address in decimal or `!hex` form.
pub fn parse_node_address(raw: &str) -> Result<u32> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix('!') {
        u32::from_str_radix(hex, 16)
            .map_err(|e| anyhow!("invalid hex node address '{}': {}", raw, e))
    } else {
        raw.parse::<u32>()
            .map_err(|e| anyhow!("invalid node address '{}': {}", raw, e))
    }
}

/// Ordered, validated set of configured peers.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
}

impl PeerRegistry {
    /// Build from (name, address-string) pairs in configured order.
    /// Names and addresses must both be unique.
    pub fn from_entries<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut peers: Vec<Peer> = Vec::new();
        let mut by_addr: HashMap<u32, String> = HashMap::new();
        for (name, raw_addr) in entries {
            let name = name.trim();
            if name.is_empty() {
                return Err(anyhow!("peer with empty name in [peers]"));
            }
            let address = parse_node_address(raw_addr)?;
            if peers.iter().any(|p| p.name == name) {
                return Err(anyhow!("duplicate peer name '{}'", name));
            }
            if let Some(other) = by_addr.get(&address) {
                return Err(anyhow!(
                    "peers '{}' and '{}' share address 0x{:08x}",
                    other,
                    name,
                    address
                ));
            }
            by_addr.insert(address, name.to_string());
            peers.push(Peer {
                name: name.to_string(),
                address,
            });
        }
        if peers.is_empty() {
            return Err(anyhow!("no peers configured"));
        }
        Ok(Self { peers })
    }

    /// All configured peers, in configured order.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn lookup(&self, name: &str) -> Result<u32, RegistryError> {
        self.peers
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.address)
            .ok_or_else(|| RegistryError::UnknownPeer(name.to_string()))
    }

    /// Which configured peer (if any) owns the given connected address.
    pub fn resolve_self(&self, connected_address: u32) -> Option<&str> {
        self.peers
            .iter()
            .find(|p| p.address == connected_address)
            .map(|p| p.name.as_str())
    }

    /// Every configured peer except `name`, in configured order.
    pub fn targets_excluding(&self, name: &str) -> Vec<(&str, u32)> {
        self.peers
            .iter()
            .filter(|p| p.name != name)
            .map(|p| (p.name.as_str(), p.address))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PeerRegistry {
        PeerRegistry::from_entries(vec![
            ("yin", "!9e7656a8"),
            ("yang", "305419896"),
            ("basecamp", "!00c0ffee"),
        ])
        .unwrap()
    }

    #[test]
    fn parses_hex_and_decimal_addresses() {
        assert_eq!(parse_node_address("!9e7656a8").unwrap(), 0x9e7656a8);
        assert_eq!(parse_node_address("305419896").unwrap(), 0x12345678);
        assert!(parse_node_address("!xyz").is_err());
    }

    #[test]
    fn lookup_and_self_resolution() {
        let reg = registry();
        assert_eq!(reg.lookup("yang").unwrap(), 0x12345678);
        assert!(matches!(
            reg.lookup("nobody"),
            Err(RegistryError::UnknownPeer(_))
        ));
        assert_eq!(reg.resolve_self(0x00c0ffee), Some("basecamp"));
        assert_eq!(reg.resolve_self(0xdeadbeef), None);
    }

    #[test]
    fn targets_excluding_preserves_configured_order() {
        let reg = registry();
        let targets: Vec<&str> = reg
            .targets_excluding("yang")
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(targets, vec!["yin", "basecamp"]);
    }

    #[test]
    fn rejects_duplicate_names_and_addresses() {
        assert!(PeerRegistry::from_entries(vec![("a", "1"), ("a", "2")]).is_err());
        assert!(PeerRegistry::from_entries(vec![("a", "7"), ("b", "7")]).is_err());
        assert!(PeerRegistry::from_entries(Vec::<(&str, &str)>::new()).is_err());
    }
}
