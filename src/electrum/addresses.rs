//! Chain selection and the `servers_<chain>.json` resource loader (§6).

use std::collections::HashMap;

use bitcoin_hashes::hex::FromHex;
use bitcoin_hashes::sha256d;
use microserde::{json, Deserialize};

use crate::error::ServerListError;

/// A candidate Electrum server, unresolved until connect time (§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port to connect to.
    pub port: u16,
    /// Whether to connect over TLS. Hard-coded to `LOOSE` verification (§6).
    pub ssl: bool,
}

impl ServerAddress {
    /// Whether this is a Tor hidden-service address.
    pub fn is_onion(&self) -> bool {
        self.host.ends_with(".onion")
    }
}

/// The Bitcoin network a pool is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    /// Bitcoin mainnet.
    Mainnet,
    /// Bitcoin signet.
    Signet,
    /// Bitcoin testnet.
    Testnet,
    /// Bitcoin regtest.
    Regtest,
}

impl Chain {
    /// Resolve a 32-byte genesis chain hash to a known [`Chain`].
    ///
    /// Returns `None` for any hash that doesn't match one of the four
    /// supported networks; per §7 this is a fatal construction error for
    /// the caller, not something this function recovers from.
    pub fn from_hash(hash: sha256d::Hash) -> Option<Chain> {
        [
            (Chain::Mainnet, mainnet_genesis_hash()),
            (Chain::Signet, signet_genesis_hash()),
            (Chain::Testnet, testnet_genesis_hash()),
            (Chain::Regtest, regtest_genesis_hash()),
        ]
        .into_iter()
        .find(|(_, h)| *h == hash)
        .map(|(chain, _)| chain)
    }

    fn resource(self) -> &'static str {
        match self {
            Chain::Mainnet => include_str!("../../resources/electrum/servers_mainnet.json"),
            Chain::Signet => include_str!("../../resources/electrum/servers_signet.json"),
            Chain::Testnet => include_str!("../../resources/electrum/servers_testnet.json"),
            Chain::Regtest => include_str!("../../resources/electrum/servers_regtest.json"),
        }
    }
}

fn mainnet_genesis_hash() -> sha256d::Hash {
    sha256d::Hash::from_hex("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26")
        .expect("valid constant hash")
}

fn signet_genesis_hash() -> sha256d::Hash {
    sha256d::Hash::from_hex("00000008819873e925422c1ff0f99f7cc9bbb232af63a077a480a3636bc0c3b")
        .expect("valid constant hash")
}

fn testnet_genesis_hash() -> sha256d::Hash {
    sha256d::Hash::from_hex("000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f417")
        .expect("valid constant hash")
}

fn regtest_genesis_hash() -> sha256d::Hash {
    sha256d::Hash::from_hex("0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e220")
        .expect("valid constant hash")
}

#[derive(Deserialize)]
struct ServerEntry {
    s: Option<String>,
}

/// Parse a `servers_<chain>.json` resource into candidate addresses,
/// filtering out `.onion` hosts when `use_onion` is false.
pub fn read_server_addresses(
    chain: Chain,
    use_onion: bool,
) -> Result<Vec<ServerAddress>, ServerListError> {
    parse_server_list(chain.resource(), use_onion)
}

fn parse_server_list(data: &str, use_onion: bool) -> Result<Vec<ServerAddress>, ServerListError> {
    let parsed: HashMap<String, ServerEntry> =
        json::from_str(data).map_err(|e| ServerListError::Parse(e.to_string()))?;

    let mut addresses: Vec<ServerAddress> = parsed
        .into_iter()
        .filter_map(|(host, entry)| {
            let port: u16 = entry
                .s
                .as_deref()
                .unwrap_or("0")
                .parse()
                .unwrap_or(0);
            if port == 0 {
                return None;
            }
            Some(ServerAddress {
                host,
                port,
                ssl: true,
            })
        })
        .filter(|a| use_onion || !a.is_onion())
        .collect();

    addresses.sort_by(|a, b| a.host.cmp(&b.host));
    Ok(addresses)
}
