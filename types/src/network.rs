//! Network identifiers and per-network parameters.

use serde::{Deserialize, Serialize};

const MAIN_ALERT_KEY: &str = "04fc9702847840aaf195de8442ebecedf5b095cdbb9bc716bda9110971b28a49e0ead8564ff0db22209e0374782c093bb899692d524e9d6a6956e7c5ecbcd68284";
const TEST_ALERT_KEY: &str = "04302390343f91cc401d56d68b123028bf52e5fca1939df127f63c6467cdf9c8e2c14b61104cf817d0b780da337893ecc4aaff1309e536162dabbdb45200ca2b0a";

/// Identifies which chain the node talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    #[default]
    Main,
    /// The public test network.
    Testnet,
    /// Local regression-test network.
    Regtest,
}

impl NetworkId {
    /// Frame magic, written little-endian.
    pub fn magic(&self) -> u32 {
        match self {
            Self::Main => 0xd9b4_bef9,
            Self::Testnet => 0x0709_110b,
            Self::Regtest => 0xdab5_bffa,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Main => 8333,
            Self::Testnet => 18333,
            Self::Regtest => 48444,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}

/// Everything the pool needs to know about a network.
#[derive(Clone, Debug)]
pub struct NetworkParams {
    pub network: NetworkId,
    pub magic: u32,
    pub port: u16,
    /// Uncompressed secp256k1 key that signs alerts.
    pub alert_key: Vec<u8>,
    /// `(max_height, batch)` pairs, ascending by height.
    pub batch_sizes: Vec<(u32, usize)>,
    pub default_batch: usize,
}

impl NetworkParams {
    pub fn new(network: NetworkId) -> Self {
        let alert_key = match network {
            NetworkId::Main => MAIN_ALERT_KEY,
            NetworkId::Testnet | NetworkId::Regtest => TEST_ALERT_KEY,
        };
        Self {
            network,
            magic: network.magic(),
            port: network.default_port(),
            alert_key: hex::decode(alert_key).unwrap_or_default(),
            batch_sizes: vec![(100_000, 500), (250_000, 250), (350_000, 100)],
            default_batch: 50,
        }
    }

    /// How many blocks may be in flight at `height`.
    pub fn batch_size(&self, height: u32) -> usize {
        self.batch_sizes
            .iter()
            .find(|(max, _)| height <= *max)
            .map(|(_, size)| *size)
            .unwrap_or(self.default_batch)
    }

    pub fn is_main(&self) -> bool {
        self.network == NetworkId::Main
    }
}

impl From<NetworkId> for NetworkParams {
    fn from(network: NetworkId) -> Self {
        Self::new(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_schedule_shrinks_with_height() {
        let params = NetworkParams::new(NetworkId::Main);
        assert_eq!(params.batch_size(0), 500);
        assert_eq!(params.batch_size(100_000), 500);
        assert_eq!(params.batch_size(200_000), 250);
        assert_eq!(params.batch_size(300_000), 100);
        assert_eq!(params.batch_size(600_000), 50);
    }

    #[test]
    fn alert_keys_are_uncompressed_points() {
        for id in [NetworkId::Main, NetworkId::Testnet, NetworkId::Regtest] {
            let params = NetworkParams::new(id);
            assert_eq!(params.alert_key.len(), 65);
            assert_eq!(params.alert_key[0], 0x04);
        }
    }

    #[test]
    fn ports_and_magic() {
        assert_eq!(NetworkId::Main.default_port(), 8333);
        assert_eq!(NetworkId::Testnet.magic(), 0x0709_110b);
        assert_eq!(NetworkId::Regtest.as_str(), "regtest");
    }
}
