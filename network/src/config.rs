//! Pool configuration with TOML file support.

use serde::{Deserialize, Serialize};

use relaynet_protocol::version::USER_AGENT;
use relaynet_types::{services, NetworkId, NetworkParams};

use crate::error::{NetworkError, NetworkResult};

/// Configuration for a [`Pool`](crate::Pool).
///
/// Can be loaded from a TOML file via [`PoolConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Which network to connect to.
    #[serde(default)]
    pub network: NetworkId,

    /// Address to listen on for inbound peers.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port. Falls back to the network's default port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default = "default_max_outbound")]
    pub max_outbound: usize,

    #[serde(default = "default_max_inbound")]
    pub max_inbound: usize,

    /// Ban score at which a peer is disconnected and its host banned.
    #[serde(default = "default_ban_score")]
    pub ban_score: u32,

    #[serde(default = "default_ban_time_secs")]
    pub ban_time_secs: u64,

    /// How long a broadcast item waits for a `getdata` before failing.
    #[serde(default = "default_inv_timeout_ms")]
    pub inv_timeout_ms: u64,

    /// Header-only operation with bloom filters.
    #[serde(default)]
    pub spv: bool,

    /// Sync with `getheaders`. Follows `spv` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<bool>,

    #[serde(default = "default_true")]
    pub witness: bool,

    /// Ask peers not to relay transactions. Follows `spv` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_relay: Option<bool>,

    /// Do not serve data to other peers.
    #[serde(default)]
    pub selfish: bool,

    /// Ignore `addr` packets.
    #[serde(default)]
    pub ignore_discovery: bool,

    /// Fee filter sent to peers on open; negative means none.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: i64,

    /// Seed host addresses loaded into the host list.
    #[serde(default)]
    pub seeds: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Look up our public address when the listen address is unspecified.
    #[serde(default = "default_true")]
    pub discover_ip: bool,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_outbound() -> usize {
    8
}

fn default_max_inbound() -> usize {
    8
}

fn default_ban_score() -> u32 {
    100
}

fn default_ban_time_secs() -> u64 {
    24 * 60 * 60
}

fn default_inv_timeout_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_fee_rate() -> i64 {
    -1
}

// ── Impl ───────────────────────────────────────────────────────────────

impl PoolConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> NetworkResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NetworkError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> NetworkResult<Self> {
        toml::from_str(s).map_err(|e| NetworkError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> NetworkResult<String> {
        toml::to_string_pretty(self).map_err(|e| NetworkError::Config(e.to_string()))
    }

    pub fn for_network(network: NetworkId) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    pub fn params(&self) -> NetworkParams {
        NetworkParams::new(self.network)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.network.default_port())
    }

    pub fn headers(&self) -> bool {
        self.headers.unwrap_or(self.spv)
    }

    pub fn no_relay(&self) -> bool {
        self.no_relay.unwrap_or(self.spv)
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(USER_AGENT)
    }

    pub fn inv_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.inv_timeout_ms)
    }

    /// Services a host must advertise before we dial it.
    pub fn needed_services(&self) -> u64 {
        let mut mask = services::NETWORK;
        if self.witness {
            mask |= services::WITNESS;
        }
        if self.spv {
            mask |= services::BLOOM;
        }
        mask
    }

    /// Services we advertise in `version`.
    pub fn local_services(&self) -> u64 {
        let mut mask = 0;
        if !self.spv {
            mask |= services::NETWORK;
        }
        if self.witness {
            mask |= services::WITNESS;
        }
        mask
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            network: NetworkId::default(),
            host: default_host(),
            port: None,
            max_outbound: default_max_outbound(),
            max_inbound: default_max_inbound(),
            ban_score: default_ban_score(),
            ban_time_secs: default_ban_time_secs(),
            inv_timeout_ms: default_inv_timeout_ms(),
            spv: false,
            headers: None,
            witness: default_true(),
            no_relay: None,
            selfish: false,
            ignore_discovery: false,
            fee_rate: default_fee_rate(),
            seeds: Vec::new(),
            user_agent: None,
            discover_ip: default_true(),
        }
    }
}
