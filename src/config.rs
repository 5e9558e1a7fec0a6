//! Runtime configuration: which backend serves which network.
//!
//! Mirrors the JSON config file the operator edits: a selected network, a
//! selected provider, and per-network endpoint tables. Providers are resolved
//! once at startup by `provider::resolve_provider`; a misconfigured selection
//! fails there, before any network call.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::model::Network;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which backend family the operator selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// mempool.space-style indexer (REST + WebSocket push).
    Mempool,
    /// Blockstream-style Esplora indexer (REST only).
    Blockstream,
    /// Bitcoin Core JSON-RPC with a watch-only wallet.
    BtcNode,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProviderKind::Mempool => "mempool",
            ProviderKind::Blockstream => "blockstream",
            ProviderKind::BtcNode => "btc-node",
        };
        f.write_str(name)
    }
}

/// REST indexer endpoint; `ws_url` only applies to push-capable indexers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerEndpoint {
    pub api_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
}

/// Node RPC endpoint with optional HTTP basic auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub api_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Endpoint table for one network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkEndpoints {
    #[serde(default)]
    pub mempool: Option<IndexerEndpoint>,
    #[serde(default)]
    pub blockstream: Option<IndexerEndpoint>,
    #[serde(default, rename = "btc-node")]
    pub btc_node: Option<NodeEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: Network,
    #[serde(rename = "api_provider")]
    pub provider: ProviderKind,
    pub networks: BTreeMap<Network, NetworkEndpoints>,
    /// Bounded per-call timeout applied to every provider request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Endpoint table for the selected network.
    pub fn endpoints(&self) -> Result<&NetworkEndpoints> {
        self.networks
            .get(&self.network)
            .ok_or_else(|| WalletError::UnsupportedNetwork(self.network.to_string()))
    }
}
