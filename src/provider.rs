//! Blockchain provider abstraction.
//!
//! One closed enum, one constructor per backend. Selection happens once at
//! startup via `resolve_provider`; afterwards every call dispatches by plain
//! match, with no runtime type inspection. The push subscription is a
//! capability only one variant has, exposed through `push_indexer()`
//! returning `Option` rather than through downcasting.

use crate::config::{Config, ProviderKind};
use crate::error::{Result, WalletError};
use crate::model::{Balance, Utxo};
use crate::node_wallet::NodeWalletProvider;
use crate::push_indexer::PushIndexerProvider;
use crate::rest_indexer::{IndexerFlavor, RestIndexerProvider};

pub enum BlockchainProvider {
    RestIndexer(RestIndexerProvider),
    PushIndexer(PushIndexerProvider),
    NodeWallet(NodeWalletProvider),
}

impl BlockchainProvider {
    /// UTXOs for a set of addresses. Addresses with no history contribute
    /// nothing; a genuine backend failure fails the whole call.
    pub async fn get_utxos(&self, addresses: &[String]) -> Result<Vec<Utxo>> {
        match self {
            BlockchainProvider::RestIndexer(provider) => provider.get_utxos(addresses).await,
            BlockchainProvider::PushIndexer(provider) => provider.get_utxos(addresses).await,
            BlockchainProvider::NodeWallet(provider) => provider.get_utxos(addresses).await,
        }
    }

    /// Raw transaction bytes (hex); prevout side-channel for signing.
    pub async fn get_tx_hex(&self, txid: &str) -> Result<String> {
        match self {
            BlockchainProvider::RestIndexer(provider) => provider.get_tx_hex(txid).await,
            BlockchainProvider::PushIndexer(provider) => provider.get_tx_hex(txid).await,
            BlockchainProvider::NodeWallet(provider) => provider.get_tx_hex(txid).await,
        }
    }

    pub async fn broadcast_tx(&self, raw_hex: &str) -> Result<String> {
        match self {
            BlockchainProvider::RestIndexer(provider) => provider.broadcast_tx(raw_hex).await,
            BlockchainProvider::PushIndexer(provider) => provider.broadcast_tx(raw_hex).await,
            BlockchainProvider::NodeWallet(provider) => provider.broadcast_tx(raw_hex).await,
        }
    }

    pub async fn get_block_height(&self) -> Result<u64> {
        match self {
            BlockchainProvider::RestIndexer(provider) => provider.get_block_height().await,
            BlockchainProvider::PushIndexer(provider) => provider.get_block_height().await,
            BlockchainProvider::NodeWallet(provider) => provider.get_block_height().await,
        }
    }

    /// Register an address with the backend. No-op for index backends, a
    /// watch-only import plus bounded rescan for the node wallet.
    pub async fn import_wallet(&self, address: &str) -> Result<()> {
        match self {
            BlockchainProvider::RestIndexer(provider) => {
                provider.import_wallet(address);
                Ok(())
            }
            BlockchainProvider::PushIndexer(provider) => {
                provider.import_wallet(address);
                Ok(())
            }
            BlockchainProvider::NodeWallet(provider) => provider.import_wallet(address).await,
        }
    }

    /// Balance is always derived from the UTXO set of the same query, never
    /// fetched independently.
    pub async fn get_balance(&self, address: &str) -> Result<Balance> {
        let utxos = self.get_utxos(std::slice::from_ref(&address.to_string())).await?;
        Ok(Balance::from_utxos(&utxos))
    }

    /// Live-subscription capability; present only on the push indexer.
    pub fn push_indexer(&self) -> Option<&PushIndexerProvider> {
        match self {
            BlockchainProvider::PushIndexer(provider) => Some(provider),
            _ => None,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            BlockchainProvider::RestIndexer(_) => ProviderKind::Blockstream,
            BlockchainProvider::PushIndexer(_) => ProviderKind::Mempool,
            BlockchainProvider::NodeWallet(_) => ProviderKind::BtcNode,
        }
    }
}

/// Resolve the configured provider for the configured network. Fails with a
/// configuration-time error before any network call when the selection has
/// no endpoint entry.
pub fn resolve_provider(config: &Config) -> Result<BlockchainProvider> {
    let endpoints = config.endpoints()?;
    let timeout = config.timeout();

    let provider = match config.provider {
        ProviderKind::Mempool => {
            let endpoint = endpoints.mempool.as_ref().ok_or_else(|| {
                WalletError::UnsupportedProvider(format!(
                    "mempool is not configured for {}",
                    config.network
                ))
            })?;
            BlockchainProvider::PushIndexer(PushIndexerProvider::new(
                endpoint.api_url.clone(),
                endpoint.ws_url.clone(),
                timeout,
            )?)
        }
        ProviderKind::Blockstream => {
            let endpoint = endpoints.blockstream.as_ref().ok_or_else(|| {
                WalletError::UnsupportedProvider(format!(
                    "blockstream is not configured for {}",
                    config.network
                ))
            })?;
            BlockchainProvider::RestIndexer(RestIndexerProvider::new(
                endpoint.api_url.clone(),
                IndexerFlavor::Blockstream,
                timeout,
            )?)
        }
        ProviderKind::BtcNode => {
            let endpoint = endpoints.btc_node.as_ref().ok_or_else(|| {
                WalletError::UnsupportedProvider(format!(
                    "btc-node is not configured for {}",
                    config.network
                ))
            })?;
            BlockchainProvider::NodeWallet(NodeWalletProvider::new(
                endpoint.api_url.clone(),
                endpoint.username.clone(),
                endpoint.password.clone(),
                timeout,
            )?)
        }
    };

    log::info!(
        "Resolved provider {} for network {}",
        provider.kind(),
        config.network
    );
    Ok(provider)
}

/// Every provider configured for the selected network. Used when a new
/// wallet address has to be registered with all backends at once.
pub fn resolve_all_providers(config: &Config) -> Result<Vec<BlockchainProvider>> {
    let endpoints = config.endpoints()?;
    let timeout = config.timeout();
    let mut providers = Vec::new();

    if let Some(endpoint) = &endpoints.mempool {
        providers.push(BlockchainProvider::PushIndexer(PushIndexerProvider::new(
            endpoint.api_url.clone(),
            endpoint.ws_url.clone(),
            timeout,
        )?));
    }
    if let Some(endpoint) = &endpoints.blockstream {
        providers.push(BlockchainProvider::RestIndexer(RestIndexerProvider::new(
            endpoint.api_url.clone(),
            IndexerFlavor::Blockstream,
            timeout,
        )?));
    }
    if let Some(endpoint) = &endpoints.btc_node {
        providers.push(BlockchainProvider::NodeWallet(NodeWalletProvider::new(
            endpoint.api_url.clone(),
            endpoint.username.clone(),
            endpoint.password.clone(),
            timeout,
        )?));
    }
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Network;

    fn config(provider: ProviderKind) -> Config {
        let raw = r#"{
            "network": "testnet",
            "api_provider": "mempool",
            "networks": {
                "testnet": {
                    "mempool": {
                        "api_url": "https://mempool.space/testnet/api",
                        "ws_url": "wss://mempool.space/testnet/api/v1/ws"
                    },
                    "blockstream": { "api_url": "https://blockstream.info/testnet/api" },
                    "btc-node": { "api_url": "http://127.0.0.1:18332" }
                }
            }
        }"#;
        let mut config = Config::from_json(raw).unwrap();
        config.provider = provider;
        config
    }

    #[test]
    fn factory_resolves_each_configured_backend() {
        let push = resolve_provider(&config(ProviderKind::Mempool)).unwrap();
        assert!(push.push_indexer().is_some());

        let rest = resolve_provider(&config(ProviderKind::Blockstream)).unwrap();
        assert!(rest.push_indexer().is_none());
        assert_eq!(rest.kind(), ProviderKind::Blockstream);

        let node = resolve_provider(&config(ProviderKind::BtcNode)).unwrap();
        assert_eq!(node.kind(), ProviderKind::BtcNode);
    }

    #[test]
    fn factory_fails_before_any_network_call_when_unconfigured() {
        let mut cfg = config(ProviderKind::BtcNode);
        cfg.networks.get_mut(&Network::Testnet).unwrap().btc_node = None;
        assert!(matches!(
            resolve_provider(&cfg),
            Err(WalletError::UnsupportedProvider(_))
        ));

        cfg.network = Network::Mainnet;
        assert!(matches!(
            resolve_provider(&cfg),
            Err(WalletError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn all_providers_for_network() {
        let providers = resolve_all_providers(&config(ProviderKind::Mempool)).unwrap();
        assert_eq!(providers.len(), 3);
    }
}
