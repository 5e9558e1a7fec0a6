//! Wallet records and the repository they live in.
//!
//! A wallet is one key id, its derived segwit address, and the network it
//! belongs to. Records are append-only; the JSON repository keeps them as an
//! ordered array on disk and a missing file just means no wallets yet.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::model::Network;
use crate::provider::BlockchainProvider;
use crate::signing::{self, SigningService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    /// Signing-service key id; doubles as the wallet id.
    pub id: String,
    pub address: String,
    pub public_key: String,
    pub network: Network,
}

pub trait WalletRepository {
    fn load_all(&self) -> Result<Vec<WalletInfo>>;
    fn append(&self, wallet: &WalletInfo) -> Result<()>;

    fn find_by_id(&self, id: &str) -> Result<Option<WalletInfo>> {
        Ok(self.load_all()?.into_iter().find(|w| w.id == id))
    }

    fn find_by_address(&self, address: &str) -> Result<Option<WalletInfo>> {
        Ok(self.load_all()?.into_iter().find(|w| w.address == address))
    }
}

/// Flat JSON array on disk, kept in insertion order.
pub struct JsonWalletRepository {
    path: PathBuf,
}

impl JsonWalletRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WalletRepository for JsonWalletRepository {
    fn load_all(&self) -> Result<Vec<WalletInfo>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(WalletError::Io(e)),
        }
    }

    fn append(&self, wallet: &WalletInfo) -> Result<()> {
        let mut wallets = self.load_all()?;
        wallets.push(wallet.clone());
        std::fs::write(&self.path, serde_json::to_string_pretty(&wallets)?)?;
        Ok(())
    }
}

pub struct WalletManager {
    repository: Box<dyn WalletRepository + Send + Sync>,
}

impl WalletManager {
    pub fn new(repository: Box<dyn WalletRepository + Send + Sync>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &(dyn WalletRepository + Send + Sync) {
        self.repository.as_ref()
    }

    /// Create a key, derive its segwit address, persist the record, then
    /// register the address with every configured backend. A backend that
    /// fails to import is logged and skipped so one dead endpoint cannot
    /// block wallet creation.
    pub async fn create_wallet(
        &self,
        signer: &mut dyn SigningService,
        network: Network,
        providers: &[BlockchainProvider],
    ) -> Result<WalletInfo> {
        let id = signer.create_key()?;
        let public_key = signer.public_key(&id)?;
        let address = signing::p2wpkh_address(&public_key, network)?;

        let wallet = WalletInfo {
            id,
            address,
            public_key,
            network,
        };
        self.repository.append(&wallet)?;
        log::info!("Created wallet {} ({})", wallet.id, wallet.address);

        for provider in providers {
            if let Err(e) = provider.import_wallet(&wallet.address).await {
                log::warn!(
                    "Failed to register {} with {}: {}",
                    wallet.address,
                    provider.kind(),
                    e
                );
            }
        }
        Ok(wallet)
    }
}
