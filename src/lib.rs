//! Bitcoin wallet core: chain backends behind one provider enum, a
//! transaction planner with flat fees, and a pluggable signing seam.
//!
//! The typical flow: parse a [`config::Config`], resolve a
//! [`provider::BlockchainProvider`], create wallets through
//! [`wallet::WalletManager`], then plan and send transfers with
//! [`builder::TransactionBuilder`]. Key material never crosses the
//! [`signing::SigningService`] boundary; the pipeline only ever handles
//! public keys, digests, and compact signatures.

pub mod builder;
pub mod config;
pub mod error;
pub mod model;
pub mod monitor;
pub mod node_wallet;
pub mod provider;
pub mod push_indexer;
pub mod rest_indexer;
pub mod signing;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testutil;

pub use builder::{TransactionBuilder, UnsignedTransaction};
pub use config::{Config, ProviderKind};
pub use error::{Result, WalletError};
pub use model::{Balance, FeeLevel, Network, TransferRequest, Utxo};
pub use provider::{resolve_provider, BlockchainProvider};
pub use signing::{MemorySigningService, SigningService};
pub use wallet::{WalletInfo, WalletManager, WalletRepository};
