//! Error taxonomy shared by providers, the transaction builder and the
//! signing service.
//!
//! Adapters absorb exactly one backend condition locally: an address with no
//! history ("not found") becomes an empty UTXO contribution and never reaches
//! callers. Everything else surfaces through `WalletError`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalletError>;

#[derive(Debug, Error)]
pub enum WalletError {
    /// Transport-level failure (timeout, refused connection, DNS). Retryable
    /// at the caller's discretion; never produced for backend-reported 4xx/5xx.
    #[error("network error: {0}")]
    Network(String),

    /// Backend-reported HTTP failure that is not the modeled not-found case.
    #[error("backend error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    /// JSON-RPC error object returned by the node.
    #[error("node RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("insufficient funds: have {available} sats, need {required} sats (fee included)")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Hex / consensus / signature encoding trouble on otherwise well-formed data.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Push subscription channel or WebSocket failure.
    #[error("subscription error: {0}")]
    Subscription(String),
}

impl WalletError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        // reqwest folds timeouts, connect failures and body troubles into one
        // type; all of them are transport-level from our point of view.
        WalletError::Network(err.to_string())
    }

    /// True when a broadcast failed only because the transaction is already
    /// known to the backend. The builder treats a resubmission as success.
    pub fn is_duplicate_broadcast(&self) -> bool {
        match self {
            // Bitcoin Core: -27 = already in chain, -26 covers the
            // "txn-already-in-mempool" reject.
            WalletError::Rpc { code, message } => {
                *code == -27 || (*code == -26 && message.contains("already"))
            }
            WalletError::Backend { message, .. } => {
                let m = message.to_ascii_lowercase();
                m.contains("already in") || m.contains("txn-already-known")
            }
            _ => false,
        }
    }
}
