//! Core data model: UTXOs, balances and the structured transfer request.
//!
//! UTXO sets are ephemeral: fetched fresh per provider call, summed into a
//! `Balance` on the spot and never cached. A `Balance` can only be derived
//! from a UTXO set, so the partition invariant
//! `confirmed + unconfirmed == sum(value)` holds by construction.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

pub const SATS_PER_BTC: u64 = 100_000_000;

/// An unspent transaction output as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Satoshis. Providers never emit zero-value entries.
    pub value: u64,
    #[serde(default)]
    pub status: UtxoStatus,
}

/// Confirmation state of a UTXO. `confirmed == false` implies the height is
/// unknown, so `block_height` stays `None` for mempool entries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UtxoStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
}

/// Confirmed/unconfirmed satoshi totals for one address query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
}

impl Balance {
    /// Partition a UTXO set on `confirmed` and sum each side.
    pub fn from_utxos(utxos: &[Utxo]) -> Self {
        let mut balance = Balance::default();
        for utxo in utxos {
            if utxo.status.confirmed {
                balance.confirmed += utxo.value;
            } else {
                balance.unconfirmed += utxo.value;
            }
        }
        balance
    }

    pub fn total(&self) -> u64 {
        self.confirmed + self.unconfirmed
    }
}

/// Network a wallet or request is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl From<Network> for bitcoin::Network {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fee tier requested by the caller. Maps to a fixed satoshi fee in the
/// builder; anything unrecognised on the wire falls back to `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeeLevel {
    Low,
    Medium,
    High,
}

impl FeeLevel {
    pub fn fee_sats(&self) -> u64 {
        match self {
            FeeLevel::Low => 5_000,
            FeeLevel::Medium => 10_000,
            FeeLevel::High => 15_000,
        }
    }
}

impl Default for FeeLevel {
    fn default() -> Self {
        FeeLevel::Medium
    }
}

impl<'de> Deserialize<'de> for FeeLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_uppercase().as_str() {
            "LOW" => FeeLevel::Low,
            "HIGH" => FeeLevel::High,
            "MEDIUM" => FeeLevel::Medium,
            other => {
                log::warn!("Unrecognised fee level '{}', defaulting to MEDIUM", other);
                FeeLevel::Medium
            }
        })
    }
}

/// How the destination of a transfer is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationType {
    VaultAccount,
    OneTimeAddress,
}

/// Structured transfer request, the external input to the transaction
/// builder. Field names follow the operator case-file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Decimal BTC string, e.g. "0.07".
    pub amount: String,
    #[serde(default)]
    pub fee_level: FeeLevel,
    /// Wallet id or address of the source wallet.
    pub source_key: String,
    pub destination_type: DestinationType,
    /// Wallet id, required when `destination_type` is `VaultAccount`.
    #[serde(default)]
    pub destination_key: Option<String>,
    /// Literal address, required when `destination_type` is `OneTimeAddress`.
    #[serde(default)]
    pub destination_address: Option<String>,
    pub coin: Network,
    // Operator-facing context, carried through into logs only.
    #[serde(default)]
    pub customer_ref_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl TransferRequest {
    pub fn amount_sats(&self) -> Result<u64> {
        btc_to_sats(&self.amount)
    }
}

/// Convert a decimal BTC string into satoshis. At most 8 fraction digits,
/// no signs, no exponents.
pub fn btc_to_sats(amount: &str) -> Result<u64> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(WalletError::InvalidAmount("empty amount".into()));
    }
    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if frac.len() > 8 {
        return Err(WalletError::InvalidAmount(format!(
            "'{}' has more than 8 decimal places",
            amount
        )));
    }
    if whole.is_empty() && frac.is_empty() {
        return Err(WalletError::InvalidAmount(format!("'{}' has no digits", amount)));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(WalletError::InvalidAmount(format!(
            "'{}' is not a non-negative decimal",
            amount
        )));
    }
    let whole_btc: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| WalletError::InvalidAmount(format!("'{}' overflows", amount)))?
    };
    let mut frac_digits = frac.to_string();
    while frac_digits.len() < 8 {
        frac_digits.push('0');
    }
    let frac_sats: u64 = frac_digits
        .parse()
        .map_err(|_| WalletError::InvalidAmount(format!("'{}' overflows", amount)))?;
    whole_btc
        .checked_mul(SATS_PER_BTC)
        .and_then(|sats| sats.checked_add(frac_sats))
        .ok_or_else(|| WalletError::InvalidAmount(format!("'{}' overflows", amount)))
}
