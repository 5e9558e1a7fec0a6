//! Transaction planning and signing.
//!
//! `create` turns a transfer request into a fully resolved spending plan:
//! every UTXO of the source wallet is consumed in the order the backend
//! returned them, the fee comes from the flat fee table, and any surplus
//! goes back to the source as a single change output. `send_tx` signs the
//! plan input by input through the signing seam and broadcasts the result;
//! a backend that already knows the transaction is treated as success.
//!
//! Signature hashing follows the script type of each prevout: legacy
//! sighash for P2PKH, BIP-143 for P2WPKH. The signer only ever sees the
//! 32-byte digest; DER encoding and the sighash flag are applied here.

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize_hex};
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::PublicKey;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::error::{Result, WalletError};
use crate::model::{DestinationType, Network, TransferRequest, Utxo};
use crate::provider::BlockchainProvider;
use crate::signing::SigningService;
use crate::wallet::WalletRepository;

/// One input of a spending plan, resolved down to its prevout script.
#[derive(Debug, Clone)]
pub struct PlannedInput {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
}

#[derive(Debug, Clone)]
pub struct PlannedOutput {
    pub address: String,
    pub value: u64,
    pub is_change: bool,
}

/// A resolved, unsigned spending plan. Accounting always balances:
/// `total_input == amount + fee + change`.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub network: Network,
    pub inputs: Vec<PlannedInput>,
    pub outputs: Vec<PlannedOutput>,
    pub total_input: u64,
    pub amount: u64,
    pub fee: u64,
    pub change: u64,
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw_hex: String,
    pub txid: Txid,
}

pub struct TransactionBuilder<'a> {
    provider: &'a BlockchainProvider,
    wallets: &'a (dyn WalletRepository + Send + Sync),
    network: Network,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(
        provider: &'a BlockchainProvider,
        wallets: &'a (dyn WalletRepository + Send + Sync),
        network: Network,
    ) -> Self {
        Self {
            provider,
            wallets,
            network,
        }
    }

    /// Resolve a transfer request into a spending plan. Fails without side
    /// effects: nothing is signed and nothing reaches the mempool.
    pub async fn create(&self, request: &TransferRequest) -> Result<UnsignedTransaction> {
        if request.coin != self.network {
            return Err(WalletError::UnsupportedNetwork(request.coin.to_string()));
        }
        let amount = request.amount_sats()?;
        if amount == 0 {
            return Err(WalletError::InvalidAmount("amount must be positive".into()));
        }

        let source = self
            .wallets
            .find_by_id(&request.source_key)?
            .or(self.wallets.find_by_address(&request.source_key)?)
            .ok_or_else(|| WalletError::WalletNotFound(request.source_key.clone()))?;
        let destination = self.resolve_destination(request)?;

        let utxos = self
            .provider
            .get_utxos(std::slice::from_ref(&source.address))
            .await?;
        let total_input: u64 = utxos.iter().map(|u| u.value).sum();
        let fee = request.fee_level.fee_sats();
        let change = check_funds(total_input, amount, fee)?;

        let mut inputs = Vec::with_capacity(utxos.len());
        for utxo in &utxos {
            inputs.push(self.resolve_input(utxo).await?);
        }

        let mut outputs = vec![PlannedOutput {
            address: destination,
            value: amount,
            is_change: false,
        }];
        if change > 0 {
            outputs.push(PlannedOutput {
                address: source.address.clone(),
                value: change,
                is_change: true,
            });
        }

        log::info!(
            "Planned spend of {} sats ({} inputs, fee {}, change {})",
            amount,
            inputs.len(),
            fee,
            change
        );
        if let Some(reference) = &request.customer_ref_id {
            log::debug!("Transfer reference: {}", reference);
        }
        if let Some(note) = &request.note {
            log::debug!("Transfer note: {}", note);
        }
        Ok(UnsignedTransaction {
            network: self.network,
            inputs,
            outputs,
            total_input,
            amount,
            fee,
            change,
        })
    }

    /// Sign and broadcast a plan. Returns the txid the backend reported, or
    /// the locally computed txid when the backend rejects the broadcast as a
    /// duplicate it already knows.
    pub async fn send_tx(
        &self,
        unsigned: &UnsignedTransaction,
        signer: &dyn SigningService,
        key_id: &str,
    ) -> Result<String> {
        let signed = sign_transaction(unsigned, signer, key_id)?;
        match self.provider.broadcast_tx(&signed.raw_hex).await {
            Ok(txid) => Ok(txid),
            Err(e) if e.is_duplicate_broadcast() => {
                log::info!("Backend already knows {}, treating as sent", signed.txid);
                Ok(signed.txid.to_string())
            }
            Err(e) => Err(e),
        }
    }

    fn resolve_destination(&self, request: &TransferRequest) -> Result<String> {
        match request.destination_type {
            DestinationType::VaultAccount => {
                let key = request.destination_key.as_deref().ok_or_else(|| {
                    WalletError::InvalidDestination("destinationKey is required".into())
                })?;
                let wallet = self
                    .wallets
                    .find_by_id(key)?
                    .ok_or_else(|| WalletError::WalletNotFound(key.to_string()))?;
                Ok(wallet.address)
            }
            DestinationType::OneTimeAddress => {
                let address = request.destination_address.as_deref().ok_or_else(|| {
                    WalletError::InvalidDestination("destinationAddress is required".into())
                })?;
                parse_address(address, self.network)?;
                Ok(address.to_string())
            }
        }
    }

    /// Fetch the previous transaction and pin the input to the exact
    /// prevout it spends. The fetched output is authoritative for both the
    /// script and the value.
    async fn resolve_input(&self, utxo: &Utxo) -> Result<PlannedInput> {
        let raw_hex = self.provider.get_tx_hex(&utxo.txid).await?;
        let raw = hex::decode(raw_hex.trim())
            .map_err(|e| WalletError::Encoding(format!("bad transaction hex: {}", e)))?;
        let prev_tx: Transaction = deserialize(&raw)
            .map_err(|e| WalletError::Encoding(format!("bad transaction {}: {}", utxo.txid, e)))?;

        let prevout = prev_tx.output.get(utxo.vout as usize).ok_or_else(|| {
            WalletError::Encoding(format!("prevout {}:{} does not exist", utxo.txid, utxo.vout))
        })?;
        if prevout.value.to_sat() != utxo.value {
            log::warn!(
                "Indexer reported {} sats for {}:{} but the chain says {}",
                utxo.value,
                utxo.txid,
                utxo.vout,
                prevout.value.to_sat()
            );
        }

        let txid = Txid::from_str(&utxo.txid)
            .map_err(|e| WalletError::Encoding(format!("bad txid {}: {}", utxo.txid, e)))?;
        Ok(PlannedInput {
            outpoint: OutPoint::new(txid, utxo.vout),
            value: prevout.value.to_sat(),
            script_pubkey: prevout.script_pubkey.clone(),
        })
    }
}

/// Sign every input of a plan with the key behind `key_id`. The signer is
/// consulted for the public key first, so an unknown key fails before any
/// signature is produced.
pub fn sign_transaction(
    unsigned: &UnsignedTransaction,
    signer: &dyn SigningService,
    key_id: &str,
) -> Result<SignedTransaction> {
    let public_hex = signer.public_key(key_id)?;
    let public_raw = hex::decode(&public_hex)
        .map_err(|e| WalletError::Encoding(format!("bad public key hex: {}", e)))?;
    let public_key = PublicKey::from_slice(&public_raw)
        .map_err(|e| WalletError::Encoding(format!("bad public key: {}", e)))?;

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: unsigned
            .inputs
            .iter()
            .map(|input| TxIn {
                previous_output: input.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: unsigned
            .outputs
            .iter()
            .map(|output| {
                Ok(TxOut {
                    value: Amount::from_sat(output.value),
                    script_pubkey: parse_address(&output.address, unsigned.network)?
                        .script_pubkey(),
                })
            })
            .collect::<Result<Vec<_>>>()?,
    };

    // Digest phase borrows the transaction, so signatures are applied in a
    // second pass.
    let mut digests = Vec::with_capacity(unsigned.inputs.len());
    {
        let mut cache = SighashCache::new(&tx);
        for (index, input) in unsigned.inputs.iter().enumerate() {
            let script = &input.script_pubkey;
            let digest: [u8; 32] = if script.is_p2wpkh() {
                cache
                    .p2wpkh_signature_hash(
                        index,
                        script,
                        Amount::from_sat(input.value),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| WalletError::Encoding(format!("sighash input {}: {}", index, e)))?
                    .to_byte_array()
            } else if script.is_p2pkh() {
                cache
                    .legacy_signature_hash(index, script, EcdsaSighashType::All.to_u32())
                    .map_err(|e| WalletError::Encoding(format!("sighash input {}: {}", index, e)))?
                    .to_byte_array()
            } else {
                return Err(WalletError::Encoding(format!(
                    "unsupported prevout script on input {}",
                    index
                )));
            };
            digests.push(digest);
        }
    }

    for (index, (input, digest)) in unsigned.inputs.iter().zip(&digests).enumerate() {
        let compact = hex::decode(signer.sign(key_id, digest)?)
            .map_err(|e| WalletError::Encoding(format!("bad signature hex: {}", e)))?;
        let compact: [u8; 64] = compact
            .try_into()
            .map_err(|_| WalletError::Encoding("signature is not 64 bytes".into()))?;
        let signature = bitcoin::ecdsa::Signature {
            signature: bitcoin::secp256k1::ecdsa::Signature::from_compact(&compact)
                .map_err(|e| WalletError::Encoding(format!("bad signature: {}", e)))?,
            sighash_type: EcdsaSighashType::All,
        };

        if input.script_pubkey.is_p2wpkh() {
            tx.input[index].witness = Witness::p2wpkh(&signature, &public_key);
        } else {
            let push = PushBytesBuf::try_from(signature.to_vec())
                .map_err(|_| WalletError::Encoding("signature too long for script".into()))?;
            tx.input[index].script_sig = Builder::new()
                .push_slice(push)
                .push_key(&bitcoin::PublicKey::new(public_key))
                .into_script();
        }
    }

    Ok(SignedTransaction {
        txid: tx.compute_txid(),
        raw_hex: serialize_hex(&tx),
    })
}

/// Funding check for a plan: returns the change, or `InsufficientFunds`
/// when the inputs cannot cover amount plus fee.
fn check_funds(total_input: u64, amount: u64, fee: u64) -> Result<u64> {
    let required = amount
        .checked_add(fee)
        .ok_or_else(|| WalletError::InvalidAmount("amount overflows".into()))?;
    if total_input < required {
        return Err(WalletError::InsufficientFunds {
            available: total_input,
            required,
        });
    }
    Ok(total_input - required)
}

fn parse_address(address: &str, network: Network) -> Result<Address> {
    Address::from_str(address)
        .map_err(|e| WalletError::InvalidAddress(format!("{}: {}", address, e)))?
        .require_network(network.into())
        .map_err(|e| WalletError::InvalidAddress(format!("{}: {}", address, e)))
}
