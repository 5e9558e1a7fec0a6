//! Full-node wallet provider over Bitcoin Core JSON-RPC.
//!
//! The node only reports UTXOs for addresses its watch-only wallet already
//! knows, and `listunspent` fails hard when handed a foreign address. So:
//! `import_wallet` registers the address and triggers a bounded rescan
//! (tip - 1), and `get_utxos` pre-filters the requested addresses against
//! the wallet's known set, silently contributing nothing for the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Result, WalletError};
use crate::model::{Utxo, UtxoStatus, SATS_PER_BTC};

const RPC_ID: &str = "satbridge";

/// JSON-RPC 1.0 request envelope.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: serde_json::Value,
}

impl<'a> RpcRequest<'a> {
    fn new(method: &'a str, params: serde_json::Value) -> Self {
        Self {
            // Bitcoin Core speaks JSON-RPC 1.0; the version literal is "1.0".
            jsonrpc: "1.0",
            id: RPC_ID,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// `listunspent` entry. The call reports confirmations but no block
/// height/hash/time, so those stay unset on the mapped UTXO.
#[derive(Debug, Deserialize)]
struct ListUnspentEntry {
    txid: String,
    vout: u32,
    /// BTC, not satoshis.
    amount: f64,
    confirmations: u64,
}

#[derive(Debug, Deserialize)]
struct ReceivedByAddressEntry {
    address: String,
}

#[derive(Debug, Deserialize)]
struct ScanTxOutSetResult {
    #[serde(default)]
    unspents: Vec<ScanTxOutSetUnspent>,
}

#[derive(Debug, Deserialize)]
struct ScanTxOutSetUnspent {
    txid: String,
    vout: u32,
    amount: f64,
    height: u64,
}

fn btc_amount_to_sats(amount: f64) -> u64 {
    // The node serialises amounts as BTC floats; round to the satoshi grid.
    (amount * SATS_PER_BTC as f64).round() as u64
}

/// UTXOs must carry a positive value; anything that rounds to zero sats is
/// unspendable and gets dropped at the boundary.
fn drop_zero_value(utxo: &Utxo) -> bool {
    if utxo.value == 0 {
        log::debug!("Dropping zero-value entry {}:{}", utxo.txid, utxo.vout);
        return false;
    }
    true
}

pub struct NodeWalletProvider {
    client: reqwest::Client,
    api_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl NodeWalletProvider {
    pub fn new(
        api_url: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(WalletError::from_reqwest)?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            username,
            password,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let mut request = self
            .client
            .post(&self.api_url)
            .json(&RpcRequest::new(method, params));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request.send().await.map_err(WalletError::from_reqwest)?;
        let envelope: RpcResponse<T> =
            response.json().await.map_err(WalletError::from_reqwest)?;

        if let Some(error) = envelope.error {
            return Err(WalletError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        envelope
            .result
            .ok_or_else(|| WalletError::Encoding(format!("{}: empty RPC result", method)))
    }

    /// Addresses the watch-only wallet currently tracks (including ones with
    /// no received coins yet).
    async fn known_addresses(&self) -> Result<Vec<String>> {
        let entries: Vec<ReceivedByAddressEntry> = self
            .call("listreceivedbyaddress", json!([0, true, true]))
            .await?;
        Ok(entries.into_iter().map(|e| e.address).collect())
    }

    /// Wallet-scoped UTXO listing. Only addresses the wallet knows are
    /// forwarded to `listunspent`; never-imported addresses contribute an
    /// empty result without touching the RPC.
    pub async fn get_utxos(&self, addresses: &[String]) -> Result<Vec<Utxo>> {
        let known = self.known_addresses().await?;
        let tracked: Vec<&String> = addresses
            .iter()
            .filter(|address| known.iter().any(|k| k == *address))
            .collect();

        if tracked.is_empty() {
            log::warn!(
                "None of {} requested address(es) are imported into the node wallet",
                addresses.len()
            );
            return Ok(Vec::new());
        }
        if tracked.len() < addresses.len() {
            log::warn!(
                "{} of {} requested address(es) are not imported and will be skipped",
                addresses.len() - tracked.len(),
                addresses.len()
            );
        }

        let entries: Vec<ListUnspentEntry> = self
            .call("listunspent", json!([0, 9_999_999, tracked]))
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| Utxo {
                txid: entry.txid,
                vout: entry.vout,
                value: btc_amount_to_sats(entry.amount),
                status: UtxoStatus {
                    confirmed: entry.confirmations > 0,
                    // listunspent does not report heights.
                    block_height: None,
                },
            })
            .filter(drop_zero_value)
            .collect())
    }

    /// Full-UTXO-set scan for one address, independent of the wallet index.
    /// Slow on the node side; everything it returns is confirmed.
    pub async fn scan_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let result: ScanTxOutSetResult = self
            .call(
                "scantxoutset",
                json!(["start", [format!("addr({})", address)]]),
            )
            .await?;
        Ok(result
            .unspents
            .into_iter()
            .map(|unspent| Utxo {
                txid: unspent.txid,
                vout: unspent.vout,
                value: btc_amount_to_sats(unspent.amount),
                status: UtxoStatus {
                    confirmed: true,
                    block_height: Some(unspent.height),
                },
            })
            .filter(drop_zero_value)
            .collect())
    }

    pub async fn get_tx_hex(&self, txid: &str) -> Result<String> {
        self.call("getrawtransaction", json!([txid])).await
    }

    pub async fn broadcast_tx(&self, raw_hex: &str) -> Result<String> {
        self.call("sendrawtransaction", json!([raw_hex])).await
    }

    pub async fn get_block_height(&self) -> Result<u64> {
        self.call("getblockcount", json!([])).await
    }

    /// Two-step registration: add the address to the watch-only wallet, then
    /// rescan from just below the tip so its recent history lands in the
    /// wallet index without replaying the whole chain.
    pub async fn import_wallet(&self, address: &str) -> Result<()> {
        let _: Option<serde_json::Value> = self
            .call_allowing_null("importaddress", json!([address, "", false]))
            .await?;
        log::info!("Imported address {} into the node wallet", address);

        let height: u64 = self.get_block_height().await?;
        let start = height.saturating_sub(1);
        let _: Option<serde_json::Value> = self
            .call_allowing_null("rescanblockchain", json!([start]))
            .await?;
        log::info!("Rescanned blockchain from height {}", start);
        Ok(())
    }

    /// Like `call`, but tolerates the `result: null` that side-effect-only
    /// RPCs such as `importaddress` answer with.
    async fn call_allowing_null(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        let mut request = self
            .client
            .post(&self.api_url)
            .json(&RpcRequest::new(method, params));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request.send().await.map_err(WalletError::from_reqwest)?;
        let envelope: RpcResponse<serde_json::Value> =
            response.json().await.map_err(WalletError::from_reqwest)?;
        if let Some(error) = envelope.error {
            return Err(WalletError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(envelope.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_envelope_uses_protocol_version_one_zero() {
        let request = RpcRequest::new("getblockcount", json!([]));
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["jsonrpc"], "1.0");
        assert_eq!(encoded["id"], RPC_ID);
        assert_eq!(encoded["method"], "getblockcount");
    }

    #[test]
    fn listunspent_entry_maps_confirmations_and_amount() {
        let raw = r#"[
            {"txid": "aa", "vout": 0, "address": "tb1qxyz", "amount": 0.05,
             "confirmations": 3, "spendable": false, "solvable": false, "safe": true},
            {"txid": "bb", "vout": 1, "address": "tb1qxyz", "amount": 0.03,
             "confirmations": 0, "spendable": false, "solvable": false, "safe": false}
        ]"#;
        let entries: Vec<ListUnspentEntry> = serde_json::from_str(raw).unwrap();

        assert_eq!(btc_amount_to_sats(entries[0].amount), 5_000_000);
        assert!(entries[0].confirmations > 0);
        assert_eq!(btc_amount_to_sats(entries[1].amount), 3_000_000);
        assert_eq!(entries[1].confirmations, 0);
    }

    #[test]
    fn btc_float_rounds_to_satoshi_grid() {
        // 0.1 BTC is not exactly representable as f64; rounding must land
        // on the intended satoshi value anyway.
        assert_eq!(btc_amount_to_sats(0.1), 10_000_000);
        assert_eq!(btc_amount_to_sats(0.00000001), 1);
        assert_eq!(btc_amount_to_sats(20999999.9769), 2_099_999_997_690_000);
    }

    #[test]
    fn scantxoutset_unspents_are_confirmed_with_height() {
        let raw = r#"{
            "success": true, "height": 812345, "bestblock": "00",
            "unspents": [
                {"txid": "cc", "vout": 0, "scriptPubKey": "0014ab",
                 "desc": "addr(tb1qxyz)", "amount": 1.5, "height": 812000}
            ],
            "total_amount": 1.5
        }"#;
        let result: ScanTxOutSetResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.unspents.len(), 1);
        assert_eq!(result.unspents[0].height, 812_000);
        assert_eq!(btc_amount_to_sats(result.unspents[0].amount), 150_000_000);
    }

    #[tokio::test]
    async fn unimported_addresses_short_circuit_before_listunspent() {
        let server = crate::testutil::spawn_stub(vec![
            (
                "listreceivedbyaddress".to_string(),
                200,
                r#"{"result": [], "error": null, "id": "satbridge"}"#.to_string(),
            ),
            (
                "listunspent".to_string(),
                200,
                r#"{"result": [], "error": null, "id": "satbridge"}"#.to_string(),
            ),
        ])
        .await;
        let provider = NodeWalletProvider::new(
            server.base_url.as_str(),
            None,
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let utxos = provider
            .get_utxos(&["tb1qnotmine".into()])
            .await
            .unwrap();
        assert!(utxos.is_empty());

        // Only the address pre-filter went over the wire.
        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("listreceivedbyaddress"));
        assert!(!requests.iter().any(|r| r.contains("listunspent")));
    }

    #[tokio::test]
    async fn tracked_addresses_reach_listunspent_without_dust() {
        let received = r#"{"result": [{"address": "tb1qmine", "amount": 0.08,
            "confirmations": 3, "label": "", "txids": []}],
            "error": null, "id": "satbridge"}"#;
        let unspent = r#"{"result": [
            {"txid": "aa", "vout": 0, "address": "tb1qmine", "amount": 0.05,
             "confirmations": 3, "spendable": false, "solvable": false, "safe": true},
            {"txid": "bb", "vout": 1, "address": "tb1qmine", "amount": 0.0,
             "confirmations": 1, "spendable": false, "solvable": false, "safe": true}
        ], "error": null, "id": "satbridge"}"#;
        let server = crate::testutil::spawn_stub(vec![
            ("listreceivedbyaddress".to_string(), 200, received.to_string()),
            ("listunspent".to_string(), 200, unspent.to_string()),
        ])
        .await;
        let provider = NodeWalletProvider::new(
            server.base_url.as_str(),
            None,
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let utxos = provider.get_utxos(&["tb1qmine".into()]).await.unwrap();

        // The zero-amount entry is dropped at the boundary.
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].txid, "aa");
        assert_eq!(utxos[0].value, 5_000_000);
        assert_eq!(server.requests().await.len(), 2);
    }

    #[test]
    fn rpc_error_surfaces_code_and_message() {
        let raw = r#"{"result": null, "error": {"code": -27, "message": "Transaction already in block chain"}, "id": "satbridge"}"#;
        let envelope: RpcResponse<String> = serde_json::from_str(raw).unwrap();
        let error = envelope.error.unwrap();
        let walleterror = WalletError::Rpc {
            code: error.code,
            message: error.message,
        };
        assert!(walleterror.is_duplicate_broadcast());
    }
}
