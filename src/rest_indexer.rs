//! Stateless REST indexer provider (Esplora-style).
//!
//! Covers both indexer flavors we talk to, Blockstream's Esplora and
//! mempool.space, which share the wire shape but differ in how they report
//! a never-seen address. Both 404 and 400 on the address endpoint are treated
//! as "no history", contributing zero UTXOs instead of failing the query.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WalletError};
use crate::model::{Utxo, UtxoStatus};

/// Which indexer dialect the endpoint speaks. Used for log context; the
/// not-found convention is the union of both (404 from mempool.space, 400
/// with a plain-text body from Esplora).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerFlavor {
    Blockstream,
    Mempool,
}

impl std::fmt::Display for IndexerFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IndexerFlavor::Blockstream => "blockstream",
            IndexerFlavor::Mempool => "mempool",
        })
    }
}

/// UTXO entry as served by `GET /address/{addr}/utxo`.
#[derive(Debug, Deserialize)]
struct IndexerUtxo {
    txid: String,
    vout: u32,
    value: u64,
    #[serde(default)]
    status: IndexerUtxoStatus,
}

#[derive(Debug, Deserialize, Default)]
struct IndexerUtxoStatus {
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
}

impl From<IndexerUtxo> for Utxo {
    fn from(raw: IndexerUtxo) -> Self {
        Utxo {
            txid: raw.txid,
            vout: raw.vout,
            value: raw.value,
            status: UtxoStatus {
                confirmed: raw.status.confirmed,
                // Indexers echo a height of 0 for mempool entries; normalise
                // to "unknown" so the model invariant holds.
                block_height: if raw.status.confirmed {
                    raw.status.block_height
                } else {
                    None
                },
            },
        }
    }
}

pub struct RestIndexerProvider {
    client: reqwest::Client,
    api_url: String,
    flavor: IndexerFlavor,
}

impl RestIndexerProvider {
    pub fn new(api_url: impl Into<String>, flavor: IndexerFlavor, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(WalletError::from_reqwest)?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            flavor,
        })
    }

    pub fn flavor(&self) -> IndexerFlavor {
        self.flavor
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// One HTTP call per address, contributions concatenated. A 404/400 on an
    /// address means "no history there" and is skipped; any other failure
    /// aborts the whole query.
    pub async fn get_utxos(&self, addresses: &[String]) -> Result<Vec<Utxo>> {
        let mut utxos = Vec::new();
        for address in addresses {
            let url = format!("{}/address/{}/utxo", self.api_url, address);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(WalletError::from_reqwest)?;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND
                || status == reqwest::StatusCode::BAD_REQUEST
            {
                log::warn!(
                    "[{}] No UTXOs found for address {} (HTTP {})",
                    self.flavor,
                    address,
                    status.as_u16()
                );
                continue;
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(WalletError::Backend {
                    status: status.as_u16(),
                    message,
                });
            }

            let entries: Vec<IndexerUtxo> =
                response.json().await.map_err(WalletError::from_reqwest)?;
            utxos.extend(entries.into_iter().map(Utxo::from).filter(|utxo| {
                if utxo.value == 0 {
                    log::debug!(
                        "[{}] Dropping zero-value entry {}:{}",
                        self.flavor,
                        utxo.txid,
                        utxo.vout
                    );
                    return false;
                }
                true
            }));
        }
        Ok(utxos)
    }

    pub async fn get_tx_hex(&self, txid: &str) -> Result<String> {
        let url = format!("{}/tx/{}/hex", self.api_url, txid);
        let response = self.expect_success(self.client.get(&url)).await?;
        Ok(response.trim().to_string())
    }

    /// POST the raw transaction hex; the indexer answers with the txid.
    pub async fn broadcast_tx(&self, raw_hex: &str) -> Result<String> {
        let url = format!("{}/tx", self.api_url);
        let response = self
            .expect_success(self.client.post(&url).body(raw_hex.to_string()))
            .await?;
        Ok(response.trim().to_string())
    }

    pub async fn get_block_height(&self) -> Result<u64> {
        let url = format!("{}/blocks/tip/height", self.api_url);
        let body = self.expect_success(self.client.get(&url)).await?;
        body.trim()
            .parse()
            .map_err(|_| WalletError::Encoding(format!("bad tip height '{}'", body.trim())))
    }

    /// Index backends track every address; registering one is a no-op.
    pub fn import_wallet(&self, address: &str) {
        log::debug!(
            "[{}] import_wallet({}) is a no-op for index backends",
            self.flavor,
            address
        );
    }

    async fn expect_success(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = request.send().await.map_err(WalletError::from_reqwest)?;
        let status = response.status();
        let body = response.text().await.map_err(WalletError::from_reqwest)?;
        if !status.is_success() {
            return Err(WalletError::Backend {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexer_utxo_maps_into_model() {
        let raw = r#"[
            {"txid": "aa", "vout": 1, "value": 5000000,
             "status": {"confirmed": true, "block_height": 812345,
                        "block_hash": "00", "block_time": 1700000000}},
            {"txid": "bb", "vout": 0, "value": 3000000,
             "status": {"confirmed": false, "block_height": 0}}
        ]"#;
        let entries: Vec<IndexerUtxo> = serde_json::from_str(raw).unwrap();
        let utxos: Vec<Utxo> = entries.into_iter().map(Utxo::from).collect();

        assert_eq!(utxos[0].value, 5_000_000);
        assert_eq!(utxos[0].status.block_height, Some(812_345));
        assert!(!utxos[1].status.confirmed);
        // Height 0 on an unconfirmed entry normalises to unknown.
        assert_eq!(utxos[1].status.block_height, None);
    }

    #[test]
    fn missing_status_defaults_to_unconfirmed() {
        let raw = r#"[{"txid": "cc", "vout": 2, "value": 1200}]"#;
        let entries: Vec<IndexerUtxo> = serde_json::from_str(raw).unwrap();
        let utxo = Utxo::from(entries.into_iter().next().unwrap());
        assert!(!utxo.status.confirmed);
        assert_eq!(utxo.status.block_height, None);
    }

    #[tokio::test]
    async fn not_found_addresses_contribute_nothing() {
        let funded = r#"[
            {"txid": "aa", "vout": 0, "value": 1200,
             "status": {"confirmed": true, "block_height": 5}},
            {"txid": "bb", "vout": 1, "value": 0,
             "status": {"confirmed": true, "block_height": 5}}
        ]"#;
        let server = crate::testutil::spawn_stub(vec![
            ("/address/tb1qempty/utxo".to_string(), 404, String::new()),
            ("/address/tb1qfunded/utxo".to_string(), 200, funded.to_string()),
        ])
        .await;
        let provider = RestIndexerProvider::new(
            server.base_url.as_str(),
            IndexerFlavor::Mempool,
            Duration::from_secs(5),
        )
        .unwrap();

        let utxos = provider
            .get_utxos(&["tb1qempty".into(), "tb1qfunded".into()])
            .await
            .unwrap();

        // The 404 address is skipped and the zero-value entry is dropped.
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].txid, "aa");
        assert_eq!(server.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn backend_failures_abort_the_whole_query() {
        let server = crate::testutil::spawn_stub(vec![(
            "/address/".to_string(),
            500,
            "indexer down".to_string(),
        )])
        .await;
        let provider = RestIndexerProvider::new(
            server.base_url.as_str(),
            IndexerFlavor::Blockstream,
            Duration::from_secs(5),
        )
        .unwrap();

        match provider.get_utxos(&["tb1qany".into()]).await {
            Err(WalletError::Backend { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "indexer down");
            }
            other => panic!("expected Backend error, got {:?}", other.map(|_| ())),
        }
    }
}
