//! Push-capable indexer provider (mempool.space dialect).
//!
//! Pull queries behave exactly like the plain REST indexer. On top of that,
//! `subscribe` opens a persistent WebSocket, registers the addresses to
//! track, and forwards each inbound activity event through a bounded
//! `tokio::sync::mpsc` channel.
//!
//! Overflow policy: **drop newest**. When the local channel is full the
//! incoming event is discarded with a warning rather than blocking the
//! socket reader; a stalled consumer therefore loses events instead of
//! stalling the subscription. Pull queries and push events share no ordering
//! guarantee; an event may announce a UTXO a subsequent `get_utxos` call
//! does not see yet.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Result, WalletError};
use crate::model::Utxo;
use crate::rest_indexer::{IndexerFlavor, RestIndexerProvider};

/// Default capacity of the subscription channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Activity for one tracked address, one event per push frame per address.
#[derive(Debug, Clone)]
pub struct AddressEvent {
    pub address: String,
    /// Transactions newly seen in the mempool, as sent by the indexer.
    pub mempool: Vec<serde_json::Value>,
    /// Transactions newly confirmed.
    pub confirmed: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
struct AddressActivity {
    #[serde(default)]
    mempool: Vec<serde_json::Value>,
    #[serde(default)]
    confirmed: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "multi-address-transactions")]
    multi_address_transactions: Option<BTreeMap<String, AddressActivity>>,
}

/// Parse one inbound WebSocket frame into per-address events. Frames without
/// the address-transactions key (heights, fee updates, ...) produce nothing.
fn parse_events(payload: &str) -> Vec<AddressEvent> {
    let frame: InboundFrame = match serde_json::from_str(payload) {
        Ok(frame) => frame,
        Err(err) => {
            log::debug!("Ignoring unparseable push frame: {}", err);
            return Vec::new();
        }
    };
    let Some(per_address) = frame.multi_address_transactions else {
        return Vec::new();
    };
    per_address
        .into_iter()
        .map(|(address, activity)| AddressEvent {
            address,
            mempool: activity.mempool,
            confirmed: activity.confirmed,
        })
        .collect()
}

/// Deliver one event without blocking the socket reader. Returns false when
/// the event was dropped (channel full) or the receiver is gone.
fn dispatch_event(event: AddressEvent, sender: &mpsc::Sender<AddressEvent>) -> bool {
    match sender.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            log::warn!(
                "Subscription channel full, dropping event for address {}",
                event.address
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

pub struct PushIndexerProvider {
    rest: RestIndexerProvider,
    ws_url: Option<String>,
}

impl PushIndexerProvider {
    pub fn new(
        api_url: impl Into<String>,
        ws_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            rest: RestIndexerProvider::new(api_url, IndexerFlavor::Mempool, timeout)?,
            ws_url,
        })
    }

    // Pull-based queries are plain REST, same semantics as the REST indexer.

    pub async fn get_utxos(&self, addresses: &[String]) -> Result<Vec<Utxo>> {
        self.rest.get_utxos(addresses).await
    }

    pub async fn get_tx_hex(&self, txid: &str) -> Result<String> {
        self.rest.get_tx_hex(txid).await
    }

    pub async fn broadcast_tx(&self, raw_hex: &str) -> Result<String> {
        self.rest.broadcast_tx(raw_hex).await
    }

    pub async fn get_block_height(&self) -> Result<u64> {
        self.rest.get_block_height().await
    }

    pub fn import_wallet(&self, address: &str) {
        self.rest.import_wallet(address);
    }

    /// Open the live subscription. The returned receiver yields one
    /// `AddressEvent` per tracked address per push frame until the remote
    /// closes the socket or the receiver is dropped. The reader task is
    /// spawned onto the ambient tokio runtime, so this must be called from
    /// within one; the connect error path surfaces as a closed channel.
    pub async fn subscribe(
        &self,
        addresses: Vec<String>,
        capacity: usize,
    ) -> Result<mpsc::Receiver<AddressEvent>> {
        let ws_url = self
            .ws_url
            .clone()
            .ok_or_else(|| WalletError::Subscription("no ws_url configured".into()))?;
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        tokio::spawn(async move {
            let (socket, _) = match connect_async(ws_url.as_str()).await {
                Ok(connection) => connection,
                Err(err) => {
                    log::error!("Push subscription connect failed: {}", err);
                    return;
                }
            };
            let (mut write, mut read) = socket.split();

            let track = json!({ "track-addresses": &addresses }).to_string();
            if let Err(err) = write.send(Message::text(track)).await {
                log::error!("Failed to send track-addresses message: {}", err);
                return;
            }
            log::info!("Push subscription opened for {} address(es)", addresses.len());

            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(payload)) => {
                        for event in parse_events(payload.as_str()) {
                            if sender.is_closed() {
                                return;
                            }
                            dispatch_event(event, &sender);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("Push subscription closed by remote");
                        break;
                    }
                    Ok(_) => {} // ping/pong/binary
                    Err(err) => {
                        log::error!("Push subscription stream error: {}", err);
                        break;
                    }
                }
            }
        });

        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = r#"{
        "multi-address-transactions": {
            "tb1qsource": {
                "mempool": [{"txid": "aa", "fee": 141}],
                "confirmed": [{"txid": "bb", "status": {"confirmed": true}}]
            },
            "tb1qother": {
                "mempool": [],
                "confirmed": [{"txid": "cc"}]
            }
        }
    }"#;

    #[test]
    fn parses_multi_address_frame_into_events() {
        let mut events = parse_events(FRAME);
        events.sort_by(|a, b| a.address.cmp(&b.address));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].address, "tb1qother");
        assert!(events[0].mempool.is_empty());
        assert_eq!(events[0].confirmed.len(), 1);
        assert_eq!(events[1].address, "tb1qsource");
        assert_eq!(events[1].mempool[0]["txid"], "aa");
    }

    #[test]
    fn non_address_frames_produce_no_events() {
        assert!(parse_events(r#"{"block": {"height": 812345}}"#).is_empty());
        assert!(parse_events("not json").is_empty());
    }

    #[tokio::test]
    async fn full_channel_drops_newest_event() {
        let (sender, mut receiver) = mpsc::channel(1);
        let first = AddressEvent {
            address: "tb1qfirst".into(),
            mempool: Vec::new(),
            confirmed: Vec::new(),
        };
        let second = AddressEvent {
            address: "tb1qsecond".into(),
            mempool: Vec::new(),
            confirmed: Vec::new(),
        };

        assert!(dispatch_event(first, &sender));
        // Channel is full: the newer event is dropped, the older one kept.
        assert!(!dispatch_event(second, &sender));

        let delivered = receiver.recv().await.unwrap();
        assert_eq!(delivered.address, "tb1qfirst");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_without_ws_url_is_an_error() {
        let provider =
            PushIndexerProvider::new("http://127.0.0.1:1", None, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            provider.subscribe(vec!["tb1qany".into()], 4).await,
            Err(WalletError::Subscription(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_socket_surfaces_as_a_closed_channel() {
        let provider = PushIndexerProvider::new(
            "http://127.0.0.1:1",
            Some("ws://127.0.0.1:1".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        let mut receiver = provider.subscribe(vec!["tb1qany".into()], 4).await.unwrap();
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_receiver_is_reported() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let event = AddressEvent {
            address: "tb1qgone".into(),
            mempool: Vec::new(),
            confirmed: Vec::new(),
        };
        assert!(!dispatch_event(event, &sender));
    }
}
