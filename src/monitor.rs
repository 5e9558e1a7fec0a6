//! Background balance and chain-tip monitoring.
//!
//! A monitoring tick polls every known wallet and observes the chain tip.
//! One wallet failing to poll never aborts the tick; the failure is logged
//! and the remaining wallets are still polled. Height observations are
//! monotonic: a backend briefly answering with an older tip is ignored.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::Balance;
use crate::provider::BlockchainProvider;
use crate::push_indexer::AddressEvent;
use crate::wallet::WalletInfo;

/// Poll the balance of every wallet. Per-wallet failures come back as `Err`
/// entries, paired with the wallet they belong to.
pub async fn poll_balances(
    provider: &BlockchainProvider,
    wallets: &[WalletInfo],
) -> Vec<(WalletInfo, Result<Balance>)> {
    let mut results = Vec::with_capacity(wallets.len());
    for wallet in wallets {
        let balance = provider.get_balance(&wallet.address).await;
        if let Err(e) = &balance {
            log::warn!("Balance poll failed for {}: {}", wallet.address, e);
        }
        results.push((wallet.clone(), balance));
    }
    results
}

/// Remembers the highest chain tip seen so far.
#[derive(Debug, Default)]
pub struct HeightTracker {
    last: Option<u64>,
}

impl HeightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tip reading. Returns `Some(height)` when the tip advanced,
    /// `None` for repeats and stale readings.
    pub fn observe(&mut self, height: u64) -> Option<u64> {
        match self.last {
            Some(last) if height <= last => None,
            _ => {
                self.last = Some(height);
                Some(height)
            }
        }
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

/// Hand every push event to `handler` until the subscription ends. Returns
/// when the sending side closes, i.e. when the WebSocket task exits.
pub async fn drain_events(
    mut receiver: mpsc::Receiver<AddressEvent>,
    mut handler: impl FnMut(AddressEvent),
) {
    while let Some(event) = receiver.recv().await {
        handler(event);
    }
    log::info!("Subscription closed");
}

/// Run monitoring ticks forever at a fixed interval, logging balances and
/// tip advances.
pub async fn run(provider: &BlockchainProvider, wallets: &[WalletInfo], interval: Duration) {
    let mut tracker = HeightTracker::new();
    let mut ticks = tokio::time::interval(interval);
    loop {
        ticks.tick().await;

        match provider.get_block_height().await {
            Ok(height) => {
                if let Some(advanced) = tracker.observe(height) {
                    log::info!("Chain tip advanced to {}", advanced);
                }
            }
            Err(e) => log::warn!("Tip poll failed: {}", e),
        }

        for (wallet, balance) in poll_balances(provider, wallets).await {
            if let Ok(balance) = balance {
                log::info!(
                    "{}: confirmed {} sats, unconfirmed {} sats",
                    wallet.address,
                    balance.confirmed,
                    balance.unconfirmed
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_tracker_only_moves_forward() {
        let mut tracker = HeightTracker::new();
        assert_eq!(tracker.observe(100), Some(100));
        assert_eq!(tracker.observe(100), None);
        assert_eq!(tracker.observe(99), None);
        assert_eq!(tracker.last(), Some(100));
        assert_eq!(tracker.observe(101), Some(101));
    }

    #[tokio::test]
    async fn drain_runs_until_the_sender_goes_away() {
        let (sender, receiver) = mpsc::channel(4);
        for address in ["a", "b"] {
            sender
                .send(AddressEvent {
                    address: address.to_string(),
                    mempool: Vec::new(),
                    confirmed: Vec::new(),
                })
                .await
                .unwrap();
        }
        drop(sender);

        let mut seen = Vec::new();
        drain_events(receiver, |event| seen.push(event.address)).await;
        assert_eq!(seen, vec!["a", "b"]);
    }
}
