//! The pending-transaction ledger.
//!
//! Outgoing transactions sit here between broadcast and the moment the
//! chain service surfaces them, so displayed balances can subtract atoms
//! that are already spoken for. Entries expire lazily on read with a
//! per-asset TTL: the CryptoNote light-wallet server takes minutes to
//! pick up a broadcast, while UTXO mempool visibility is immediate
//! (TTL zero).

use common::asset::Asset;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{self, keys, KvStore};
use crate::Error;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTx {
    pub tx_hash: String,
    pub asset: Asset,
    /// Atoms sent to the recipient (excludes fee).
    pub amount: u64,
    pub fee: u64,
    pub timestamp: TimestampMs,
}

impl PendingTx {
    fn is_live(&self, now: TimestampMs) -> bool {
        now.ms_since(self.timestamp) < self.asset.pending_tx_ttl_ms()
    }
}

/// The persisted ledger. All methods read-modify-write within a single
/// async step; see the concurrency notes in the worker crate.
pub struct PendingLedger<'a> {
    store: &'a dyn KvStore,
}

impl<'a> PendingLedger<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self { store }
    }

    async fn load(&self) -> Result<Vec<PendingTx>, Error> {
        store::get_json(self.store, keys::PENDING_TXS)
            .await
            .map_err(Error::remote)
            .map(Option::unwrap_or_default)
    }

    async fn save(&self, txs: &[PendingTx]) -> Result<(), Error> {
        store::put_json(self.store, keys::PENDING_TXS, &txs.to_vec())
            .await
            .map_err(Error::remote)
    }

    pub async fn add(&self, tx: PendingTx) -> Result<(), Error> {
        let mut txs = self.load().await?;
        debug!(tx_hash = %tx.tx_hash, asset = %tx.asset, "pending tx added");
        txs.retain(|t| t.tx_hash != tx.tx_hash);
        txs.push(tx);
        self.save(&txs).await
    }

    /// Live pending txs for `asset`. Expired entries are dropped and the
    /// pruned ledger is written back.
    pub async fn list(&self, asset: Asset) -> Result<Vec<PendingTx>, Error> {
        let txs = self.load().await?;
        let now = TimestampMs::now();
        let live: Vec<PendingTx> =
            txs.iter().filter(|t| t.is_live(now)).cloned().collect();
        if live.len() != txs.len() {
            self.save(&live).await?;
        }
        Ok(live.into_iter().filter(|t| t.asset == asset).collect())
    }

    pub async fn remove(&self, tx_hash: &str) -> Result<(), Error> {
        let mut txs = self.load().await?;
        txs.retain(|t| t.tx_hash != tx_hash);
        self.save(&txs).await
    }

    /// Sum of outgoing atoms (amount + fee) still pending for `asset`.
    pub async fn pending_outgoing_sum(
        &self,
        asset: Asset,
    ) -> Result<u64, Error> {
        Ok(self
            .list(asset)
            .await?
            .iter()
            .map(|t| t.amount.saturating_add(t.fee))
            .sum())
    }
}
