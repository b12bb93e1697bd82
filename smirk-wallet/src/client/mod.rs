//! Abstract clients for the external collaborators.
//!
//! Transport lives outside this crate. The worker wires real HTTP
//! implementations to these traits; tests wire deterministic fakes. A
//! non-2xx or structurally invalid response must surface as
//! [`Error::RemoteFailure`](crate::Error::RemoteFailure) so callers can
//! treat it as retryable.

use async_trait::async_trait;
use common::asset::Asset;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// --- Electrum proxy (BTC / LTC) --- //

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryItem {
    pub txid: String,
    /// `None` while still in the mempool.
    pub height: Option<u64>,
    pub fee: Option<u64>,
}

#[async_trait]
pub trait ElectrumApi: Send + Sync {
    async fn get_utxos(&self, asset: Asset, address: &str) -> Result<Vec<Utxo>>;
    /// Recommended fee rate in sat/vB.
    async fn estimate_fee(&self, asset: Asset) -> Result<f64>;
    async fn get_history(
        &self,
        asset: Asset,
        address: &str,
    ) -> Result<Vec<HistoryItem>>;
    /// Returns the txid accepted by the network.
    async fn broadcast(&self, asset: Asset, tx_hex: &str) -> Result<String>;
}

// --- CryptoNote light-wallet server (XMR / WOW) --- //

/// One output the server claims belongs to us.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CnOutput {
    pub tx_hash: String,
    /// Transaction public key `R`, hex.
    pub tx_pub_key: String,
    /// Output index within its transaction.
    pub index: u64,
    /// Global RingCT output index, used for decoy dedup.
    pub global_index: u64,
    pub amount: u64,
    pub height: u64,
    /// Every key image recently seen on-chain that could spend this
    /// output. The server cannot know which (if any) is really ours;
    /// we recompute and compare client-side.
    #[serde(default)]
    pub spend_key_images: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnspentOutsResponse {
    pub outputs: Vec<CnOutput>,
    pub per_byte_fee: u64,
    /// Fee quantization mask.
    pub fee_mask: u64,
}

/// A decoy candidate from `get_random_outs`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RandomOutput {
    pub global_index: u64,
    pub public_key: String,
    pub rct: Option<String>,
}

/// The server's claimed-spent list from `get_address_info`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimedSpend {
    pub amount: u64,
    pub key_image: String,
    pub tx_pub_key: String,
    pub out_index: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddressInfo {
    pub total_received: u64,
    pub spent_outputs: Vec<ClaimedSpend>,
    pub scanned_height: u64,
}

#[async_trait]
pub trait LightWalletApi: Send + Sync {
    /// Login/register with a view-key proof; idempotent.
    async fn login(
        &self,
        asset: Asset,
        address: &str,
        view_key_hex: &str,
    ) -> Result<()>;
    async fn get_address_info(&self, asset: Asset) -> Result<AddressInfo>;
    async fn get_unspent_outs(&self, asset: Asset)
        -> Result<UnspentOutsResponse>;
    /// One ring's worth of decoy candidates. Called per input so the
    /// response stays under the server's size limit.
    async fn get_random_outs(
        &self,
        asset: Asset,
        count: usize,
    ) -> Result<Vec<RandomOutput>>;
    async fn submit_raw_tx(&self, asset: Asset, tx_hex: &str) -> Result<()>;
}

// --- Application backend (Grin ledger, tips, social lookup) --- //

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GrinOutputStatus {
    Unconfirmed,
    Unspent,
    Locked,
    Spent,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrinOutputRecord {
    pub id: String,
    pub key_id: String,
    /// BIP32-style child index of the blinding factor. Never reused.
    pub n_child: u32,
    pub amount: u64,
    pub commitment: String,
    pub is_coinbase: bool,
    pub block_height: Option<u64>,
    pub status: GrinOutputStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrinOutputsResponse {
    pub outputs: Vec<GrinOutputRecord>,
    /// The single source of truth for the next free child index.
    pub next_child_index: u32,
}

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GrinTxStatus {
    Pending,
    Signed,
    Finalized,
    Confirmed,
    Cancelled,
}

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GrinTxKind {
    Sent,
    Received,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrinTxRecord {
    pub slate_id: String,
    pub kind: GrinTxKind,
    pub amount: u64,
    pub fee: u64,
    pub status: GrinTxStatus,
    pub created_at: TimestampMs,
}

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TipStatus {
    Pending,
    Claimed,
    ClawedBack,
}

/// The backend's view of a tip: enough for the recipient to claim, no
/// plaintext key material.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipRegistration {
    pub tip_id: String,
    pub asset: Asset,
    pub amount: u64,
    pub tip_address: String,
    pub funding_txid: String,
    /// ECIES payload: `ephemeral_pub || ciphertext`.
    pub encrypted_tip_key: String,
    pub recipient_platform: String,
    pub recipient_username: String,
    pub status: TipStatus,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_fragment_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialProfile {
    pub platform: String,
    pub username: String,
    /// Long-term BTC public key, hex, compressed.
    pub btc_pubkey: String,
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    // Grin output ledger.
    async fn get_outputs(&self) -> Result<GrinOutputsResponse>;
    async fn lock_outputs(&self, slate_id: &str, ids: &[String]) -> Result<()>;
    async fn unlock_outputs(&self, slate_id: &str) -> Result<()>;
    async fn spend_outputs(&self, slate_id: &str) -> Result<()>;
    async fn record_output(&self, output: &GrinOutputRecord) -> Result<()>;
    async fn record_transaction(&self, tx: &GrinTxRecord) -> Result<()>;
    async fn update_transaction(
        &self,
        slate_id: &str,
        status: GrinTxStatus,
    ) -> Result<()>;
    async fn list_transactions(&self) -> Result<Vec<GrinTxRecord>>;
    async fn broadcast_grin_tx(&self, tx_json: &str) -> Result<()>;

    // Social tips.
    async fn lookup_social(
        &self,
        platform: &str,
        username: &str,
    ) -> Result<SocialProfile>;
    async fn register_tip(&self, tip: &TipRegistration) -> Result<()>;
    async fn get_tip(&self, tip_id: &str) -> Result<TipRegistration>;
    async fn update_tip_status(
        &self,
        tip_id: &str,
        status: TipStatus,
    ) -> Result<()>;
}
