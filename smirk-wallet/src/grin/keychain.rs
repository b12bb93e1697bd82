//! The Mimblewimble keychain seam.
//!
//! Blinding factors, Pedersen commitments, range proofs and aggregated
//! Schnorr signatures are the province of a dedicated primitive library
//! fed by the wallet mnemonic. The engine owns everything else: child
//! index allocation, output bookkeeping, slate assembly, the SRS/RSR
//! state machines and rollback. This trait is the boundary between the
//! two, shaped so the primitive can be replaced without touching any
//! engine code.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::slate::{Slate, SlateOutput};

/// A spendable output the sender is consuming, with the child index its
/// blinding factor derives from.
#[derive(Clone, Debug)]
pub struct OwnedInput {
    pub id: String,
    pub key_id: String,
    pub n_child: u32,
    pub amount: u64,
    pub commitment: String,
    pub is_coinbase: bool,
}

/// A to-be-created output at a fresh child index.
#[derive(Clone, Debug)]
pub struct NewOutput {
    pub key_id: String,
    pub n_child: u32,
    pub amount: u64,
}

/// The sender's secret material and public slate contributions.
pub struct SenderParts {
    pub sec_key: [u8; 32],
    pub sec_nonce: [u8; 32],
    pub public_blind_excess: String,
    pub public_nonce: String,
    /// Transaction offset, preserved verbatim into finalization.
    pub offset: String,
    pub change_output: Option<SlateOutput>,
    /// Present when the counterparty's nonce is already in the slate
    /// (invoice payment), allowing an immediate partial signature.
    pub part_sig: Option<String>,
}

impl Drop for SenderParts {
    fn drop(&mut self) {
        self.sec_key.zeroize();
        self.sec_nonce.zeroize();
    }
}

/// The receiving side's output and public contributions.
pub struct ReceiverParts {
    pub output: SlateOutput,
    pub public_blind_excess: String,
    pub public_nonce: String,
    /// Absent when initiating an invoice (nothing to co-sign yet).
    pub part_sig: Option<String>,
    /// Secret material, kept only for the invoice flow where the
    /// receiver signs later.
    pub sec_key: [u8; 32],
    pub sec_nonce: [u8; 32],
}

impl Drop for ReceiverParts {
    fn drop(&mut self) {
        self.sec_key.zeroize();
        self.sec_nonce.zeroize();
    }
}

/// Everything the sender must retain between emitting S1 and finalizing
/// at S3. The compact S2 response does not redundantly carry any of it.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrinSendContext {
    pub slate_id: String,
    /// Sender's blind-excess secret, hex.
    pub sec_key: String,
    /// Sender's nonce secret, hex.
    pub sec_nonce: String,
    pub input_ids: Vec<String>,
    /// Base64 of the full S1 slate as emitted.
    #[serde(default)]
    pub serialized_s1: Option<String>,
    /// The inputs as `{commitment, features}`, re-attached at S3.
    pub inputs: Vec<super::slate::SlateInput>,
    pub offset: String,
    #[serde(default)]
    pub change_output: Option<SlateOutput>,
}

impl Drop for GrinSendContext {
    fn drop(&mut self) {
        self.sec_key.zeroize();
        self.sec_nonce.zeroize();
    }
}

impl std::fmt::Debug for GrinSendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Avoid formatting the secret material.
        f.debug_struct("GrinSendContext")
            .field("slate_id", &self.slate_id)
            .field("input_ids", &self.input_ids)
            .field("has_s1", &self.serialized_s1.is_some())
            .field("has_change", &self.change_output.is_some())
            .finish_non_exhaustive()
    }
}

pub trait SlateKeychain: Send + Sync {
    /// Derive the wallet's extended key from the mnemonic. The engine
    /// caches the result in the unlocked state; this is the only method
    /// that sees the mnemonic.
    fn extended_key(&self, mnemonic: &str) -> Result<Vec<u8>, String>;

    /// Sender side of S1 (and I2 when `co_sign` is set): sum input
    /// blinds minus the change blind, sample nonce and offset, build the
    /// change commitment and proof.
    fn init_send(
        &self,
        extended_key: &[u8],
        slate: &Slate,
        inputs: &[OwnedInput],
        change: Option<&NewOutput>,
        co_sign: bool,
    ) -> Result<SenderParts, String>;

    /// Receiver side of S2 (and I1 when `co_sign` is false): create the
    /// output at the given child index with its proof.
    fn receive(
        &self,
        extended_key: &[u8],
        slate: &Slate,
        output: &NewOutput,
        co_sign: bool,
    ) -> Result<ReceiverParts, String>;

    /// A deferred partial signature over the (now complete) slate, from
    /// stored secret material.
    fn partial_sig(
        &self,
        extended_key: &[u8],
        slate: &Slate,
        sec_key: &[u8; 32],
        sec_nonce: &[u8; 32],
    ) -> Result<String, String>;

    /// Combine both partial signatures, build the kernel and return the
    /// broadcastable transaction JSON.
    fn finalize(&self, slate: &Slate) -> Result<String, String>;
}
