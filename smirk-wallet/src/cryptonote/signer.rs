//! The RingCT signing seam.
//!
//! The engine assembles everything a RingCT transaction needs (real
//! inputs, per-input decoy rings, destinations, fee parameters and the
//! two scalars) and hands it to a [`RingCtSigner`]. The trait boundary
//! is deliberately exactly this payload so the implementation can be
//! swapped (reference signer, native CLSAG, hardware) without touching
//! any caller.

use common::asset::Asset;
use zeroize::Zeroize;

use crate::client::{CnOutput, RandomOutput};

#[derive(Clone, Debug)]
pub struct Destination {
    pub address: String,
    pub amount: u64,
}

pub struct SignRequest {
    /// The real outputs being spent.
    pub inputs: Vec<CnOutput>,
    /// Decoy candidates, one ring's worth per input.
    pub decoys: Vec<Vec<RandomOutput>>,
    pub destinations: Vec<Destination>,
    pub change_address: String,
    pub fee_per_byte: u64,
    pub fee_mask: u64,
    pub view_scalar: [u8; 32],
    pub spend_scalar: [u8; 32],
    /// "mainnet"; kept explicit so a future testnet build cannot sign
    /// for the wrong network silently.
    pub network: &'static str,
    pub coin: Asset,
    pub sweep: bool,
}

impl Drop for SignRequest {
    fn drop(&mut self) {
        self.view_scalar.zeroize();
        self.spend_scalar.zeroize();
    }
}

impl std::fmt::Debug for SignRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Avoid formatting the scalars.
        f.debug_struct("SignRequest")
            .field("inputs", &self.inputs.len())
            .field("destinations", &self.destinations.len())
            .field("coin", &self.coin)
            .field("sweep", &self.sweep)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct SignedCnTx {
    pub tx_hex: String,
    pub tx_hash: String,
    pub fee: u64,
}

pub trait RingCtSigner: Send + Sync {
    fn sign(&self, request: SignRequest) -> Result<SignedCnTx, String>;
}
