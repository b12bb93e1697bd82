//! The CryptoNote engine: client-side spent verification, coin
//! selection, decoy assembly and ring-signed sends for XMR / WOW.
//!
//! The light-wallet server scans the chain with our view key, but it
//! cannot be trusted about *spends*: per output it returns every key
//! image recently seen on-chain that might correspond to that output,
//! and we recompute the real key image locally. An
//! output counts as spent iff our computed image appears in the server's
//! candidate list or in the local recently-spent set.

pub mod signer;
pub mod spent;

use std::collections::HashSet;
use std::sync::Arc;

use common::asset::Asset;
use common::cn;
use common::time::TimestampMs;
use curve25519_dalek::scalar::Scalar;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::client::{ClaimedSpend, CnOutput, LightWalletApi, RandomOutput};
use crate::error::Result;
use crate::pending::{PendingLedger, PendingTx};
use crate::vault::Unlocked;
use crate::Error;

use self::signer::{Destination, RingCtSigner, SignRequest, SignedCnTx};
use self::spent::LocallySpentImages;

/// Rough serialized-size model for a 2-output RingCT transaction.
/// Conservative on purpose: overestimating the fee by a few atoms is
/// fine, underestimating gets the tx rejected as underpaying.
fn estimate_tx_size(num_inputs: usize, num_outputs: usize, ring_size: usize) -> u64 {
    const BASE: u64 = 600;
    const PER_OUTPUT: u64 = 500;
    let per_input = ring_size as u64 * 70 + 200;
    BASE + num_inputs as u64 * per_input + num_outputs as u64 * PER_OUTPUT
}

/// Round `fee` up to a multiple of the server's quantization mask.
fn quantize_fee(fee: u64, fee_mask: u64) -> u64 {
    if fee_mask <= 1 {
        return fee;
    }
    fee.div_ceil(fee_mask) * fee_mask
}

pub fn estimate_fee(
    num_inputs: usize,
    num_outputs: usize,
    ring_size: usize,
    per_byte_fee: u64,
    fee_mask: u64,
) -> u64 {
    let size = estimate_tx_size(num_inputs, num_outputs, ring_size);
    quantize_fee(size * per_byte_fee, fee_mask)
}

/// An output that survived the spent filter, with its computed key image
/// kept for local marking at broadcast time.
#[derive(Clone, Debug)]
pub struct VerifiedOutput {
    pub output: CnOutput,
    pub key_image: String,
}

#[derive(Clone, Debug, Default)]
pub struct SpentFilter {
    pub unspent: Vec<VerifiedOutput>,
    pub spent_sum: u64,
    pub total_sum: u64,
}

/// Recompute each output's key image and split the server's list into
/// unspent / spent. Pure; the scalars come in already parsed.
pub fn filter_spent(
    outputs: &[CnOutput],
    view: &Scalar,
    spend: &Scalar,
    locally_spent: &LocallySpentImages,
) -> Result<SpentFilter> {
    let mut filter = SpentFilter::default();
    for output in outputs {
        let tx_pub: [u8; 32] = hex::decode(&output.tx_pub_key)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| {
                Error::invalid_input("malformed tx public key from server")
            })?;
        let keys = cn::derive_output_keys(view, spend, &tx_pub, output.index)
            .map_err(|e| Error::VerificationFailed(e.to_string()))?;
        let key_image = hex::encode(keys.key_image);

        filter.total_sum += output.amount;
        let server_says_spent = output
            .spend_key_images
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(&key_image));
        if server_says_spent || locally_spent.contains(&key_image) {
            filter.spent_sum += output.amount;
        } else {
            filter.unspent.push(VerifiedOutput {
                output: output.clone(),
                key_image,
            });
        }
    }
    Ok(filter)
}

#[derive(Clone, Debug)]
pub struct CnBalance {
    pub total_received: u64,
    pub verified_spent: u64,
    /// `total_received - verified_spent`, floored at zero.
    pub balance: u64,
    /// The server's raw spend claims, passed along so a sandboxed caller
    /// can re-run the verification independently.
    pub spent_candidates: Vec<ClaimedSpend>,
}

#[derive(Clone, Debug)]
pub struct CnSendResult {
    pub tx_hash: String,
    pub fee: u64,
    pub amount: u64,
}

pub struct CnEngine {
    client: Arc<dyn LightWalletApi>,
    signer: Arc<dyn RingCtSigner>,
}

impl CnEngine {
    pub fn new(
        client: Arc<dyn LightWalletApi>,
        signer: Arc<dyn RingCtSigner>,
    ) -> Self {
        Self { client, signer }
    }

    fn scalars(
        &self,
        asset: Asset,
        unlocked: &Unlocked,
    ) -> Result<(Scalar, Scalar)> {
        let mut view_bytes = unlocked.view_key(asset)?;
        let mut spend_bytes = unlocked.scalar(asset)?;
        let view = common::ed25519::scalar(&view_bytes)
            .map_err(|_| Error::MissingKey(asset));
        let spend = common::ed25519::scalar(&spend_bytes)
            .map_err(|_| Error::MissingKey(asset));
        view_bytes.zeroize();
        spend_bytes.zeroize();
        Ok((view?, spend?))
    }

    /// The verified balance: what the server says we received, minus
    /// only the spends whose key images we reproduce ourselves.
    pub async fn verified_balance(
        &self,
        asset: Asset,
        unlocked: &Unlocked,
        locally_spent: &mut LocallySpentImages,
    ) -> Result<CnBalance> {
        let (view, spend) = self.scalars(asset, unlocked)?;
        let info = self.client.get_address_info(asset).await?;

        let mut verified_spent = 0u64;
        let mut confirmed_images: Vec<String> = Vec::new();
        for claimed in &info.spent_outputs {
            let tx_pub: [u8; 32] = match hex::decode(&claimed.tx_pub_key)
                .ok()
                .and_then(|v| v.try_into().ok())
            {
                Some(pk) => pk,
                None => continue, // a malformed claim is just not ours
            };
            let keys = match cn::derive_output_keys(
                &view,
                &spend,
                &tx_pub,
                claimed.out_index,
            ) {
                Ok(keys) => keys,
                Err(_) => continue,
            };
            if hex::encode(keys.key_image)
                .eq_ignore_ascii_case(&claimed.key_image)
            {
                verified_spent += claimed.amount;
                confirmed_images.push(claimed.key_image.to_lowercase());
            }
        }
        // Anything the server now reports on-chain no longer needs the
        // local shield.
        locally_spent.reconcile(confirmed_images.iter().map(String::as_str));

        Ok(CnBalance {
            total_received: info.total_received,
            verified_spent,
            balance: info.total_received.saturating_sub(verified_spent),
            spent_candidates: info.spent_outputs,
        })
    }

    async fn fetch_ring(
        &self,
        asset: Asset,
        real: &VerifiedOutput,
        ring_size: usize,
    ) -> Result<Vec<RandomOutput>> {
        // Fetch per input so the response stays within server limits;
        // ask for a couple extra to survive dedup against the real one.
        let candidates =
            self.client.get_random_outs(asset, ring_size + 2).await?;
        let mut seen = HashSet::new();
        seen.insert(real.output.global_index);
        let mut decoys: Vec<RandomOutput> = Vec::with_capacity(ring_size - 1);
        for candidate in candidates {
            if seen.insert(candidate.global_index) {
                decoys.push(candidate);
                if decoys.len() == ring_size - 1 {
                    break;
                }
            }
        }
        if decoys.len() < ring_size - 1 {
            return Err(Error::InsufficientDecoys);
        }
        Ok(decoys)
    }

    /// Assemble rings, sign, and submit. The shared tail of the send and
    /// sweep pipelines.
    #[allow(clippy::too_many_arguments)]
    async fn sign_and_submit(
        &self,
        asset: Asset,
        selected: Vec<VerifiedOutput>,
        destination: Destination,
        change_address: &str,
        per_byte_fee: u64,
        fee_mask: u64,
        view: &Scalar,
        spend: &Scalar,
        sweep: bool,
    ) -> Result<SignedCnTx> {
        let ring_size = asset.ring_size();
        let mut decoys = Vec::with_capacity(selected.len());
        for real in &selected {
            decoys.push(self.fetch_ring(asset, real, ring_size).await?);
        }
        let inputs: Vec<CnOutput> =
            selected.into_iter().map(|o| o.output).collect();

        let request = SignRequest {
            inputs,
            decoys,
            destinations: vec![destination],
            change_address: change_address.to_owned(),
            fee_per_byte: per_byte_fee,
            fee_mask,
            view_scalar: view.to_bytes(),
            spend_scalar: spend.to_bytes(),
            network: "mainnet",
            coin: asset,
            sweep,
        };
        let signed =
            self.signer.sign(request).map_err(Error::SigningFailed)?;

        if let Err(err) =
            self.client.submit_raw_tx(asset, &signed.tx_hex).await
        {
            warn!(%asset, %err, "cryptonote broadcast failed, rolling back");
            return Err(Error::BroadcastFailed(err.to_string()));
        }
        info!(%asset, tx_hash = %signed.tx_hash, fee = signed.fee,
              "cryptonote tx broadcast");
        Ok(signed)
    }

    /// Sweep everything controlled by an arbitrary (spend, view) pair:
    /// the tip-escrow claim and clawback path. Logs the escrow account
    /// into the light-wallet server first; no pending-ledger entry and
    /// no local key-image marking, since the escrow account is one-shot.
    pub async fn sweep_from_keys(
        &self,
        asset: Asset,
        spend_bytes: &[u8; 32],
        view_bytes: &[u8; 32],
        escrow_address: &str,
        recipient: &str,
    ) -> Result<CnSendResult> {
        let view = common::ed25519::scalar(view_bytes)
            .map_err(|e| Error::invalid_input(e.to_string()))?;
        let spend = common::ed25519::scalar(spend_bytes)
            .map_err(|e| Error::invalid_input(e.to_string()))?;

        self.client
            .login(asset, escrow_address, &hex::encode(view_bytes))
            .await?;
        let resp = self.client.get_unspent_outs(asset).await?;
        if resp.outputs.is_empty() {
            return Err(Error::NoUnspent);
        }
        let filter = filter_spent(
            &resp.outputs,
            &view,
            &spend,
            &LocallySpentImages::new(),
        )?;
        if filter.unspent.is_empty() {
            return Err(Error::AllSpent);
        }

        let selected = filter.unspent;
        let available: u64 =
            selected.iter().map(|o| o.output.amount).sum();
        let fee = estimate_fee(
            selected.len(),
            2,
            asset.ring_size(),
            resp.per_byte_fee,
            resp.fee_mask,
        );
        let buffer = std::cmp::max(fee / 1000, resp.fee_mask);
        let spendable = available
            .checked_sub(fee.saturating_add(buffer))
            .filter(|v| *v > 0)
            .ok_or(Error::BalanceBelowFee)?;

        let signed = self
            .sign_and_submit(
                asset,
                selected,
                Destination {
                    address: recipient.to_owned(),
                    amount: spendable,
                },
                escrow_address,
                resp.per_byte_fee,
                resp.fee_mask,
                &view,
                &spend,
                true,
            )
            .await?;
        Ok(CnSendResult {
            tx_hash: signed.tx_hash,
            fee: signed.fee,
            amount: spendable,
        })
    }

    /// The send pipeline: fetch, filter, select, fetch decoys, sign,
    /// broadcast. Broadcast failure rolls back: no key image is marked
    /// and no pending tx is recorded.
    #[allow(clippy::too_many_arguments)]
    pub async fn send(
        &self,
        asset: Asset,
        unlocked: &Unlocked,
        recipient: &str,
        amount: u64,
        sweep: bool,
        change_address: &str,
        pending: &PendingLedger<'_>,
        locally_spent: &mut LocallySpentImages,
    ) -> Result<CnSendResult> {
        // Fail early on a bad recipient; prefix mismatch is verification.
        common::address::decode_cn_address(
            recipient,
            asset.cn_address_prefix(),
        )?;

        let (view, spend) = self.scalars(asset, unlocked)?;
        let ring_size = asset.ring_size();

        let resp = self.client.get_unspent_outs(asset).await?;
        if resp.outputs.is_empty() {
            return Err(Error::NoUnspent);
        }
        let filter =
            filter_spent(&resp.outputs, &view, &spend, locally_spent)?;
        if filter.unspent.is_empty() {
            return Err(Error::AllSpent);
        }

        let mut candidates = filter.unspent;
        candidates.sort_by(|a, b| b.output.amount.cmp(&a.output.amount));
        let available: u64 =
            candidates.iter().map(|o| o.output.amount).sum();

        let (selected, _selection_fee, send_amount) = if sweep {
            let fee = estimate_fee(
                candidates.len(),
                2,
                ring_size,
                resp.per_byte_fee,
                resp.fee_mask,
            );
            // Extra buffer so rounding in the signer cannot push the
            // change below zero.
            let buffer = std::cmp::max(fee / 1000, resp.fee_mask);
            let spendable = available
                .checked_sub(fee.saturating_add(buffer))
                .ok_or(Error::BalanceBelowFee)?;
            if spendable == 0 {
                return Err(Error::BalanceBelowFee);
            }
            (candidates, fee, spendable)
        } else {
            if amount == 0 {
                return Err(Error::invalid_input("amount must be positive"));
            }
            let mut selected = Vec::new();
            let mut sum = 0u64;
            let mut fee = 0u64;
            let mut covered = false;
            for output in candidates {
                sum += output.output.amount;
                selected.push(output);
                fee = estimate_fee(
                    selected.len(),
                    2,
                    ring_size,
                    resp.per_byte_fee,
                    resp.fee_mask,
                );
                if sum >= amount.saturating_add(fee) {
                    covered = true;
                    break;
                }
            }
            if !covered {
                return Err(Error::InsufficientFunds {
                    needed: amount.saturating_add(fee),
                    available,
                });
            }
            (selected, fee, amount)
        };

        let key_images: Vec<String> =
            selected.iter().map(|o| o.key_image.clone()).collect();
        let signed = self
            .sign_and_submit(
                asset,
                selected,
                Destination {
                    address: recipient.to_owned(),
                    amount: send_amount,
                },
                change_address,
                resp.per_byte_fee,
                resp.fee_mask,
                &view,
                &spend,
                sweep,
            )
            .await?;
        locally_spent.mark(key_images);
        pending
            .add(PendingTx {
                tx_hash: signed.tx_hash.clone(),
                asset,
                amount: send_amount,
                fee: signed.fee,
                timestamp: TimestampMs::now(),
            })
            .await?;

        Ok(CnSendResult {
            tx_hash: signed.tx_hash,
            fee: signed.fee,
            amount: send_amount,
        })
    }
}
