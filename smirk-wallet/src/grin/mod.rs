//! The Mimblewimble engine: interactive Grin sends.
//!
//! A Grin transaction needs both parties. The SRS flow:
//!
//! ```text
//!         S1 built                 S2 built              S3 finalized
//! sender ----------> recipient -----------> sender ----------------> chain
//!                              (signed)             (sigs combined)
//! ```
//!
//! plus the inverted RSR invoice flow (I1 recipient, I2 payer, I3
//! recipient finalizes). The backend's output ledger is the single
//! source of truth for `next_child_index`; a child index is consumed the
//! moment an output is recorded against it, even if the send is later
//! cancelled: a reused index would reproduce a Pedersen
//! commitment and be rejected by the network as a double-spend.
//!
//! Crypto (blinds, proofs, aggsig) lives behind
//! [`keychain::SlateKeychain`]; this module owns the state machine,
//! bookkeeping and rollback.

pub mod keychain;
pub mod slate;
pub mod slatepack;

use std::sync::Arc;

use common::rng::Crng;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::{
    BackendApi, GrinOutputRecord, GrinOutputStatus, GrinTxKind, GrinTxRecord,
    GrinTxStatus,
};
use crate::error::Result;
use crate::store::{self, keys, KvStore};
use crate::vault::Unlocked;
use crate::Error;

use self::keychain::{
    GrinSendContext, NewOutput, OwnedInput, SlateKeychain,
};
use self::slate::{
    new_slate_id, OutputFeatures, ParticipantData, Slate, SlateInput,
    SlateState,
};

/// Base fee per transaction weight unit, in nanogrin.
pub const BASE_FEE_NANOGRIN: u64 = 500_000;

/// Key id under which this wallet derives output blinds; the child index
/// is the varying part.
const WALLET_KEY_ID: &str = "m/0/0";

/// `weight = max(1, 4*outputs + kernels - inputs)`, fee = weight * base.
pub fn tx_fee(num_inputs: usize, num_outputs: usize, num_kernels: usize) -> u64 {
    let positive = 4 * num_outputs as i64 + num_kernels as i64;
    let weight = (positive - num_inputs as i64).max(1) as u64;
    weight * BASE_FEE_NANOGRIN
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrinBalance {
    pub confirmed: u64,
    pub pending: u64,
    pub total: u64,
}

/// A recorded incoming slate awaiting chain confirmation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReceive {
    pub slate_id: String,
    pub amount: u64,
    pub n_child: u32,
    pub created_at: TimestampMs,
}

/// The recipient's retained secrets for an outstanding invoice.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInvoice {
    pub slate_id: String,
    pub sec_key: String,
    pub sec_nonce: String,
    pub amount: u64,
}

pub struct GrinEngine {
    backend: Arc<dyn BackendApi>,
    keychain: Arc<dyn SlateKeychain>,
}

impl GrinEngine {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        keychain: Arc<dyn SlateKeychain>,
    ) -> Self {
        Self { backend, keychain }
    }

    /// The keychain's extended key, derived from the mnemonic on first
    /// use and cached in the unlocked state afterwards.
    fn extended(&self, unlocked: &Unlocked) -> Result<Vec<u8>> {
        if let Some(cached) = unlocked.cached_grin_extended() {
            return Ok(cached);
        }
        let ext = self
            .keychain
            .extended_key(unlocked.mnemonic())
            .map_err(Error::SigningFailed)?;
        unlocked.cache_grin_extended(ext.clone());
        Ok(ext)
    }

    pub async fn balance(&self) -> Result<GrinBalance> {
        let outs = self.backend.get_outputs().await?;
        let confirmed: u64 = outs
            .outputs
            .iter()
            .filter(|o| {
                o.status == GrinOutputStatus::Unspent
                    && o.block_height.is_some()
            })
            .map(|o| o.amount)
            .sum();
        let txs = self.backend.list_transactions().await?;
        let pending: u64 = txs
            .iter()
            .filter(|t| {
                matches!(
                    t.status,
                    GrinTxStatus::Pending
                        | GrinTxStatus::Signed
                        | GrinTxStatus::Finalized
                )
            })
            .map(|t| t.amount)
            .sum();
        Ok(GrinBalance {
            confirmed,
            pending,
            total: confirmed + pending,
        })
    }

    /// Warm-up on unlock: derive the keychain and report the balance.
    pub async fn init_wallet(&self, unlocked: &Unlocked) -> Result<GrinBalance> {
        self.extended(unlocked)?;
        self.balance().await
    }

    fn spendable(outputs: &[GrinOutputRecord]) -> Vec<OwnedInput> {
        outputs
            .iter()
            .filter(|o| o.status == GrinOutputStatus::Unspent)
            .map(|o| OwnedInput {
                id: o.id.clone(),
                key_id: o.key_id.clone(),
                n_child: o.n_child,
                amount: o.amount,
                commitment: o.commitment.clone(),
                is_coinbase: o.is_coinbase,
            })
            .collect()
    }

    fn select_inputs(
        mut candidates: Vec<OwnedInput>,
        amount: u64,
        fee_override: Option<u64>,
    ) -> Result<(Vec<OwnedInput>, u64)> {
        if candidates.is_empty() {
            return Err(Error::NoUtxos);
        }
        let available: u64 = candidates.iter().map(|i| i.amount).sum();
        candidates.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut selected = Vec::new();
        let mut sum = 0u64;
        let mut fee = 0u64;
        for input in candidates {
            sum += input.amount;
            selected.push(input);
            // Recipient output + (assumed) change output + one kernel.
            fee = fee_override
                .unwrap_or_else(|| tx_fee(selected.len(), 2, 1));
            if sum >= amount.saturating_add(fee) {
                return Ok((selected, fee));
            }
        }
        Err(Error::InsufficientFunds {
            needed: amount.saturating_add(fee),
            available,
        })
    }

    fn slate_inputs(inputs: &[OwnedInput]) -> Vec<SlateInput> {
        inputs
            .iter()
            .map(|i| SlateInput {
                commitment: i.commitment.clone(),
                features: if i.is_coinbase {
                    OutputFeatures::Coinbase
                } else {
                    OutputFeatures::Plain
                },
            })
            .collect()
    }

    async fn record_change_output(
        &self,
        slate_id: &str,
        n_child: u32,
        amount: u64,
        commitment: &str,
    ) {
        // The record consumes the child index durably. A failure here is
        // logged and suppressed: the primary action (the signature)
        // already succeeded.
        let record = GrinOutputRecord {
            id: format!("{slate_id}:change"),
            key_id: WALLET_KEY_ID.to_owned(),
            n_child,
            amount,
            commitment: commitment.to_owned(),
            is_coinbase: false,
            block_height: None,
            status: GrinOutputStatus::Unconfirmed,
        };
        if let Err(err) = self.backend.record_output(&record).await {
            warn!(%slate_id, %err, "failed to record grin change output");
        }
    }

    /// S1: select inputs, allocate the change child index, partially
    /// build the slate, lock the inputs, and hand back the armored
    /// slatepack plus the context required at S3.
    pub async fn create_send(
        &self,
        unlocked: &Unlocked,
        rng: &mut impl Crng,
        amount: u64,
        fee_override: Option<u64>,
    ) -> Result<(String, GrinSendContext)> {
        if amount == 0 {
            return Err(Error::invalid_input("amount must be positive"));
        }
        let ext = self.extended(unlocked)?;
        let resp = self.backend.get_outputs().await?;

        let (selected, fee) = Self::select_inputs(
            Self::spendable(&resp.outputs),
            amount,
            fee_override,
        )?;
        let input_sum: u64 = selected.iter().map(|i| i.amount).sum();
        let change_amount = input_sum - amount - fee;
        let change = (change_amount > 0).then(|| NewOutput {
            key_id: WALLET_KEY_ID.to_owned(),
            // Authoritative, strictly monotonic; never reused.
            n_child: resp.next_child_index,
            amount: change_amount,
        });

        let slate_id = new_slate_id(rng);
        let mut slate =
            Slate::new(slate_id.clone(), SlateState::S1, amount, fee);

        let parts = self
            .keychain
            .init_send(&ext, &slate, &selected, change.as_ref(), false)
            .map_err(Error::SigningFailed)?;

        slate.offset = parts.offset.clone();
        slate.inputs = Self::slate_inputs(&selected);
        if let Some(out) = parts.change_output.clone() {
            slate.outputs.push(out);
        }
        slate.participant_data.push(ParticipantData {
            id: 0,
            public_blind_excess: parts.public_blind_excess.clone(),
            public_nonce: parts.public_nonce.clone(),
            part_sig: None,
        });

        let input_ids: Vec<String> =
            selected.iter().map(|i| i.id.clone()).collect();
        self.backend.lock_outputs(&slate_id, &input_ids).await?;

        if let (Some(new_output), Some(built)) =
            (&change, &parts.change_output)
        {
            self.record_change_output(
                &slate_id,
                new_output.n_child,
                new_output.amount,
                &built.commitment,
            )
            .await;
        }
        let tx_record = GrinTxRecord {
            slate_id: slate_id.clone(),
            kind: GrinTxKind::Sent,
            amount,
            fee,
            status: GrinTxStatus::Pending,
            created_at: TimestampMs::now(),
        };
        if let Err(err) = self.backend.record_transaction(&tx_record).await {
            warn!(%slate_id, %err, "failed to record grin send");
        }

        let context = GrinSendContext {
            slate_id: slate_id.clone(),
            sec_key: hex::encode(parts.sec_key),
            sec_nonce: hex::encode(parts.sec_nonce),
            input_ids,
            serialized_s1: Some(slate.to_base64()),
            inputs: slate.inputs.clone(),
            offset: parts.offset.clone(),
            change_output: parts.change_output.clone(),
        };
        info!(%slate_id, amount, fee, "grin send initiated (S1)");
        Ok((slatepack::armor(&slate), context))
    }

    /// S2: receive someone else's S1, add our output at the next free
    /// child index, co-sign, and emit the compact response (no sender
    /// inputs or change travel back).
    pub async fn receive(
        &self,
        unlocked: &Unlocked,
        store: &dyn KvStore,
        armored: &str,
    ) -> Result<String> {
        let incoming = slatepack::unarmor(armored)?;
        if incoming.state != SlateState::S1 {
            return Err(Error::invalid_input(
                "expected an S1 slatepack to sign",
            ));
        }
        if incoming.participant(0).is_none() {
            return Err(Error::invalid_input("slate has no sender data"));
        }

        let ext = self.extended(unlocked)?;
        let resp = self.backend.get_outputs().await?;
        let new_output = NewOutput {
            key_id: WALLET_KEY_ID.to_owned(),
            n_child: resp.next_child_index,
            amount: incoming.amount,
        };

        let parts = self
            .keychain
            .receive(&ext, &incoming, &new_output, true)
            .map_err(Error::SigningFailed)?;
        let part_sig = parts.part_sig.clone().ok_or_else(|| {
            Error::SigningFailed("receiver produced no partial sig".into())
        })?;

        let mut response = incoming.clone();
        response.state = SlateState::S2;
        // Compact form: only our output and the participant entries.
        response.inputs.clear();
        response.outputs = vec![parts.output.clone()];
        response.participant_data.push(ParticipantData {
            id: 1,
            public_blind_excess: parts.public_blind_excess.clone(),
            public_nonce: parts.public_nonce.clone(),
            part_sig: Some(part_sig),
        });

        let record = GrinOutputRecord {
            id: format!("{}:recv", incoming.id),
            key_id: new_output.key_id.clone(),
            n_child: new_output.n_child,
            amount: incoming.amount,
            commitment: parts.output.commitment.clone(),
            is_coinbase: false,
            block_height: None,
            status: GrinOutputStatus::Unconfirmed,
        };
        if let Err(err) = self.backend.record_output(&record).await {
            warn!(slate_id = %incoming.id, %err,
                  "failed to record received grin output");
        }
        let tx_record = GrinTxRecord {
            slate_id: incoming.id.clone(),
            kind: GrinTxKind::Received,
            amount: incoming.amount,
            fee: incoming.fee,
            status: GrinTxStatus::Signed,
            created_at: TimestampMs::now(),
        };
        if let Err(err) = self.backend.record_transaction(&tx_record).await {
            warn!(slate_id = %incoming.id, %err,
                  "failed to record grin receive");
        }

        let mut receives: Vec<PendingReceive> =
            store::get_json(store, keys::GRIN_PENDING_RECEIVE)
                .await
                .map_err(Error::remote)?
                .unwrap_or_default();
        receives.push(PendingReceive {
            slate_id: incoming.id.clone(),
            amount: incoming.amount,
            n_child: new_output.n_child,
            created_at: TimestampMs::now(),
        });
        store::put_json(store, keys::GRIN_PENDING_RECEIVE, &receives)
            .await
            .map_err(Error::remote)?;

        info!(slate_id = %incoming.id, amount = incoming.amount,
              "grin receive signed (S2)");
        Ok(slatepack::armor(&response))
    }

    /// S3: reconstruct the full slate from the stored S1 context plus
    /// the counterparty's compact S2, add the final signature, build the
    /// kernel and broadcast. Broadcast failure unlocks the inputs.
    pub async fn finalize_and_broadcast(
        &self,
        unlocked: &Unlocked,
        armored_s2: &str,
        context: GrinSendContext,
    ) -> Result<String> {
        let serialized_s1 = match context.serialized_s1.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ =>
                return Err(Error::StaleState(
                    "send context predates stored S1 serialization".into(),
                )),
        };
        if let Some(change) = &context.change_output {
            if change.proof.is_empty() {
                return Err(Error::StaleState(
                    "send context is missing the change range proof".into(),
                ));
            }
        }

        let s1 = Slate::from_base64(serialized_s1)?;
        let s2 = slatepack::unarmor(armored_s2)?;
        if s2.state != SlateState::S2 {
            return Err(Error::invalid_input("expected an S2 slatepack"));
        }
        if s2.id != context.slate_id || s1.id != context.slate_id {
            return Err(Error::invalid_input(
                "slatepack does not match the stored send context",
            ));
        }
        if s2.amount != s1.amount || s2.fee != s1.fee {
            return Err(Error::VerificationFailed(
                "counterparty altered slate amount or fee".into(),
            ));
        }
        let recipient = s2
            .participant(1)
            .ok_or_else(|| Error::invalid_input("S2 has no recipient data"))?;
        if recipient.part_sig.is_none() {
            return Err(Error::invalid_input("S2 is unsigned"));
        }

        let mut final_slate = s2.clone();
        final_slate.state = SlateState::S3;
        // Re-attach what the compact S2 dropped.
        final_slate.inputs = context.inputs.clone();
        if let Some(change) = &context.change_output {
            final_slate.outputs.push(change.clone());
        }
        // The offset travels S1 -> S3 verbatim, zero or not.
        final_slate.offset = context.offset.clone();
        if final_slate.participant(0).is_none() {
            let sender = s1.participant(0).ok_or_else(|| {
                Error::StaleState("stored S1 has no sender data".into())
            })?;
            final_slate.participant_data.insert(0, sender.clone());
        }

        let sec_key = parse_secret(&context.sec_key)?;
        let sec_nonce = parse_secret(&context.sec_nonce)?;
        let ext = self.extended(unlocked)?;
        let part_sig = self
            .keychain
            .partial_sig(&ext, &final_slate, &sec_key, &sec_nonce)
            .map_err(Error::SigningFailed)?;
        for participant in &mut final_slate.participant_data {
            if participant.id == 0 {
                participant.part_sig = Some(part_sig.clone());
            }
        }

        let tx_json = self
            .keychain
            .finalize(&final_slate)
            .map_err(Error::SigningFailed)?;

        if let Err(err) = self.backend.broadcast_grin_tx(&tx_json).await {
            warn!(slate_id = %context.slate_id, %err,
                  "grin broadcast failed, unlocking inputs");
            if let Err(unlock_err) =
                self.backend.unlock_outputs(&context.slate_id).await
            {
                warn!(slate_id = %context.slate_id, %unlock_err,
                      "rollback unlock also failed");
            }
            return Err(Error::BroadcastFailed(err.to_string()));
        }

        // The inputs are gone for good now.
        if let Err(err) =
            self.backend.spend_outputs(&context.slate_id).await
        {
            warn!(slate_id = %context.slate_id, %err,
                  "failed to mark grin inputs spent");
        }
        if let Err(err) = self
            .backend
            .update_transaction(&context.slate_id, GrinTxStatus::Finalized)
            .await
        {
            warn!(slate_id = %context.slate_id, %err,
                  "failed to update grin tx status");
        }

        info!(slate_id = %context.slate_id, "grin send finalized (S3)");
        Ok(context.slate_id.clone())
    }

    /// Cancel a pre-broadcast send: inputs return to `unspent`, the tx
    /// row becomes `cancelled`. The consumed child index stays consumed.
    pub async fn cancel_send(&self, slate_id: &str) -> Result<()> {
        self.backend.unlock_outputs(slate_id).await?;
        self.backend
            .update_transaction(slate_id, GrinTxStatus::Cancelled)
            .await?;
        info!(%slate_id, "grin send cancelled");
        Ok(())
    }

    /// I1: invoice. The recipient creates the output up front and asks
    /// the payer to fund it.
    pub async fn create_invoice(
        &self,
        unlocked: &Unlocked,
        store: &dyn KvStore,
        rng: &mut impl Crng,
        amount: u64,
    ) -> Result<String> {
        if amount == 0 {
            return Err(Error::invalid_input("amount must be positive"));
        }
        let ext = self.extended(unlocked)?;
        let resp = self.backend.get_outputs().await?;
        let new_output = NewOutput {
            key_id: WALLET_KEY_ID.to_owned(),
            n_child: resp.next_child_index,
            amount,
        };

        let slate_id = new_slate_id(rng);
        let mut slate =
            Slate::new(slate_id.clone(), SlateState::I1, amount, 0);
        let parts = self
            .keychain
            .receive(&ext, &slate, &new_output, false)
            .map_err(Error::SigningFailed)?;
        slate.outputs.push(parts.output.clone());
        slate.participant_data.push(ParticipantData {
            id: 0,
            public_blind_excess: parts.public_blind_excess.clone(),
            public_nonce: parts.public_nonce.clone(),
            part_sig: None,
        });

        let record = GrinOutputRecord {
            id: format!("{slate_id}:invoice"),
            key_id: new_output.key_id.clone(),
            n_child: new_output.n_child,
            amount,
            commitment: parts.output.commitment.clone(),
            is_coinbase: false,
            block_height: None,
            status: GrinOutputStatus::Unconfirmed,
        };
        if let Err(err) = self.backend.record_output(&record).await {
            warn!(%slate_id, %err, "failed to record invoice output");
        }

        store::put_json(
            store,
            keys::GRIN_PENDING_INVOICE,
            &PendingInvoice {
                slate_id: slate_id.clone(),
                sec_key: hex::encode(parts.sec_key),
                sec_nonce: hex::encode(parts.sec_nonce),
                amount,
            },
        )
        .await
        .map_err(Error::remote)?;

        info!(%slate_id, amount, "grin invoice created (I1)");
        Ok(slatepack::armor(&slate))
    }

    /// I2: pay someone's invoice. The payer funds the slate and signs
    /// immediately (the recipient's nonce is already present).
    pub async fn pay_invoice(
        &self,
        unlocked: &Unlocked,
        armored_i1: &str,
    ) -> Result<String> {
        let incoming = slatepack::unarmor(armored_i1)?;
        if incoming.state != SlateState::I1 {
            return Err(Error::invalid_input("expected an I1 slatepack"));
        }
        if incoming.participant(0).is_none() {
            return Err(Error::invalid_input("invoice has no recipient data"));
        }

        let ext = self.extended(unlocked)?;
        let resp = self.backend.get_outputs().await?;
        let (selected, fee) = Self::select_inputs(
            Self::spendable(&resp.outputs),
            incoming.amount,
            None,
        )?;
        let input_sum: u64 = selected.iter().map(|i| i.amount).sum();
        let change_amount = input_sum - incoming.amount - fee;
        let change = (change_amount > 0).then(|| NewOutput {
            key_id: WALLET_KEY_ID.to_owned(),
            n_child: resp.next_child_index,
            amount: change_amount,
        });

        let mut slate = incoming.clone();
        slate.state = SlateState::I2;
        slate.fee = fee;

        let parts = self
            .keychain
            .init_send(&ext, &slate, &selected, change.as_ref(), true)
            .map_err(Error::SigningFailed)?;
        let part_sig = parts.part_sig.clone().ok_or_else(|| {
            Error::SigningFailed("payer produced no partial sig".into())
        })?;

        slate.offset = parts.offset.clone();
        slate.inputs = Self::slate_inputs(&selected);
        if let Some(out) = parts.change_output.clone() {
            slate.outputs.push(out);
        }
        slate.participant_data.push(ParticipantData {
            id: 1,
            public_blind_excess: parts.public_blind_excess.clone(),
            public_nonce: parts.public_nonce.clone(),
            part_sig: Some(part_sig),
        });

        let input_ids: Vec<String> =
            selected.iter().map(|i| i.id.clone()).collect();
        self.backend.lock_outputs(&slate.id, &input_ids).await?;
        if let (Some(new_output), Some(built)) =
            (&change, &parts.change_output)
        {
            self.record_change_output(
                &slate.id,
                new_output.n_child,
                new_output.amount,
                &built.commitment,
            )
            .await;
        }
        let tx_record = GrinTxRecord {
            slate_id: slate.id.clone(),
            kind: GrinTxKind::Sent,
            amount: incoming.amount,
            fee,
            status: GrinTxStatus::Signed,
            created_at: TimestampMs::now(),
        };
        if let Err(err) = self.backend.record_transaction(&tx_record).await {
            warn!(slate_id = %slate.id, %err, "failed to record invoice pay");
        }

        info!(slate_id = %slate.id, "grin invoice funded (I2)");
        Ok(slatepack::armor(&slate))
    }

    /// I3: the recipient finalizes their own invoice with the secrets
    /// retained at I1 and broadcasts.
    pub async fn finalize_invoice(
        &self,
        unlocked: &Unlocked,
        store: &dyn KvStore,
        armored_i2: &str,
    ) -> Result<String> {
        let pending: PendingInvoice =
            store::get_json(store, keys::GRIN_PENDING_INVOICE)
                .await
                .map_err(Error::remote)?
                .ok_or_else(|| {
                    Error::StaleState("no outstanding invoice".into())
                })?;

        let mut slate = slatepack::unarmor(armored_i2)?;
        if slate.state != SlateState::I2 {
            return Err(Error::invalid_input("expected an I2 slatepack"));
        }
        if slate.id != pending.slate_id {
            return Err(Error::invalid_input(
                "slatepack does not match the outstanding invoice",
            ));
        }
        if slate.amount != pending.amount {
            return Err(Error::VerificationFailed(
                "payer altered the invoice amount".into(),
            ));
        }

        slate.state = SlateState::I3;
        let sec_key = parse_secret(&pending.sec_key)?;
        let sec_nonce = parse_secret(&pending.sec_nonce)?;
        let ext = self.extended(unlocked)?;
        let part_sig = self
            .keychain
            .partial_sig(&ext, &slate, &sec_key, &sec_nonce)
            .map_err(Error::SigningFailed)?;
        for participant in &mut slate.participant_data {
            if participant.id == 0 {
                participant.part_sig = Some(part_sig.clone());
            }
        }

        let tx_json = self
            .keychain
            .finalize(&slate)
            .map_err(Error::SigningFailed)?;
        self.backend
            .broadcast_grin_tx(&tx_json)
            .await
            .map_err(|e| Error::BroadcastFailed(e.to_string()))?;

        store.remove(keys::GRIN_PENDING_INVOICE).await.ok();
        info!(slate_id = %slate.id, "grin invoice finalized (I3)");
        Ok(slate.id)
    }
}

fn parse_secret(hex_str: &str) -> Result<[u8; 32]> {
    hex::decode(hex_str)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(|| {
            Error::StaleState("send context secret is malformed".into())
        })
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use common::rng::FastRng;
    use secrecy::Secret;

    use super::keychain::{ReceiverParts, SenderParts};
    use super::slate::SlateOutput;
    use super::*;
    use crate::client::GrinOutputsResponse;
    use crate::store::MemoryStore;

    // -- fakes -- //

    #[derive(Default)]
    struct BackendState {
        outputs: Vec<GrinOutputRecord>,
        next_child_index: u32,
        locks: Vec<(String, Vec<String>)>,
        txs: Vec<GrinTxRecord>,
        broadcasts: Vec<String>,
        broadcast_ok: bool,
    }

    struct FakeBackend(Mutex<BackendState>);

    impl FakeBackend {
        fn with_outputs(
            outputs: Vec<GrinOutputRecord>,
            next_child_index: u32,
        ) -> Arc<Self> {
            Arc::new(Self(Mutex::new(BackendState {
                outputs,
                next_child_index,
                broadcast_ok: true,
                ..Default::default()
            })))
        }

        fn output_status(&self, id: &str) -> GrinOutputStatus {
            self.0
                .lock()
                .unwrap()
                .outputs
                .iter()
                .find(|o| o.id == id)
                .unwrap()
                .status
        }

        fn tx_status(&self, slate_id: &str) -> GrinTxStatus {
            self.0
                .lock()
                .unwrap()
                .txs
                .iter()
                .find(|t| t.slate_id == slate_id)
                .unwrap()
                .status
        }
    }

    #[async_trait]
    impl BackendApi for FakeBackend {
        async fn get_outputs(&self) -> Result<GrinOutputsResponse> {
            let state = self.0.lock().unwrap();
            Ok(GrinOutputsResponse {
                outputs: state.outputs.clone(),
                next_child_index: state.next_child_index,
            })
        }
        async fn lock_outputs(
            &self,
            slate_id: &str,
            ids: &[String],
        ) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            for output in &mut state.outputs {
                if ids.contains(&output.id) {
                    output.status = GrinOutputStatus::Locked;
                }
            }
            state
                .locks
                .push((slate_id.to_owned(), ids.to_vec()));
            Ok(())
        }
        async fn unlock_outputs(&self, slate_id: &str) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            let ids: Vec<String> = state
                .locks
                .iter()
                .filter(|(s, _)| s == slate_id)
                .flat_map(|(_, ids)| ids.clone())
                .collect();
            for output in &mut state.outputs {
                if ids.contains(&output.id)
                    && output.status == GrinOutputStatus::Locked
                {
                    output.status = GrinOutputStatus::Unspent;
                }
            }
            Ok(())
        }
        async fn spend_outputs(&self, slate_id: &str) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            let ids: Vec<String> = state
                .locks
                .iter()
                .filter(|(s, _)| s == slate_id)
                .flat_map(|(_, ids)| ids.clone())
                .collect();
            for output in &mut state.outputs {
                if ids.contains(&output.id) {
                    output.status = GrinOutputStatus::Spent;
                }
            }
            Ok(())
        }
        async fn record_output(
            &self,
            output: &GrinOutputRecord,
        ) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            state.next_child_index =
                state.next_child_index.max(output.n_child + 1);
            state.outputs.push(output.clone());
            Ok(())
        }
        async fn record_transaction(&self, tx: &GrinTxRecord) -> Result<()> {
            self.0.lock().unwrap().txs.push(tx.clone());
            Ok(())
        }
        async fn update_transaction(
            &self,
            slate_id: &str,
            status: GrinTxStatus,
        ) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            for tx in &mut state.txs {
                if tx.slate_id == slate_id {
                    tx.status = status;
                }
            }
            Ok(())
        }
        async fn list_transactions(&self) -> Result<Vec<GrinTxRecord>> {
            Ok(self.0.lock().unwrap().txs.clone())
        }
        async fn broadcast_grin_tx(&self, tx_json: &str) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            if state.broadcast_ok {
                state.broadcasts.push(tx_json.to_owned());
                Ok(())
            } else {
                Err(Error::remote("node rejected transaction"))
            }
        }

        async fn lookup_social(
            &self,
            _: &str,
            _: &str,
        ) -> Result<crate::client::SocialProfile> {
            unimplemented!("not used in grin tests")
        }
        async fn register_tip(
            &self,
            _: &crate::client::TipRegistration,
        ) -> Result<()> {
            unimplemented!("not used in grin tests")
        }
        async fn get_tip(
            &self,
            _: &str,
        ) -> Result<crate::client::TipRegistration> {
            unimplemented!("not used in grin tests")
        }
        async fn update_tip_status(
            &self,
            _: &str,
            _: crate::client::TipStatus,
        ) -> Result<()> {
            unimplemented!("not used in grin tests")
        }
    }

    /// Deterministic stand-in keychain: commitments and proofs encode
    /// the child index, so index bookkeeping is observable.
    struct FakeKeychain;

    impl SlateKeychain for FakeKeychain {
        fn extended_key(&self, mnemonic: &str) -> Result<Vec<u8>, String> {
            Ok(format!("ext:{mnemonic}").into_bytes())
        }
        fn init_send(
            &self,
            _ext: &[u8],
            _slate: &Slate,
            inputs: &[OwnedInput],
            change: Option<&NewOutput>,
            co_sign: bool,
        ) -> Result<SenderParts, String> {
            if inputs.is_empty() {
                return Err("no inputs".into());
            }
            Ok(SenderParts {
                sec_key: [0x11; 32],
                sec_nonce: [0x22; 32],
                public_blind_excess: hex::encode([0x33; 33]),
                public_nonce: hex::encode([0x44; 33]),
                offset: hex::encode([0x55; 32]),
                change_output: change.map(|c| SlateOutput {
                    commitment: format!("commit-{}", c.n_child),
                    proof: format!("proof-{}", c.n_child),
                    features: OutputFeatures::Plain,
                }),
                part_sig: co_sign.then(|| "payer-sig".to_owned()),
            })
        }
        fn receive(
            &self,
            _ext: &[u8],
            _slate: &Slate,
            output: &NewOutput,
            co_sign: bool,
        ) -> Result<ReceiverParts, String> {
            Ok(ReceiverParts {
                output: SlateOutput {
                    commitment: format!("commit-{}", output.n_child),
                    proof: format!("proof-{}", output.n_child),
                    features: OutputFeatures::Plain,
                },
                public_blind_excess: hex::encode([0x66; 33]),
                public_nonce: hex::encode([0x77; 33]),
                part_sig: co_sign.then(|| "recv-sig".to_owned()),
                sec_key: [0x88; 32],
                sec_nonce: [0x99; 32],
            })
        }
        fn partial_sig(
            &self,
            _ext: &[u8],
            _slate: &Slate,
            _sec_key: &[u8; 32],
            _sec_nonce: &[u8; 32],
        ) -> Result<String, String> {
            Ok("final-partial-sig".into())
        }
        fn finalize(&self, slate: &Slate) -> Result<String, String> {
            if slate.inputs.is_empty() {
                return Err("no inputs attached".into());
            }
            for participant in &slate.participant_data {
                if participant.part_sig.is_none() {
                    return Err("missing partial signature".into());
                }
            }
            // Echo the offset so tests can observe preservation.
            Ok(format!(
                "{{\"offset\":\"{}\",\"kernel\":\"k\"}}",
                slate.offset
            ))
        }
    }

    fn unspent(id: &str, n_child: u32, amount: u64) -> GrinOutputRecord {
        GrinOutputRecord {
            id: id.to_owned(),
            key_id: WALLET_KEY_ID.to_owned(),
            n_child,
            amount,
            commitment: format!("commit-{n_child}"),
            is_coinbase: false,
            block_height: Some(10),
            status: GrinOutputStatus::Unspent,
        }
    }

    fn test_unlocked() -> Unlocked {
        Unlocked::from_parts(
            Default::default(),
            Default::default(),
            Secret::new("abandon ... about".to_owned()),
        )
    }

    fn engine(backend: Arc<FakeBackend>) -> GrinEngine {
        GrinEngine::new(backend, Arc::new(FakeKeychain))
    }

    // -- tests -- //

    #[test]
    fn fee_model() {
        // 1 input, 2 outputs, 1 kernel: weight 8.
        assert_eq!(tx_fee(1, 2, 1), 8 * BASE_FEE_NANOGRIN);
        // Many inputs floor at weight 1.
        assert_eq!(tx_fee(20, 1, 1), BASE_FEE_NANOGRIN);
    }

    #[tokio::test]
    async fn full_srs_roundtrip() {
        let fee = tx_fee(1, 2, 1);
        let sender_backend = FakeBackend::with_outputs(
            vec![unspent("in-1", 0, 5_000_000_000)],
            7,
        );
        let recipient_backend = FakeBackend::with_outputs(vec![], 40);
        let sender = engine(sender_backend.clone());
        let recipient = engine(recipient_backend.clone());
        let unlocked = test_unlocked();
        let store = MemoryStore::new();
        let mut rng = FastRng::from_u64(1);

        // S1
        let (s1_pack, ctx) = sender
            .create_send(&unlocked, &mut rng, 1_000_000_000, None)
            .await
            .unwrap();
        assert_eq!(
            sender_backend.output_status("in-1"),
            GrinOutputStatus::Locked
        );
        // Change allocated at the authoritative index 7.
        assert_eq!(
            ctx.change_output.as_ref().unwrap().commitment,
            "commit-7"
        );

        // S2 (other wallet)
        let s2_pack = recipient
            .receive(&unlocked, &store, &s1_pack)
            .await
            .unwrap();
        let s2 = slatepack::unarmor(&s2_pack).unwrap();
        assert_eq!(s2.state, SlateState::S2);
        // Compact: the sender's input and change did not travel back.
        assert!(s2.inputs.is_empty());
        assert_eq!(s2.outputs.len(), 1);
        assert_eq!(s2.outputs[0].commitment, "commit-40");

        // S3
        let offset = ctx.offset.clone();
        let slate_id = sender
            .finalize_and_broadcast(&unlocked, &s2_pack, ctx)
            .await
            .unwrap();
        assert_eq!(
            sender_backend.output_status("in-1"),
            GrinOutputStatus::Spent
        );
        assert_eq!(
            sender_backend.tx_status(&slate_id),
            GrinTxStatus::Finalized
        );
        // The broadcast tx carried the S1 offset verbatim.
        let broadcasts =
            sender_backend.0.lock().unwrap().broadcasts.clone();
        assert_eq!(broadcasts.len(), 1);
        assert!(broadcasts[0].contains(&offset));
        // Sanity: fee model used for selection.
        let txs = sender_backend.0.lock().unwrap().txs.clone();
        assert_eq!(txs[0].fee, fee);
    }

    /// A second send started while the first is still locked must see a
    /// strictly greater child index.
    #[tokio::test]
    async fn child_index_never_reused() {
        let backend = FakeBackend::with_outputs(
            vec![
                unspent("in-1", 0, 5_000_000_000),
                unspent("in-2", 1, 5_000_000_000),
            ],
            2,
        );
        let sender = engine(backend.clone());
        let unlocked = test_unlocked();
        let mut rng = FastRng::from_u64(2);

        let (_, ctx1) = sender
            .create_send(&unlocked, &mut rng, 1_000_000_000, None)
            .await
            .unwrap();
        let (_, ctx2) = sender
            .create_send(&unlocked, &mut rng, 1_000_000_000, None)
            .await
            .unwrap();

        let child = |ctx: &GrinSendContext| -> u32 {
            ctx.change_output
                .as_ref()
                .unwrap()
                .commitment
                .strip_prefix("commit-")
                .unwrap()
                .parse()
                .unwrap()
        };
        assert!(child(&ctx2) > child(&ctx1));
    }

    #[tokio::test]
    async fn cancel_unlocks_inputs() {
        let backend = FakeBackend::with_outputs(
            vec![unspent("in-1", 0, 5_000_000_000)],
            3,
        );
        let sender = engine(backend.clone());
        let unlocked = test_unlocked();
        let mut rng = FastRng::from_u64(3);

        let (_, ctx) = sender
            .create_send(&unlocked, &mut rng, 1_000_000_000, None)
            .await
            .unwrap();
        assert_eq!(
            backend.output_status("in-1"),
            GrinOutputStatus::Locked
        );

        sender.cancel_send(&ctx.slate_id).await.unwrap();
        assert_eq!(
            backend.output_status("in-1"),
            GrinOutputStatus::Unspent
        );
        assert_eq!(
            backend.tx_status(&ctx.slate_id),
            GrinTxStatus::Cancelled
        );
        // The change child index remains consumed.
        assert!(backend.0.lock().unwrap().next_child_index > 3);
    }

    #[tokio::test]
    async fn broadcast_failure_unlocks_inputs() {
        let backend = FakeBackend::with_outputs(
            vec![unspent("in-1", 0, 5_000_000_000)],
            3,
        );
        let recipient_backend = FakeBackend::with_outputs(vec![], 9);
        let sender = engine(backend.clone());
        let recipient = engine(recipient_backend);
        let unlocked = test_unlocked();
        let store = MemoryStore::new();
        let mut rng = FastRng::from_u64(4);

        let (s1_pack, ctx) = sender
            .create_send(&unlocked, &mut rng, 1_000_000_000, None)
            .await
            .unwrap();
        let s2_pack = recipient
            .receive(&unlocked, &store, &s1_pack)
            .await
            .unwrap();

        backend.0.lock().unwrap().broadcast_ok = false;
        let err = sender
            .finalize_and_broadcast(&unlocked, &s2_pack, ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BroadcastFailed(_)));
        assert_eq!(
            backend.output_status("in-1"),
            GrinOutputStatus::Unspent
        );
    }

    #[tokio::test]
    async fn stale_context_rejected() {
        let backend = FakeBackend::with_outputs(
            vec![unspent("in-1", 0, 5_000_000_000)],
            3,
        );
        let sender = engine(backend);
        let unlocked = test_unlocked();
        let mut rng = FastRng::from_u64(5);

        let (s1_pack, ctx) = sender
            .create_send(&unlocked, &mut rng, 1_000_000_000, None)
            .await
            .unwrap();

        let mut no_s1 = ctx.clone();
        no_s1.serialized_s1 = None;
        let err = sender
            .finalize_and_broadcast(&unlocked, &s1_pack, no_s1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleState(_)));

        let mut no_proof = ctx.clone();
        if let Some(change) = &mut no_proof.change_output {
            change.proof.clear();
        }
        let err = sender
            .finalize_and_broadcast(&unlocked, &s1_pack, no_proof)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleState(_)));
    }

    #[tokio::test]
    async fn receive_rejects_wrong_state() {
        let backend = FakeBackend::with_outputs(vec![], 0);
        let recipient = engine(backend);
        let unlocked = test_unlocked();
        let store = MemoryStore::new();

        let mut bogus = Slate::new(
            "aaaabbbb-cccc-4ddd-8eee-ffff00001111".into(),
            SlateState::S2,
            5,
            1,
        );
        bogus.participant_data.push(ParticipantData {
            id: 0,
            public_blind_excess: String::new(),
            public_nonce: String::new(),
            part_sig: None,
        });
        let err = recipient
            .receive(&unlocked, &store, &slatepack::armor(&bogus))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn invoice_roundtrip() {
        let recipient_backend = FakeBackend::with_outputs(vec![], 12);
        let payer_backend = FakeBackend::with_outputs(
            vec![unspent("pay-1", 0, 9_000_000_000)],
            5,
        );
        let recipient = engine(recipient_backend.clone());
        let payer = engine(payer_backend.clone());
        let unlocked = test_unlocked();
        let store = MemoryStore::new();
        let mut rng = FastRng::from_u64(6);

        let i1 = recipient
            .create_invoice(&unlocked, &store, &mut rng, 2_000_000_000)
            .await
            .unwrap();
        let i2 = payer.pay_invoice(&unlocked, &i1).await.unwrap();
        let slate = slatepack::unarmor(&i2).unwrap();
        assert_eq!(slate.state, SlateState::I2);
        assert!(!slate.inputs.is_empty());

        let slate_id = recipient
            .finalize_invoice(&unlocked, &store, &i2)
            .await
            .unwrap();
        assert_eq!(slate_id, slate.id);
        assert_eq!(
            recipient_backend.0.lock().unwrap().broadcasts.len(),
            1
        );
        // The invoice context is consumed.
        let gone: Option<PendingInvoice> =
            store::get_json(&store, keys::GRIN_PENDING_INVOICE)
                .await
                .unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn balance_splits_confirmed_and_pending() {
        let backend = FakeBackend::with_outputs(
            vec![
                unspent("a", 0, 3_000_000_000),
                GrinOutputRecord {
                    block_height: None, // unconfirmed
                    ..unspent("b", 1, 1_000_000_000)
                },
            ],
            2,
        );
        backend.0.lock().unwrap().txs.push(GrinTxRecord {
            slate_id: "s".into(),
            kind: GrinTxKind::Received,
            amount: 500,
            fee: 1,
            status: GrinTxStatus::Signed,
            created_at: TimestampMs::from_ms(0),
        });
        let engine = engine(backend);
        let balance = engine.balance().await.unwrap();
        assert_eq!(balance.confirmed, 3_000_000_000);
        assert_eq!(balance.pending, 500);
        assert_eq!(balance.total, 3_000_000_500);
    }
}
