//! Cross-chain social-tip escrow.
//!
//! A tip parks funds on a fresh per-tip keypair's address. The tip
//! private scalar travels ECIES-encrypted under the recipient's
//! long-term BTC public key (or, for anonymous "public" tips, under a
//! throwaway fragment key published with the link), so only the
//! recipient can sweep. The sender keeps a second copy of the scalar
//! encrypted under `SHA-256(sender_btc_scalar)`: clawback needs only an
//! unlocked wallet, never the password.
//!
//! Grin is excluded: its interactive protocol cannot be carried out
//! against an absent, anonymous recipient.

use std::sync::Arc;

use common::asset::{Asset, ChainFamily};
use common::rng::Crng;
use common::time::TimestampMs;
use common::{address, aes, cn, ecies, secp};
use curve25519_dalek::edwards::EdwardsPoint;
use ring::digest;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::client::{BackendApi, TipRegistration, TipStatus};
use crate::cryptonote::spent::LocallySpentImages;
use crate::cryptonote::CnEngine;
use crate::error::Result;
use crate::pending::PendingLedger;
use crate::store::{self, keys, KvStore};
use crate::utxo::UtxoEngine;
use crate::vault::Unlocked;
use crate::Error;

/// The sender's local record: the backend registration plus the
/// clawback blob that never leaves this wallet.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSocialTip {
    #[serde(flatten)]
    pub registration: TipRegistration,
    pub created_at: TimestampMs,
    /// `aes(SHA-256(sender_btc_scalar), tip_spend_scalar)`, hex.
    pub clawback_key: String,
}

#[derive(Clone, Debug)]
pub struct CreateTipRequest {
    pub asset: Asset,
    pub amount: u64,
    pub recipient_platform: String,
    pub recipient_username: String,
    /// UTXO chains only; ignored for CryptoNote.
    pub fee_rate: Option<f64>,
    pub is_public: bool,
}

#[derive(Clone, Debug)]
pub enum ClawbackOutcome {
    Swept { txid: String },
    /// The escrow address holds nothing; the recipient most likely beat
    /// us to it.
    LikelyClaimed,
}

/// The per-tip ephemeral key material. Zeroized on drop.
struct TipKey {
    scalar: [u8; 32],
    address: String,
    /// CryptoNote only: `H_s(spend)` view scalar.
    view: Option<[u8; 32]>,
}

impl Drop for TipKey {
    fn drop(&mut self) {
        self.scalar.zeroize();
        if let Some(view) = &mut self.view {
            view.zeroize();
        }
    }
}

fn clawback_aes_key(btc_scalar: &[u8; 32]) -> [u8; 32] {
    digest::digest(&digest::SHA256, btc_scalar)
        .as_ref()
        .try_into()
        .expect("SHA-256 output is 32 bytes")
}

fn gen_tip_key(
    rng: &mut impl Crng,
    asset: Asset,
) -> Result<TipKey> {
    match asset.family() {
        ChainFamily::Utxo => {
            let hrp = asset.bech32_hrp().expect("utxo chains have an HRP");
            let (sk, pk) = secp::gen_keypair(rng);
            Ok(TipKey {
                scalar: sk.secret_bytes(),
                address: address::p2wpkh_address(&pk.serialize(), hrp),
                view: None,
            })
        }
        ChainFamily::CryptoNote => {
            let raw: [u8; 32] = common::rng::gen_bytes(rng);
            let spend = common::ed25519::scalar_reduce32(&raw);
            let view = cn::hash_to_scalar(spend.as_bytes());
            let spend_pub =
                EdwardsPoint::mul_base(&spend).compress().to_bytes();
            let view_pub =
                EdwardsPoint::mul_base(&view).compress().to_bytes();
            Ok(TipKey {
                scalar: spend.to_bytes(),
                address: address::cn_address(
                    asset.cn_address_prefix(),
                    &spend_pub,
                    &view_pub,
                ),
                view: Some(view.to_bytes()),
            })
        }
        ChainFamily::Mimblewimble => Err(Error::invalid_input(
            "grin tips require an interactive counterparty",
        )),
    }
}

pub struct TipEngine {
    backend: Arc<dyn BackendApi>,
    utxo: Arc<UtxoEngine>,
    cn: Arc<CnEngine>,
}

impl TipEngine {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        utxo: Arc<UtxoEngine>,
        cn: Arc<CnEngine>,
    ) -> Self {
        Self { backend, utxo, cn }
    }

    async fn load_local(
        &self,
        store: &dyn KvStore,
    ) -> Result<Vec<PendingSocialTip>> {
        store::get_json(store, keys::PENDING_SOCIAL_TIPS)
            .await
            .map_err(Error::remote)
            .map(Option::unwrap_or_default)
    }

    async fn save_local(
        &self,
        store: &dyn KvStore,
        tips: &[PendingSocialTip],
    ) -> Result<()> {
        store::put_json(store, keys::PENDING_SOCIAL_TIPS, &tips.to_vec())
            .await
            .map_err(Error::remote)
    }

    /// Create a tip: mint the escrow key, fund it from the sender's
    /// wallet, encrypt the key for the recipient, register with the
    /// backend, and store the clawback copy locally.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_tip(
        &self,
        unlocked: &Unlocked,
        rng: &mut impl Crng,
        store: &dyn KvStore,
        request: CreateTipRequest,
        own_cn_address: Option<&str>,
        pending: &PendingLedger<'_>,
        locally_spent: &mut LocallySpentImages,
    ) -> Result<TipRegistration> {
        if request.amount == 0 {
            return Err(Error::invalid_input("amount must be positive"));
        }
        let tip_key = gen_tip_key(rng, request.asset)?;

        // Fund the escrow from the sender's wallet first; an unfunded
        // registration is useless.
        let funding_txid = match request.asset.family() {
            ChainFamily::Utxo => {
                let fee_rate = match request.fee_rate {
                    Some(rate) => rate,
                    None =>
                        self.utxo.estimate_fee_rate(request.asset).await?,
                };
                self.utxo
                    .send(
                        request.asset,
                        unlocked,
                        &tip_key.address,
                        request.amount,
                        fee_rate,
                        false,
                        pending,
                    )
                    .await?
                    .txid
            }
            ChainFamily::CryptoNote => {
                let change = own_cn_address.ok_or_else(|| {
                    Error::invalid_input("missing change address")
                })?;
                self.cn
                    .send(
                        request.asset,
                        unlocked,
                        &tip_key.address,
                        request.amount,
                        false,
                        change,
                        pending,
                        locally_spent,
                    )
                    .await?
                    .tx_hash
            }
            ChainFamily::Mimblewimble => unreachable!("rejected above"),
        };

        // Encrypt the escrow scalar for whoever may claim.
        let (recipient_pub, public_fragment_key) = if request.is_public {
            let (fragment_sk, fragment_pk) = secp::gen_keypair(rng);
            (
                fragment_pk.serialize().to_vec(),
                Some(hex::encode(fragment_sk.secret_bytes())),
            )
        } else {
            let profile = self
                .backend
                .lookup_social(
                    &request.recipient_platform,
                    &request.recipient_username,
                )
                .await?;
            let pub_bytes =
                hex::decode(&profile.btc_pubkey).map_err(|_| {
                    Error::VerificationFailed(
                        "recipient public key is malformed".into(),
                    )
                })?;
            (pub_bytes, None)
        };
        let encrypted_tip_key = hex::encode(
            ecies::encrypt(rng, &tip_key.scalar, &recipient_pub)
                .map_err(|e| Error::VerificationFailed(e.to_string()))?,
        );

        // Clawback copy under the sender's own key hash.
        let mut btc_scalar = unlocked.scalar(Asset::Btc)?;
        let mut aes_key = clawback_aes_key(&btc_scalar);
        btc_scalar.zeroize();
        let clawback_key =
            hex::encode(aes::encrypt(rng, &aes_key, &tip_key.scalar));
        aes_key.zeroize();

        let tip_id = hex::encode(common::rng::gen_bytes::<16>(rng));
        let registration = TipRegistration {
            tip_id: tip_id.clone(),
            asset: request.asset,
            amount: request.amount,
            tip_address: tip_key.address.clone(),
            funding_txid,
            encrypted_tip_key,
            recipient_platform: request.recipient_platform.clone(),
            recipient_username: request.recipient_username.clone(),
            status: TipStatus::Pending,
            is_public: request.is_public,
            public_fragment_key,
        };
        self.backend.register_tip(&registration).await?;

        let mut local = self.load_local(store).await?;
        local.push(PendingSocialTip {
            registration: registration.clone(),
            created_at: TimestampMs::now(),
            clawback_key,
        });
        self.save_local(store, &local).await?;

        info!(%tip_id, asset = %request.asset, amount = request.amount,
              "social tip created");
        Ok(registration)
    }

    /// Decrypt a tip's escrow scalar with `claim_scalar` (the
    /// recipient's BTC scalar, or the published fragment key for public
    /// tips).
    pub fn decrypt_tip_key(
        &self,
        registration: &TipRegistration,
        claim_scalar: &[u8; 32],
    ) -> Result<[u8; 32]> {
        let payload =
            hex::decode(&registration.encrypted_tip_key).map_err(|_| {
                Error::invalid_input("tip payload is malformed")
            })?;
        let mut plain = ecies::decrypt(&payload, claim_scalar)
            .map_err(|e| Error::VerificationFailed(e.to_string()))?;
        let scalar: [u8; 32] =
            plain.as_slice().try_into().map_err(|_| {
                Error::VerificationFailed("tip key has wrong length".into())
            })?;
        plain.zeroize();
        Ok(scalar)
    }

    async fn sweep_escrow(
        &self,
        asset: Asset,
        tip_scalar: &[u8; 32],
        escrow_address: &str,
        destination: &str,
    ) -> Result<String> {
        match asset.family() {
            ChainFamily::Utxo => Ok(self
                .utxo
                .sweep_from_key(asset, tip_scalar, destination)
                .await?
                .txid),
            ChainFamily::CryptoNote => {
                let spend = common::ed25519::scalar_reduce32(tip_scalar);
                let mut view =
                    cn::hash_to_scalar(spend.as_bytes()).to_bytes();
                let result = self
                    .cn
                    .sweep_from_keys(
                        asset,
                        &spend.to_bytes(),
                        &view,
                        escrow_address,
                        destination,
                    )
                    .await;
                view.zeroize();
                Ok(result?.tx_hash)
            }
            ChainFamily::Mimblewimble =>
                Err(Error::invalid_input("grin tips are not supported")),
        }
    }

    /// Claim a tip into `destination` (the claimer's own address).
    pub async fn claim_tip(
        &self,
        tip_id: &str,
        claim_scalar: &[u8; 32],
        destination: &str,
    ) -> Result<String> {
        let registration = self.backend.get_tip(tip_id).await?;
        let mut tip_scalar =
            self.decrypt_tip_key(&registration, claim_scalar)?;
        let swept = self
            .sweep_escrow(
                registration.asset,
                &tip_scalar,
                &registration.tip_address,
                destination,
            )
            .await;
        tip_scalar.zeroize();
        let txid = swept?;

        if let Err(err) = self
            .backend
            .update_tip_status(tip_id, TipStatus::Claimed)
            .await
        {
            warn!(%tip_id, %err, "failed to report tip claim");
        }
        info!(%tip_id, %txid, "social tip claimed");
        Ok(txid)
    }

    /// Sender-side recovery of an unclaimed tip. Uses only the locally
    /// stored clawback copy, so it works whenever the wallet is
    /// unlocked.
    pub async fn clawback(
        &self,
        unlocked: &Unlocked,
        store: &dyn KvStore,
        tip_id: &str,
        destination: &str,
    ) -> Result<ClawbackOutcome> {
        let mut local = self.load_local(store).await?;
        let tip = local
            .iter_mut()
            .find(|t| t.registration.tip_id == tip_id)
            .ok_or_else(|| Error::invalid_input("unknown tip id"))?;

        let blob = hex::decode(&tip.clawback_key).map_err(|_| {
            Error::StaleState("clawback record is corrupt".into())
        })?;
        let mut btc_scalar = unlocked.scalar(Asset::Btc)?;
        let mut aes_key = clawback_aes_key(&btc_scalar);
        btc_scalar.zeroize();
        let mut plain = aes::decrypt(&aes_key, &blob)?;
        aes_key.zeroize();
        let mut tip_scalar: [u8; 32] =
            plain.as_slice().try_into().map_err(|_| {
                Error::StaleState("clawback record is corrupt".into())
            })?;
        plain.zeroize();

        let asset = tip.registration.asset;
        let escrow = tip.registration.tip_address.clone();
        let swept = self
            .sweep_escrow(asset, &tip_scalar, &escrow, destination)
            .await;
        tip_scalar.zeroize();

        match swept {
            Ok(txid) => {
                tip.registration.status = TipStatus::ClawedBack;
                self.save_local(store, &local).await?;
                if let Err(err) = self
                    .backend
                    .update_tip_status(tip_id, TipStatus::ClawedBack)
                    .await
                {
                    warn!(%tip_id, %err, "failed to report clawback");
                }
                info!(%tip_id, %txid, "social tip clawed back");
                Ok(ClawbackOutcome::Swept { txid })
            }
            Err(
                Error::NoUtxos | Error::NoUnspent | Error::AllSpent,
            ) => Ok(ClawbackOutcome::LikelyClaimed),
            Err(err) => Err(err),
        }
    }

    pub async fn list_tips(
        &self,
        store: &dyn KvStore,
    ) -> Result<Vec<PendingSocialTip>> {
        self.load_local(store).await
    }
}
