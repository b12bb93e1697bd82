//! The message router.
//!
//! One typed request enum, one dispatch. Every request waits for the
//! initialization future, counts as auto-lock activity, and gets its
//! handler's failure translated into `{success: false, error}`; no
//! handler error ever escapes as a panic. Unknown or malformed requests
//! are themselves just an error response.

use common::asset::{Asset, ChainFamily};
use common::rng::SysRng;
use common::secp;
use common::settings::Settings;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use smirk_wallet::grin::keychain::GrinSendContext;
use smirk_wallet::pending::PendingLedger;
use smirk_wallet::vault::{ChainKeys, WalletBirthday};
use smirk_wallet::Error;
use tracing::info;
use zeroize::Zeroize;

use crate::approvals::{ApprovalOutcome, PendingApproval};
use crate::sites::Sites;
use crate::state::CoreState;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedWord {
    pub index: usize,
    pub word: String,
}

// No Debug: several variants carry passwords or context secrets.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    // --- wallet lifecycle --- //
    GetWalletState,
    #[serde(rename_all = "camelCase")]
    GenerateMnemonic {
        #[serde(default)]
        word_count: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    ConfirmMnemonic {
        password: String,
        verified_words: Vec<VerifiedWord>,
    },
    #[serde(rename_all = "camelCase")]
    RestoreWallet { mnemonic: String, password: String },
    #[serde(rename_all = "camelCase")]
    UnlockWallet { password: String },
    LockWallet,
    #[serde(rename_all = "camelCase")]
    RevealSeed { password: String },

    // --- balances & keys --- //
    #[serde(rename_all = "camelCase")]
    GetBalance { asset: Asset },
    #[serde(rename_all = "camelCase")]
    GetHistory { asset: Asset },
    #[serde(rename_all = "camelCase")]
    GetWalletKeys { asset: Asset },
    #[serde(rename_all = "camelCase")]
    EstimateFee { asset: Asset },

    // --- utxo sends --- //
    #[serde(rename_all = "camelCase")]
    GetUtxos { asset: Asset },
    #[serde(rename_all = "camelCase")]
    MaxSendableUtxo { asset: Asset, fee_rate: f64 },
    #[serde(rename_all = "camelCase")]
    SendTx {
        asset: Asset,
        recipient: String,
        amount: u64,
        #[serde(default)]
        fee_rate: Option<f64>,
        #[serde(default)]
        sweep: bool,
    },

    // --- grin --- //
    InitGrinWallet,
    #[serde(rename_all = "camelCase")]
    GrinCreateSend {
        amount: u64,
        #[serde(default)]
        fee: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    GrinSignSlatepack { slatepack: String },
    #[serde(rename_all = "camelCase")]
    GrinFinalizeAndBroadcast {
        slatepack: String,
        send_context: GrinSendContext,
    },
    #[serde(rename_all = "camelCase")]
    GrinCancelSend { slate_id: String },
    #[serde(rename_all = "camelCase")]
    GrinCreateInvoice { amount: u64 },
    #[serde(rename_all = "camelCase")]
    GrinPayInvoice { slatepack: String },
    #[serde(rename_all = "camelCase")]
    GrinFinalizeInvoice { slatepack: String },

    // --- social tips --- //
    #[serde(rename_all = "camelCase")]
    LookupSocial { platform: String, username: String },
    #[serde(rename_all = "camelCase")]
    CreateSocialTip {
        asset: Asset,
        amount: u64,
        platform: String,
        username: String,
        #[serde(default)]
        fee_rate: Option<f64>,
        #[serde(default)]
        is_public: bool,
    },
    #[serde(rename_all = "camelCase")]
    DecryptTip {
        tip_id: String,
        #[serde(default)]
        fragment_key: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ClaimSocialTip {
        tip_id: String,
        #[serde(default)]
        fragment_key: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ClawbackSocialTip { tip_id: String },
    ListSocialTips,

    // --- settings & sites --- //
    GetSettings,
    #[serde(rename_all = "camelCase")]
    UpdateSettings { settings: Settings },
    ListConnectedSites,
    #[serde(rename_all = "camelCase")]
    ApproveSite {
        origin: String,
        name: String,
        #[serde(default)]
        favicon: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveSite { origin: String },
    #[serde(rename_all = "camelCase")]
    RequestSignMessage { origin: String, message: String },
    #[serde(rename_all = "camelCase")]
    ResolveApproval { request_id: String, approved: bool },
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Entry point for raw JSON messages from the extension plumbing.
pub async fn handle_raw(state: &mut CoreState, message: Value) -> Response {
    let request: Request = match serde_json::from_value(message) {
        Ok(request) => request,
        Err(err) => {
            return Response::err(Error::invalid_input(format!(
                "unknown or malformed request: {err}"
            )))
        }
    };
    handle(state, request).await
}

/// Typed dispatch. Waits on initialization, counts as activity, and
/// never lets a handler error escape.
pub async fn handle(state: &mut CoreState, request: Request) -> Response {
    state.wait_ready().await;
    state.touch_activity().await;
    match dispatch(state, request).await {
        Ok(data) => Response::ok(data),
        Err(err) => Response::err(err),
    }
}

async fn dispatch(
    state: &mut CoreState,
    request: Request,
) -> Result<Value, Error> {
    match request {
        Request::GetWalletState => get_wallet_state(state).await,
        Request::GenerateMnemonic { word_count } =>
            generate_mnemonic(state, word_count),
        Request::ConfirmMnemonic {
            password,
            verified_words,
        } => confirm_mnemonic(state, &password, &verified_words).await,
        Request::RestoreWallet { mnemonic, password } =>
            create_wallet(state, &password, Some(&mnemonic)).await,
        Request::UnlockWallet { password } => {
            let unlocked = state.vault().unlock(&password).await?;
            let assets = unlocked.assets();
            state.set_unlocked(unlocked).await;
            info!("wallet unlocked");
            Ok(json!({ "assets": assets }))
        }
        Request::LockWallet => {
            state.lock().await;
            Ok(json!({}))
        }
        Request::RevealSeed { password } => {
            let words = state.vault().reveal_seed(&password).await?;
            Ok(json!({ "words": words }))
        }

        Request::GetBalance { asset } => get_balance(state, asset).await,
        Request::GetHistory { asset } => get_history(state, asset).await,
        Request::GetWalletKeys { asset } =>
            get_wallet_keys(state, asset).await,
        Request::EstimateFee { asset } => {
            if asset.family() != ChainFamily::Utxo {
                return Err(Error::invalid_input(
                    "fee estimation only applies to utxo chains",
                ));
            }
            let rate = state.electrum.estimate_fee(asset).await?;
            Ok(json!({ "satPerVbyte": rate }))
        }

        Request::GetUtxos { asset } => {
            let address = state.address_for(asset).await?;
            let utxos = state.electrum.get_utxos(asset, &address).await?;
            Ok(json!({ "utxos": utxos }))
        }
        Request::MaxSendableUtxo { asset, fee_rate } => {
            let address = state.address_for(asset).await?;
            let utxos = state.electrum.get_utxos(asset, &address).await?;
            Ok(json!({
                "maxSendable": smirk_wallet::utxo::max_sendable(&utxos, fee_rate),
            }))
        }
        Request::SendTx {
            asset,
            recipient,
            amount,
            fee_rate,
            sweep,
        } => send_tx(state, asset, &recipient, amount, fee_rate, sweep).await,

        Request::InitGrinWallet => {
            let unlocked = state.unlocked()?;
            let balance = state.grin.init_wallet(unlocked).await?;
            Ok(serde_json::to_value(balance).expect("balance serializes"))
        }
        Request::GrinCreateSend { amount, fee } => {
            let unlocked = state.unlocked()?;
            let mut rng = SysRng::new();
            let (slatepack, context) = state
                .grin
                .create_send(unlocked, &mut rng, amount, fee)
                .await?;
            Ok(json!({
                "slatepack": slatepack,
                "sendContext": context,
            }))
        }
        Request::GrinSignSlatepack { slatepack } => {
            let unlocked = state.unlocked()?;
            let response = state
                .grin
                .receive(unlocked, state.store.as_ref(), &slatepack)
                .await?;
            Ok(json!({ "slatepack": response }))
        }
        Request::GrinFinalizeAndBroadcast {
            slatepack,
            send_context,
        } => {
            let unlocked = state.unlocked()?;
            let slate_id = state
                .grin
                .finalize_and_broadcast(unlocked, &slatepack, send_context)
                .await?;
            Ok(json!({ "slateId": slate_id }))
        }
        Request::GrinCancelSend { slate_id } => {
            state.grin.cancel_send(&slate_id).await?;
            Ok(json!({}))
        }
        Request::GrinCreateInvoice { amount } => {
            let unlocked = state.unlocked()?;
            let mut rng = SysRng::new();
            let slatepack = state
                .grin
                .create_invoice(
                    unlocked,
                    state.store.as_ref(),
                    &mut rng,
                    amount,
                )
                .await?;
            Ok(json!({ "slatepack": slatepack }))
        }
        Request::GrinPayInvoice { slatepack } => {
            let unlocked = state.unlocked()?;
            let response =
                state.grin.pay_invoice(unlocked, &slatepack).await?;
            Ok(json!({ "slatepack": response }))
        }
        Request::GrinFinalizeInvoice { slatepack } => {
            let unlocked = state.unlocked()?;
            let slate_id = state
                .grin
                .finalize_invoice(
                    unlocked,
                    state.store.as_ref(),
                    &slatepack,
                )
                .await?;
            Ok(json!({ "slateId": slate_id }))
        }

        Request::LookupSocial { platform, username } => {
            let profile =
                state.backend.lookup_social(&platform, &username).await?;
            Ok(serde_json::to_value(profile).expect("profile serializes"))
        }
        Request::CreateSocialTip {
            asset,
            amount,
            platform,
            username,
            fee_rate,
            is_public,
        } => {
            create_social_tip(
                state, asset, amount, platform, username, fee_rate,
                is_public,
            )
            .await
        }
        Request::DecryptTip {
            tip_id,
            fragment_key,
        } => {
            let registration = state.backend.get_tip(&tip_id).await?;
            let mut scalar = claim_scalar(state, fragment_key.as_deref())?;
            let result =
                state.tips.decrypt_tip_key(&registration, &scalar);
            scalar.zeroize();
            let mut tip_key = result?;
            let out = json!({ "tipKey": hex::encode(tip_key) });
            tip_key.zeroize();
            Ok(out)
        }
        Request::ClaimSocialTip {
            tip_id,
            fragment_key,
        } => {
            let registration = state.backend.get_tip(&tip_id).await?;
            let destination =
                state.address_for(registration.asset).await?;
            let mut scalar =
                claim_scalar(state, fragment_key.as_deref())?;
            let result = state
                .tips
                .claim_tip(&tip_id, &scalar, &destination)
                .await;
            scalar.zeroize();
            Ok(json!({ "txid": result? }))
        }
        Request::ClawbackSocialTip { tip_id } => {
            let local = state
                .tips
                .list_tips(state.store.as_ref())
                .await?
                .into_iter()
                .find(|t| t.registration.tip_id == tip_id)
                .ok_or_else(|| Error::invalid_input("unknown tip id"))?;
            let destination =
                state.address_for(local.registration.asset).await?;
            let unlocked = state.unlocked()?;
            let outcome = state
                .tips
                .clawback(
                    unlocked,
                    state.store.as_ref(),
                    &tip_id,
                    &destination,
                )
                .await?;
            Ok(match outcome {
                smirk_wallet::tips::ClawbackOutcome::Swept { txid } =>
                    json!({ "clawedBack": true, "txid": txid }),
                smirk_wallet::tips::ClawbackOutcome::LikelyClaimed =>
                    json!({ "clawedBack": false, "likelyClaimed": true }),
            })
        }
        Request::ListSocialTips => {
            let tips = state.tips.list_tips(state.store.as_ref()).await?;
            Ok(json!({ "tips": tips }))
        }

        Request::GetSettings => Ok(serde_json::to_value(state.settings)
            .expect("settings serialize")),
        Request::UpdateSettings { settings } =>
            update_settings(state, settings).await,
        Request::ListConnectedSites => {
            let sites = Sites::new(state.store.as_ref()).list().await?;
            Ok(json!({ "sites": sites }))
        }
        Request::ApproveSite {
            origin,
            name,
            favicon,
        } => {
            Sites::new(state.store.as_ref())
                .approve(&origin, &name, favicon)
                .await?;
            Ok(json!({}))
        }
        Request::RemoveSite { origin } => {
            Sites::new(state.store.as_ref()).remove(&origin).await?;
            Ok(json!({}))
        }
        Request::RequestSignMessage { origin, message } =>
            request_sign_message(state, origin, message).await,
        Request::ResolveApproval {
            request_id,
            approved,
        } => resolve_approval(state, &request_id, approved).await,
    }
}

// --- handlers --- //

async fn get_wallet_state(state: &CoreState) -> Result<Value, Error> {
    let wallet = state.wallet_state().await?;
    let addresses: Value = match &wallet {
        Some(wallet) => wallet
            .keys
            .iter()
            .map(|(asset, keys)| {
                (asset.ticker().to_owned(), json!(keys.address()))
            })
            .collect::<serde_json::Map<_, _>>()
            .into(),
        None => json!({}),
    };
    Ok(json!({
        "hasWallet": wallet.is_some(),
        "isUnlocked": state.is_unlocked(),
        "addresses": addresses,
        "settings": state.settings,
    }))
}

fn generate_mnemonic(
    state: &mut CoreState,
    word_count: Option<usize>,
) -> Result<Value, Error> {
    let mut rng = SysRng::new();
    let mnemonic =
        common::seed::generate_mnemonic(&mut rng, word_count.unwrap_or(12))?;
    let phrase = mnemonic.to_string();
    state.pending_mnemonic =
        Some(secrecy::Secret::new(phrase.clone()));
    Ok(json!({ "mnemonic": phrase }))
}

async fn confirm_mnemonic(
    state: &mut CoreState,
    password: &str,
    verified_words: &[VerifiedWord],
) -> Result<Value, Error> {
    use secrecy::ExposeSecret;

    let pending = state
        .pending_mnemonic
        .as_ref()
        .ok_or_else(|| {
            Error::StaleState("no generated mnemonic to confirm".into())
        })?
        .expose_secret()
        .clone();
    let words: Vec<&str> = pending.split_whitespace().collect();
    if verified_words.is_empty() {
        return Err(Error::invalid_input("no verification words supplied"));
    }
    for verified in verified_words {
        let expected = words.get(verified.index).ok_or_else(|| {
            Error::invalid_input("verification index out of range")
        })?;
        if !verified.word.trim().eq_ignore_ascii_case(expected) {
            return Err(Error::VerificationFailed(
                "backup verification words do not match".into(),
            ));
        }
    }
    create_wallet(state, password, Some(&pending)).await
}

async fn create_wallet(
    state: &mut CoreState,
    password: &str,
    mnemonic: Option<&str>,
) -> Result<Value, Error> {
    let mut rng = SysRng::new();
    let birthday = WalletBirthday {
        timestamp: Some(TimestampMs::now()),
        heights: Default::default(),
    };
    let (wallet_state, unlocked) = state
        .vault()
        .create_wallet(
            &mut rng,
            password,
            mnemonic,
            birthday,
            state.settings,
        )
        .await?;
    state.pending_mnemonic = None;
    let assets = unlocked.assets();
    state.set_unlocked(unlocked).await;
    info!(assets = assets.len(), "wallet registered");
    Ok(json!({
        "assets": assets,
        "addresses": wallet_state
            .keys
            .iter()
            .map(|(asset, keys)| {
                (asset.ticker().to_owned(), json!(keys.address()))
            })
            .collect::<serde_json::Map<_, _>>(),
    }))
}

async fn get_balance(
    state: &mut CoreState,
    asset: Asset,
) -> Result<Value, Error> {
    match asset.family() {
        ChainFamily::Utxo => {
            let address = state.address_for(asset).await?;
            let utxos = state.electrum.get_utxos(asset, &address).await?;
            let confirmed: u64 = utxos.iter().map(|u| u.value).sum();
            let ledger = PendingLedger::new(state.store.as_ref());
            let pending_out = ledger.pending_outgoing_sum(asset).await?;
            Ok(json!({
                "balance": confirmed.saturating_sub(pending_out),
                "confirmed": confirmed,
                "pendingOutgoing": pending_out,
            }))
        }
        ChainFamily::CryptoNote => {
            let unlocked =
                state.unlocked.as_ref().ok_or(Error::Locked)?;
            let view_key = unlocked.view_key(asset)?;
            let spend_key = unlocked.scalar(asset)?;
            let balance = state
                .cn
                .verified_balance(
                    asset,
                    unlocked,
                    &mut state.locally_spent,
                )
                .await?;
            let ledger = PendingLedger::new(state.store.as_ref());
            let pending_out = ledger.pending_outgoing_sum(asset).await?;
            Ok(json!({
                "balance": balance.balance.saturating_sub(pending_out),
                "totalReceived": balance.total_received,
                "verifiedSpent": balance.verified_spent,
                "pendingOutgoing": pending_out,
                // The popup re-verifies the candidates in its sandbox,
                // which needs both scalars to rebuild the key images.
                "needsVerification": true,
                "spentOutputs": balance.spent_candidates,
                "viewKey": hex::encode(view_key),
                "spendKey": hex::encode(spend_key),
            }))
        }
        ChainFamily::Mimblewimble => {
            let balance = state.grin.balance().await?;
            Ok(serde_json::to_value(balance).expect("balance serializes"))
        }
    }
}

async fn get_history(
    state: &CoreState,
    asset: Asset,
) -> Result<Value, Error> {
    match asset.family() {
        ChainFamily::Utxo => {
            let address = state.address_for(asset).await?;
            let history =
                state.electrum.get_history(asset, &address).await?;
            Ok(json!({ "history": history }))
        }
        ChainFamily::CryptoNote => {
            let ledger = PendingLedger::new(state.store.as_ref());
            Ok(json!({ "pending": ledger.list(asset).await? }))
        }
        ChainFamily::Mimblewimble => {
            let txs = state.backend.list_transactions().await?;
            Ok(json!({ "transactions": txs }))
        }
    }
}

async fn get_wallet_keys(
    state: &CoreState,
    asset: Asset,
) -> Result<Value, Error> {
    if asset.family() != ChainFamily::CryptoNote {
        return Err(Error::invalid_input(
            "wallet keys are exposed for cryptonote chains only",
        ));
    }
    let unlocked = state.unlocked()?;
    let mut view_key = unlocked.view_key(asset)?;
    let wallet =
        state.wallet_state().await?.ok_or(Error::NoWallet)?;
    let keys = wallet.keys.get(&asset).ok_or(Error::MissingKey(asset))?;
    let (spend_pub, view_pub, address) = match keys {
        ChainKeys::CryptoNote {
            spend_pub,
            view_pub,
            address,
            ..
        } => (spend_pub.clone(), view_pub.clone(), address.clone()),
        _ => return Err(Error::MissingKey(asset)),
    };
    let out = json!({
        "address": address,
        "viewKey": hex::encode(view_key),
        "spendPub": spend_pub,
        "viewPub": view_pub,
    });
    view_key.zeroize();
    Ok(out)
}

async fn send_tx(
    state: &mut CoreState,
    asset: Asset,
    recipient: &str,
    amount: u64,
    fee_rate: Option<f64>,
    sweep: bool,
) -> Result<Value, Error> {
    let ledger = PendingLedger::new(state.store.as_ref());
    match asset.family() {
        ChainFamily::Utxo => {
            let unlocked =
                state.unlocked.as_ref().ok_or(Error::Locked)?;
            let rate = match fee_rate {
                Some(rate) => rate,
                None => state.electrum.estimate_fee(asset).await?,
            };
            let signed = state
                .utxo
                .send(
                    asset, unlocked, recipient, amount, rate, sweep,
                    &ledger,
                )
                .await?;
            Ok(json!({
                "txid": signed.txid,
                "fee": signed.fee,
                "amount": signed.actual_amount,
            }))
        }
        ChainFamily::CryptoNote => {
            let change_address = state.address_for(asset).await?;
            let unlocked =
                state.unlocked.as_ref().ok_or(Error::Locked)?;
            let result = state
                .cn
                .send(
                    asset,
                    unlocked,
                    recipient,
                    amount,
                    sweep,
                    &change_address,
                    &ledger,
                    &mut state.locally_spent,
                )
                .await?;
            Ok(json!({
                "txHash": result.tx_hash,
                "fee": result.fee,
                "amount": result.amount,
            }))
        }
        ChainFamily::Mimblewimble => Err(Error::invalid_input(
            "grin sends are interactive; use the grin flow",
        )),
    }
}

#[allow(clippy::too_many_arguments)]
async fn create_social_tip(
    state: &mut CoreState,
    asset: Asset,
    amount: u64,
    platform: String,
    username: String,
    fee_rate: Option<f64>,
    is_public: bool,
) -> Result<Value, Error> {
    let own_cn_address = match asset.family() {
        ChainFamily::CryptoNote =>
            Some(state.address_for(asset).await?),
        _ => None,
    };
    let unlocked = state.unlocked.as_ref().ok_or(Error::Locked)?;
    let ledger = PendingLedger::new(state.store.as_ref());
    let mut rng = SysRng::new();
    let registration = state
        .tips
        .create_tip(
            unlocked,
            &mut rng,
            state.store.as_ref(),
            smirk_wallet::tips::CreateTipRequest {
                asset,
                amount,
                recipient_platform: platform,
                recipient_username: username,
                fee_rate,
                is_public,
            },
            own_cn_address.as_deref(),
            &ledger,
            &mut state.locally_spent,
        )
        .await?;
    Ok(serde_json::to_value(registration).expect("registration serializes"))
}

/// The scalar that can open a tip payload: the published fragment key
/// for public tips, otherwise our own BTC scalar.
fn claim_scalar(
    state: &CoreState,
    fragment_key: Option<&str>,
) -> Result<[u8; 32], Error> {
    match fragment_key {
        Some(fragment) => hex::decode(fragment)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| {
                Error::invalid_input("fragment key is malformed")
            }),
        None => state.unlocked()?.scalar(Asset::Btc),
    }
}

async fn update_settings(
    state: &mut CoreState,
    settings: Settings,
) -> Result<Value, Error> {
    if settings.auto_lock_minutes
        > common::settings::MAX_AUTO_LOCK_MINUTES
    {
        return Err(Error::invalid_input(
            "auto-lock delay is out of range",
        ));
    }
    // Persist inside the wallet state when one exists.
    if let Some(mut wallet) = state.wallet_state().await? {
        wallet.settings = settings;
        smirk_wallet::store::put_json(
            state.store.as_ref(),
            smirk_wallet::store::keys::WALLET_STATE,
            &wallet,
        )
        .await
        .map_err(Error::remote)?;
    }
    state.apply_settings(settings).await;
    Ok(serde_json::to_value(settings).expect("settings serialize"))
}

async fn request_sign_message(
    state: &mut CoreState,
    origin: String,
    message: String,
) -> Result<Value, Error> {
    let sites = Sites::new(state.store.as_ref());
    if !sites.is_connected(&origin).await? {
        return Err(Error::NotAuthenticated);
    }
    let mut rng = SysRng::new();
    let request_id = hex::encode(common::rng::gen_bytes::<16>(&mut rng));

    // Park the one-shot continuation; the expiry task clears it after
    // five minutes if the user never answers. The site's transport
    // claims the waiter half via `CoreState::take_approval_waiter`.
    let rx = state.approvals.open(
        &request_id,
        PendingApproval {
            origin,
            message,
            opened_at: TimestampMs::now(),
        },
    );
    state.stash_approval_waiter(request_id.clone(), rx);
    Ok(json!({ "requestId": request_id }))
}

async fn resolve_approval(
    state: &mut CoreState,
    request_id: &str,
    approved: bool,
) -> Result<Value, Error> {
    // Consume the continuation; a missing entry means the id is unknown
    // or the expiry already resolved it.
    let (pending, continuation) =
        state.approvals.take(request_id).ok_or_else(|| {
            Error::invalid_input("unknown or expired approval")
        })?;
    if !approved {
        let _ = continuation.send(ApprovalOutcome::Rejected);
        state.drop_approval_waiter(request_id);
        return Ok(json!({ "approved": false }));
    }

    let signed = sign_approved_message(state, &pending).await;
    match signed {
        Ok(result) => {
            let _ =
                continuation.send(ApprovalOutcome::Approved(result.clone()));
            state.drop_approval_waiter(request_id);
            Ok(result)
        }
        Err(err) => {
            // The site's request fails alongside the popup's.
            let _ = continuation.send(ApprovalOutcome::Rejected);
            state.drop_approval_waiter(request_id);
            Err(err)
        }
    }
}

async fn sign_approved_message(
    state: &mut CoreState,
    pending: &PendingApproval,
) -> Result<Value, Error> {
    let unlocked = state.unlocked()?;
    let mut scalar = unlocked.scalar(Asset::Btc)?;
    let hash = secp::bitcoin_message_hash(pending.message.as_bytes());
    let signed = secp::sign(&hash, &scalar);
    let pubkey = secp::get_public_key(&scalar);
    scalar.zeroize();
    let signature =
        signed.map_err(|e| Error::SigningFailed(e.to_string()))?;
    let pubkey =
        pubkey.map_err(|e| Error::SigningFailed(e.to_string()))?;

    Sites::new(state.store.as_ref())
        .touch(&pending.origin)
        .await?;
    Ok(json!({
        "approved": true,
        "signature": hex::encode(signature),
        "pubkey": hex::encode(pubkey),
    }))
}
