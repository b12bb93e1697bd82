//! The owned core state.
//!
//! Everything the source kept in module-level globals lives here as one
//! struct owned by the event loop; handlers take a borrow. Engines are
//! constructed once with their client handles injected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::asset::Asset;
use common::settings::Settings;
use secrecy::Secret;
use smirk_wallet::client::{BackendApi, ElectrumApi, LightWalletApi};
use smirk_wallet::cryptonote::signer::RingCtSigner;
use smirk_wallet::cryptonote::spent::LocallySpentImages;
use smirk_wallet::cryptonote::CnEngine;
use smirk_wallet::grin::keychain::SlateKeychain;
use smirk_wallet::grin::GrinEngine;
use smirk_wallet::store::KvStore;
use smirk_wallet::tips::TipEngine;
use smirk_wallet::utxo::UtxoEngine;
use smirk_wallet::vault::{Unlocked, Vault, WalletState};
use smirk_wallet::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::approvals::{ApprovalOutcome, Approvals};
use crate::autolock::TimerCmd;
use crate::session;

/// The external collaborators, injected at construction.
pub struct Clients {
    pub electrum: Arc<dyn ElectrumApi>,
    pub light_wallet: Arc<dyn LightWalletApi>,
    pub backend: Arc<dyn BackendApi>,
    pub ringct_signer: Arc<dyn RingCtSigner>,
    pub grin_keychain: Arc<dyn SlateKeychain>,
}

pub struct CoreState {
    pub store: Arc<dyn KvStore>,
    pub session_store: Arc<dyn KvStore>,

    pub unlocked: Option<Unlocked>,
    pub settings: Settings,
    /// A freshly generated mnemonic awaiting user confirmation.
    pub pending_mnemonic: Option<Secret<String>>,
    pub locally_spent: LocallySpentImages,
    /// Pending approvals: one-shot continuations with an active
    /// five-minute expiry. The router opens them; the popup answers.
    pub approvals: Approvals,
    /// Unclaimed approval waiters, keyed by request id. The transport
    /// that carried the site's request claims its waiter with
    /// [`CoreState::take_approval_waiter`] and parks on it.
    approval_waiters: HashMap<String, oneshot::Receiver<ApprovalOutcome>>,

    pub utxo: Arc<UtxoEngine>,
    pub cn: Arc<CnEngine>,
    pub grin: Arc<GrinEngine>,
    pub tips: Arc<TipEngine>,
    pub electrum: Arc<dyn ElectrumApi>,
    pub backend: Arc<dyn BackendApi>,

    autolock_tx: mpsc::Sender<TimerCmd>,
    init_tx: watch::Sender<bool>,
    init_rx: watch::Receiver<bool>,
}

impl CoreState {
    pub fn new(
        store: Arc<dyn KvStore>,
        session_store: Arc<dyn KvStore>,
        clients: Clients,
        autolock_tx: mpsc::Sender<TimerCmd>,
    ) -> Self {
        let utxo = Arc::new(UtxoEngine::new(clients.electrum.clone()));
        let cn = Arc::new(CnEngine::new(
            clients.light_wallet.clone(),
            clients.ringct_signer.clone(),
        ));
        let grin = Arc::new(GrinEngine::new(
            clients.backend.clone(),
            clients.grin_keychain.clone(),
        ));
        let tips = Arc::new(TipEngine::new(
            clients.backend.clone(),
            utxo.clone(),
            cn.clone(),
        ));
        let (init_tx, init_rx) = watch::channel(false);
        Self {
            store,
            session_store,
            unlocked: None,
            settings: Settings::default(),
            pending_mnemonic: None,
            locally_spent: LocallySpentImages::new(),
            approvals: Approvals::new(),
            approval_waiters: HashMap::new(),
            utxo,
            cn,
            grin,
            tips,
            electrum: clients.electrum,
            backend: clients.backend,
            autolock_tx,
            init_tx,
            init_rx,
        }
    }

    /// One-shot startup: load settings, attempt session restore, then
    /// release any requests waiting on initialization.
    pub async fn initialize(&mut self) {
        let loaded = self.vault().load_state().await;
        if let Ok(Some(state)) = loaded {
            self.settings = state.settings;
        }
        match session::restore(self.session_store.as_ref()).await {
            Ok(Some(unlocked)) => {
                info!("session restored; wallet is unlocked");
                self.unlocked = Some(unlocked);
                self.arm_autolock().await;
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "session restore failed"),
        }
        self.mark_ready();
    }

    pub fn vault(&self) -> Vault<'_> {
        Vault::new(self.store.as_ref())
    }

    pub async fn wallet_state(&self) -> Result<Option<WalletState>, Error> {
        self.vault().load_state().await
    }

    /// The address for `asset`, from the persisted (public) state.
    pub async fn address_for(&self, asset: Asset) -> Result<String, Error> {
        let state =
            self.wallet_state().await?.ok_or(Error::NoWallet)?;
        state
            .keys
            .get(&asset)
            .map(|keys| keys.address().to_owned())
            .ok_or(Error::MissingKey(asset))
    }

    pub fn mark_ready(&self) {
        let _ = self.init_tx.send(true);
    }

    /// Every incoming request parks here until initialization finished,
    /// so nobody observes a falsely-locked wallet.
    pub async fn wait_ready(&self) {
        let mut rx = self.init_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.is_some()
    }

    pub fn unlocked(&self) -> Result<&Unlocked, Error> {
        self.unlocked.as_ref().ok_or(Error::Locked)
    }

    /// Install freshly unlocked material: session copy + auto-lock arm.
    pub async fn set_unlocked(&mut self, unlocked: Unlocked) {
        if let Err(err) =
            session::persist(self.session_store.as_ref(), &unlocked).await
        {
            warn!(%err, "failed to persist session keys");
        }
        self.unlocked = Some(unlocked);
        self.arm_autolock().await;
    }

    /// Clear every unlocked map, the session copy and the timer. Safe to
    /// call at any time, including before initialization completes.
    pub async fn lock(&mut self) {
        self.unlocked = None;
        self.pending_mnemonic = None;
        if let Err(err) = session::clear(self.session_store.as_ref()).await
        {
            warn!(%err, "failed to clear session keys");
        }
        let _ = self.autolock_tx.send(TimerCmd::Disarm).await;
        info!("wallet locked");
    }

    async fn arm_autolock(&self) {
        let cmd = match self.settings.auto_lock_delay_minutes() {
            Some(minutes) =>
                TimerCmd::Arm(Duration::from_secs(u64::from(minutes) * 60)),
            None => TimerCmd::Disarm,
        };
        let _ = self.autolock_tx.send(cmd).await;
    }

    /// Called per handled message; pushes the auto-lock deadline out.
    pub async fn touch_activity(&self) {
        let _ = self.autolock_tx.send(TimerCmd::Activity).await;
    }

    /// Re-apply settings (after an update): re-arm or disarm the timer.
    pub async fn apply_settings(&mut self, settings: Settings) {
        self.settings = settings;
        if self.is_unlocked() {
            self.arm_autolock().await;
        }
    }

    /// Park a freshly opened approval waiter until its transport claims
    /// it.
    pub fn stash_approval_waiter(
        &mut self,
        request_id: String,
        rx: oneshot::Receiver<ApprovalOutcome>,
    ) {
        self.approval_waiters.insert(request_id, rx);
    }

    /// Claim the waiter for `request_id` to park on it. The outcome
    /// arrives when the user answers or the five-minute expiry fires.
    pub fn take_approval_waiter(
        &mut self,
        request_id: &str,
    ) -> Option<oneshot::Receiver<ApprovalOutcome>> {
        self.approval_waiters.remove(request_id)
    }

    /// Discard an unclaimed waiter once its request has been resolved.
    pub fn drop_approval_waiter(&mut self, request_id: &str) {
        self.approval_waiters.remove(request_id);
    }
}
