//! The key vault: per-chain keys encrypted at rest under a
//! password-derived KEK.
//!
//! ## At rest
//!
//! [`WalletState`] is one JSON blob under `walletState`. Every encrypted
//! field (seed + each private scalar) is AES-GCM under the same KEK,
//! derived once per unlock from the wallet's single master salt. Public
//! material (pubkeys, addresses, birthday, settings) is plaintext.
//!
//! ## In memory
//!
//! A successful unlock yields an [`Unlocked`] capability owning the
//! decrypted scalars, the CryptoNote view keys and the mnemonic (the
//! Mimblewimble keychain needs it). Engine entry points take
//! `&Unlocked`, so a locked wallet cannot reach them at compile time.
//! Locking is dropping the token (plus clearing the session copy, which
//! the worker owns).
//!
//! ## Migration
//!
//! Wallets created before Grin support have no Grin bundle. `unlock`
//! synthesizes one from the just-decrypted mnemonic and persists the
//! upgraded state, so older wallets pick up the chain transparently.

use std::collections::BTreeMap;
use std::sync::Mutex;

use common::asset::{Asset, ChainFamily};
use common::rng::Crng;
use common::settings::Settings;
use common::time::TimestampMs;
use common::{address, aes, password, seed};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::error::Result;
use crate::store::{self, keys, KvStore};
use crate::Error;

/// Current [`WalletState::version`]. v1 predates the Grin bundle.
pub const WALLET_STATE_VERSION: u32 = 2;

fn version_v1() -> u32 {
    1
}

/// Timestamp plus per-chain block heights captured at wallet creation,
/// so a restored wallet tells scanners where to begin instead of
/// rescanning from genesis.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBirthday {
    pub timestamp: Option<TimestampMs>,
    #[serde(default)]
    pub heights: BTreeMap<Asset, u64>,
}

/// The persisted key bundle for one chain. A bundle is either complete
/// or treated as corruption; there are no optional fields inside.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "camelCase")]
pub enum ChainKeys {
    #[serde(rename = "utxo", rename_all = "camelCase")]
    Utxo {
        enc_privkey: String,
        pubkey: String,
        address: String,
    },
    #[serde(rename = "cryptonote", rename_all = "camelCase")]
    CryptoNote {
        enc_spend: String,
        enc_view: String,
        spend_pub: String,
        view_pub: String,
        address: String,
    },
    #[serde(rename = "mimblewimble", rename_all = "camelCase")]
    Mimblewimble {
        enc_scalar: String,
        public: String,
        address: String,
    },
}

impl ChainKeys {
    pub fn address(&self) -> &str {
        match self {
            ChainKeys::Utxo { address, .. } => address,
            ChainKeys::CryptoNote { address, .. } => address,
            ChainKeys::Mimblewimble { address, .. } => address,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    #[serde(default = "version_v1")]
    pub version: u32,
    /// AES blob over the UTF-8 mnemonic phrase, hex.
    pub encrypted_seed: String,
    /// The wallet's single master salt, hex.
    pub seed_salt: String,
    pub keys: BTreeMap<Asset, ChainKeys>,
    #[serde(default)]
    pub birthday: WalletBirthday,
    #[serde(default)]
    pub settings: Settings,
}

/// The in-memory unlocked key material. Obtainable only from
/// [`Vault::unlock`], [`Vault::create_wallet`], or a session restore.
/// Dropping it is locking.
pub struct Unlocked {
    keys: BTreeMap<Asset, Secret<[u8; 32]>>,
    view_keys: BTreeMap<Asset, Secret<[u8; 32]>>,
    mnemonic: Secret<String>,
    /// The Mimblewimble extended key, cached after first derivation.
    grin_extended: Mutex<Option<Secret<Vec<u8>>>>,
}

impl Unlocked {
    /// Assemble from raw parts. Used by unlock and by session restore;
    /// there is deliberately no way to build one from a password check
    /// that didn't happen.
    pub fn from_parts(
        keys: BTreeMap<Asset, Secret<[u8; 32]>>,
        view_keys: BTreeMap<Asset, Secret<[u8; 32]>>,
        mnemonic: Secret<String>,
    ) -> Self {
        Self {
            keys,
            view_keys,
            mnemonic,
            grin_extended: Mutex::new(None),
        }
    }

    pub fn assets(&self) -> Vec<Asset> {
        self.keys.keys().copied().collect()
    }

    /// Copy of the private scalar for `asset`. Callers zeroize after use.
    pub fn scalar(&self, asset: Asset) -> Result<[u8; 32]> {
        self.keys
            .get(&asset)
            .map(|s| *s.expose_secret())
            .ok_or(Error::MissingKey(asset))
    }

    /// Copy of the private view scalar (XMR/WOW only).
    pub fn view_key(&self, asset: Asset) -> Result<[u8; 32]> {
        self.view_keys
            .get(&asset)
            .map(|s| *s.expose_secret())
            .ok_or(Error::MissingKey(asset))
    }

    pub fn mnemonic(&self) -> &str {
        self.mnemonic.expose_secret()
    }

    /// Session-restore access to the raw maps.
    pub fn export_parts(
        &self,
    ) -> (
        BTreeMap<Asset, [u8; 32]>,
        BTreeMap<Asset, [u8; 32]>,
        String,
    ) {
        let keys = self
            .keys
            .iter()
            .map(|(a, s)| (*a, *s.expose_secret()))
            .collect();
        let view_keys = self
            .view_keys
            .iter()
            .map(|(a, s)| (*a, *s.expose_secret()))
            .collect();
        (keys, view_keys, self.mnemonic.expose_secret().clone())
    }

    pub fn cached_grin_extended(&self) -> Option<Vec<u8>> {
        self.grin_extended
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.expose_secret().clone())
    }

    pub fn cache_grin_extended(&self, key: Vec<u8>) {
        *self.grin_extended.lock().unwrap() = Some(Secret::new(key));
    }
}

impl std::fmt::Debug for Unlocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Avoid formatting secrets.
        write!(f, "Unlocked(assets={:?})", self.assets())
    }
}

fn encrypt_hex(
    rng: &mut impl Crng,
    kek: &password::Kek,
    plaintext: &[u8],
) -> String {
    hex::encode(aes::encrypt(rng, kek.expose(), plaintext))
}

fn decrypt_hex(kek: &password::Kek, field: &str) -> Result<Vec<u8>> {
    let blob = hex::decode(field)
        .map_err(|_| Error::invalid_input("corrupt encrypted field"))?;
    Ok(aes::decrypt(kek.expose(), &blob)?)
}

fn decrypt_scalar(kek: &password::Kek, field: &str) -> Result<[u8; 32]> {
    let mut plain = decrypt_hex(kek, field)?;
    let scalar: [u8; 32] = plain
        .as_slice()
        .try_into()
        .map_err(|_| Error::invalid_input("scalar field has wrong length"))?;
    plain.zeroize();
    Ok(scalar)
}

fn encode_grin_bundle(
    rng: &mut impl Crng,
    kek: &password::Kek,
    bundle: &seed::GrinKeyBundle,
) -> ChainKeys {
    ChainKeys::Mimblewimble {
        enc_scalar: encrypt_hex(rng, kek, bundle.scalar.expose_secret()),
        public: hex::encode(bundle.public),
        address: address::grin_address(&bundle.public),
    }
}

/// The vault. Stateless itself; state lives in the store.
pub struct Vault<'a> {
    store: &'a dyn KvStore,
}

impl<'a> Vault<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self { store }
    }

    pub async fn load_state(&self) -> Result<Option<WalletState>> {
        store::get_json(self.store, keys::WALLET_STATE)
            .await
            .map_err(Error::remote)
    }

    async fn save_state(&self, state: &WalletState) -> Result<()> {
        store::put_json(self.store, keys::WALLET_STATE, state)
            .await
            .map_err(Error::remote)
    }

    /// Create (or restore) a wallet. Derives all per-chain keys from the
    /// mnemonic, encrypts everything under a fresh master salt, persists,
    /// and returns the unlocked token.
    pub async fn create_wallet(
        &self,
        rng: &mut impl Crng,
        pass: &str,
        mnemonic_phrase: Option<&str>,
        birthday: WalletBirthday,
        settings: Settings,
    ) -> Result<(WalletState, Unlocked)> {
        let mnemonic = match mnemonic_phrase {
            Some(phrase) => seed::parse_mnemonic(phrase)?,
            None => seed::generate_mnemonic(rng, 12)?,
        };
        let derived = seed::derive_all_keys(&mnemonic)?;

        let salt = password::gen_salt(rng);
        let kek = password::derive_kek(pass, &salt)?;

        let phrase = mnemonic.to_string();
        let mut chain_keys = BTreeMap::new();

        for (asset, bundle) in
            [(Asset::Btc, &derived.btc), (Asset::Ltc, &derived.ltc)]
        {
            let hrp = asset.bech32_hrp().expect("utxo chains have an HRP");
            chain_keys.insert(
                asset,
                ChainKeys::Utxo {
                    enc_privkey: encrypt_hex(
                        rng,
                        &kek,
                        bundle.privkey.expose_secret(),
                    ),
                    pubkey: hex::encode(bundle.pubkey),
                    address: address::p2wpkh_address(&bundle.pubkey, hrp),
                },
            );
        }
        for (asset, bundle) in
            [(Asset::Xmr, &derived.xmr), (Asset::Wow, &derived.wow)]
        {
            chain_keys.insert(
                asset,
                ChainKeys::CryptoNote {
                    enc_spend: encrypt_hex(
                        rng,
                        &kek,
                        bundle.spend.expose_secret(),
                    ),
                    enc_view: encrypt_hex(
                        rng,
                        &kek,
                        bundle.view.expose_secret(),
                    ),
                    spend_pub: hex::encode(bundle.spend_pub),
                    view_pub: hex::encode(bundle.view_pub),
                    address: address::cn_address(
                        asset.cn_address_prefix(),
                        &bundle.spend_pub,
                        &bundle.view_pub,
                    ),
                },
            );
        }
        chain_keys
            .insert(Asset::Grin, encode_grin_bundle(rng, &kek, &derived.grin));

        let state = WalletState {
            version: WALLET_STATE_VERSION,
            encrypted_seed: encrypt_hex(rng, &kek, phrase.as_bytes()),
            seed_salt: hex::encode(salt),
            keys: chain_keys,
            birthday,
            settings,
        };
        self.save_state(&state).await?;
        info!(assets = state.keys.len(), "wallet created");

        let unlocked = unlocked_from_derived(&derived, phrase);
        Ok((state, unlocked))
    }

    /// Unlock with the password. Derives the KEK once, verifies it
    /// against the first encrypted field, then decrypts every bundle.
    /// Runs the Grin forward-migration when needed. On any failure, no
    /// unlocked material escapes.
    pub async fn unlock(&self, pass: &str) -> Result<Unlocked> {
        let mut state = self.load_state().await?.ok_or(Error::NoWallet)?;
        let kek = self.kek_for(&state, pass)?;

        // Password check: the seed field exists in every version.
        let mut phrase_bytes = decrypt_hex(&kek, &state.encrypted_seed)?;
        let phrase = String::from_utf8(std::mem::take(&mut phrase_bytes))
            .map_err(|_| Error::invalid_input("corrupt seed field"))?;

        // Forward migration: older wallets have no Grin bundle.
        if !state.keys.contains_key(&Asset::Grin) {
            info!("migrating wallet state: synthesizing grin key bundle");
            let mnemonic = seed::parse_mnemonic(&phrase)?;
            let derived = seed::derive_all_keys(&mnemonic)?;
            let mut rng = common::rng::SysRng::new();
            state.keys.insert(
                Asset::Grin,
                encode_grin_bundle(&mut rng, &kek, &derived.grin),
            );
            state.version = WALLET_STATE_VERSION;
            self.save_state(&state).await?;
        }

        let mut keys_map = BTreeMap::new();
        let mut view_map = BTreeMap::new();
        for (asset, chain_keys) in &state.keys {
            match (asset.family(), chain_keys) {
                (ChainFamily::Utxo, ChainKeys::Utxo { enc_privkey, .. }) => {
                    keys_map.insert(
                        *asset,
                        Secret::new(decrypt_scalar(&kek, enc_privkey)?),
                    );
                }
                (
                    ChainFamily::CryptoNote,
                    ChainKeys::CryptoNote {
                        enc_spend, enc_view, ..
                    },
                ) => {
                    keys_map.insert(
                        *asset,
                        Secret::new(decrypt_scalar(&kek, enc_spend)?),
                    );
                    view_map.insert(
                        *asset,
                        Secret::new(decrypt_scalar(&kek, enc_view)?),
                    );
                }
                (
                    ChainFamily::Mimblewimble,
                    ChainKeys::Mimblewimble { enc_scalar, .. },
                ) => {
                    keys_map.insert(
                        *asset,
                        Secret::new(decrypt_scalar(&kek, enc_scalar)?),
                    );
                }
                // A bundle of the wrong family is a partial/corrupt write.
                _ => {
                    warn!(asset = %asset, "key bundle family mismatch");
                    return Err(Error::MissingKey(*asset));
                }
            }
        }

        Ok(Unlocked::from_parts(
            keys_map,
            view_map,
            Secret::new(phrase),
        ))
    }

    /// Reveal the mnemonic words. Always re-derives from the password,
    /// even while unlocked; the in-memory copy is never used here.
    pub async fn reveal_seed(&self, pass: &str) -> Result<Vec<String>> {
        let state = self.load_state().await?.ok_or(Error::NoWallet)?;
        let kek = self.kek_for(&state, pass)?;
        let mut phrase_bytes = decrypt_hex(&kek, &state.encrypted_seed)?;
        let phrase = String::from_utf8(std::mem::take(&mut phrase_bytes))
            .map_err(|_| Error::invalid_input("corrupt seed field"))?;
        Ok(phrase.split_whitespace().map(str::to_owned).collect())
    }

    fn kek_for(
        &self,
        state: &WalletState,
        pass: &str,
    ) -> Result<password::Kek> {
        let salt_bytes = hex::decode(&state.seed_salt)
            .map_err(|_| Error::invalid_input("corrupt master salt"))?;
        let salt: [u8; password::SALT_LEN] = salt_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::invalid_input("corrupt master salt"))?;
        Ok(password::derive_kek(pass, &salt)?)
    }
}

fn unlocked_from_derived(
    derived: &seed::WalletKeys,
    phrase: String,
) -> Unlocked {
    let mut keys_map = BTreeMap::new();
    let mut view_map = BTreeMap::new();
    keys_map
        .insert(Asset::Btc, Secret::new(*derived.btc.privkey.expose_secret()));
    keys_map
        .insert(Asset::Ltc, Secret::new(*derived.ltc.privkey.expose_secret()));
    keys_map
        .insert(Asset::Xmr, Secret::new(*derived.xmr.spend.expose_secret()));
    view_map
        .insert(Asset::Xmr, Secret::new(*derived.xmr.view.expose_secret()));
    keys_map
        .insert(Asset::Wow, Secret::new(*derived.wow.spend.expose_secret()));
    view_map
        .insert(Asset::Wow, Secret::new(*derived.wow.view.expose_secret()));
    keys_map
        .insert(Asset::Grin, Secret::new(*derived.grin.scalar.expose_secret()));
    Unlocked::from_parts(keys_map, view_map, Secret::new(phrase))
}

#[cfg(test)]
mod test {
    use common::rng::FastRng;

    use super::*;
    use crate::store::MemoryStore;

    const PASS: &str = "correct horse battery";
    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon about";

    async fn fresh_wallet(store: &MemoryStore) -> (WalletState, Unlocked) {
        let vault = Vault::new(store);
        let mut rng = FastRng::from_u64(99);
        vault
            .create_wallet(
                &mut rng,
                PASS,
                Some(PHRASE),
                WalletBirthday::default(),
                Settings::default(),
            )
            .await
            .unwrap()
    }

    /// unlock(encrypt(derive_all_keys(S), kdf(P))) == derive_all_keys(S)
    #[tokio::test]
    async fn unlock_recovers_created_keys() {
        let store = MemoryStore::new();
        let (_, created) = fresh_wallet(&store).await;

        let vault = Vault::new(&store);
        let unlocked = vault.unlock(PASS).await.unwrap();

        for asset in Asset::ALL {
            assert_eq!(
                created.scalar(asset).unwrap(),
                unlocked.scalar(asset).unwrap(),
                "{asset} scalar must survive the vault roundtrip",
            );
        }
        for asset in [Asset::Xmr, Asset::Wow] {
            assert_eq!(
                created.view_key(asset).unwrap(),
                unlocked.view_key(asset).unwrap(),
            );
        }
        assert_eq!(unlocked.mnemonic(), PHRASE);
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let store = MemoryStore::new();
        let _ = fresh_wallet(&store).await;
        let vault = Vault::new(&store);
        assert!(matches!(
            vault.unlock("totally wrong pw").await,
            Err(Error::BadPassword)
        ));
    }

    #[tokio::test]
    async fn unlock_without_wallet() {
        let store = MemoryStore::new();
        let vault = Vault::new(&store);
        assert!(matches!(vault.unlock(PASS).await, Err(Error::NoWallet)));
    }

    #[tokio::test]
    async fn grin_migration_on_unlock() {
        let store = MemoryStore::new();
        let (mut state, created) = fresh_wallet(&store).await;

        // Regress the persisted state to v1: drop the Grin bundle.
        state.keys.remove(&Asset::Grin);
        state.version = 1;
        store::put_json(&store, keys::WALLET_STATE, &state)
            .await
            .unwrap();

        let vault = Vault::new(&store);
        let unlocked = vault.unlock(PASS).await.unwrap();

        // The Grin scalar is re-derived from the mnemonic, so it matches
        // the original creation.
        assert_eq!(
            unlocked.scalar(Asset::Grin).unwrap(),
            created.scalar(Asset::Grin).unwrap(),
        );

        // And the upgraded state is persisted.
        let reloaded: WalletState =
            store::get_json(&store, keys::WALLET_STATE)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(reloaded.version, WALLET_STATE_VERSION);
        assert!(reloaded.keys.contains_key(&Asset::Grin));
    }

    #[tokio::test]
    async fn reveal_seed_requires_password() {
        let store = MemoryStore::new();
        let _ = fresh_wallet(&store).await;
        let vault = Vault::new(&store);

        let words = vault.reveal_seed(PASS).await.unwrap();
        assert_eq!(words.join(" "), PHRASE);
        assert!(matches!(
            vault.reveal_seed("wrong password!").await,
            Err(Error::BadPassword)
        ));
    }

    #[tokio::test]
    async fn corrupt_bundle_is_missing_key() {
        let store = MemoryStore::new();
        let (mut state, _) = fresh_wallet(&store).await;

        // Cross-wire a family: store a UTXO bundle under XMR.
        let btc = state.keys.get(&Asset::Btc).unwrap().clone();
        state.keys.insert(Asset::Xmr, btc);
        store::put_json(&store, keys::WALLET_STATE, &state)
            .await
            .unwrap();

        let vault = Vault::new(&store);
        assert!(matches!(
            vault.unlock(PASS).await,
            Err(Error::MissingKey(Asset::Xmr))
        ));
    }

    #[tokio::test]
    async fn addresses_are_present_per_chain() {
        let store = MemoryStore::new();
        let (state, _) = fresh_wallet(&store).await;
        assert!(state.keys[&Asset::Btc].address().starts_with("bc1q"));
        assert!(state.keys[&Asset::Ltc].address().starts_with("ltc1q"));
        assert!(state.keys[&Asset::Xmr].address().starts_with('4'));
        assert!(state.keys[&Asset::Wow].address().starts_with('W'));
        assert!(state.keys[&Asset::Grin].address().starts_with("grin1"));
    }
}
