//! Session-scoped key persistence.
//!
//! The browser's session area survives worker restarts but is mandated
//! to clear on browser shutdown, which makes it the right home for the
//! decrypted key material: a restarted worker repopulates the unlocked
//! maps without asking for the password again. The blob is versioned;
//! v1 predates the Grin bundle, which restore synthesizes from the
//! stored mnemonic exactly like the vault migration does.

use std::collections::BTreeMap;

use common::asset::Asset;
use common::seed;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use smirk_wallet::store::{self, keys, KvStore};
use smirk_wallet::vault::Unlocked;
use smirk_wallet::Error;
use tracing::{info, warn};
use zeroize::Zeroize;

pub const SESSION_VERSION: u32 = 2;

fn version_v1() -> u32 {
    1
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionKeys {
    #[serde(default = "version_v1")]
    version: u32,
    /// Asset -> hex private scalar.
    keys: BTreeMap<Asset, String>,
    /// Asset -> hex view scalar (XMR / WOW).
    view_keys: BTreeMap<Asset, String>,
    mnemonic: String,
    #[serde(default)]
    grin_extended: Option<String>,
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        for value in self.keys.values_mut() {
            value.zeroize();
        }
        for value in self.view_keys.values_mut() {
            value.zeroize();
        }
        self.mnemonic.zeroize();
        if let Some(ext) = &mut self.grin_extended {
            ext.zeroize();
        }
    }
}

/// Write the unlocked material to the session area.
pub async fn persist(
    session_store: &dyn KvStore,
    unlocked: &Unlocked,
) -> Result<(), Error> {
    let (keys_map, view_map, mnemonic) = unlocked.export_parts();
    let blob = SessionKeys {
        version: SESSION_VERSION,
        keys: keys_map
            .iter()
            .map(|(asset, scalar)| (*asset, hex::encode(scalar)))
            .collect(),
        view_keys: view_map
            .iter()
            .map(|(asset, scalar)| (*asset, hex::encode(scalar)))
            .collect(),
        mnemonic,
        grin_extended: unlocked.cached_grin_extended().map(hex::encode),
    };
    store::put_json(session_store, keys::SESSION_KEYS, &blob)
        .await
        .map_err(Error::remote)
}

fn parse_scalar_map(
    map: &BTreeMap<Asset, String>,
) -> Result<BTreeMap<Asset, Secret<[u8; 32]>>, Error> {
    map.iter()
        .map(|(asset, hex_scalar)| {
            let mut bytes = hex::decode(hex_scalar).map_err(|_| {
                Error::StaleState("session scalar is corrupt".into())
            })?;
            let scalar: [u8; 32] =
                bytes.as_slice().try_into().map_err(|_| {
                    Error::StaleState("session scalar is corrupt".into())
                })?;
            bytes.zeroize();
            Ok((*asset, Secret::new(scalar)))
        })
        .collect()
}

/// Restore the unlocked state from the session area, if present.
/// Corrupt blobs are dropped rather than surfaced: the user just has to
/// unlock again.
pub async fn restore(
    session_store: &dyn KvStore,
) -> Result<Option<Unlocked>, Error> {
    let blob: SessionKeys =
        match store::get_json(session_store, keys::SESSION_KEYS)
            .await
            .map_err(Error::remote)?
        {
            Some(blob) => blob,
            None => return Ok(None),
        };

    let restored = (|| -> Result<Unlocked, Error> {
        let mut keys_map = parse_scalar_map(&blob.keys)?;
        let view_map = parse_scalar_map(&blob.view_keys)?;

        // v1 sessions predate Grin: synthesize the bundle in memory.
        if !keys_map.contains_key(&Asset::Grin) {
            info!("migrating session keys: deriving grin scalar");
            let mnemonic = seed::parse_mnemonic(&blob.mnemonic)?;
            let derived = seed::derive_all_keys(&mnemonic)?;
            keys_map.insert(
                Asset::Grin,
                Secret::new(*derived.grin.scalar.expose_secret()),
            );
        }

        let unlocked = Unlocked::from_parts(
            keys_map,
            view_map,
            Secret::new(blob.mnemonic.clone()),
        );
        if let Some(ext_hex) = &blob.grin_extended {
            if let Ok(ext) = hex::decode(ext_hex) {
                unlocked.cache_grin_extended(ext);
            }
        }
        Ok(unlocked)
    })();

    match restored {
        Ok(unlocked) => Ok(Some(unlocked)),
        Err(err) => {
            warn!(%err, "session restore failed; clearing session blob");
            clear(session_store).await?;
            Ok(None)
        }
    }
}

/// Drop the session copy (explicit lock, auto-lock, or corruption).
pub async fn clear(session_store: &dyn KvStore) -> Result<(), Error> {
    session_store
        .remove(keys::SESSION_KEYS)
        .await
        .map_err(Error::remote)
}
