//! Seed handling and per-chain key derivation.
//!
//! A single BIP39 mnemonic is the root of everything. `derive_all_keys`
//! is a pure function from the mnemonic to the five per-chain key
//! bundles; it is re-run on restore and must be deterministic forever.
//!
//! Derivation rules per chain family:
//!
//! - **BTC / LTC**: BIP84, `m/84'/coin'/0'/0/0` (coin types 0 and 2) over
//!   the BIP39 seed. One key per chain; the wallet is single-address.
//! - **XMR / WOW**: the spend scalar is an HKDF-derived 32-byte secret
//!   reduced mod L; the view scalar is `H_s(spend)` per the CryptoNote
//!   convention, so view-only state can always be rebuilt from spend.
//! - **GRIN**: an ed25519 scalar from HKDF; its public point doubles as
//!   the slatepack address key.

use std::str::FromStr;

use bitcoin::secp256k1::Secp256k1;
use bitcoin::util::bip32::{DerivationPath, ExtendedPrivKey};
use bitcoin::Network;
use curve25519_dalek::edwards::EdwardsPoint;
use once_cell::sync::Lazy;
use ring::{digest, hkdf};
use secrecy::{ExposeSecret, Secret};
use thiserror::Error;
use zeroize::Zeroize;

use crate::rng::Crng;
use crate::{cn, ed25519};

/// The HKDF domain separation value as a human-readable byte string.
const HKDF_SALT_STR: &[u8] = b"SMIRK-HASH-REALM::RootSeed";

/// `SHA-256(HKDF_SALT_STR)`, computed once.
static HKDF_SALT: Lazy<[u8; 32]> = Lazy::new(|| {
    digest::digest(&digest::SHA256, HKDF_SALT_STR)
        .as_ref()
        .try_into()
        .expect("SHA-256 output is 32 bytes")
});

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("invalid mnemonic: {0}")]
    BadMnemonic(String),
    #[error("unsupported word count (want 12 or 24)")]
    BadWordCount,
    #[error("BIP32 derivation failed")]
    Bip32,
}

/// Generate a fresh English mnemonic with 12 or 24 words.
pub fn generate_mnemonic(
    rng: &mut impl Crng,
    word_count: usize,
) -> Result<bip39::Mnemonic, Error> {
    let entropy_len = match word_count {
        12 => 16,
        24 => 32,
        _ => return Err(Error::BadWordCount),
    };
    let mut entropy = [0u8; 32];
    rng.fill_bytes(&mut entropy[..entropy_len]);
    let mnemonic = bip39::Mnemonic::from_entropy(&entropy[..entropy_len])
        .map_err(|e| Error::BadMnemonic(e.to_string()));
    entropy.zeroize();
    mnemonic
}

/// Parse a user-supplied mnemonic, normalizing whitespace.
pub fn parse_mnemonic(phrase: &str) -> Result<bip39::Mnemonic, Error> {
    let normalized =
        phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    let mnemonic = bip39::Mnemonic::parse_normalized(&normalized)
        .map_err(|e| Error::BadMnemonic(e.to_string()))?;
    match mnemonic.word_count() {
        12 | 24 => Ok(mnemonic),
        _ => Err(Error::BadWordCount),
    }
}

/// The 64-byte BIP39 seed with labeled HKDF child derivation.
pub struct RootSeed(Secret<[u8; 64]>);

impl RootSeed {
    pub fn from_mnemonic(mnemonic: &bip39::Mnemonic) -> Self {
        // Fixed (empty) passphrase: the password protects the vault, not
        // the seed derivation.
        Self(Secret::new(mnemonic.to_seed("")))
    }

    fn extract(&self) -> hkdf::Prk {
        hkdf::Salt::new(hkdf::HKDF_SHA256, HKDF_SALT.as_slice())
            .extract(self.0.expose_secret().as_slice())
    }

    /// Derive a new labeled child secret.
    pub fn derive(&self, label: &[u8]) -> Secret<[u8; 32]> {
        let mut out = [0u8; 32];
        self.extract()
            .expand(&[label], hkdf::HKDF_SHA256)
            .expect("static output length is in range")
            .fill(&mut out)
            .expect("static output length matches");
        let secret = Secret::new(out);
        out.zeroize();
        secret
    }

    pub fn expose(&self) -> &[u8; 64] {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for RootSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Avoid formatting secrets.
        f.write_str("RootSeed(..)")
    }
}

/// A secp256k1 key bundle (BTC / LTC).
pub struct SecpKeyBundle {
    pub privkey: Secret<[u8; 32]>,
    pub pubkey: [u8; 33],
}

/// A CryptoNote key bundle (XMR / WOW).
pub struct CnKeyBundle {
    pub spend: Secret<[u8; 32]>,
    pub view: Secret<[u8; 32]>,
    pub spend_pub: [u8; 32],
    pub view_pub: [u8; 32],
}

/// A Mimblewimble key bundle (GRIN): the slatepack identity.
pub struct GrinKeyBundle {
    pub scalar: Secret<[u8; 32]>,
    pub public: [u8; 32],
}

/// Everything derivable from the mnemonic, one bundle per chain.
pub struct WalletKeys {
    pub btc: SecpKeyBundle,
    pub ltc: SecpKeyBundle,
    pub xmr: CnKeyBundle,
    pub wow: CnKeyBundle,
    pub grin: GrinKeyBundle,
}

fn derive_bip84(seed: &RootSeed, coin_type: u32) -> Result<SecpKeyBundle, Error> {
    let secp = Secp256k1::new();
    let master = ExtendedPrivKey::new_master(Network::Bitcoin, seed.expose())
        .map_err(|_| Error::Bip32)?;
    let path =
        DerivationPath::from_str(&format!("m/84'/{coin_type}'/0'/0/0"))
            .expect("path literal is valid");
    let child =
        master.derive_priv(&secp, &path).map_err(|_| Error::Bip32)?;
    let privkey = child.private_key;
    let pubkey = bitcoin::secp256k1::PublicKey::from_secret_key(
        &secp, &privkey,
    )
    .serialize();
    Ok(SecpKeyBundle {
        privkey: Secret::new(privkey.secret_bytes()),
        pubkey,
    })
}

fn derive_cryptonote(seed: &RootSeed, label: &[u8]) -> CnKeyBundle {
    let spend_raw = seed.derive(label);
    let spend = ed25519::scalar_reduce32(spend_raw.expose_secret());
    // View key from spend key, the CryptoNote convention.
    let view = cn::hash_to_scalar(spend.as_bytes());

    let spend_pub = EdwardsPoint::mul_base(&spend).compress().to_bytes();
    let view_pub = EdwardsPoint::mul_base(&view).compress().to_bytes();
    CnKeyBundle {
        spend: Secret::new(spend.to_bytes()),
        view: Secret::new(view.to_bytes()),
        spend_pub,
        view_pub,
    }
}

fn derive_grin(seed: &RootSeed) -> GrinKeyBundle {
    let raw = seed.derive(b"grin slatepack key");
    let scalar = ed25519::scalar_reduce32(raw.expose_secret());
    let public = EdwardsPoint::mul_base(&scalar).compress().to_bytes();
    GrinKeyBundle {
        scalar: Secret::new(scalar.to_bytes()),
        public,
    }
}

/// Derive every per-chain key bundle from the mnemonic. Pure and
/// deterministic.
pub fn derive_all_keys(mnemonic: &bip39::Mnemonic) -> Result<WalletKeys, Error> {
    let seed = RootSeed::from_mnemonic(mnemonic);
    Ok(WalletKeys {
        btc: derive_bip84(&seed, 0)?,
        ltc: derive_bip84(&seed, 2)?,
        xmr: derive_cryptonote(&seed, b"xmr spend key"),
        wow: derive_cryptonote(&seed, b"wow spend key"),
        grin: derive_grin(&seed),
    })
}

#[cfg(test)]
mod test {
    use proptest::arbitrary::any;
    use proptest::{prop_assert_eq, proptest};

    use super::*;
    use crate::rng::FastRng;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon about";

    #[test]
    fn derivation_is_deterministic() {
        let mnemonic = parse_mnemonic(PHRASE).unwrap();
        let a = derive_all_keys(&mnemonic).unwrap();
        let b = derive_all_keys(&mnemonic).unwrap();
        assert_eq!(a.btc.pubkey, b.btc.pubkey);
        assert_eq!(a.ltc.pubkey, b.ltc.pubkey);
        assert_eq!(a.xmr.spend_pub, b.xmr.spend_pub);
        assert_eq!(a.xmr.view_pub, b.xmr.view_pub);
        assert_eq!(a.wow.spend_pub, b.wow.spend_pub);
        assert_eq!(a.grin.public, b.grin.public);
        assert_eq!(
            a.btc.privkey.expose_secret(),
            b.btc.privkey.expose_secret()
        );
    }

    #[test]
    fn chains_get_distinct_keys() {
        let mnemonic = parse_mnemonic(PHRASE).unwrap();
        let keys = derive_all_keys(&mnemonic).unwrap();
        assert_ne!(keys.btc.pubkey, keys.ltc.pubkey);
        assert_ne!(keys.xmr.spend_pub, keys.wow.spend_pub);
        assert_ne!(keys.xmr.spend_pub, keys.xmr.view_pub);
    }

    #[test]
    fn view_key_is_hs_of_spend() {
        let mnemonic = parse_mnemonic(PHRASE).unwrap();
        let keys = derive_all_keys(&mnemonic).unwrap();
        let view =
            cn::hash_to_scalar(keys.xmr.spend.expose_secret());
        assert_eq!(keys.xmr.view.expose_secret(), &view.to_bytes());
    }

    #[test]
    fn generate_word_counts() {
        let mut rng = FastRng::from_u64(11);
        let m12 = generate_mnemonic(&mut rng, 12).unwrap();
        assert_eq!(m12.word_count(), 12);
        let m24 = generate_mnemonic(&mut rng, 24).unwrap();
        assert_eq!(m24.word_count(), 24);
        assert!(matches!(
            generate_mnemonic(&mut rng, 15),
            Err(Error::BadWordCount)
        ));
    }

    #[test]
    fn parse_normalizes_whitespace() {
        let sloppy = format!("  {}  ", PHRASE.replace(' ', "   "));
        let a = parse_mnemonic(&sloppy).unwrap();
        let b = parse_mnemonic(PHRASE).unwrap();
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn bad_checksum_rejected() {
        let bad = PHRASE.replace("about", "abandon");
        assert!(parse_mnemonic(&bad).is_err());
    }

    #[test]
    fn distinct_mnemonics_distinct_keys() {
        proptest!(|(mut rng in any::<FastRng>())| {
            let m1 = generate_mnemonic(&mut rng, 12).unwrap();
            let m2 = generate_mnemonic(&mut rng, 12).unwrap();
            let k1 = derive_all_keys(&m1).unwrap();
            let k2 = derive_all_keys(&m2).unwrap();
            prop_assert_eq!(
                m1.to_string() == m2.to_string(),
                k1.btc.pubkey == k2.btc.pubkey
            );
        });
    }
}
