//! ECIES over secp256k1, used for the social-tip key handoff.
//!
//! The sender encrypts the tip's private scalar so that only the holder
//! of the recipient's long-term BTC key can recover it:
//!
//! ```text
//! (eph_sk, eph_pk) := fresh keypair
//! shared           := ECDH(eph_sk, recipient_pk)
//! aes_key          := HKDF-SHA256(ikm=shared, salt=DOMAIN, info="v1")
//! out              := eph_pk (33 bytes) || AES-256-GCM(aes_key, plaintext)
//! ```
//!
//! The AEAD layout is the usual `nonce || ct || tag` from [`crate::aes`].

use ring::hkdf;
use thiserror::Error;
use zeroize::Zeroize;

use crate::rng::Crng;
use crate::{aes, secp};

/// HKDF salt; domain-separates these keys from any other ECDH use.
const HKDF_SALT: &[u8] = b"SMIRK-ECIES::secp256k1-aes256gcm";
const HKDF_INFO: &[u8] = b"v1";

const EPHEMERAL_PUB_LEN: usize = 33;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    #[error("ciphertext too short")]
    TooShort,
    #[error(transparent)]
    Secp(#[from] secp::Error),
    #[error("payload decryption failed")]
    Decrypt(#[from] aes::DecryptError),
}

fn derive_aes_key(shared: &[u8; 32]) -> [u8; 32] {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, HKDF_SALT).extract(shared);
    let okm = prk
        .expand(&[HKDF_INFO], hkdf::HKDF_SHA256)
        .expect("static output length is in range");
    let mut key = [0u8; 32];
    okm.fill(&mut key).expect("static output length matches");
    key
}

/// Encrypt `plaintext` to the holder of `recipient_pub` (33 bytes,
/// compressed).
pub fn encrypt(
    rng: &mut impl Crng,
    plaintext: &[u8],
    recipient_pub: &[u8],
) -> Result<Vec<u8>, Error> {
    let (eph_sk, eph_pk) = secp::gen_keypair(rng);
    let mut shared = secp::ecdh(&eph_sk.secret_bytes(), recipient_pub)?;
    let mut aes_key = derive_aes_key(&shared);
    shared.zeroize();

    let mut out = Vec::with_capacity(
        EPHEMERAL_PUB_LEN + aes::encrypted_len(plaintext.len()),
    );
    out.extend_from_slice(&eph_pk.serialize());
    out.extend_from_slice(&aes::encrypt(rng, &aes_key, plaintext));
    aes_key.zeroize();
    Ok(out)
}

/// Decrypt a payload produced by [`encrypt`] with the recipient's scalar.
pub fn decrypt(
    data: &[u8],
    recipient_scalar: &[u8; 32],
) -> Result<Vec<u8>, Error> {
    if data.len() < EPHEMERAL_PUB_LEN + aes::encrypted_len(0) {
        return Err(Error::TooShort);
    }
    let (eph_pub, ciphertext) = data.split_at(EPHEMERAL_PUB_LEN);
    let mut shared = secp::ecdh(recipient_scalar, eph_pub)?;
    let mut aes_key = derive_aes_key(&shared);
    shared.zeroize();

    let plaintext = aes::decrypt(&aes_key, ciphertext);
    aes_key.zeroize();
    Ok(plaintext?)
}
