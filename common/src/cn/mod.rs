//! CryptoNote primitives: Keccak-256, varints, key derivations and key
//! images for the Monero/Wownero engines.
//!
//! The derivation chain for an output we received in transaction `R` at
//! output index `i`, with view scalar `a` and spend scalar `b`:
//!
//! ```text
//! D   = 8 * a * R                      (shared-secret "derivation")
//! s_i = H_s(D || varint(i))            (derivation scalar)
//! x   = s_i + b                        (one-time private key)
//! P   = x * G                          (one-time public key)
//! KI  = x * hash_to_ec(P)              (key image)
//! ```
//!
//! The multiply-by-8 matches the reference `generate_key_derivation`; the
//! server cannot tell us anything here that we do not recompute ourselves.

pub mod base58;
pub mod fe;
mod hash_to_ec_impl;

pub use hash_to_ec_impl::hash_to_ec;

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use sha3::{Digest, Keccak256};
use thiserror::Error;
use zeroize::Zeroize;

use crate::ed25519;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    #[error("invalid curve point")]
    InvalidPoint,
}

/// Keccak-256 (the original padding, not SHA-3).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Append the CryptoNote varint encoding of `n` (7-bit little-endian
/// groups, high bit marks continuation).
pub fn write_varint(buf: &mut Vec<u8>, mut n: u64) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn varint(n: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    write_varint(&mut buf, n);
    buf
}

/// `H_s`: Keccak-256 reduced into a scalar.
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(keccak256(data))
}

/// The shared-secret derivation `D = 8 * a * R`, compressed.
pub fn generate_key_derivation(
    tx_pub: &[u8; 32],
    view_scalar: &Scalar,
) -> Result<[u8; 32], Error> {
    let r = ed25519::point(tx_pub).map_err(|_| Error::InvalidPoint)?;
    let d = (view_scalar * r).mul_by_cofactor();
    Ok(d.compress().to_bytes())
}

/// `H_s(D || varint(i))`.
pub fn derivation_to_scalar(derivation: &[u8; 32], output_index: u64) -> Scalar {
    let mut buf = Vec::with_capacity(32 + 10);
    buf.extend_from_slice(derivation);
    write_varint(&mut buf, output_index);
    let scalar = hash_to_scalar(&buf);
    buf.zeroize();
    scalar
}

/// The reconstructed secret/public/key-image triple for one output.
pub struct OneTimeKeys {
    pub secret: Scalar,
    pub public: [u8; 32],
    pub key_image: [u8; 32],
}

impl Drop for OneTimeKeys {
    fn drop(&mut self) {
        // The public parts are not secret.
        self.secret.zeroize();
    }
}

/// Reconstruct the one-time keys and key image for the output at
/// `output_index` of the transaction with public key `tx_pub`.
pub fn derive_output_keys(
    view_scalar: &Scalar,
    spend_scalar: &Scalar,
    tx_pub: &[u8; 32],
    output_index: u64,
) -> Result<OneTimeKeys, Error> {
    let derivation = generate_key_derivation(tx_pub, view_scalar)?;
    let s_i = derivation_to_scalar(&derivation, output_index);
    let x = s_i + spend_scalar;
    let public = EdwardsPoint::mul_base(&x).compress().to_bytes();
    let key_image = key_image(&x, &public);
    Ok(OneTimeKeys {
        secret: x,
        public,
        key_image,
    })
}

/// `KI = x * hash_to_ec(P)`, compressed.
pub fn key_image(secret: &Scalar, one_time_pub: &[u8; 32]) -> [u8; 32] {
    (secret * hash_to_ec(one_time_pub)).compress().to_bytes()
}

#[cfg(test)]
mod test {
    use proptest::arbitrary::any;
    use proptest::{prop_assert_eq, proptest};
    use ring::digest;

    use super::*;

    fn sha256_scalar(data: &[u8]) -> Scalar {
        let hash = digest::digest(&digest::SHA256, data);
        let bytes: [u8; 32] = hash.as_ref().try_into().unwrap();
        Scalar::from_bytes_mod_order(bytes)
    }

    #[test]
    fn varint_encoding() {
        assert_eq!(varint(0), vec![0x00]);
        assert_eq!(varint(1), vec![0x01]);
        assert_eq!(varint(127), vec![0x7f]);
        assert_eq!(varint(128), vec![0x80, 0x01]);
        assert_eq!(varint(300), vec![0xac, 0x02]);
        assert_eq!(varint(u64::MAX).len(), 10);
    }

    #[test]
    fn keccak_is_legacy_padding() {
        // Keccak-256(""), NOT SHA3-256("").
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470",
        );
    }

    /// Key-image construction from the fixed scenario: view scalar
    /// `SHA-256("view")`, spend scalar `SHA-256("spend")`, tx public key
    /// `G * H_s("R")`, output index 0.
    #[test]
    fn key_image_scenario() {
        let view = sha256_scalar(b"view");
        let spend = sha256_scalar(b"spend");
        let tx_pub = EdwardsPoint::mul_base(&hash_to_scalar(b"R"))
            .compress()
            .to_bytes();

        let keys =
            derive_output_keys(&view, &spend, &tx_pub, 0).unwrap();

        // The one-time public key must be the secret's basepoint multiple,
        // and the key image must be x * H_p(P) for that same x.
        assert_eq!(
            keys.public,
            EdwardsPoint::mul_base(&keys.secret).compress().to_bytes()
        );
        assert_eq!(keys.key_image, key_image(&keys.secret, &keys.public));

        // Deterministic across invocations.
        let again =
            derive_output_keys(&view, &spend, &tx_pub, 0).unwrap();
        assert_eq!(keys.key_image, again.key_image);

        // A different output index yields an unrelated image.
        let other =
            derive_output_keys(&view, &spend, &tx_pub, 1).unwrap();
        assert_ne!(keys.key_image, other.key_image);
    }

    /// The key image is a pure function of
    /// `(a, b, R, i)`, regardless of where `R` came from.
    #[test]
    fn key_image_independent_of_r_source() {
        proptest!(|(
            view_raw in any::<[u8; 32]>(),
            spend_raw in any::<[u8; 32]>(),
            r_raw in any::<[u8; 32]>(),
            index in 0u64..32,
        )| {
            let view = Scalar::from_bytes_mod_order(view_raw);
            let spend = Scalar::from_bytes_mod_order(spend_raw);
            let tx_pub = EdwardsPoint::mul_base(
                &Scalar::from_bytes_mod_order(r_raw),
            )
            .compress()
            .to_bytes();

            // "Server copy": a byte-for-byte round trip of the tx pub.
            let server_copy: [u8; 32] =
                hex::decode(hex::encode(tx_pub)).unwrap().try_into().unwrap();

            let ours =
                derive_output_keys(&view, &spend, &tx_pub, index).unwrap();
            let theirs =
                derive_output_keys(&view, &spend, &server_copy, index)
                    .unwrap();
            prop_assert_eq!(ours.key_image, theirs.key_image);
        });
    }
}
