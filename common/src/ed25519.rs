//! Ed25519 signing and scalar arithmetic.
//!
//! The wallet stores *raw scalars*, not RFC 8032 seeds: CryptoNote spend
//! and view keys are already-reduced scalars, and the Grin slatepack key
//! is derived as a scalar directly. Standard ed25519 libraries only sign
//! with a seed, so the raw-scalar scheme here derives a deterministic
//! nonce from the scalar itself:
//!
//! ```text
//! r = SHA-512(SHA-512(scalar) || msg) mod L
//! R = r * G
//! k = SHA-512(R || A || msg) mod L
//! s = r + k * scalar  (mod L)
//! sig = R || s
//! ```
//!
//! which verifies with the standard equation `s*G == R + k*A`, so
//! verifiers need no knowledge of the scheme. Seed-based signing is also
//! provided for completeness.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::{clamp_integer, Scalar};
use ring::digest::{Context, SHA512};
use thiserror::Error;
use zeroize::Zeroize;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    #[error("ed25519 scalar is not canonical (>= L)")]
    InvalidScalar,
    #[error("ed25519 point fails to decompress")]
    InvalidPoint,
    #[error("invalid ed25519 signature")]
    InvalidSignature,
}

/// Parse a canonical scalar (< L). The wallet only ever stores reduced
/// scalars; anything else is corruption.
pub fn scalar(bytes: &[u8; 32]) -> Result<Scalar, Error> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
        .ok_or(Error::InvalidScalar)
}

/// Reduce 32 arbitrary bytes into a canonical scalar.
pub fn scalar_reduce32(bytes: &[u8; 32]) -> Scalar {
    Scalar::from_bytes_mod_order(*bytes)
}

/// Reduce a 64-byte hash output into a canonical scalar.
pub fn scalar_reduce64(bytes: &[u8; 64]) -> Scalar {
    Scalar::from_bytes_mod_order_wide(bytes)
}

/// Decompress a point, rejecting invalid encodings.
pub fn point(bytes: &[u8; 32]) -> Result<EdwardsPoint, Error> {
    CompressedEdwardsY(*bytes)
        .decompress()
        .ok_or(Error::InvalidPoint)
}

/// `scalar * G`, compressed.
pub fn public_from_scalar(scalar_bytes: &[u8; 32]) -> Result<[u8; 32], Error> {
    let s = scalar(scalar_bytes)?;
    Ok(EdwardsPoint::mul_base(&s).compress().to_bytes())
}

fn sha512(parts: &[&[u8]]) -> [u8; 64] {
    let mut ctx = Context::new(&SHA512);
    for part in parts {
        ctx.update(part);
    }
    let digest = ctx.finish();
    let mut out = [0u8; 64];
    out.copy_from_slice(digest.as_ref());
    out
}

/// Sign `msg` with a raw scalar. See the module docs for the scheme.
pub fn sign_with_scalar(
    msg: &[u8],
    scalar_bytes: &[u8; 32],
) -> Result<[u8; SIGNATURE_LEN], Error> {
    let x = scalar(scalar_bytes)?;
    let public = EdwardsPoint::mul_base(&x).compress().to_bytes();

    let mut scalar_hash = sha512(&[scalar_bytes.as_slice()]);
    let r = scalar_reduce64(&sha512(&[scalar_hash.as_slice(), msg]));
    scalar_hash.zeroize();

    let big_r = EdwardsPoint::mul_base(&r).compress().to_bytes();
    let k = scalar_reduce64(&sha512(&[
        big_r.as_slice(),
        public.as_slice(),
        msg,
    ]));
    let s = r + k * x;

    let mut sig = [0u8; SIGNATURE_LEN];
    sig[..32].copy_from_slice(&big_r);
    sig[32..].copy_from_slice(s.as_bytes());
    Ok(sig)
}

/// Standard RFC 8032 signing from a 32-byte seed.
pub fn sign_with_seed(msg: &[u8], seed: &[u8; 32]) -> [u8; SIGNATURE_LEN] {
    let mut expanded = sha512(&[seed.as_slice()]);
    let mut lower = [0u8; 32];
    let mut prefix = [0u8; 32];
    lower.copy_from_slice(&expanded[..32]);
    prefix.copy_from_slice(&expanded[32..]);
    expanded.zeroize();

    let a = Scalar::from_bytes_mod_order(clamp_integer(lower));
    lower.zeroize();
    let public = EdwardsPoint::mul_base(&a).compress().to_bytes();

    let r = scalar_reduce64(&sha512(&[prefix.as_slice(), msg]));
    prefix.zeroize();
    let big_r = EdwardsPoint::mul_base(&r).compress().to_bytes();
    let k = scalar_reduce64(&sha512(&[
        big_r.as_slice(),
        public.as_slice(),
        msg,
    ]));
    let s = r + k * a;

    let mut sig = [0u8; SIGNATURE_LEN];
    sig[..32].copy_from_slice(&big_r);
    sig[32..].copy_from_slice(s.as_bytes());
    sig
}

/// Public key for RFC 8032 seed signing.
pub fn public_from_seed(seed: &[u8; 32]) -> [u8; 32] {
    let mut expanded = sha512(&[seed.as_slice()]);
    let mut lower = [0u8; 32];
    lower.copy_from_slice(&expanded[..32]);
    expanded.zeroize();
    let a = Scalar::from_bytes_mod_order(clamp_integer(lower));
    lower.zeroize();
    EdwardsPoint::mul_base(&a).compress().to_bytes()
}

/// Verify `sig` over `msg` against a compressed public key.
///
/// Checks `s*G == R + k*A` with `k = SHA-512(R || A || msg) mod L`, which
/// accepts signatures from both the raw-scalar and the seed scheme.
pub fn verify(
    sig: &[u8; SIGNATURE_LEN],
    msg: &[u8],
    public: &[u8; 32],
) -> Result<(), Error> {
    let big_r: [u8; 32] = sig[..32].try_into().expect("static split");
    let s_bytes: [u8; 32] = sig[32..].try_into().expect("static split");

    // Reject non-canonical s to rule out malleability.
    let s = Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes))
        .ok_or(Error::InvalidSignature)?;
    let a = point(public)?;

    let k = scalar_reduce64(&sha512(&[
        big_r.as_slice(),
        public.as_slice(),
        msg,
    ]));
    // s*G - k*A should equal R.
    let r_check =
        EdwardsPoint::vartime_double_scalar_mul_basepoint(&-k, &a, &s);
    if r_check.compress().to_bytes() == big_r {
        Ok(())
    } else {
        Err(Error::InvalidSignature)
    }
}

#[cfg(test)]
mod test {
    use proptest::arbitrary::any;
    use proptest::{prop_assert, proptest};

    use super::*;

    #[test]
    fn raw_scalar_sign_verify() {
        proptest!(|(raw in any::<[u8; 32]>(), msg in any::<Vec<u8>>())| {
            let scalar_bytes = scalar_reduce32(&raw).to_bytes();
            let public = public_from_scalar(&scalar_bytes).unwrap();
            let sig = sign_with_scalar(&msg, &scalar_bytes).unwrap();
            verify(&sig, &msg, &public).unwrap();

            // Tampered message must fail.
            let mut msg2 = msg.clone();
            msg2.push(0x55);
            prop_assert!(verify(&sig, &msg2, &public).is_err());
        });
    }

    #[test]
    fn seed_sign_verify() {
        proptest!(|(seed in any::<[u8; 32]>(), msg in any::<Vec<u8>>())| {
            let public = public_from_seed(&seed);
            let sig = sign_with_seed(&msg, &seed);
            verify(&sig, &msg, &public).unwrap();
        });
    }

    #[test]
    fn signing_is_deterministic() {
        let scalar_bytes = scalar_reduce32(&[7u8; 32]).to_bytes();
        let sig1 = sign_with_scalar(b"msg", &scalar_bytes).unwrap();
        let sig2 = sign_with_scalar(b"msg", &scalar_bytes).unwrap();
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn non_canonical_scalar_rejected() {
        // L <= 2^253, so all-0xff is way out of range.
        assert_eq!(
            public_from_scalar(&[0xff; 32]),
            Err(Error::InvalidScalar)
        );
    }
}
