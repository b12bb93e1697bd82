//! Authenticated encryption of key material and tip payloads.
//!
//! The scheme is deliberately boring: AES-256-GCM with a fresh random
//! 12-byte nonce sampled per call. The layout on the wire / at rest is
//!
//! ```text
//! out := [nonce (12)] || [ciphertext] || [tag (16)]
//! ```
//!
//! Nonces are random rather than counter-based because the ciphertexts are
//! few (one per stored scalar, one per tip) and there is no reliable
//! monotonic counter across extension restarts. Decryption failures are
//! indistinguishable between a wrong key and corrupted data, which is
//! exactly what the unlock path wants: a bad password surfaces as
//! [`DecryptError`].

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use thiserror::Error;

use crate::rng::Crng;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;
/// AES-GCM tag length.
pub const TAG_LEN: usize = 16;

/// The smallest possible output: empty plaintext.
pub const fn encrypted_len(plaintext_len: usize) -> usize {
    NONCE_LEN + plaintext_len + TAG_LEN
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("decrypt error: bad key, or ciphertext is corrupted")]
pub struct DecryptError;

fn aes_key(key: &[u8; 32]) -> LessSafeKey {
    let unbound = UnboundKey::new(&aead::AES_256_GCM, key)
        .expect("key length is static");
    LessSafeKey::new(unbound)
}

/// Encrypt `plaintext` under `key`, returning `nonce || ciphertext || tag`.
pub fn encrypt(
    rng: &mut impl Crng,
    key: &[u8; 32],
    plaintext: &[u8],
) -> Vec<u8> {
    let nonce_bytes: [u8; NONCE_LEN] = crate::rng::gen_bytes(rng);

    let mut out = Vec::with_capacity(encrypted_len(plaintext.len()));
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(plaintext);

    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let tag = aes_key(key)
        .seal_in_place_separate_tag(nonce, Aad::empty(), &mut out[NONCE_LEN..])
        .expect("cannot encrypt more than ~4 GiB at once");
    out.extend_from_slice(tag.as_ref());
    out
}

/// Decrypt `nonce || ciphertext || tag` produced by [`encrypt`].
pub fn decrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if data.len() < encrypted_len(0) {
        return Err(DecryptError);
    }
    let (nonce_bytes, ct_and_tag) = data.split_at(NONCE_LEN);
    let nonce_arr: [u8; NONCE_LEN] =
        nonce_bytes.try_into().expect("split length is static");
    let nonce = Nonce::assume_unique_for_key(nonce_arr);

    let mut buf = ct_and_tag.to_vec();
    let plaintext = aes_key(key)
        .open_in_place(nonce, Aad::empty(), &mut buf)
        .map_err(|_| DecryptError)?;
    let plaintext_len = plaintext.len();
    buf.truncate(plaintext_len);
    Ok(buf)
}

#[cfg(test)]
mod test {
    use proptest::arbitrary::any;
    use proptest::collection::vec;
    use proptest::{prop_assert, prop_assert_eq, proptest};

    use super::*;
    use crate::rng::FastRng;

    #[test]
    fn roundtrip() {
        proptest!(|(
            mut rng in any::<FastRng>(),
            key in any::<[u8; 32]>(),
            plaintext in vec(any::<u8>(), 0..=256),
        )| {
            let ct = encrypt(&mut rng, &key, &plaintext);
            prop_assert_eq!(ct.len(), encrypted_len(plaintext.len()));
            let pt = decrypt(&key, &ct).unwrap();
            prop_assert_eq!(pt, plaintext.clone());

            // fresh nonce each call
            let ct2 = encrypt(&mut rng, &key, &plaintext);
            prop_assert!(ct != ct2);
        });
    }

    #[test]
    fn tag_mismatch_fails() {
        let mut rng = FastRng::from_u64(42);
        let key = [9u8; 32];
        let mut ct = encrypt(&mut rng, &key, b"scalar bytes");
        *ct.last_mut().unwrap() ^= 0x01;
        assert_eq!(decrypt(&key, &ct), Err(DecryptError));
    }

    #[test]
    fn wrong_key_fails() {
        let mut rng = FastRng::from_u64(42);
        let ct = encrypt(&mut rng, &[1u8; 32], b"scalar bytes");
        assert_eq!(decrypt(&[2u8; 32], &ct), Err(DecryptError));
    }

    #[test]
    fn truncated_input_fails() {
        assert_eq!(decrypt(&[0u8; 32], &[0u8; 27]), Err(DecryptError));
    }
}
