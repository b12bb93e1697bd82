//! Password-based key derivation.
//!
//! A thin wrapper around [`ring::pbkdf2`] which fixes the parameters
//! (PBKDF2-HMAC-SHA256, 100 000 iterations, 32-byte output) to derive the
//! key-encryption-key (KEK) that guards every private scalar at rest.
//!
//! One master salt is sampled per wallet; every encrypted field uses that
//! same salt, so an unlock derives the KEK exactly once and reuses it for
//! each field.

use std::num::NonZeroU32;

use ring::pbkdf2;
use secrecy::{ExposeSecret, Secret};
use thiserror::Error;
use zeroize::Zeroize;

use crate::rng::Crng;

/// The specific algorithm used for KEK derivation.
static PBKDF2_ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;
/// The number of iterations used to stretch the derived key.
const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => panic!("iterations must be non-zero"),
};

/// The byte length of the per-wallet master salt.
pub const SALT_LEN: usize = 16;
/// The byte length of the derived KEK.
pub const KEK_LEN: usize = 32;

/// The minimum number of characters required in the password.
/// This is NOT the # of bytes in the password (i.e. not [`str::len`]).
pub const MIN_PASSWORD_LENGTH: usize = 8;
/// The maximum number of characters allowed in the password.
pub const MAX_PASSWORD_LENGTH: usize = 512;

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("password must have at least {MIN_PASSWORD_LENGTH} characters")]
    PasswordTooShort,
    #[error("password cannot have more than {MAX_PASSWORD_LENGTH} characters")]
    PasswordTooLong,
}

/// A derived key-encryption-key. Zeroized on drop via [`Secret`].
pub struct Kek(Secret<[u8; KEK_LEN]>);

impl Kek {
    pub fn expose(&self) -> &[u8; KEK_LEN] {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Avoid formatting secrets.
        f.write_str("Kek(..)")
    }
}

/// Sample a fresh per-wallet master salt.
pub fn gen_salt(rng: &mut impl Crng) -> [u8; SALT_LEN] {
    crate::rng::gen_bytes(rng)
}

/// Derive the KEK from a password and the wallet's master salt.
///
/// This does not validate password entropy beyond enforcing a
/// [minimum](MIN_PASSWORD_LENGTH) and [maximum](MAX_PASSWORD_LENGTH)
/// length; enforcing real entropy is the popup's job.
pub fn derive_kek(password: &str, salt: &[u8; SALT_LEN]) -> Result<Kek, Error> {
    validate_password_len(password)?;

    let mut kek_buf = [0u8; KEK_LEN];
    pbkdf2::derive(
        PBKDF2_ALGORITHM,
        PBKDF2_ITERATIONS,
        salt,
        password.as_bytes(),
        &mut kek_buf,
    );
    let kek = Kek(Secret::new(kek_buf));
    kek_buf.zeroize();
    Ok(kek)
}

/// Validate the length of a password the caller intends to derive with.
pub fn validate_password_len(password: &str) -> Result<(), Error> {
    let password_length = password.chars().count();
    if password_length < MIN_PASSWORD_LENGTH {
        return Err(Error::PasswordTooShort);
    }
    if password_length > MAX_PASSWORD_LENGTH {
        return Err(Error::PasswordTooLong);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn length_limits() {
        assert!(matches!(
            derive_kek("short", &[0u8; SALT_LEN]),
            Err(Error::PasswordTooShort)
        ));
        let long = "x".repeat(MAX_PASSWORD_LENGTH + 1);
        assert!(matches!(
            derive_kek(&long, &[0u8; SALT_LEN]),
            Err(Error::PasswordTooLong)
        ));
        // Character count, not byte count: 8 multi-byte chars are fine.
        derive_kek("ウォレット秘密鍵だ", &[0u8; SALT_LEN]).unwrap();
    }

    #[test]
    fn deterministic_per_salt() {
        let salt_a = [1u8; SALT_LEN];
        let salt_b = [2u8; SALT_LEN];
        let kek1 = derive_kek("correct horse battery", &salt_a).unwrap();
        let kek2 = derive_kek("correct horse battery", &salt_a).unwrap();
        let kek3 = derive_kek("correct horse battery", &salt_b).unwrap();
        assert_eq!(kek1.expose(), kek2.expose());
        assert_ne!(kek1.expose(), kek3.expose());
    }

    #[test]
    fn distinct_passwords_distinct_keks() {
        let salt = [7u8; SALT_LEN];
        let kek1 = derive_kek("hunter2hunter2", &salt).unwrap();
        let kek2 = derive_kek("hunter3hunter3", &salt).unwrap();
        assert_ne!(kek1.expose(), kek2.expose());
    }
}
