//! secp256k1 helpers shared by the UTXO engine, ECIES, and message signing.
//!
//! Wallet keys for the UTXO chains are raw 32-byte scalars; this module
//! turns them into compressed public keys, compact ECDSA signatures, and
//! ECDH shared secrets. The signing context is constructed once.

use bitcoin::consensus::Encodable;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::ecdh::SharedSecret;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::VarInt;
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::rng::Crng;

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// The prefix every signed Bitcoin message preimage starts with. The 0x18
/// byte is the varint length of the ASCII text that follows.
const BITCOIN_MSG_PREFIX: &[u8] = b"\x18Bitcoin Signed Message:\n";

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    #[error("invalid secp256k1 scalar")]
    InvalidScalar,
    #[error("invalid secp256k1 point")]
    InvalidPoint,
    #[error("invalid ECDSA signature encoding")]
    BadSignature,
    #[error("signature verification failed")]
    BadVerify,
}

/// Parse a 32-byte scalar, rejecting zero and out-of-order values.
pub fn secret_key(scalar: &[u8; 32]) -> Result<SecretKey, Error> {
    SecretKey::from_slice(scalar).map_err(|_| Error::InvalidScalar)
}

/// Parse a 33-byte compressed public key.
pub fn public_key(bytes: &[u8]) -> Result<PublicKey, Error> {
    PublicKey::from_slice(bytes).map_err(|_| Error::InvalidPoint)
}

/// Sample a fresh keypair, e.g. for an ephemeral tip key.
pub fn gen_keypair(rng: &mut impl Crng) -> (SecretKey, PublicKey) {
    // Rejection-sample until the 32 bytes are a valid scalar; the failure
    // probability per draw is ~2^-128.
    loop {
        let bytes: [u8; 32] = crate::rng::gen_bytes(rng);
        if let Ok(sk) = SecretKey::from_slice(&bytes) {
            let pk = PublicKey::from_secret_key(&SECP, &sk);
            return (sk, pk);
        }
    }
}

/// `scalar * G`, compressed (33 bytes).
pub fn get_public_key(scalar: &[u8; 32]) -> Result<[u8; 33], Error> {
    let sk = secret_key(scalar)?;
    Ok(PublicKey::from_secret_key(&SECP, &sk).serialize())
}

/// ECDSA-sign a 32-byte message hash, returning the 64-byte compact form.
pub fn sign(message_hash: &[u8; 32], scalar: &[u8; 32]) -> Result<[u8; 64], Error> {
    let sk = secret_key(scalar)?;
    let msg = Message::from_slice(message_hash)
        .expect("32-byte input is always a valid message");
    Ok(SECP.sign_ecdsa(&msg, &sk).serialize_compact())
}

/// Verify a compact signature against a 32-byte hash and a compressed key.
pub fn verify(
    sig: &[u8; 64],
    message_hash: &[u8; 32],
    pubkey: &[u8],
) -> Result<(), Error> {
    let sig = Signature::from_compact(sig).map_err(|_| Error::BadSignature)?;
    let msg = Message::from_slice(message_hash)
        .expect("32-byte input is always a valid message");
    let pk = public_key(pubkey)?;
    SECP.verify_ecdsa(&msg, &sig, &pk)
        .map_err(|_| Error::BadVerify)
}

/// ECDH: hashed x-only shared secret between `scalar` and `pubkey`.
pub fn ecdh(scalar: &[u8; 32], pubkey: &[u8]) -> Result<[u8; 32], Error> {
    let sk = secret_key(scalar)?;
    let pk = public_key(pubkey)?;
    Ok(SharedSecret::new(&pk, &sk).secret_bytes())
}

/// The double-SHA256 "Bitcoin Signed Message" digest:
/// `SHA256d("\x18Bitcoin Signed Message:\n" || varint(len(msg)) || msg)`.
pub fn bitcoin_message_hash(msg: &[u8]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(BITCOIN_MSG_PREFIX.len() + 9 + msg.len());
    preimage.extend_from_slice(BITCOIN_MSG_PREFIX);
    VarInt(msg.len() as u64)
        .consensus_encode(&mut preimage)
        .expect("writing to a Vec cannot fail");
    preimage.extend_from_slice(msg);
    sha256d::Hash::hash(&preimage).into_inner()
}
