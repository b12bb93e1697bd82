//! Address codecs for the three chain families.
//!
//! - BTC / LTC: native SegWit v0 (P2WPKH) bech32, HRP `bc` / `ltc`.
//! - XMR / WOW: CryptoNote base58 standard addresses,
//!   `varint(prefix) || spend_pub || view_pub || keccak4`.
//! - GRIN: bech32m over the ed25519 slatepack key. Not a coin
//!   destination; it only identifies a slatepack recipient.
//!
//! Decoders are strict: wrong HRP, wrong witness version, wrong prefix or
//! a failed checksum are all hard errors, because a mis-decoded address
//! means funds sent into the void.

use bech32::{FromBase32, ToBase32, Variant};
use bitcoin::hashes::{hash160, Hash};
use thiserror::Error;

use crate::cn;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    #[error("malformed address encoding")]
    BadEncoding,
    #[error("address checksum mismatch")]
    BadChecksum,
    #[error("address is for a different network or asset")]
    WrongNetwork,
    #[error("unexpected witness version or program length")]
    BadProgram,
}

// --- P2WPKH (BTC / LTC) --- //

/// Encode `pubkey` (33 bytes, compressed) as a P2WPKH address.
pub fn p2wpkh_address(pubkey: &[u8; 33], hrp: &str) -> String {
    let program = hash160::Hash::hash(pubkey);
    let mut data = vec![bech32::u5::try_from_u8(0).expect("0 < 32")];
    data.extend(program.into_inner().to_base32());
    bech32::encode(hrp, data, Variant::Bech32)
        .expect("HRP literals are valid")
}

/// Decode a P2WPKH address, returning the 20-byte witness program.
pub fn decode_p2wpkh(addr: &str, expected_hrp: &str) -> Result<[u8; 20], Error> {
    let (hrp, data, variant) =
        bech32::decode(addr).map_err(|_| Error::BadEncoding)?;
    if variant != Variant::Bech32 {
        return Err(Error::BadEncoding);
    }
    if hrp != expected_hrp {
        return Err(Error::WrongNetwork);
    }
    let (version, program_words) =
        data.split_first().ok_or(Error::BadEncoding)?;
    if version.to_u8() != 0 {
        return Err(Error::BadProgram);
    }
    let program =
        Vec::<u8>::from_base32(program_words).map_err(|_| Error::BadEncoding)?;
    program.try_into().map_err(|_| Error::BadProgram)
}

// --- CryptoNote (XMR / WOW) --- //

const CN_CHECKSUM_LEN: usize = 4;

/// Encode a CryptoNote standard address.
pub fn cn_address(prefix: u64, spend_pub: &[u8; 32], view_pub: &[u8; 32]) -> String {
    let mut data = cn::varint(prefix);
    data.extend_from_slice(spend_pub);
    data.extend_from_slice(view_pub);
    let checksum = cn::keccak256(&data);
    data.extend_from_slice(&checksum[..CN_CHECKSUM_LEN]);
    cn::base58::encode(&data)
}

fn read_varint(data: &[u8]) -> Result<(u64, usize), Error> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i >= 10 {
            return Err(Error::BadEncoding);
        }
        value |= u64::from(byte & 0x7f) << (7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::BadEncoding)
}

/// Decode a CryptoNote standard address, checking the checksum and the
/// expected network prefix. Returns `(spend_pub, view_pub)`.
pub fn decode_cn_address(
    addr: &str,
    expected_prefix: u64,
) -> Result<([u8; 32], [u8; 32]), Error> {
    let data = cn::base58::decode(addr).map_err(|_| Error::BadEncoding)?;
    if data.len() < CN_CHECKSUM_LEN {
        return Err(Error::BadEncoding);
    }
    let (body, checksum) = data.split_at(data.len() - CN_CHECKSUM_LEN);
    if &cn::keccak256(body)[..CN_CHECKSUM_LEN] != checksum {
        return Err(Error::BadChecksum);
    }
    let (prefix, prefix_len) = read_varint(body)?;
    if prefix != expected_prefix {
        return Err(Error::WrongNetwork);
    }
    let keys = &body[prefix_len..];
    if keys.len() != 64 {
        return Err(Error::BadEncoding);
    }
    let spend_pub: [u8; 32] = keys[..32].try_into().expect("static split");
    let view_pub: [u8; 32] = keys[32..].try_into().expect("static split");
    Ok((spend_pub, view_pub))
}

// --- Grin slatepack (bech32m) --- //

/// Encode an ed25519 public key as a slatepack address.
pub fn grin_address(public: &[u8; 32]) -> String {
    bech32::encode("grin", public.to_base32(), Variant::Bech32m)
        .expect("HRP literal is valid")
}

/// Decode a slatepack address to the ed25519 public key.
pub fn decode_grin_address(addr: &str) -> Result<[u8; 32], Error> {
    let (hrp, data, variant) =
        bech32::decode(addr).map_err(|_| Error::BadEncoding)?;
    if variant != Variant::Bech32m {
        return Err(Error::BadEncoding);
    }
    if hrp != "grin" {
        return Err(Error::WrongNetwork);
    }
    let bytes = Vec::<u8>::from_base32(&data).map_err(|_| Error::BadEncoding)?;
    bytes.try_into().map_err(|_| Error::BadProgram)
}

#[cfg(test)]
mod test {
    use proptest::arbitrary::any;
    use proptest::{prop_assert, prop_assert_eq, proptest};

    use super::*;

    #[test]
    fn p2wpkh_roundtrip() {
        proptest!(|(pubkey in any::<[u8; 33]>())| {
            for hrp in ["bc", "ltc"] {
                let addr = p2wpkh_address(&pubkey, hrp);
                let prefix = format!("{}1q", hrp);
                prop_assert!(addr.starts_with(&prefix));
                let program = decode_p2wpkh(&addr, hrp).unwrap();
                let expected = hash160::Hash::hash(&pubkey).into_inner();
                prop_assert_eq!(program, expected);
            }
        });
    }

    #[test]
    fn p2wpkh_wrong_hrp_rejected() {
        let addr = p2wpkh_address(&[2u8; 33], "bc");
        assert_eq!(decode_p2wpkh(&addr, "ltc"), Err(Error::WrongNetwork));
    }

    #[test]
    fn p2wpkh_bit_flip_rejected() {
        let addr = p2wpkh_address(&[2u8; 33], "bc");
        let mut tampered = addr.into_bytes();
        let i = tampered.len() - 5;
        tampered[i] = if tampered[i] == b'q' { b'p' } else { b'q' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(decode_p2wpkh(&tampered, "bc").is_err());
    }

    #[test]
    fn cn_roundtrip() {
        proptest!(|(spend in any::<[u8; 32]>(), view in any::<[u8; 32]>())| {
            // Monero standard addresses start with '4', Wownero with 'W'.
            let xmr = cn_address(18, &spend, &view);
            prop_assert!(xmr.starts_with('4'));
            let wow = cn_address(4146, &spend, &view);
            prop_assert!(wow.starts_with('W'));

            let (s, v) = decode_cn_address(&xmr, 18).unwrap();
            prop_assert_eq!(s, spend);
            prop_assert_eq!(v, view);
        });
    }

    #[test]
    fn cn_prefix_mismatch_rejected() {
        let addr = cn_address(18, &[1u8; 32], &[2u8; 32]);
        assert_eq!(
            decode_cn_address(&addr, 4146),
            Err(Error::WrongNetwork)
        );
    }

    #[test]
    fn cn_checksum_flip_rejected() {
        let addr = cn_address(18, &[1u8; 32], &[2u8; 32]);
        let mut tampered = addr.into_bytes();
        tampered[10] = if tampered[10] == b'2' { b'3' } else { b'2' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(decode_cn_address(&tampered, 18).is_err());
    }

    #[test]
    fn grin_roundtrip() {
        proptest!(|(public in any::<[u8; 32]>())| {
            let addr = grin_address(&public);
            prop_assert!(addr.starts_with("grin1"));
            prop_assert_eq!(decode_grin_address(&addr).unwrap(), public);
        });
    }

    #[test]
    fn grin_rejects_bech32_variant() {
        // Same payload under plain bech32 must not decode as slatepack.
        let fake = bech32::encode(
            "grin",
            [5u8; 32].to_base32(),
            Variant::Bech32,
        )
        .unwrap();
        assert!(decode_grin_address(&fake).is_err());
    }
}
