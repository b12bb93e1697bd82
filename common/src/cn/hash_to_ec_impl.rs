//! Monero's hash-to-point mapping (`ge_fromfe_frombytes_vartime`).
//!
//! Key images are `x * H_p(P)` where `H_p` is this mapping applied to the
//! Keccak-256 of the one-time public key, followed by a multiply-by-8.
//! The mapping must match Monero bit-for-bit or the spent filter silently
//! misclassifies outputs, so this is a direct port of the reference
//! `crypto-ops.c` routine, including its full-256-bit field loader.
//!
//! The reference code bakes in precomputed constants (`fe_ma`, `fe_ma2`,
//! `fe_fffb1..4`, `fe_sqrtm1`). We compute them once from `A = 486662`
//! instead of transcribing limb tables: the final sign of X is
//! canonicalized against `fe_isnegative`, so which square root the
//! constants happen to land on does not affect the output.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use once_cell::sync::Lazy;

use super::fe::Fe;
use super::keccak256;

const CURVE_A: u64 = 486662;

struct MapConstants {
    /// -A
    ma: Fe,
    /// -A^2
    ma2: Fe,
    /// sqrt(-1)
    sqrtm1: Fe,
    /// sqrt(-2 * A * (A + 2))
    fffb1: Fe,
    /// sqrt(2 * A * (A + 2))
    fffb2: Fe,
    /// sqrt(-sqrt(-1) * A * (A + 2))
    fffb3: Fe,
    /// sqrt(sqrt(-1) * A * (A + 2))
    fffb4: Fe,
}

/// A square root of `z`, if one exists.
fn sqrt(z: &Fe, sqrtm1: &Fe) -> Option<Fe> {
    // candidate = z^((p+3)/8) = z^(2^252 - 2)
    let candidate = z.pow22523().mul(z);
    let square = candidate.square();
    if square == *z {
        return Some(candidate);
    }
    if square == z.neg() {
        return Some(candidate.mul(sqrtm1));
    }
    None
}

static CONSTANTS: Lazy<MapConstants> = Lazy::new(|| {
    let a = Fe::from_u64(CURVE_A);
    let a_plus_2 = Fe::from_u64(CURVE_A + 2);
    let a_times_a2 = a.mul(&a_plus_2);

    // sqrt(-1) = 2^((p-1)/4); 2 is a non-residue mod p.
    let mut exp = [0xffu8; 32];
    exp[0] = 0xfb;
    exp[31] = 0x1f;
    let sqrtm1 = Fe::from_u64(2).pow_vartime(&exp);
    debug_assert!(sqrtm1.square() == Fe::ONE.neg());

    let two_aa2 = a_times_a2.add(&a_times_a2);
    MapConstants {
        ma: a.neg(),
        ma2: a.square().neg(),
        fffb1: sqrt(&two_aa2.neg(), &sqrtm1)
            .expect("-2A(A+2) is a quadratic residue"),
        fffb2: sqrt(&two_aa2, &sqrtm1)
            .expect("2A(A+2) is a quadratic residue"),
        fffb3: sqrt(&sqrtm1.neg().mul(&a_times_a2), &sqrtm1)
            .expect("-sqrt(-1)A(A+2) is a quadratic residue"),
        fffb4: sqrt(&sqrtm1.mul(&a_times_a2), &sqrtm1)
            .expect("sqrt(-1)A(A+2) is a quadratic residue"),
        sqrtm1,
    }
});

/// `(u/v)^((p+3)/8)`-style ratio root used by the mapping
/// (reference `fe_divpowm1`): returns `u * v^3 * (u * v^7)^((p-5)/8)`.
fn divpowm1(u: &Fe, v: &Fe) -> Fe {
    let v3 = v.square().mul(v);
    let uv7 = v3.square().mul(v).mul(u);
    uv7.pow22523().mul(&v3).mul(u)
}

/// The deterministic mapping from 32 bytes to a (projective) curve point,
/// returned in compressed form. Port of `ge_fromfe_frombytes_vartime`.
fn from_fe_bytes_vartime(bytes: &[u8; 32]) -> [u8; 32] {
    let c = &*CONSTANTS;

    let u = Fe::from_bytes_wide(bytes);
    let v = u.square2(); // 2u^2
    let w = v.add(&Fe::ONE); // 2u^2 + 1
    let w_sq = w.square();
    let x = w_sq.add(&c.ma2.mul(&v)); // w^2 - 2A^2u^2

    let mut rx = divpowm1(&w, &x);
    let rx_sq_x = rx.square().mul(&x);

    let mut z = c.ma;
    let sign;

    if w.sub(&rx_sq_x).is_nonzero() {
        if w.add(&rx_sq_x).is_nonzero() {
            // Negative case: X = sqrt(A(A+2)w/x), not multiplied by u.
            let x_i = rx_sq_x.mul(&c.sqrtm1);
            if w.sub(&x_i).is_nonzero() {
                debug_assert!(!w.add(&x_i).is_nonzero());
                rx = rx.mul(&c.fffb3);
            } else {
                rx = rx.mul(&c.fffb4);
            }
            sign = true;
        } else {
            rx = rx.mul(&c.fffb1).mul(&u);
            z = z.mul(&v);
            sign = false;
        }
    } else {
        rx = rx.mul(&c.fffb2).mul(&u);
        z = z.mul(&v);
        sign = false;
    }

    if rx.is_negative() != sign {
        debug_assert!(rx.is_nonzero());
        rx = rx.neg();
    }

    let rz = z.add(&w);
    let ry = z.sub(&w);
    rx = rx.mul(&rz);

    // Compress the projective (X:Y:Z) point: y/z with the sign of x/z.
    let zinv = rz.invert();
    let x_affine = rx.mul(&zinv);
    let y_affine = ry.mul(&zinv);
    let mut out = y_affine.to_bytes();
    out[31] ^= (x_affine.is_negative() as u8) << 7;
    out
}

/// Monero's `hash_to_ec`: Keccak the input, map to a point, multiply by
/// the cofactor. The result is torsion-free and never the identity for
/// honestly generated keys.
pub fn hash_to_ec(data: &[u8]) -> EdwardsPoint {
    let hashed = keccak256(data);
    let compressed = from_fe_bytes_vartime(&hashed);
    CompressedEdwardsY(compressed)
        .decompress()
        .expect("mapping output is on the curve by construction")
        .mul_by_cofactor()
}

#[cfg(test)]
mod test {
    use curve25519_dalek::traits::IsIdentity;
    use proptest::arbitrary::any;
    use proptest::{prop_assert, proptest};

    use super::*;

    /// Reference vector from Monero's crypto test suite
    /// (`tests/crypto/tests.txt`, `hash_to_ec` section).
    #[test]
    fn hash_to_ec_reference_vector() {
        let input: [u8; 32] = hex::decode(
            "da66e9ba613919dec28ef367a125bb310d6d83fb9052e71034164b6dc4f392d0",
        )
        .unwrap()
        .try_into()
        .unwrap();
        let expected =
            "52b3f38753b4e13b74624862e253072cf12f745d43fcfafbe8c217701a6e5875";

        let point = hash_to_ec(&input);
        assert_eq!(hex::encode(point.compress().to_bytes()), expected);
    }

    #[test]
    fn output_is_torsion_free() {
        proptest!(|(input in any::<[u8; 32]>())| {
            let point = hash_to_ec(&input);
            prop_assert!(point.is_torsion_free());
            prop_assert!(!point.is_identity());
        });
    }

    #[test]
    fn mapping_is_deterministic() {
        let a = hash_to_ec(b"some key bytes");
        let b = hash_to_ec(b"some key bytes");
        assert_eq!(a.compress(), b.compress());
    }

    #[test]
    fn constants_self_check() {
        let c = &*CONSTANTS;
        assert_eq!(c.sqrtm1.square(), Fe::ONE.neg());
        let a = Fe::from_u64(CURVE_A);
        assert_eq!(c.ma, a.neg());
        assert_eq!(c.ma2, a.square().neg());
        let aa2 = a.mul(&Fe::from_u64(CURVE_A + 2));
        assert_eq!(c.fffb2.square(), aa2.add(&aa2));
        assert_eq!(c.fffb1.square(), aa2.add(&aa2).neg());
    }
}
