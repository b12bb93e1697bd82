//! Field arithmetic mod p = 2^255 - 19, radix 2^51.
//!
//! `curve25519-dalek` does not expose its field internals, and the
//! hash-to-point mapping in [`super::hash_to_ec`] needs raw field ops, so
//! this module carries a small five-limb implementation. Limbs are kept
//! weakly reduced (< 2^52) after every operation; `to_bytes` performs the
//! full canonical reduction.
//!
//! One Monero-ism worth calling out: [`Fe::from_bytes_wide`] keeps all
//! 256 input bits (the value is taken mod p), where the standard ed25519
//! loader masks bit 255. The mapping is only bit-compatible with Monero
//! when the wide loader is used.

pub const LOW_51_BIT_MASK: u64 = (1u64 << 51) - 1;

/// An element of GF(2^255 - 19).
#[derive(Copy, Clone, Debug)]
pub struct Fe(pub(crate) [u64; 5]);

impl Fe {
    pub const ZERO: Fe = Fe([0, 0, 0, 0, 0]);
    pub const ONE: Fe = Fe([1, 0, 0, 0, 0]);

    /// A small constant (< 2^51).
    pub const fn from_u64(x: u64) -> Fe {
        Fe([x, 0, 0, 0, 0])
    }

    /// Standard little-endian load of the low 255 bits.
    pub fn from_bytes(bytes: &[u8; 32]) -> Fe {
        let load8 = |b: &[u8]| -> u64 {
            u64::from_le_bytes(b[..8].try_into().expect("8-byte window"))
        };
        Fe([
            load8(&bytes[0..]) & LOW_51_BIT_MASK,
            (load8(&bytes[6..]) >> 3) & LOW_51_BIT_MASK,
            (load8(&bytes[12..]) >> 6) & LOW_51_BIT_MASK,
            (load8(&bytes[19..]) >> 1) & LOW_51_BIT_MASK,
            (load8(&bytes[24..]) >> 12) & LOW_51_BIT_MASK,
        ])
    }

    /// Monero's loader: all 256 bits contribute, value taken mod p.
    /// Since 2^255 = 19 (mod p), the top bit folds in as +19.
    pub fn from_bytes_wide(bytes: &[u8; 32]) -> Fe {
        let mut fe = Self::from_bytes(bytes);
        if bytes[31] & 0x80 != 0 {
            fe = fe.add(&Fe::from_u64(19));
        }
        fe
    }

    fn reduce(mut limbs: [u64; 5]) -> Fe {
        let c0 = limbs[0] >> 51;
        let c1 = limbs[1] >> 51;
        let c2 = limbs[2] >> 51;
        let c3 = limbs[3] >> 51;
        let c4 = limbs[4] >> 51;

        limbs[0] &= LOW_51_BIT_MASK;
        limbs[1] &= LOW_51_BIT_MASK;
        limbs[2] &= LOW_51_BIT_MASK;
        limbs[3] &= LOW_51_BIT_MASK;
        limbs[4] &= LOW_51_BIT_MASK;

        limbs[0] += c4 * 19;
        limbs[1] += c0;
        limbs[2] += c1;
        limbs[3] += c2;
        limbs[4] += c3;

        Fe(limbs)
    }

    pub fn add(&self, rhs: &Fe) -> Fe {
        Fe::reduce([
            self.0[0] + rhs.0[0],
            self.0[1] + rhs.0[1],
            self.0[2] + rhs.0[2],
            self.0[3] + rhs.0[3],
            self.0[4] + rhs.0[4],
        ])
    }

    pub fn sub(&self, rhs: &Fe) -> Fe {
        // Add 16p first so the per-limb subtraction cannot underflow.
        Fe::reduce([
            (self.0[0] + 36028797018963664u64) - rhs.0[0],
            (self.0[1] + 36028797018963952u64) - rhs.0[1],
            (self.0[2] + 36028797018963952u64) - rhs.0[2],
            (self.0[3] + 36028797018963952u64) - rhs.0[3],
            (self.0[4] + 36028797018963952u64) - rhs.0[4],
        ])
    }

    pub fn neg(&self) -> Fe {
        Fe::ZERO.sub(self)
    }

    pub fn mul(&self, rhs: &Fe) -> Fe {
        #[inline(always)]
        fn m(x: u64, y: u64) -> u128 {
            (x as u128) * (y as u128)
        }

        let a = &self.0;
        let b = &rhs.0;

        let b1_19 = b[1] * 19;
        let b2_19 = b[2] * 19;
        let b3_19 = b[3] * 19;
        let b4_19 = b[4] * 19;

        let c0 = m(a[0], b[0])
            + m(a[4], b1_19)
            + m(a[3], b2_19)
            + m(a[2], b3_19)
            + m(a[1], b4_19);
        let mut c1 = m(a[1], b[0])
            + m(a[0], b[1])
            + m(a[4], b2_19)
            + m(a[3], b3_19)
            + m(a[2], b4_19);
        let mut c2 = m(a[2], b[0])
            + m(a[1], b[1])
            + m(a[0], b[2])
            + m(a[4], b3_19)
            + m(a[3], b4_19);
        let mut c3 = m(a[3], b[0])
            + m(a[2], b[1])
            + m(a[1], b[2])
            + m(a[0], b[3])
            + m(a[4], b4_19);
        let mut c4 = m(a[4], b[0])
            + m(a[3], b[1])
            + m(a[2], b[2])
            + m(a[1], b[3])
            + m(a[0], b[4]);

        let mut out = [0u64; 5];
        out[0] = (c0 as u64) & LOW_51_BIT_MASK;
        c1 += (c0 >> 51) as u64 as u128;
        out[1] = (c1 as u64) & LOW_51_BIT_MASK;
        c2 += (c1 >> 51) as u64 as u128;
        out[2] = (c2 as u64) & LOW_51_BIT_MASK;
        c3 += (c2 >> 51) as u64 as u128;
        out[3] = (c3 as u64) & LOW_51_BIT_MASK;
        c4 += (c3 >> 51) as u64 as u128;
        out[4] = (c4 as u64) & LOW_51_BIT_MASK;
        let carry = (c4 >> 51) as u64;

        out[0] += carry * 19;
        let carry = out[0] >> 51;
        out[0] &= LOW_51_BIT_MASK;
        out[1] += carry;

        Fe(out)
    }

    pub fn square(&self) -> Fe {
        self.mul(self)
    }

    /// `2 * self^2` (Monero's `fe_sq2`).
    pub fn square2(&self) -> Fe {
        let sq = self.square();
        sq.add(&sq)
    }

    /// `self^exp` with a little-endian exponent. Variable time; only used
    /// on public values (hash outputs and fixed constants).
    pub fn pow_vartime(&self, exp_le: &[u8; 32]) -> Fe {
        let mut result = Fe::ONE;
        // MSB-first square-and-multiply.
        for byte in exp_le.iter().rev() {
            for bit in (0..8).rev() {
                result = result.square();
                if (byte >> bit) & 1 == 1 {
                    result = result.mul(self);
                }
            }
        }
        result
    }

    /// `self^(p - 2)`, the inverse for nonzero elements.
    pub fn invert(&self) -> Fe {
        // p - 2 = 2^255 - 21
        let mut exp = [0xffu8; 32];
        exp[0] = 0xeb;
        exp[31] = 0x7f;
        self.pow_vartime(&exp)
    }

    /// `self^((p - 5) / 8)`, i.e. `self^(2^252 - 3)`.
    pub fn pow22523(&self) -> Fe {
        let mut exp = [0xffu8; 32];
        exp[0] = 0xfd;
        exp[31] = 0x0f;
        self.pow_vartime(&exp)
    }

    pub fn to_bytes(self) -> [u8; 32] {
        let mut limbs = Fe::reduce(self.0).0;

        // Compute q = floor(value / p) (0 or 1) and subtract q*p.
        let mut q = (limbs[0] + 19) >> 51;
        q = (limbs[1] + q) >> 51;
        q = (limbs[2] + q) >> 51;
        q = (limbs[3] + q) >> 51;
        q = (limbs[4] + q) >> 51;

        limbs[0] += 19 * q;

        let mut carry = limbs[0] >> 51;
        limbs[0] &= LOW_51_BIT_MASK;
        limbs[1] += carry;
        carry = limbs[1] >> 51;
        limbs[1] &= LOW_51_BIT_MASK;
        limbs[2] += carry;
        carry = limbs[2] >> 51;
        limbs[2] &= LOW_51_BIT_MASK;
        limbs[3] += carry;
        carry = limbs[3] >> 51;
        limbs[3] &= LOW_51_BIT_MASK;
        limbs[4] += carry;
        limbs[4] &= LOW_51_BIT_MASK;

        let mut s = [0u8; 32];
        s[0] = limbs[0] as u8;
        s[1] = (limbs[0] >> 8) as u8;
        s[2] = (limbs[0] >> 16) as u8;
        s[3] = (limbs[0] >> 24) as u8;
        s[4] = (limbs[0] >> 32) as u8;
        s[5] = (limbs[0] >> 40) as u8;
        s[6] = ((limbs[0] >> 48) | (limbs[1] << 3)) as u8;
        s[7] = (limbs[1] >> 5) as u8;
        s[8] = (limbs[1] >> 13) as u8;
        s[9] = (limbs[1] >> 21) as u8;
        s[10] = (limbs[1] >> 29) as u8;
        s[11] = (limbs[1] >> 37) as u8;
        s[12] = ((limbs[1] >> 45) | (limbs[2] << 6)) as u8;
        s[13] = (limbs[2] >> 2) as u8;
        s[14] = (limbs[2] >> 10) as u8;
        s[15] = (limbs[2] >> 18) as u8;
        s[16] = (limbs[2] >> 26) as u8;
        s[17] = (limbs[2] >> 34) as u8;
        s[18] = (limbs[2] >> 42) as u8;
        s[19] = ((limbs[2] >> 50) | (limbs[3] << 1)) as u8;
        s[20] = (limbs[3] >> 7) as u8;
        s[21] = (limbs[3] >> 15) as u8;
        s[22] = (limbs[3] >> 23) as u8;
        s[23] = (limbs[3] >> 31) as u8;
        s[24] = (limbs[3] >> 39) as u8;
        s[25] = ((limbs[3] >> 47) | (limbs[4] << 4)) as u8;
        s[26] = (limbs[4] >> 4) as u8;
        s[27] = (limbs[4] >> 12) as u8;
        s[28] = (limbs[4] >> 20) as u8;
        s[29] = (limbs[4] >> 28) as u8;
        s[30] = (limbs[4] >> 36) as u8;
        s[31] = (limbs[4] >> 44) as u8;
        s
    }

    /// The sign convention of the reference code: lowest bit of the
    /// canonical encoding.
    pub fn is_negative(&self) -> bool {
        self.to_bytes()[0] & 1 == 1
    }

    pub fn is_nonzero(&self) -> bool {
        self.to_bytes() != [0u8; 32]
    }
}

impl PartialEq for Fe {
    fn eq(&self, other: &Fe) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for Fe {}

#[cfg(test)]
mod test {
    use proptest::arbitrary::any;
    use proptest::{prop_assert_eq, proptest};

    use super::*;

    #[test]
    fn one_roundtrips() {
        let mut one = [0u8; 32];
        one[0] = 1;
        assert_eq!(Fe::from_bytes(&one).to_bytes(), one);
        assert_eq!(Fe::ONE.to_bytes(), one);
    }

    #[test]
    fn canonical_reduction() {
        // p itself must canonicalize to zero.
        let mut p_bytes = [0xffu8; 32];
        p_bytes[0] = 0xed;
        p_bytes[31] = 0x7f;
        assert_eq!(Fe::from_bytes(&p_bytes).to_bytes(), [0u8; 32]);
        // p + 1 canonicalizes to one.
        let mut p1 = p_bytes;
        p1[0] = 0xee;
        let mut one = [0u8; 32];
        one[0] = 1;
        assert_eq!(Fe::from_bytes(&p1).to_bytes(), one);
    }

    #[test]
    fn wide_load_folds_top_bit() {
        // 2^255 = 19 (mod p)
        let mut top = [0u8; 32];
        top[31] = 0x80;
        assert_eq!(
            Fe::from_bytes_wide(&top).to_bytes(),
            Fe::from_u64(19).to_bytes()
        );
    }

    #[test]
    fn field_identities() {
        proptest!(|(a in any::<[u8; 32]>(), b in any::<[u8; 32]>())| {
            let fa = Fe::from_bytes(&a);
            let fb = Fe::from_bytes(&b);

            // commutativity
            prop_assert_eq!(fa.add(&fb), fb.add(&fa));
            prop_assert_eq!(fa.mul(&fb), fb.mul(&fa));
            // a - a = 0, a + (-a) = 0
            prop_assert_eq!(fa.sub(&fa).to_bytes(), [0u8; 32]);
            prop_assert_eq!(fa.add(&fa.neg()).to_bytes(), [0u8; 32]);
            // square consistency
            prop_assert_eq!(fa.square(), fa.mul(&fa));
            prop_assert_eq!(fa.square2(), fa.square().add(&fa.square()));
            // distributivity
            let lhs = fa.add(&fb).mul(&fa);
            let rhs = fa.mul(&fa).add(&fb.mul(&fa));
            prop_assert_eq!(lhs, rhs);
        });
    }

    #[test]
    fn inversion() {
        proptest!(|(a in any::<[u8; 32]>())| {
            let fa = Fe::from_bytes(&a);
            if fa.is_nonzero() {
                prop_assert_eq!(fa.mul(&fa.invert()), Fe::ONE);
            }
        });
    }

    #[test]
    fn pow22523_matches_pow() {
        // x^(2^252 - 3) * x^3 = x^(2^252) -- spot check the exponent wiring
        let x = Fe::from_u64(5);
        let lhs = x.pow22523().mul(&x).mul(&x).mul(&x);
        let mut exp = [0u8; 32];
        exp[31] = 0x10; // 2^252
        assert_eq!(lhs, x.pow_vartime(&exp));
    }
}
