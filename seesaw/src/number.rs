//! Multi-precision helpers shared by the cryptosystem backends: probable-prime
//! generation, Jacobi symbols, modular inverses and the sign-magnitude wire
//! form of big integers.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Number of Miller-Rabin rounds; error probability is below 4^-64.
const MR_ROUNDS: usize = 64;

const SMALL_PRIMES: [u32; 20] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73,
];

/// Samples a uniform probable prime with exactly `bits` bits.
pub fn gen_prime<R: RngCore + CryptoRng>(bits: u64, rng: &mut R) -> BigUint {
    assert!(bits >= 8, "prime width too small");
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, rng) {
            return candidate;
        }
    }
}

/// Samples a probable prime congruent to 3 mod 4.
pub fn gen_blum_prime<R: RngCore + CryptoRng>(bits: u64, rng: &mut R) -> BigUint {
    loop {
        let p = gen_prime(bits, rng);
        if (&p % 4u32).to_u32() == Some(3) {
            return p;
        }
    }
}

/// Miller-Rabin with [`MR_ROUNDS`] random bases after small-prime trial
/// division.
pub fn is_probable_prime<R: RngCore + CryptoRng>(n: &BigUint, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    if n == &two {
        return true;
    }
    if n.is_even() {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n - 1 = d * 2^s with d odd
    let n_minus_1 = n - 1u32;
    let s = n_minus_1.trailing_zeros().unwrap_or(0);
    let d = &n_minus_1 >> s;

    'witness: for _ in 0..MR_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_1);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_1 {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Jacobi symbol `(a/n)` for odd `n`; returns 1, -1 or 0.
pub fn jacobi(a: &BigUint, n: &BigUint) -> i8 {
    debug_assert!(n.is_odd());
    let mut a = a % n;
    let mut n = n.clone();
    let mut t = 1i8;
    while !a.is_zero() {
        while a.is_even() {
            a >>= 1;
            // flip on n = +-3 mod 8; n is odd throughout, so test bits 1 and 2
            if n.bit(1) != n.bit(2) {
                t = -t;
            }
        }
        std::mem::swap(&mut a, &mut n);
        if (&a % 4u32).to_u32() == Some(3) && (&n % 4u32).to_u32() == Some(3) {
            t = -t;
        }
        a %= &n;
    }
    if n.is_one() {
        t
    } else {
        0
    }
}

/// Modular inverse of `a` mod `m` via the extended Euclidean algorithm.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let m_int = BigInt::from(m.clone());
    let (mut r0, mut r1) = (m_int.clone(), BigInt::from(a % m));
    let (mut s0, mut s1) = (BigInt::zero(), BigInt::one());
    while !r1.is_zero() {
        let q = &r0 / &r1;
        let r2 = &r0 - &q * &r1;
        r0 = std::mem::replace(&mut r1, r2);
        let s2 = &s0 - &q * &s1;
        s0 = std::mem::replace(&mut s1, s2);
    }
    if !r0.is_one() {
        return None;
    }
    s0.mod_floor(&m_int).to_biguint()
}

/// Reduces a signed value into `[0, m)`.
pub fn mod_signed(v: &BigInt, m: &BigUint) -> BigUint {
    let m_int = BigInt::from(m.clone());
    let r = ((v % &m_int) + &m_int) % &m_int;
    r.magnitude().clone()
}

/// Uniform integer in `[0, bound)`.
pub fn rand_below<R: RngCore + CryptoRng>(bound: &BigUint, rng: &mut R) -> BigUint {
    rng.gen_biguint_below(bound)
}

/// Uniform integer in `[1, bound)`.
pub fn rand_nonzero_below<R: RngCore + CryptoRng>(bound: &BigUint, rng: &mut R) -> BigUint {
    rng.gen_biguint_range(&BigUint::one(), bound)
}

/// Uniform integer with at most `bits` bits.
pub fn rand_bits<R: RngCore + CryptoRng>(bits: u64, rng: &mut R) -> BigUint {
    rng.gen_biguint(bits)
}

/// Sign-magnitude wire form of a multi-precision integer.
///
/// The magnitude is big-endian with an explicit length; fixed-width group
/// elements do not use this form (they travel as left-padded byte strings).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireInt {
    negative: bool,
    magnitude: Vec<u8>,
}

impl WireInt {
    /// Wire form of an unsigned integer.
    pub fn from_biguint(v: &BigUint) -> Self {
        Self {
            negative: false,
            magnitude: v.to_bytes_be(),
        }
    }

    /// Wire form of a signed integer.
    pub fn from_bigint(v: &BigInt) -> Self {
        Self {
            negative: v.is_negative(),
            magnitude: v.magnitude().to_bytes_be(),
        }
    }

    /// Decodes an unsigned integer; a negative wire value is a peer error.
    pub fn to_biguint(&self) -> Result<BigUint, Error> {
        if self.negative {
            return Err(Error::Decode);
        }
        Ok(BigUint::from_bytes_be(&self.magnitude))
    }

    /// Decodes the signed value.
    pub fn to_bigint(&self) -> BigInt {
        let mag = BigUint::from_bytes_be(&self.magnitude);
        if self.negative {
            -BigInt::from(mag)
        } else {
            BigInt::from(mag)
        }
    }
}

impl From<&BigUint> for WireInt {
    fn from(v: &BigUint) -> Self {
        Self::from_biguint(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn primes_are_odd_and_sized() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for bits in [32, 64, 128] {
            let p = gen_prime(bits, &mut rng);
            assert!(p.is_odd());
            assert_eq!(p.bits(), bits);
        }
    }

    #[test]
    fn composite_is_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let p = gen_prime(64, &mut rng);
        let q = gen_prime(64, &mut rng);
        assert!(!is_probable_prime(&(&p * &q), &mut rng));
    }

    #[test]
    fn jacobi_matches_legendre_on_prime() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let p = gen_prime(64, &mut rng);
        let exp = (&p - 1u32) >> 1;
        for _ in 0..20 {
            let a = rand_nonzero_below(&p, &mut rng);
            let euler = a.modpow(&exp, &p);
            let expected = if euler.is_one() { 1 } else { -1 };
            assert_eq!(jacobi(&a, &p), expected);
        }
    }

    #[test]
    fn inverse_multiplies_to_one() {
        let mut rng = ChaCha20Rng::seed_from_u64(13);
        let p = gen_prime(96, &mut rng);
        for _ in 0..20 {
            let a = rand_nonzero_below(&p, &mut rng);
            let inv = mod_inverse(&a, &p).unwrap();
            assert!((a * inv % &p).is_one());
        }
    }

    #[test]
    fn wire_int_round_trip() {
        let v = BigUint::from(0xdead_beef_u64);
        assert_eq!(WireInt::from_biguint(&v).to_biguint().unwrap(), v);

        let neg = BigInt::from(-12345678i64);
        let w = WireInt::from_bigint(&neg);
        assert_eq!(w.to_bigint(), neg);
        assert!(w.to_biguint().is_err());
    }
}
