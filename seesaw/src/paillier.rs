//! Paillier additively homomorphic encryption over `Z_n`.
//!
//! Used for every integer-valued ciphertext in the comparison and argmax
//! protocols. The public side supports addition of ciphertexts, addition of
//! plaintexts, plaintext-scalar multiplication and re-randomization; the
//! private side is held by the helper party.

use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::One;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::number::{self, WireInt};
use crate::Error;

/// A ciphertext carrying an integer mod `n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddCiphertext(pub(crate) BigUint);

impl Serialize for AddCiphertext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireInt::from_biguint(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AddCiphertext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireInt::deserialize(deserializer)?;
        let v = wire
            .to_biguint()
            .map_err(|_| serde::de::Error::custom("negative ciphertext"))?;
        Ok(AddCiphertext(v))
    }
}

/// Public side of the scheme, with `g = n + 1` fixed.
#[derive(Clone, Debug)]
pub struct Paillier {
    n: BigUint,
    nn: BigUint,
}

impl Paillier {
    /// Builds the public side from an announced modulus.
    pub fn new(n: BigUint) -> Self {
        let nn = &n * &n;
        Self { n, nn }
    }

    /// The plaintext modulus.
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    /// Encrypts `m mod n` as `(1 + m*n) * r^n mod n^2`.
    pub fn encrypt<R: RngCore + CryptoRng>(&self, m: &BigUint, rng: &mut R) -> AddCiphertext {
        let m = m % &self.n;
        let gm = (BigUint::one() + m * &self.n) % &self.nn;
        let r = number::rand_nonzero_below(&self.n, rng);
        AddCiphertext(gm * r.modpow(&self.n, &self.nn) % &self.nn)
    }

    /// Encrypts a signed plaintext, reduced into `[0, n)`.
    pub fn encrypt_signed<R: RngCore + CryptoRng>(&self, m: &BigInt, rng: &mut R) -> AddCiphertext {
        self.encrypt(&number::mod_signed(m, &self.n), rng)
    }

    /// Homomorphic addition of plaintexts.
    pub fn add(&self, a: &AddCiphertext, b: &AddCiphertext) -> AddCiphertext {
        AddCiphertext(&a.0 * &b.0 % &self.nn)
    }

    /// Homomorphic subtraction of plaintexts.
    pub fn sub(&self, a: &AddCiphertext, b: &AddCiphertext) -> Result<AddCiphertext, Error> {
        let inv = number::mod_inverse(&b.0, &self.nn).ok_or(Error::Crypto)?;
        Ok(AddCiphertext(&a.0 * inv % &self.nn))
    }

    /// Adds a plaintext constant to the encrypted value.
    pub fn add_plain(&self, a: &AddCiphertext, m: &BigUint) -> AddCiphertext {
        let gm = (BigUint::one() + (m % &self.n) * &self.n) % &self.nn;
        AddCiphertext(&a.0 * gm % &self.nn)
    }

    /// Adds a signed plaintext constant.
    pub fn add_plain_signed(&self, a: &AddCiphertext, m: &BigInt) -> AddCiphertext {
        self.add_plain(a, &number::mod_signed(m, &self.n))
    }

    /// Multiplies the encrypted value by a plaintext scalar.
    pub fn scalar_mul(&self, a: &AddCiphertext, k: &BigUint) -> AddCiphertext {
        AddCiphertext(a.0.modpow(k, &self.nn))
    }

    /// Fresh randomness for a ciphertext of the same value.
    pub fn rerand<R: RngCore + CryptoRng>(&self, a: &AddCiphertext, rng: &mut R) -> AddCiphertext {
        let r = number::rand_nonzero_below(&self.n, rng);
        AddCiphertext(&a.0 * r.modpow(&self.n, &self.nn) % &self.nn)
    }
}

/// Private side: factorization plus the precomputed Carmichael values.
#[derive(Clone, Debug)]
pub struct PaillierPriv {
    public: Paillier,
    lambda: BigUint,
    mu: BigUint,
}

impl PaillierPriv {
    /// Generates a fresh key with `prime_bits`-bit factors.
    pub fn keygen<R: RngCore + CryptoRng>(prime_bits: u64, rng: &mut R) -> Self {
        loop {
            let p = number::gen_prime(prime_bits, rng);
            let q = number::gen_prime(prime_bits, rng);
            if p == q {
                continue;
            }
            let n = &p * &q;
            let lambda = (&p - 1u32).lcm(&(&q - 1u32));
            let Some(mu) = number::mod_inverse(&(&lambda % &n), &n) else {
                continue;
            };
            return Self {
                public: Paillier::new(n),
                lambda,
                mu,
            };
        }
    }

    /// The matching public side.
    pub fn public(&self) -> &Paillier {
        &self.public
    }

    /// Decrypts to the plaintext in `[0, n)`.
    pub fn decrypt(&self, c: &AddCiphertext) -> BigUint {
        let n = &self.public.n;
        let u = c.0.modpow(&self.lambda, &self.public.nn);
        let l = (u - 1u32) / n;
        l * &self.mu % n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn keys() -> (PaillierPriv, ChaCha20Rng) {
        let mut rng = ChaCha20Rng::seed_from_u64(99);
        (PaillierPriv::keygen(128, &mut rng), rng)
    }

    #[test]
    fn encrypt_decrypt() {
        let (sk, mut rng) = keys();
        for m in [0u64, 1, 255, 1 << 40] {
            let m = BigUint::from(m);
            let c = sk.public().encrypt(&m, &mut rng);
            assert_eq!(sk.decrypt(&c), m);
        }
    }

    #[test]
    fn additive_homomorphism() {
        let (sk, mut rng) = keys();
        let p = sk.public().clone();
        let a = BigUint::from(1234u32);
        let b = BigUint::from(56789u32);
        let ca = p.encrypt(&a, &mut rng);
        let cb = p.encrypt(&b, &mut rng);

        assert_eq!(sk.decrypt(&p.add(&ca, &cb)), &a + &b);
        assert_eq!(sk.decrypt(&p.sub(&cb, &ca).unwrap()), &b - &a);
        assert_eq!(sk.decrypt(&p.add_plain(&ca, &b)), &a + &b);
        assert_eq!(
            sk.decrypt(&p.scalar_mul(&ca, &BigUint::from(7u32))),
            &a * 7u32
        );
    }

    #[test]
    fn signed_plaintexts_wrap_mod_n() {
        let (sk, mut rng) = keys();
        let p = sk.public().clone();
        let c = p.encrypt(&BigUint::from(10u32), &mut rng);
        let c = p.add_plain_signed(&c, &BigInt::from(-3));
        assert_eq!(sk.decrypt(&c), BigUint::from(7u32));
    }

    #[test]
    fn rerand_preserves_value() {
        let (sk, mut rng) = keys();
        let p = sk.public().clone();
        let c = p.encrypt(&BigUint::from(77u32), &mut rng);
        let c2 = p.rerand(&c, &mut rng);
        assert_ne!(c, c2);
        assert_eq!(sk.decrypt(&c2), BigUint::from(77u32));
    }
}
