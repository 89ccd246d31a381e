//! Goldwasser-Micali-style quadratic-residuosity encryption.
//!
//! One plaintext bit per ciphertext. The scheme is XOR-homomorphic
//! (multiplication of ciphertexts), supports homomorphic NOT (multiplication
//! by the pseudo-residue) and public re-randomization, which is everything the
//! comparison protocols ask of their bit cipher.

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::number::{self, WireInt};

/// A ciphertext carrying a single bit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QrCiphertext(pub(crate) BigUint);

impl Serialize for QrCiphertext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireInt::from_biguint(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for QrCiphertext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireInt::deserialize(deserializer)?;
        let v = wire
            .to_biguint()
            .map_err(|_| serde::de::Error::custom("negative ciphertext"))?;
        Ok(QrCiphertext(v))
    }
}

/// Public side of the scheme: modulus `n = p*q` and a pseudo-residue `y`
/// (Jacobi symbol 1, non-residue mod both factors).
#[derive(Clone, Debug)]
pub struct Gm {
    n: BigUint,
    y: BigUint,
}

impl Gm {
    /// Builds the public side from an announced key.
    pub fn new(n: BigUint, y: BigUint) -> Self {
        Self { n, y }
    }

    /// The public modulus.
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    /// The public pseudo-residue.
    pub fn nonresidue(&self) -> &BigUint {
        &self.y
    }

    /// Encrypts one bit as `r^2 * y^bit mod n`.
    pub fn encrypt<R: RngCore + CryptoRng>(&self, bit: bool, rng: &mut R) -> QrCiphertext {
        let r = number::rand_nonzero_below(&self.n, rng);
        let mut c = &r * &r % &self.n;
        if bit {
            c = c * &self.y % &self.n;
        }
        QrCiphertext(c)
    }

    /// Homomorphic XOR of two encrypted bits.
    pub fn xor(&self, a: &QrCiphertext, b: &QrCiphertext) -> QrCiphertext {
        QrCiphertext(&a.0 * &b.0 % &self.n)
    }

    /// Homomorphic NOT.
    pub fn neg(&self, a: &QrCiphertext) -> QrCiphertext {
        QrCiphertext(&a.0 * &self.y % &self.n)
    }

    /// Fresh randomness for a ciphertext of the same bit.
    pub fn rerand<R: RngCore + CryptoRng>(&self, a: &QrCiphertext, rng: &mut R) -> QrCiphertext {
        let r = number::rand_nonzero_below(&self.n, rng);
        QrCiphertext(&a.0 * (&r * &r % &self.n) % &self.n)
    }
}

/// Private side: the factorization of `n`.
#[derive(Clone, Debug)]
pub struct GmPriv {
    p: BigUint,
    public: Gm,
}

impl GmPriv {
    /// Generates a fresh key with `prime_bits`-bit factors.
    pub fn keygen<R: RngCore + CryptoRng>(prime_bits: u64, rng: &mut R) -> Self {
        let p = number::gen_blum_prime(prime_bits, rng);
        let q = number::gen_blum_prime(prime_bits, rng);
        let n = &p * &q;
        let y = loop {
            let y = number::rand_nonzero_below(&n, rng);
            if number::jacobi(&y, &p) == -1 && number::jacobi(&y, &q) == -1 {
                break y;
            }
        };
        Self {
            p,
            public: Gm::new(n, y),
        }
    }

    /// The matching public side.
    pub fn public(&self) -> &Gm {
        &self.public
    }

    /// Decrypts a bit: 1 iff the ciphertext is a non-residue mod `p`.
    pub fn decrypt(&self, c: &QrCiphertext) -> bool {
        number::jacobi(&c.0, &self.p) == -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn keys() -> (GmPriv, ChaCha20Rng) {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        (GmPriv::keygen(128, &mut rng), rng)
    }

    #[test]
    fn encrypt_decrypt() {
        let (sk, mut rng) = keys();
        for bit in [false, true] {
            let c = sk.public().encrypt(bit, &mut rng);
            assert_eq!(sk.decrypt(&c), bit);
        }
    }

    #[test]
    fn xor_and_neg_homomorphisms() {
        let (sk, mut rng) = keys();
        let gm = sk.public().clone();
        for a in [false, true] {
            for b in [false, true] {
                let ca = gm.encrypt(a, &mut rng);
                let cb = gm.encrypt(b, &mut rng);
                assert_eq!(sk.decrypt(&gm.xor(&ca, &cb)), a ^ b);
                assert_eq!(sk.decrypt(&gm.neg(&ca)), !a);
            }
        }
    }

    #[test]
    fn rerand_changes_bytes_not_bit() {
        let (sk, mut rng) = keys();
        let gm = sk.public().clone();
        let c = gm.encrypt(true, &mut rng);
        let c2 = gm.rerand(&c, &mut rng);
        assert_ne!(c, c2);
        assert!(sk.decrypt(&c2));
    }
}
