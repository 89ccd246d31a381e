//! Slot-packed encryption over GF(2) with homomorphic addition and
//! multiplication, in the integer (approximate-GCD) style.
//!
//! Each ciphertext packs one bit per slot; slot-wise addition is XOR and
//! slot-wise multiplication is AND. The cryptosystem switch only needs depth-1
//! XOR, so the default parameters leave a wide noise margin. This is a
//! reference backend for the protocol core: parameter sizes are tuned for
//! test throughput, not deployment hardness.

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::number::{self, WireInt};
use crate::Error;

/// Size parameters of the scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FheParams {
    /// Number of bit slots per ciphertext.
    pub slots: usize,
    /// Secret-key width in bits.
    pub sk_bits: u64,
    /// Fresh-ciphertext noise width in bits.
    pub noise_bits: u64,
    /// Ciphertext width in bits.
    pub ct_bits: u64,
    /// Number of public encryptions of zero in the key.
    pub pk_elems: usize,
}

impl FheParams {
    /// Parameters leaving room for one multiplication level.
    pub fn with_slots(slots: usize) -> Self {
        Self {
            slots,
            sk_bits: 256,
            noise_bits: 48,
            ct_bits: 1024,
            pk_elems: 16,
        }
    }
}

/// A slot-packed ciphertext: one integer per slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FheCiphertext {
    slots: Vec<BigUint>,
}

impl FheCiphertext {
    /// Number of slots.
    pub fn slots(&self) -> usize {
        self.slots.len()
    }
}

impl Serialize for FheCiphertext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire: Vec<WireInt> = self.slots.iter().map(WireInt::from).collect();
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FheCiphertext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = Vec::<WireInt>::deserialize(deserializer)?;
        let slots = wire
            .iter()
            .map(|w| w.to_biguint())
            .collect::<Result<_, _>>()
            .map_err(|_| serde::de::Error::custom("negative ciphertext"))?;
        Ok(Self { slots })
    }
}

/// Public side: the noise-free modulus `x0` and encryptions of zero.
#[derive(Clone, Debug)]
pub struct Fhe {
    params: FheParams,
    x0: BigUint,
    xs: Vec<BigUint>,
}

impl Fhe {
    /// Rebuilds the public side from an announced key.
    pub fn new(params: FheParams, x0: BigUint, xs: Vec<BigUint>) -> Self {
        Self { params, x0, xs }
    }

    /// The scheme parameters.
    pub fn params(&self) -> &FheParams {
        &self.params
    }

    /// The public key material, for announcement.
    pub fn key_material(&self) -> (&BigUint, &[BigUint]) {
        (&self.x0, &self.xs)
    }

    /// Encrypts a bit vector, one bit per slot, zero-padded up to the slot
    /// count. Fails if more bits are supplied than there are slots.
    pub fn encrypt_slots<R: RngCore + CryptoRng>(
        &self,
        bits: &[bool],
        rng: &mut R,
    ) -> Result<FheCiphertext, Error> {
        if bits.len() > self.params.slots {
            return Err(Error::InvalidParameters("more bits than slots"));
        }
        let slots = (0..self.params.slots)
            .map(|i| self.encrypt_bit(bits.get(i).copied().unwrap_or(false), rng))
            .collect();
        Ok(FheCiphertext { slots })
    }

    fn encrypt_bit<R: RngCore + CryptoRng>(&self, bit: bool, rng: &mut R) -> BigUint {
        let noise = number::rand_bits(self.params.noise_bits, rng);
        let mut c = BigUint::from(bit as u8) + (noise << 1);
        for x in &self.xs {
            if rng.gen::<bool>() {
                c += x << 1;
            }
        }
        c % &self.x0
    }

    /// Slot-wise addition: XOR of the packed bits.
    pub fn add(&self, a: &FheCiphertext, b: &FheCiphertext) -> Result<FheCiphertext, Error> {
        self.zip(a, b, |x, y| (x + y) % &self.x0)
    }

    /// Slot-wise multiplication: AND of the packed bits.
    pub fn mul(&self, a: &FheCiphertext, b: &FheCiphertext) -> Result<FheCiphertext, Error> {
        self.zip(a, b, |x, y| x * y % &self.x0)
    }

    fn zip(
        &self,
        a: &FheCiphertext,
        b: &FheCiphertext,
        op: impl Fn(&BigUint, &BigUint) -> BigUint,
    ) -> Result<FheCiphertext, Error> {
        if a.slots.len() != b.slots.len() {
            return Err(Error::InvalidParameters("slot count mismatch"));
        }
        let slots = a.slots.iter().zip(&b.slots).map(|(x, y)| op(x, y)).collect();
        Ok(FheCiphertext { slots })
    }
}

/// Private side: the odd secret integer.
#[derive(Clone, Debug)]
pub struct FhePriv {
    p: BigUint,
    public: Fhe,
}

impl FhePriv {
    /// Generates a fresh key for the given parameters.
    pub fn keygen<R: RngCore + CryptoRng>(params: FheParams, rng: &mut R) -> Self {
        let mut p = number::rand_bits(params.sk_bits, rng);
        p.set_bit(params.sk_bits - 1, true);
        p.set_bit(0, true);

        let q_bits = params.ct_bits - params.sk_bits;
        let mut q0 = number::rand_bits(q_bits, rng);
        q0.set_bit(q_bits - 1, true);
        q0.set_bit(0, true);
        let x0 = &q0 * &p;

        let xs = (0..params.pk_elems)
            .map(|_| {
                let q = number::rand_below(&q0, rng);
                let r = number::rand_bits(params.noise_bits, rng);
                &p * q + (r << 1)
            })
            .collect();

        Self {
            p,
            public: Fhe::new(params, x0, xs),
        }
    }

    /// The matching public side.
    pub fn public(&self) -> &Fhe {
        &self.public
    }

    /// Decrypts every slot: parity of the centered remainder mod the secret
    /// integer. Noise that has outgrown the secret modulus yields garbage
    /// parities; keeping the evaluated depth inside the parameter margin is
    /// the caller's contract.
    pub fn decrypt_slots(&self, c: &FheCiphertext) -> Vec<bool> {
        c.slots
            .iter()
            .map(|slot| {
                let m = slot % &self.p;
                let half = &self.p >> 1;
                let v = if m > half { &self.p - &m } else { m };
                (&v % 2u32).to_u32() == Some(1)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn keys(slots: usize) -> (FhePriv, ChaCha20Rng) {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        (FhePriv::keygen(FheParams::with_slots(slots), &mut rng), rng)
    }

    #[test]
    fn encrypt_decrypt_slots() {
        let (sk, mut rng) = keys(8);
        let bits = vec![true, false, true, true, false, false, true, false];
        let c = sk.public().encrypt_slots(&bits, &mut rng).unwrap();
        assert_eq!(sk.decrypt_slots(&c), bits);
    }

    #[test]
    fn short_input_is_zero_padded() {
        let (sk, mut rng) = keys(4);
        let c = sk.public().encrypt_slots(&[true], &mut rng).unwrap();
        assert_eq!(sk.decrypt_slots(&c), vec![true, false, false, false]);
    }

    #[test]
    fn add_is_xor_mul_is_and() {
        let (sk, mut rng) = keys(4);
        let fhe = sk.public().clone();
        let a = vec![true, true, false, false];
        let b = vec![true, false, true, false];
        let ca = fhe.encrypt_slots(&a, &mut rng).unwrap();
        let cb = fhe.encrypt_slots(&b, &mut rng).unwrap();

        let sum = sk.decrypt_slots(&fhe.add(&ca, &cb).unwrap());
        let prod = sk.decrypt_slots(&fhe.mul(&ca, &cb).unwrap());
        for i in 0..4 {
            assert_eq!(sum[i], a[i] ^ b[i]);
            assert_eq!(prod[i], a[i] && b[i]);
        }
    }

    #[test]
    fn oversize_input_is_rejected() {
        let (sk, mut rng) = keys(2);
        let r = sk.public().encrypt_slots(&[true; 3], &mut rng);
        assert!(r.is_err());
    }
}
