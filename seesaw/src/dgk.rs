//! Private comparison from blinded additive differences.
//!
//! Party A encrypts the bits of `a` under its own additive key and sends
//! them over. Party B, holding `b` in the clear, homomorphically forms one
//! difference term per bit position — zero exactly when that position is the
//! first (scanning from the MSB) at which the operands differ in the
//! direction B is probing — plus one equality term, multiplies every term by
//! a fresh random scalar and shuffles them. A decrypts the shuffled terms,
//! learns only whether a zero is present, and reports that single bit under
//! the QR cipher; B folds in its probe direction so the final ciphertext
//! decrypts to `[a < b]` with ties fixed to 0.

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::circuit::bits_le;
use crate::gm::{Gm, QrCiphertext};
use crate::number::{self, WireInt};
use crate::paillier::{AddCiphertext, Paillier, PaillierPriv};
use crate::Error;

/// Messages exchanged between [`DgkA`] and [`DgkB`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DgkMsg {
    /// A's additive key announcement and encrypted operand bits, LSB first.
    Bits {
        /// Additive modulus of A's key.
        n: WireInt,
        /// `[a_i]`, one ciphertext per bit.
        cts: Vec<AddCiphertext>,
    },
    /// B's blinded, shuffled difference terms (`l + 1` ciphertexts).
    Scrambled {
        /// The shuffled terms.
        cts: Vec<AddCiphertext>,
    },
    /// A's "zero term present" report.
    ZeroFlag {
        /// `[delta_A]` under the QR cipher.
        ct: QrCiphertext,
    },
    /// B's folded result.
    Result {
        /// `[a < b]` under the QR cipher.
        ct: QrCiphertext,
    },
}

enum AState {
    SendBits,
    WaitScrambled,
    SendFlag,
    WaitResult,
    Done(QrCiphertext),
}

/// The party holding `a` and the additive secret key.
pub struct DgkA {
    a_bits: Vec<bool>,
    l: usize,
    sk: PaillierPriv,
    gm: Gm,
    rng: ChaCha20Rng,
    zero_seen: bool,
    state: AState,
}

impl DgkA {
    /// Creates the A side for the low `l` bits of `a`.
    pub fn new(a: &BigUint, l: usize, sk: PaillierPriv, gm: Gm, rng: ChaCha20Rng) -> Self {
        Self {
            a_bits: bits_le(a, l),
            l,
            sk,
            gm,
            rng,
            zero_seen: false,
            state: AState::SendBits,
        }
    }

    /// Produces the next message, if one is due.
    pub fn next(&mut self) -> Result<Option<DgkMsg>, Error> {
        match self.state {
            AState::SendBits => {
                let paillier = self.sk.public().clone();
                let cts = self
                    .a_bits
                    .iter()
                    .map(|&bit| paillier.encrypt(&BigUint::from(bit as u8), &mut self.rng))
                    .collect();
                self.state = AState::WaitScrambled;
                Ok(Some(DgkMsg::Bits {
                    n: WireInt::from_biguint(paillier.modulus()),
                    cts,
                }))
            }
            AState::SendFlag => {
                let ct = self.gm.encrypt(self.zero_seen, &mut self.rng);
                self.state = AState::WaitResult;
                Ok(Some(DgkMsg::ZeroFlag { ct }))
            }
            _ => Ok(None),
        }
    }

    /// Ingests a message from B.
    pub fn accept(&mut self, msg: &DgkMsg) -> Result<(), Error> {
        match (msg, &self.state) {
            (DgkMsg::Scrambled { cts }, AState::WaitScrambled) => {
                if cts.len() != self.l + 1 {
                    return Err(Error::UnexpectedMessage);
                }
                self.zero_seen = cts.iter().any(|ct| self.sk.decrypt(ct).is_zero());
                self.state = AState::SendFlag;
                Ok(())
            }
            (DgkMsg::Result { ct }, AState::WaitResult) => {
                self.state = AState::Done(ct.clone());
                Ok(())
            }
            _ => Err(Error::UnexpectedMessage),
        }
    }

    /// True once the folded result has arrived.
    pub fn is_done(&self) -> bool {
        matches!(self.state, AState::Done(_))
    }

    /// The encrypted `[a < b]` bit, available when the session is done.
    pub fn output(&self) -> Result<QrCiphertext, Error> {
        match &self.state {
            AState::Done(ct) => Ok(ct.clone()),
            _ => Err(Error::ProtocolStillInProgress),
        }
    }
}

enum BState {
    WaitBits,
    SendScrambled(Vec<AddCiphertext>),
    WaitFlag,
    SendResult(QrCiphertext),
    Done,
}

/// The party holding `b`.
pub struct DgkB {
    b_bits: Vec<bool>,
    l: usize,
    gm: Gm,
    rng: ChaCha20Rng,
    /// Probe direction: false tests `a < b`, true tests `a >= b`.
    delta: bool,
    state: BState,
}

impl DgkB {
    /// Creates the B side for the low `l` bits of `b`.
    pub fn new(b: &BigUint, l: usize, gm: Gm, mut rng: ChaCha20Rng) -> Self {
        let delta = rng.gen();
        Self {
            b_bits: bits_le(b, l),
            l,
            gm,
            rng,
            delta,
            state: BState::WaitBits,
        }
    }

    /// Ingests a message from A and queues the reply.
    pub fn accept(&mut self, msg: &DgkMsg) -> Result<(), Error> {
        match (msg, &self.state) {
            (DgkMsg::Bits { n, cts }, BState::WaitBits) => {
                if cts.len() != self.l {
                    return Err(Error::UnexpectedMessage);
                }
                let n = n.to_biguint()?;
                if n <= BigUint::from(3 * self.l as u64 + 4) {
                    return Err(Error::InvalidParameters(
                        "additive modulus too small for the comparison width",
                    ));
                }
                let scrambled = self.scramble(&Paillier::new(n), cts);
                self.state = BState::SendScrambled(scrambled);
                Ok(())
            }
            (DgkMsg::ZeroFlag { ct }, BState::WaitFlag) => {
                let folded = if self.delta {
                    self.gm.neg(ct)
                } else {
                    ct.clone()
                };
                let folded = self.gm.rerand(&folded, &mut self.rng);
                self.state = BState::SendResult(folded);
                Ok(())
            }
            _ => Err(Error::UnexpectedMessage),
        }
    }

    /// Produces the queued reply, if any.
    pub fn next(&mut self) -> Result<Option<DgkMsg>, Error> {
        match std::mem::replace(&mut self.state, BState::Done) {
            BState::SendScrambled(cts) => {
                self.state = BState::WaitFlag;
                Ok(Some(DgkMsg::Scrambled { cts }))
            }
            BState::SendResult(ct) => Ok(Some(DgkMsg::Result { ct })),
            other => {
                self.state = other;
                Ok(None)
            }
        }
    }

    /// True once the folded result has been handed out.
    pub fn is_done(&self) -> bool {
        matches!(self.state, BState::Done)
    }

    /// One term per bit position: `s + a_i - b_i + 3 * sum_{j>i} (a_j ^ b_j)`
    /// with `s = 1 - 2*delta`, plus the equality term, each multiplied by a
    /// fresh scalar and shuffled.
    fn scramble(&mut self, paillier: &Paillier, a_cts: &[AddCiphertext]) -> Vec<AddCiphertext> {
        let n = paillier.modulus().clone();
        let s = if self.delta { -1i64 } else { 1i64 };
        let three = BigUint::from(3u8);

        // running sum of XOR terms for positions above the current one
        let mut acc = AddCiphertext(BigUint::from(1u8)); // trivial encryption of 0
        let mut terms = Vec::with_capacity(self.l + 1);
        for i in (0..self.l).rev() {
            let b_i = self.b_bits[i];
            let base = paillier.add_plain_signed(&a_cts[i], &BigInt::from(s - b_i as i64));
            let term = paillier.add(&base, &paillier.scalar_mul(&acc, &three));
            terms.push(self.blind(paillier, &term));

            // a_j ^ b_j is [a_j] itself or [1 - a_j] depending on b_j
            let xor = if b_i {
                let negated = paillier.scalar_mul(&a_cts[i], &(&n - 1u32));
                paillier.add_plain(&negated, &BigUint::from(1u8))
            } else {
                a_cts[i].clone()
            };
            acc = paillier.add(&acc, &xor);
        }

        // equality term: zero iff a == b, but only on the a >= b probe
        let eq = if self.delta {
            acc
        } else {
            paillier.add_plain(&acc, &BigUint::from(1u8))
        };
        terms.push(self.blind(paillier, &eq));

        terms.shuffle(&mut self.rng);
        terms
    }

    fn blind(&mut self, paillier: &Paillier, ct: &AddCiphertext) -> AddCiphertext {
        let r = number::rand_nonzero_below(paillier.modulus(), &mut self.rng);
        let blinded = paillier.scalar_mul(ct, &r);
        paillier.rerand(&blinded, &mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gm::GmPriv;
    use rand::SeedableRng;

    fn run_dgk(a: u64, b: u64, l: usize, seed: u64) -> bool {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let gm_sk = GmPriv::keygen(128, &mut rng);
        let paillier_sk = PaillierPriv::keygen(128, &mut rng);

        let mut party_a = DgkA::new(
            &BigUint::from(a),
            l,
            paillier_sk,
            gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(seed + 1),
        );
        let mut party_b = DgkB::new(
            &BigUint::from(b),
            l,
            gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(seed + 2),
        );

        loop {
            if let Some(m) = party_a.next().unwrap() {
                party_b.accept(&m).unwrap();
            }
            if let Some(m) = party_b.next().unwrap() {
                party_a.accept(&m).unwrap();
            }
            if party_a.is_done() && party_b.is_done() {
                break;
            }
        }
        gm_sk.decrypt(&party_a.output().unwrap())
    }

    #[test]
    fn compares_small_integers() {
        // two seeds so both probe directions get exercised
        for seed in [1, 2] {
            for a in 0..8u64 {
                for b in 0..8u64 {
                    assert_eq!(run_dgk(a, b, 3, seed), a < b, "a={a} b={b} seed={seed}");
                }
            }
        }
    }

    #[test]
    fn scenario_60_vs_90() {
        assert!(run_dgk(0x3C, 0x5A, 8, 1));
        assert!(!run_dgk(0x5A, 0x3C, 8, 1));
    }

    #[test]
    fn equal_inputs_compare_strictly() {
        for seed in [1, 2, 3, 4] {
            assert!(!run_dgk(0x12345678, 0x12345678, 32, seed));
        }
    }

    #[test]
    fn wrong_phase_message_is_fatal() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let gm_sk = GmPriv::keygen(128, &mut rng);
        let mut party_b = DgkB::new(
            &BigUint::from(1u8),
            4,
            gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(6),
        );
        let flag = DgkMsg::ZeroFlag {
            ct: gm_sk.public().encrypt(false, &mut rng),
        };
        assert!(matches!(
            party_b.accept(&flag),
            Err(Error::UnexpectedMessage)
        ));
    }
}
