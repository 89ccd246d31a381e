//! The uniform capability set over the three bit-comparison back-ends.
//!
//! Back-end choice is a tagged variant rather than a trait object: the
//! [`ComparerA`] / [`ComparerB`] enums wrap one concrete party each and
//! dispatch the common `prepare` / `accept` / `next` / `output` surface, so
//! the encrypted-comparison wrappers and the argmax protocols stay agnostic
//! over which back-end runs underneath.

use serde::{Deserialize, Serialize};

use crate::dgk::{DgkA, DgkB, DgkMsg};
use crate::gc_compare::{GcCompareA, GcCompareB, GcMsg};
use crate::gm::QrCiphertext;
use crate::lsic::{LsicA, LsicB, LsicMsg};
use crate::transport::Session;
use crate::Error;

/// Which bit-comparison back-end a session runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    /// Bit-by-bit ping-pong under the QR cipher.
    Lsic,
    /// Blinded additive difference terms.
    Dgk,
    /// Garbled comparator plus oblivious transfer.
    Gc,
}

/// Messages of any back-end, tagged by protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CompareMsg {
    Lsic(LsicMsg),
    Dgk(DgkMsg),
    Gc(GcMsg),
}

/// The A side of a bit comparison; ends up with the encrypted `[a < b]` bit.
#[allow(missing_docs)]
pub enum ComparerA {
    Lsic(LsicA),
    Dgk(DgkA),
    Gc(GcCompareA),
}

impl ComparerA {
    /// Produces any first-round material.
    pub fn prepare(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Produces the next message for the peer, `None` when nothing is due.
    pub fn next(&mut self) -> Result<Option<CompareMsg>, Error> {
        Ok(match self {
            ComparerA::Lsic(p) => p.next()?.map(CompareMsg::Lsic),
            ComparerA::Dgk(p) => p.next()?.map(CompareMsg::Dgk),
            ComparerA::Gc(p) => p.next()?.map(CompareMsg::Gc),
        })
    }

    /// Ingests a peer message; a message for a different back-end is fatal.
    pub fn accept(&mut self, msg: &CompareMsg) -> Result<(), Error> {
        match (self, msg) {
            (ComparerA::Lsic(p), CompareMsg::Lsic(m)) => p.accept(m),
            (ComparerA::Dgk(p), CompareMsg::Dgk(m)) => p.accept(m),
            (ComparerA::Gc(p), CompareMsg::Gc(m)) => p.accept(m),
            _ => Err(Error::UnexpectedMessage),
        }
    }

    /// True once the session is terminal.
    pub fn is_done(&self) -> bool {
        match self {
            ComparerA::Lsic(p) => p.is_done(),
            ComparerA::Dgk(p) => p.is_done(),
            ComparerA::Gc(p) => p.is_done(),
        }
    }

    /// The encrypted comparison bit, terminal only.
    pub fn output(&self) -> Result<QrCiphertext, Error> {
        match self {
            ComparerA::Lsic(p) => p.output(),
            ComparerA::Dgk(p) => p.output(),
            ComparerA::Gc(p) => p.output(),
        }
    }
}

/// The B side of a bit comparison.
#[allow(missing_docs)]
pub enum ComparerB {
    Lsic(LsicB),
    Dgk(DgkB),
    Gc(GcCompareB),
}

impl ComparerB {
    /// Produces any first-round material (the GC back-end garbles here).
    pub fn prepare(&mut self) -> Result<(), Error> {
        match self {
            ComparerB::Gc(p) => p.prepare(),
            _ => Ok(()),
        }
    }

    /// Produces the next message for the peer, `None` when nothing is due.
    pub fn next(&mut self) -> Result<Option<CompareMsg>, Error> {
        Ok(match self {
            ComparerB::Lsic(p) => p.next()?.map(CompareMsg::Lsic),
            ComparerB::Dgk(p) => p.next()?.map(CompareMsg::Dgk),
            ComparerB::Gc(p) => p.next()?.map(CompareMsg::Gc),
        })
    }

    /// Ingests a peer message; a message for a different back-end is fatal.
    pub fn accept(&mut self, msg: &CompareMsg) -> Result<(), Error> {
        match (self, msg) {
            (ComparerB::Lsic(p), CompareMsg::Lsic(m)) => p.accept(m),
            (ComparerB::Dgk(p), CompareMsg::Dgk(m)) => p.accept(m),
            (ComparerB::Gc(p), CompareMsg::Gc(m)) => p.accept(m),
            _ => Err(Error::UnexpectedMessage),
        }
    }

    /// True once the session is terminal.
    pub fn is_done(&self) -> bool {
        match self {
            ComparerB::Lsic(p) => p.is_done(),
            ComparerB::Dgk(p) => p.is_done(),
            ComparerB::Gc(p) => p.is_done(),
        }
    }
}

impl From<LsicA> for ComparerA {
    fn from(p: LsicA) -> Self {
        ComparerA::Lsic(p)
    }
}

impl From<DgkA> for ComparerA {
    fn from(p: DgkA) -> Self {
        ComparerA::Dgk(p)
    }
}

impl From<GcCompareA> for ComparerA {
    fn from(p: GcCompareA) -> Self {
        ComparerA::Gc(p)
    }
}

impl From<LsicB> for ComparerB {
    fn from(p: LsicB) -> Self {
        ComparerB::Lsic(p)
    }
}

impl From<DgkB> for ComparerB {
    fn from(p: DgkB) -> Self {
        ComparerB::Dgk(p)
    }
}

impl From<GcCompareB> for ComparerB {
    fn from(p: GcCompareB) -> Self {
        ComparerB::Gc(p)
    }
}

impl Session for ComparerA {
    type Msg = CompareMsg;

    fn prepare(&mut self) -> Result<(), Error> {
        ComparerA::prepare(self)
    }

    fn next_msg(&mut self) -> Result<Option<CompareMsg>, Error> {
        self.next()
    }

    fn accept_msg(&mut self, msg: &CompareMsg) -> Result<(), Error> {
        self.accept(msg)
    }

    fn is_done(&self) -> bool {
        ComparerA::is_done(self)
    }
}

impl Session for ComparerB {
    type Msg = CompareMsg;

    fn prepare(&mut self) -> Result<(), Error> {
        ComparerB::prepare(self)
    }

    fn next_msg(&mut self) -> Result<Option<CompareMsg>, Error> {
        self.next()
    }

    fn accept_msg(&mut self, msg: &CompareMsg) -> Result<(), Error> {
        self.accept(msg)
    }

    fn is_done(&self) -> bool {
        ComparerB::is_done(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gm::GmPriv;
    use crate::ot::OtParams;
    use crate::paillier::PaillierPriv;
    use crate::transport::pump;
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn parties(backend: Backend, a: u64, b: u64, l: usize) -> (ComparerA, ComparerB, GmPriv) {
        let mut rng = ChaCha20Rng::seed_from_u64(77);
        let gm_sk = GmPriv::keygen(128, &mut rng);
        let gm = gm_sk.public().clone();
        let (a, b) = (BigUint::from(a), BigUint::from(b));
        let rng_a = ChaCha20Rng::seed_from_u64(78);
        let rng_b = ChaCha20Rng::seed_from_u64(79);

        let (pa, pb) = match backend {
            Backend::Lsic => (
                ComparerA::from(LsicA::new(&a, l, gm, rng_a)),
                ComparerB::from(LsicB::new(&b, l, gm_sk.clone(), rng_b)),
            ),
            Backend::Dgk => {
                let paillier_sk = PaillierPriv::keygen(128, &mut rng);
                (
                    ComparerA::from(DgkA::new(&a, l, paillier_sk, gm.clone(), rng_a)),
                    ComparerB::from(DgkB::new(&b, l, gm, rng_b)),
                )
            }
            Backend::Gc => (
                ComparerA::from(GcCompareA::new(&a, l, gm.clone(), OtParams::default(), rng_a)),
                ComparerB::from(GcCompareB::new(&b, l, gm, OtParams::default(), rng_b)),
            ),
        };
        (pa, pb, gm_sk)
    }

    #[test]
    fn all_backends_agree() {
        for backend in [Backend::Lsic, Backend::Dgk, Backend::Gc] {
            for (a, b) in [(90u64, 60u64), (60, 90), (7, 7), (0, 1), (1, 0)] {
                let (mut pa, mut pb, gm_sk) = parties(backend, a, b, 8);
                pump(&mut pa, &mut pb).unwrap();
                assert_eq!(
                    gm_sk.decrypt(&pa.output().unwrap()),
                    a < b,
                    "{backend:?} a={a} b={b}"
                );
            }
        }
    }

    #[test]
    fn cross_backend_message_is_fatal() {
        let (mut pa, mut pb, _) = parties(Backend::Lsic, 1, 2, 4);
        pa.prepare().unwrap();
        let msg = pa.next().unwrap().unwrap();
        let (_, mut wrong_b, _) = parties(Backend::Dgk, 1, 2, 4);
        assert!(matches!(
            wrong_b.accept(&msg),
            Err(Error::UnexpectedMessage)
        ));
        pb.accept(&msg).unwrap();
    }

    #[test]
    fn output_before_terminal_is_an_error() {
        let (pa, _, _) = parties(Backend::Lsic, 1, 2, 4);
        assert!(matches!(
            pa.output(),
            Err(Error::ProtocolStillInProgress)
        ));
    }
}
