//! Comparison of two *encrypted* integers by statistical blinding.
//!
//! The owner holds `[a]` and `[b]` under the helper's additive key and forms
//! `[z] = [b] - [a] + 2^l` (operands swapped in the `Rev` variant), adds a
//! uniform `r < 2^(l+lambda)` and ships the blind. The helper decrypts
//! `z + r`, keeps its low `l` bits, and both parties feed the low halves into
//! a bit-comparison back-end; the borrow bit it produces, XORed with each
//! party's high-half parity, is the comparison result. The helper must abort
//! when the blinded value leaves `[0, 2^(l+lambda+1))` - an honest owner
//! never produces such a value.
//!
//! `EncCompare` decrypts to `a <= b` for the owner; `Rev_EncCompare` to
//! `b <= a` for the helper. Either wrapper can instead leave the result with
//! the helper as a QR ciphertext, which is how the argmax protocols consume
//! it.

use num_bigint::BigUint;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::comparison::{Backend, CompareMsg, ComparerA, ComparerB};
use crate::dgk::{DgkA, DgkB};
use crate::gc_compare::{GcCompareA, GcCompareB};
use crate::gm::{Gm, GmPriv, QrCiphertext};
use crate::lsic::{LsicA, LsicB};
use crate::ot::OtParams;
use crate::paillier::{AddCiphertext, Paillier, PaillierPriv};
use crate::transport::Session;
use crate::Error;

/// Messages exchanged between the owner and helper wrappers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncMsg {
    /// The owner's blinded difference `[z + r]`.
    Blinded {
        /// Ciphertext under the helper's additive key.
        ct: AddCiphertext,
    },
    /// A back-end message, in either direction.
    Compare(CompareMsg),
    /// The helper's (possibly masked) result ciphertext.
    Masked {
        /// `[borrow ^ helper-parity (^ mask)]` under the QR cipher.
        ct: QrCiphertext,
    },
    /// The owner's high-half parity, ciphertext-output mode only.
    Parity {
        /// `[r >> l parity]` under the QR cipher.
        ct: QrCiphertext,
    },
    /// The owner's masked plaintext result, `Rev` variant only.
    Unmask {
        /// `result ^ mask`; the helper removes the mask.
        bit: bool,
    },
}

/// Where the wrapper leaves its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOutput {
    /// Plaintext bit for the result party (owner in `Enc`, helper in `Rev`).
    Plain,
    /// QR ciphertext left with the helper; only the owner could decrypt it.
    Ciphertext,
}

/// Shared parameters of one encrypted comparison.
#[derive(Clone, Copy, Debug)]
pub struct CompareParams {
    /// Bit width of the compared integers.
    pub l: usize,
    /// Statistical blinding parameter.
    pub lambda: u32,
    /// Bit-comparison back-end to run under the blinding.
    pub backend: Backend,
    /// OT parameters, used by the GC back-end.
    pub ot_params: OtParams,
}

impl CompareParams {
    /// Parameters with the default OT configuration.
    pub fn new(l: usize, lambda: u32, backend: Backend) -> Self {
        Self {
            l,
            lambda,
            backend,
            ot_params: OtParams::default(),
        }
    }

    fn check_modulus(&self, n: &BigUint) -> Result<(), Error> {
        if n.bits() <= self.l as u64 + self.lambda as u64 + 2 {
            return Err(Error::InvalidParameters(
                "additive plaintext space too small for width plus blinding",
            ));
        }
        Ok(())
    }

    /// Upper bound on an honestly blinded value: `2^(l+lambda+1)`.
    pub(crate) fn blind_bound(&self) -> BigUint {
        BigUint::from(1u8) << (self.l as u64 + self.lambda as u64 + 1)
    }
}

fn child_rng(rng: &mut ChaCha20Rng) -> ChaCha20Rng {
    use rand::SeedableRng;
    ChaCha20Rng::from_seed(rng.gen())
}

enum OwnerState {
    Init,
    SendBlinded(AddCiphertext),
    Compare,
    WaitMasked,
    SendUnmask(bool),
    SendParity,
    Done,
}

/// Owner-side core shared by the `Enc` and `Rev` variants.
struct OwnerCore {
    params: CompareParams,
    rev: bool,
    mode: CompareOutput,
    ct_a: AddCiphertext,
    ct_b: AddCiphertext,
    paillier: Paillier,
    gm_sk: GmPriv,
    rng: ChaCha20Rng,
    r_parity: bool,
    comparer: Option<ComparerB>,
    result: Option<bool>,
    state: OwnerState,
}

impl OwnerCore {
    fn new(
        ct_a: AddCiphertext,
        ct_b: AddCiphertext,
        params: CompareParams,
        paillier: Paillier,
        gm_sk: GmPriv,
        rev: bool,
        mode: CompareOutput,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        params.check_modulus(paillier.modulus())?;
        Ok(Self {
            params,
            rev,
            mode,
            ct_a,
            ct_b,
            paillier,
            gm_sk,
            rng,
            r_parity: false,
            comparer: None,
            result: None,
            state: OwnerState::Init,
        })
    }

    /// Forms the blinded difference and instantiates the back-end B side
    /// over `r mod 2^l`.
    fn prepare(&mut self) -> Result<(), Error> {
        if !matches!(self.state, OwnerState::Init) {
            return Ok(());
        }
        let l = self.params.l;
        tracing::debug!(l, rev = self.rev, "starting encrypted comparison");

        let (lhs, rhs) = if self.rev {
            (&self.ct_a, &self.ct_b)
        } else {
            (&self.ct_b, &self.ct_a)
        };
        let z = self.paillier.sub(lhs, rhs)?;
        let z = self
            .paillier
            .add_plain(&z, &(BigUint::from(1u8) << l as u64));

        let r = crate::number::rand_bits(l as u64 + self.params.lambda as u64, &mut self.rng);
        let blinded = self.paillier.add_plain(&z, &r);
        let blinded = self.paillier.rerand(&blinded, &mut self.rng);

        self.r_parity = r.bit(l as u64);
        let low = r % (BigUint::from(1u8) << l as u64);
        let gm = self.gm_sk.public().clone();
        let inner_rng = child_rng(&mut self.rng);
        let mut comparer = match self.params.backend {
            Backend::Lsic => ComparerB::from(LsicB::new(&low, l, self.gm_sk.clone(), inner_rng)),
            Backend::Dgk => ComparerB::from(DgkB::new(&low, l, gm, inner_rng)),
            Backend::Gc => ComparerB::from(GcCompareB::new(
                &low,
                l,
                gm,
                self.params.ot_params,
                inner_rng,
            )),
        };
        comparer.prepare()?;
        self.comparer = Some(comparer);
        self.state = OwnerState::SendBlinded(blinded);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<EncMsg>, Error> {
        self.prepare()?;
        loop {
            match std::mem::replace(&mut self.state, OwnerState::Done) {
                OwnerState::SendBlinded(ct) => {
                    self.state = OwnerState::Compare;
                    return Ok(Some(EncMsg::Blinded { ct }));
                }
                OwnerState::Compare => {
                    let comparer = self
                        .comparer
                        .as_mut()
                        .ok_or(Error::InvariantViolation("no comparer after prepare"))?;
                    if let Some(m) = comparer.next()? {
                        self.state = OwnerState::Compare;
                        return Ok(Some(EncMsg::Compare(m)));
                    }
                    if !comparer.is_done() {
                        self.state = OwnerState::Compare;
                        return Ok(None);
                    }
                    match self.mode {
                        CompareOutput::Plain => {
                            self.state = OwnerState::WaitMasked;
                            return Ok(None);
                        }
                        CompareOutput::Ciphertext => {
                            self.state = OwnerState::SendParity;
                        }
                    }
                }
                OwnerState::SendParity => {
                    let ct = self
                        .gm_sk
                        .public()
                        .encrypt(self.r_parity, &mut self.rng);
                    return Ok(Some(EncMsg::Parity { ct }));
                }
                OwnerState::SendUnmask(bit) => {
                    return Ok(Some(EncMsg::Unmask { bit }));
                }
                other => {
                    self.state = other;
                    return Ok(None);
                }
            }
        }
    }

    fn accept(&mut self, msg: &EncMsg) -> Result<(), Error> {
        match msg {
            EncMsg::Compare(m) => {
                if !matches!(self.state, OwnerState::Compare) {
                    return Err(Error::UnexpectedMessage);
                }
                self.comparer
                    .as_mut()
                    .ok_or(Error::InvariantViolation("no comparer after prepare"))?
                    .accept(m)
            }
            EncMsg::Masked { ct } => {
                if !matches!(self.state, OwnerState::WaitMasked)
                    || self.mode != CompareOutput::Plain
                {
                    return Err(Error::UnexpectedMessage);
                }
                let bit = self.gm_sk.decrypt(ct) ^ self.r_parity;
                if self.rev {
                    self.state = OwnerState::SendUnmask(bit);
                } else {
                    self.result = Some(bit);
                    self.state = OwnerState::Done;
                }
                Ok(())
            }
            _ => Err(Error::UnexpectedMessage),
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, OwnerState::Done)
    }
}

enum HelperState {
    WaitBlinded,
    Compare,
    WaitUnmask,
    WaitParity(QrCiphertext),
    Done,
}

/// Helper-side core shared by the `Enc` and `Rev` variants.
struct HelperCore {
    params: CompareParams,
    rev: bool,
    mode: CompareOutput,
    paillier_sk: PaillierPriv,
    gm: Gm,
    rng: ChaCha20Rng,
    z_parity: bool,
    mask: bool,
    comparer: Option<ComparerA>,
    result_bit: Option<bool>,
    result_ct: Option<QrCiphertext>,
    state: HelperState,
}

impl HelperCore {
    fn new(
        params: CompareParams,
        paillier_sk: PaillierPriv,
        gm: Gm,
        rev: bool,
        mode: CompareOutput,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        params.check_modulus(paillier_sk.public().modulus())?;
        Ok(Self {
            params,
            rev,
            mode,
            paillier_sk,
            gm,
            rng,
            z_parity: false,
            mask: false,
            comparer: None,
            result_bit: None,
            result_ct: None,
            state: HelperState::WaitBlinded,
        })
    }

    fn accept(&mut self, msg: &EncMsg) -> Result<(), Error> {
        match msg {
            EncMsg::Blinded { ct } => {
                if !matches!(self.state, HelperState::WaitBlinded) {
                    return Err(Error::UnexpectedMessage);
                }
                let blinded = self.paillier_sk.decrypt(ct);
                if blinded >= self.params.blind_bound() {
                    return Err(Error::OutOfBounds);
                }
                let l = self.params.l;
                self.z_parity = blinded.bit(l as u64);
                let low = &blinded % (BigUint::from(1u8) << l as u64);

                let inner_rng = child_rng(&mut self.rng);
                let mut comparer = match self.params.backend {
                    Backend::Lsic => {
                        ComparerA::from(LsicA::new(&low, l, self.gm.clone(), inner_rng))
                    }
                    Backend::Dgk => ComparerA::from(DgkA::new(
                        &low,
                        l,
                        self.paillier_sk.clone(),
                        self.gm.clone(),
                        inner_rng,
                    )),
                    Backend::Gc => ComparerA::from(GcCompareA::new(
                        &low,
                        l,
                        self.gm.clone(),
                        self.params.ot_params,
                        inner_rng,
                    )),
                };
                comparer.prepare()?;
                self.comparer = Some(comparer);
                self.state = HelperState::Compare;
                Ok(())
            }
            EncMsg::Compare(m) => {
                if !matches!(self.state, HelperState::Compare) {
                    return Err(Error::UnexpectedMessage);
                }
                self.comparer
                    .as_mut()
                    .ok_or(Error::InvariantViolation("no comparer after the blind"))?
                    .accept(m)
            }
            EncMsg::Unmask { bit } => {
                if !matches!(self.state, HelperState::WaitUnmask) {
                    return Err(Error::UnexpectedMessage);
                }
                self.result_bit = Some(bit ^ self.mask);
                self.state = HelperState::Done;
                Ok(())
            }
            EncMsg::Parity { ct } => {
                self.settle()?;
                let held = match std::mem::replace(&mut self.state, HelperState::Done) {
                    HelperState::WaitParity(held) => held,
                    other => {
                        self.state = other;
                        return Err(Error::UnexpectedMessage);
                    }
                };
                let combined = self.gm.xor(&held, ct);
                self.result_ct = Some(self.gm.rerand(&combined, &mut self.rng));
                Ok(())
            }
            _ => Err(Error::UnexpectedMessage),
        }
    }

    fn next(&mut self) -> Result<Option<EncMsg>, Error> {
        if !matches!(self.state, HelperState::Compare) {
            return Ok(None);
        }
        let comparer = self
            .comparer
            .as_mut()
            .ok_or(Error::InvariantViolation("no comparer after the blind"))?;
        if let Some(m) = comparer.next()? {
            return Ok(Some(EncMsg::Compare(m)));
        }
        if !comparer.is_done() {
            return Ok(None);
        }
        if matches!(self.mode, CompareOutput::Ciphertext) {
            self.settle()?;
            return Ok(None);
        }

        let mut folded = self.folded()?;
        if self.rev {
            self.mask = self.rng.gen();
            if self.mask {
                folded = self.gm.neg(&folded);
            }
            self.state = HelperState::WaitUnmask;
        } else {
            self.state = HelperState::Done;
        }
        Ok(Some(EncMsg::Masked {
            ct: self.gm.rerand(&folded, &mut self.rng),
        }))
    }

    /// The borrow bit folded with this side's high-half parity.
    fn folded(&self) -> Result<QrCiphertext, Error> {
        let beta = self
            .comparer
            .as_ref()
            .ok_or(Error::ProtocolStillInProgress)?
            .output()?;
        Ok(if self.z_parity {
            self.gm.neg(&beta)
        } else {
            beta
        })
    }

    /// Ciphertext mode: once the inner comparison is terminal, park the
    /// folded result until the owner's parity contribution arrives.
    fn settle(&mut self) -> Result<(), Error> {
        if matches!(self.state, HelperState::Compare)
            && matches!(self.mode, CompareOutput::Ciphertext)
            && self.comparer.as_ref().map_or(false, |c| c.is_done())
        {
            let folded = self.folded()?;
            self.state = HelperState::WaitParity(folded);
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        matches!(self.state, HelperState::Done)
    }
}

/// Owner side of `EncCompare`; learns `a <= b` in plaintext mode.
pub struct EncCompareOwner(OwnerCore);

impl EncCompareOwner {
    /// Plaintext-output comparison of `[a]` and `[b]`.
    pub fn new(
        ct_a: AddCiphertext,
        ct_b: AddCiphertext,
        params: CompareParams,
        paillier: Paillier,
        gm_sk: GmPriv,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        OwnerCore::new(
            ct_a,
            ct_b,
            params,
            paillier,
            gm_sk,
            false,
            CompareOutput::Plain,
            rng,
        )
        .map(Self)
    }

    /// Variant leaving the result with the helper as a QR ciphertext.
    pub fn with_ciphertext_output(
        ct_a: AddCiphertext,
        ct_b: AddCiphertext,
        params: CompareParams,
        paillier: Paillier,
        gm_sk: GmPriv,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        OwnerCore::new(
            ct_a,
            ct_b,
            params,
            paillier,
            gm_sk,
            false,
            CompareOutput::Ciphertext,
            rng,
        )
        .map(Self)
    }

    /// The plaintext `a <= b`, terminal and plaintext mode only.
    pub fn output(&self) -> Result<bool, Error> {
        self.0.result.ok_or(Error::ProtocolStillInProgress)
    }
}

/// Helper side of `EncCompare`.
pub struct EncCompareHelper(HelperCore);

impl EncCompareHelper {
    /// Plaintext-output comparison helper.
    pub fn new(
        params: CompareParams,
        paillier_sk: PaillierPriv,
        gm: Gm,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        HelperCore::new(params, paillier_sk, gm, false, CompareOutput::Plain, rng).map(Self)
    }

    /// Variant keeping the result as a QR ciphertext on this side.
    pub fn with_ciphertext_output(
        params: CompareParams,
        paillier_sk: PaillierPriv,
        gm: Gm,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        HelperCore::new(params, paillier_sk, gm, false, CompareOutput::Ciphertext, rng).map(Self)
    }

    /// The result ciphertext, terminal and ciphertext mode only.
    pub fn output_ciphertext(&self) -> Result<QrCiphertext, Error> {
        self.0
            .result_ct
            .clone()
            .ok_or(Error::ProtocolStillInProgress)
    }
}

/// Owner side of `Rev_EncCompare`; the helper learns `b <= a`.
pub struct RevEncCompareOwner(OwnerCore);

impl RevEncCompareOwner {
    /// Plaintext-output reverse comparison of `[a]` and `[b]`.
    pub fn new(
        ct_a: AddCiphertext,
        ct_b: AddCiphertext,
        params: CompareParams,
        paillier: Paillier,
        gm_sk: GmPriv,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        OwnerCore::new(
            ct_a,
            ct_b,
            params,
            paillier,
            gm_sk,
            true,
            CompareOutput::Plain,
            rng,
        )
        .map(Self)
    }

    /// Variant leaving the result with the helper as a QR ciphertext.
    pub fn with_ciphertext_output(
        ct_a: AddCiphertext,
        ct_b: AddCiphertext,
        params: CompareParams,
        paillier: Paillier,
        gm_sk: GmPriv,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        OwnerCore::new(
            ct_a,
            ct_b,
            params,
            paillier,
            gm_sk,
            true,
            CompareOutput::Ciphertext,
            rng,
        )
        .map(Self)
    }
}

/// Helper side of `Rev_EncCompare`.
pub struct RevEncCompareHelper(HelperCore);

impl RevEncCompareHelper {
    /// Plaintext-output reverse comparison helper.
    pub fn new(
        params: CompareParams,
        paillier_sk: PaillierPriv,
        gm: Gm,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        HelperCore::new(params, paillier_sk, gm, true, CompareOutput::Plain, rng).map(Self)
    }

    /// Variant keeping the result as a QR ciphertext on this side.
    pub fn with_ciphertext_output(
        params: CompareParams,
        paillier_sk: PaillierPriv,
        gm: Gm,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        HelperCore::new(params, paillier_sk, gm, true, CompareOutput::Ciphertext, rng).map(Self)
    }

    /// The plaintext `b <= a`, terminal and plaintext mode only.
    pub fn output_bit(&self) -> Result<bool, Error> {
        self.0.result_bit.ok_or(Error::ProtocolStillInProgress)
    }

    /// The result ciphertext, terminal and ciphertext mode only.
    pub fn output_ciphertext(&self) -> Result<QrCiphertext, Error> {
        self.0
            .result_ct
            .clone()
            .ok_or(Error::ProtocolStillInProgress)
    }
}

macro_rules! impl_owner_session {
    ($ty:ty) => {
        impl Session for $ty {
            type Msg = EncMsg;

            fn prepare(&mut self) -> Result<(), Error> {
                self.0.prepare()
            }

            fn next_msg(&mut self) -> Result<Option<EncMsg>, Error> {
                self.0.next()
            }

            fn accept_msg(&mut self, msg: &EncMsg) -> Result<(), Error> {
                self.0.accept(msg)
            }

            fn is_done(&self) -> bool {
                self.0.is_done()
            }
        }
    };
}

macro_rules! impl_helper_session {
    ($ty:ty) => {
        impl Session for $ty {
            type Msg = EncMsg;

            fn next_msg(&mut self) -> Result<Option<EncMsg>, Error> {
                self.0.next()
            }

            fn accept_msg(&mut self, msg: &EncMsg) -> Result<(), Error> {
                self.0.accept(msg)
            }

            fn is_done(&self) -> bool {
                self.0.is_done()
            }
        }
    };
}

impl_owner_session!(EncCompareOwner);
impl_owner_session!(RevEncCompareOwner);
impl_helper_session!(EncCompareHelper);
impl_helper_session!(RevEncCompareHelper);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pump;
    use rand::SeedableRng;

    struct Keys {
        paillier_sk: PaillierPriv,
        gm_sk: GmPriv,
    }

    fn keys(seed: u64) -> Keys {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        Keys {
            paillier_sk: PaillierPriv::keygen(160, &mut rng),
            gm_sk: GmPriv::keygen(128, &mut rng),
        }
    }

    fn enc_compare(keys: &Keys, a: u64, b: u64, l: usize, backend: Backend) -> bool {
        let mut rng = ChaCha20Rng::seed_from_u64(a ^ b ^ l as u64);
        let paillier = keys.paillier_sk.public().clone();
        let ct_a = paillier.encrypt(&BigUint::from(a), &mut rng);
        let ct_b = paillier.encrypt(&BigUint::from(b), &mut rng);
        let params = CompareParams::new(l, 40, backend);

        let mut owner = EncCompareOwner::new(
            ct_a,
            ct_b,
            params,
            paillier,
            keys.gm_sk.clone(),
            ChaCha20Rng::seed_from_u64(100),
        )
        .unwrap();
        let mut helper = EncCompareHelper::new(
            params,
            keys.paillier_sk.clone(),
            keys.gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(101),
        )
        .unwrap();
        pump(&mut owner, &mut helper).unwrap();
        owner.output().unwrap()
    }

    fn rev_enc_compare(keys: &Keys, a: u64, b: u64, l: usize, backend: Backend) -> bool {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let paillier = keys.paillier_sk.public().clone();
        let ct_a = paillier.encrypt(&BigUint::from(a), &mut rng);
        let ct_b = paillier.encrypt(&BigUint::from(b), &mut rng);
        let params = CompareParams::new(l, 40, backend);

        let mut owner = RevEncCompareOwner::new(
            ct_a,
            ct_b,
            params,
            paillier,
            keys.gm_sk.clone(),
            ChaCha20Rng::seed_from_u64(102),
        )
        .unwrap();
        let mut helper = RevEncCompareHelper::new(
            params,
            keys.paillier_sk.clone(),
            keys.gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(103),
        )
        .unwrap();
        pump(&mut owner, &mut helper).unwrap();
        helper.output_bit().unwrap()
    }

    #[test]
    fn enc_compare_is_at_most() {
        let keys = keys(1);
        for backend in [Backend::Lsic, Backend::Dgk, Backend::Gc] {
            for (a, b) in [(60u64, 90u64), (90, 60), (7, 7), (0, 255), (255, 0)] {
                assert_eq!(
                    enc_compare(&keys, a, b, 8, backend),
                    a <= b,
                    "{backend:?} a={a} b={b}"
                );
            }
        }
    }

    #[test]
    fn rev_enc_compare_is_at_least() {
        let keys = keys(2);
        for backend in [Backend::Lsic, Backend::Dgk, Backend::Gc] {
            for (a, b) in [(60u64, 90u64), (90, 60), (7, 7)] {
                assert_eq!(
                    rev_enc_compare(&keys, a, b, 8, backend),
                    b <= a,
                    "{backend:?} a={a} b={b}"
                );
            }
        }
    }

    #[test]
    fn ciphertext_output_lands_with_the_helper() {
        let keys = keys(3);
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let paillier = keys.paillier_sk.public().clone();
        let ct_a = paillier.encrypt(&BigUint::from(12u8), &mut rng);
        let ct_b = paillier.encrypt(&BigUint::from(200u8), &mut rng);
        let params = CompareParams::new(8, 40, Backend::Lsic);

        let mut owner = EncCompareOwner::with_ciphertext_output(
            ct_a,
            ct_b,
            params,
            paillier,
            keys.gm_sk.clone(),
            ChaCha20Rng::seed_from_u64(104),
        )
        .unwrap();
        let mut helper = EncCompareHelper::with_ciphertext_output(
            params,
            keys.paillier_sk.clone(),
            keys.gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(105),
        )
        .unwrap();
        pump(&mut owner, &mut helper).unwrap();

        let ct = helper.output_ciphertext().unwrap();
        assert!(keys.gm_sk.decrypt(&ct)); // 12 <= 200
    }

    #[test]
    fn oversized_blind_aborts_the_helper() {
        let keys = keys(4);
        let mut rng = ChaCha20Rng::seed_from_u64(10);
        let params = CompareParams::new(8, 40, Backend::Lsic);
        let mut helper = EncCompareHelper::new(
            params,
            keys.paillier_sk.clone(),
            keys.gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(106),
        )
        .unwrap();

        let paillier = keys.paillier_sk.public().clone();
        let huge = BigUint::from(1u8) << 60; // far above 2^(8+40+1)
        let ct = paillier.encrypt(&huge, &mut rng);
        assert!(matches!(
            helper.accept_msg(&EncMsg::Blinded { ct }),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn too_small_modulus_is_rejected_at_construction() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let paillier_sk = PaillierPriv::keygen(32, &mut rng);
        let gm_sk = GmPriv::keygen(64, &mut rng);
        let params = CompareParams::new(64, 40, Backend::Lsic);
        let r = EncCompareHelper::new(
            params,
            paillier_sk,
            gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(12),
        );
        assert!(matches!(r, Err(Error::InvalidParameters(_))));
    }
}
