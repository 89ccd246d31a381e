//! Argmax over a vector of additively encrypted integers.
//!
//! Both variants are built from one repeated unit: a reverse encrypted
//! comparison whose bit stays with the helper as a *QR ciphertext*, followed
//! by a blinded conditional select. Neither party ever sees the comparison
//! bit: the helper reshares it by XORing a fresh coin into the ciphertext,
//! the owner decrypts only that uniformly masked share, and the product
//! `beta * (right - left)` is assembled homomorphically from the helper's
//! coin-selected encryptions of the statistically blinded operands.
//!
//! The running maximum *and its position* are both carried as ciphertexts
//! under the helper's additive key, so no per-round outcome leaks to either
//! side. The owner shuffles (and re-randomizes) the vector first, and after
//! the last round sends the position ciphertext back blinded; the helper
//! decrypts and returns the blinded position, which only the owner can strip
//! and map through its permutation.
//!
//! [`LinearArgmaxOwner`] walks the vector keeping a running maximum;
//! [`TreeArgmaxOwner`] plays a tournament with `ceil(log2 k)` rounds whose
//! within-round comparisons are independent — [`run_tree_argmax`] dispatches
//! them onto a fixed-size worker pool when asked for more than one thread.

use num_bigint::BigUint;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::enc_compare::{CompareParams, EncMsg, RevEncCompareHelper, RevEncCompareOwner};
use crate::gm::{Gm, GmPriv, QrCiphertext};
use crate::number::{self, WireInt};
use crate::paillier::{AddCiphertext, Paillier, PaillierPriv};
use crate::transport::{pump, Session};
use crate::Error;

/// Messages exchanged by the argmax protocols.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgmaxMsg {
    /// A leg of the embedded reverse comparison.
    Step(EncMsg),
    /// The helper's reshared comparison bit `[beta ^ rho]`, `rho` a fresh
    /// helper coin.
    Share {
        /// Ciphertext under the QR cipher; the owner decrypts the mask only.
        ct: QrCiphertext,
    },
    /// The owner's blinded select operands.
    Select {
        /// `[right - left + 2^l + s]` for the compared values.
        value: AddCiphertext,
        /// `[right_pos - left_pos + 2^w + s']` for the carried positions.
        index: AddCiphertext,
    },
    /// The helper's coin-selected reply.
    Chosen {
        /// `[rho * blinded-value-operand]`, freshly encrypted.
        value: AddCiphertext,
        /// `[rho * blinded-position-operand]`, freshly encrypted.
        index: AddCiphertext,
        /// `[rho]`, freshly encrypted.
        bit: AddCiphertext,
    },
    /// The owner's blinded final position `[pos + u]`.
    Reveal {
        /// Ciphertext under the helper's additive key.
        ct: AddCiphertext,
    },
    /// The helper's decryption of the blinded final position.
    Index {
        /// `pos + u`; only the owner can strip `u`.
        blinded: WireInt,
    },
}

fn child_rng(rng: &mut ChaCha20Rng) -> ChaCha20Rng {
    ChaCha20Rng::from_seed(rng.gen())
}

/// Width of the position operands: smallest `w` with `2^w >= k`.
fn index_width(k: usize) -> u64 {
    let bits = (usize::BITS - k.leading_zeros()) as u64;
    bits.max(1)
}

fn check_index_space(paillier_modulus: &BigUint, k: usize, lambda: u32) -> Result<(), Error> {
    if paillier_modulus.bits() <= index_width(k) + lambda as u64 + 2 {
        return Err(Error::InvalidParameters(
            "additive plaintext space too small for position blinding",
        ));
    }
    Ok(())
}

/// An encrypted vector element together with its encrypted position.
#[derive(Clone)]
pub(crate) struct Entry {
    value: AddCiphertext,
    index: AddCiphertext,
}

enum SelectOwnerState {
    Compare,
    WaitShare,
    SendSelect,
    WaitChosen,
    Done,
}

/// Owner side of one compare-and-select unit over a pair of entries.
///
/// Ends holding the entry of the larger value; fresh `(width + lambda)`-bit
/// randomness blinds both select operands of every unit, so the helper's
/// views of successive maxima stay uncorrelated.
pub(crate) struct SelectOwner {
    left: Entry,
    right: Entry,
    paillier: Paillier,
    gm_sk: GmPriv,
    rng: ChaCha20Rng,
    shift_value: BigUint,
    shift_index: BigUint,
    inner: RevEncCompareOwner,
    share: bool,
    winner: Option<Entry>,
    state: SelectOwnerState,
}

impl SelectOwner {
    pub(crate) fn new(
        left: Entry,
        right: Entry,
        params: CompareParams,
        idx_width: u64,
        paillier: Paillier,
        gm_sk: GmPriv,
        mut rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        // the helper ends up holding [beta] = [left <= right] as a ciphertext
        let inner = RevEncCompareOwner::with_ciphertext_output(
            right.value.clone(),
            left.value.clone(),
            params,
            paillier.clone(),
            gm_sk.clone(),
            child_rng(&mut rng),
        )?;
        let s = number::rand_bits(params.l as u64 + params.lambda as u64, &mut rng);
        let shift_value = (BigUint::from(1u8) << params.l as u64) + s;
        let s = number::rand_bits(idx_width + params.lambda as u64, &mut rng);
        let shift_index = (BigUint::from(1u8) << idx_width) + s;
        Ok(Self {
            left,
            right,
            paillier,
            gm_sk,
            rng,
            shift_value,
            shift_index,
            inner,
            share: false,
            winner: None,
            state: SelectOwnerState::Compare,
        })
    }

    pub(crate) fn next(&mut self) -> Result<Option<ArgmaxMsg>, Error> {
        match self.state {
            SelectOwnerState::Compare => {
                if let Some(m) = self.inner.next_msg()? {
                    return Ok(Some(ArgmaxMsg::Step(m)));
                }
                if self.inner.is_done() {
                    self.state = SelectOwnerState::WaitShare;
                }
                Ok(None)
            }
            SelectOwnerState::SendSelect => {
                let diff = self.paillier.sub(&self.right.value, &self.left.value)?;
                let value = self.paillier.add_plain(&diff, &self.shift_value);
                let value = self.paillier.rerand(&value, &mut self.rng);

                let diff = self.paillier.sub(&self.right.index, &self.left.index)?;
                let index = self.paillier.add_plain(&diff, &self.shift_index);
                let index = self.paillier.rerand(&index, &mut self.rng);

                self.state = SelectOwnerState::WaitChosen;
                Ok(Some(ArgmaxMsg::Select { value, index }))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn accept(&mut self, msg: &ArgmaxMsg) -> Result<(), Error> {
        match msg {
            ArgmaxMsg::Step(m) => {
                if !matches!(self.state, SelectOwnerState::Compare) {
                    return Err(Error::UnexpectedMessage);
                }
                self.inner.accept_msg(m)
            }
            ArgmaxMsg::Share { ct } => {
                if !matches!(self.state, SelectOwnerState::WaitShare) {
                    return Err(Error::UnexpectedMessage);
                }
                self.share = self.gm_sk.decrypt(ct);
                self.state = SelectOwnerState::SendSelect;
                Ok(())
            }
            ArgmaxMsg::Chosen { value, index, bit } => {
                if !matches!(self.state, SelectOwnerState::WaitChosen) {
                    return Err(Error::UnexpectedMessage);
                }
                let value = self.conditional_term(
                    value,
                    bit,
                    &self.right.value,
                    &self.left.value,
                    &self.shift_value,
                )?;
                let index = self.conditional_term(
                    index,
                    bit,
                    &self.right.index,
                    &self.left.index,
                    &self.shift_index,
                )?;
                let winner = Entry {
                    value: self.paillier.rerand(
                        &self.paillier.add(&self.left.value, &value),
                        &mut self.rng,
                    ),
                    index: self.paillier.rerand(
                        &self.paillier.add(&self.left.index, &index),
                        &mut self.rng,
                    ),
                };
                self.winner = Some(winner);
                self.state = SelectOwnerState::Done;
                Ok(())
            }
            _ => Err(Error::UnexpectedMessage),
        }
    }

    /// Rebuilds `[beta * (right - left)]` from the helper's coin-selected
    /// reply: with `rho * operand` and `[rho]` in hand,
    /// `rho * (right - left) = rho*operand - shift*[rho]`, and the owner's
    /// share of beta decides whether to complement against the full
    /// difference.
    fn conditional_term(
        &self,
        chosen: &AddCiphertext,
        bit: &AddCiphertext,
        right: &AddCiphertext,
        left: &AddCiphertext,
        shift: &BigUint,
    ) -> Result<AddCiphertext, Error> {
        let scaled = self.paillier.scalar_mul(bit, shift);
        let rho_term = self.paillier.sub(chosen, &scaled)?;
        if self.share {
            // beta = 1 ^ rho
            let diff = self.paillier.sub(right, left)?;
            self.paillier.sub(&diff, &rho_term)
        } else {
            // beta = rho
            Ok(rho_term)
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(self.state, SelectOwnerState::Done)
    }

    pub(crate) fn winner(&self) -> Result<Entry, Error> {
        self.winner.clone().ok_or(Error::ProtocolStillInProgress)
    }
}

enum SelectHelperState {
    Compare,
    SendShare(QrCiphertext),
    WaitSelect,
    SendChosen(Box<ArgmaxMsg>),
    Done,
}

/// Helper side of one compare-and-select unit.
///
/// The comparison bit only ever exists here as a QR ciphertext; the helper
/// contributes a fresh coin `rho` and answers with coin-selected encryptions,
/// learning neither the bit nor the operands.
pub(crate) struct SelectHelper {
    params: CompareParams,
    index_bound: BigUint,
    paillier_sk: PaillierPriv,
    gm: Gm,
    rng: ChaCha20Rng,
    inner: RevEncCompareHelper,
    rho: bool,
    state: SelectHelperState,
}

impl SelectHelper {
    pub(crate) fn new(
        params: CompareParams,
        idx_width: u64,
        paillier_sk: PaillierPriv,
        gm: Gm,
        mut rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        let inner = RevEncCompareHelper::with_ciphertext_output(
            params,
            paillier_sk.clone(),
            gm.clone(),
            child_rng(&mut rng),
        )?;
        let index_bound = BigUint::from(1u8) << (idx_width + params.lambda as u64 + 1);
        Ok(Self {
            params,
            index_bound,
            paillier_sk,
            gm,
            rng,
            inner,
            rho: false,
            state: SelectHelperState::Compare,
        })
    }

    /// Once the embedded comparison is terminal, reshare `[beta]` under a
    /// fresh coin and queue the share for the owner.
    fn settle(&mut self) -> Result<(), Error> {
        if matches!(self.state, SelectHelperState::Compare) && self.inner.is_done() {
            let beta_ct = self.inner.output_ciphertext()?;
            self.rho = self.rng.gen();
            let share = if self.rho {
                self.gm.neg(&beta_ct)
            } else {
                beta_ct
            };
            let share = self.gm.rerand(&share, &mut self.rng);
            self.state = SelectHelperState::SendShare(share);
        }
        Ok(())
    }

    pub(crate) fn next(&mut self) -> Result<Option<ArgmaxMsg>, Error> {
        if let SelectHelperState::Compare = self.state {
            if let Some(m) = self.inner.next_msg()? {
                return Ok(Some(ArgmaxMsg::Step(m)));
            }
            self.settle()?;
        }
        match std::mem::replace(&mut self.state, SelectHelperState::Done) {
            SelectHelperState::SendShare(ct) => {
                self.state = SelectHelperState::WaitSelect;
                Ok(Some(ArgmaxMsg::Share { ct }))
            }
            SelectHelperState::SendChosen(msg) => Ok(Some(*msg)),
            other => {
                self.state = other;
                Ok(None)
            }
        }
    }

    pub(crate) fn accept(&mut self, msg: &ArgmaxMsg) -> Result<(), Error> {
        match msg {
            ArgmaxMsg::Step(m) => {
                if !matches!(self.state, SelectHelperState::Compare) {
                    return Err(Error::UnexpectedMessage);
                }
                self.inner.accept_msg(m)
            }
            ArgmaxMsg::Select { value, index } => {
                if !matches!(self.state, SelectHelperState::WaitSelect) {
                    return Err(Error::UnexpectedMessage);
                }
                let value = self.paillier_sk.decrypt(value);
                if value >= self.params.blind_bound() {
                    return Err(Error::OutOfBounds);
                }
                let index = self.paillier_sk.decrypt(index);
                if index >= self.index_bound {
                    return Err(Error::OutOfBounds);
                }

                let zero = BigUint::from(0u8);
                let (value, index) = if self.rho {
                    (value, index)
                } else {
                    (zero.clone(), zero)
                };
                let paillier = self.paillier_sk.public().clone();
                let reply = ArgmaxMsg::Chosen {
                    value: paillier.encrypt(&value, &mut self.rng),
                    index: paillier.encrypt(&index, &mut self.rng),
                    bit: paillier.encrypt(&BigUint::from(self.rho as u8), &mut self.rng),
                };
                self.state = SelectHelperState::SendChosen(Box::new(reply));
                Ok(())
            }
            _ => Err(Error::UnexpectedMessage),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(self.state, SelectHelperState::Done)
    }
}

impl Session for SelectOwner {
    type Msg = ArgmaxMsg;

    fn next_msg(&mut self) -> Result<Option<ArgmaxMsg>, Error> {
        self.next()
    }

    fn accept_msg(&mut self, msg: &ArgmaxMsg) -> Result<(), Error> {
        self.accept(msg)
    }

    fn is_done(&self) -> bool {
        SelectOwner::is_done(self)
    }
}

impl Session for SelectHelper {
    type Msg = ArgmaxMsg;

    fn next_msg(&mut self) -> Result<Option<ArgmaxMsg>, Error> {
        self.next()
    }

    fn accept_msg(&mut self, msg: &ArgmaxMsg) -> Result<(), Error> {
        self.accept(msg)
    }

    fn is_done(&self) -> bool {
        SelectHelper::is_done(self)
    }
}

enum OwnerPhase {
    Running,
    SendReveal,
    WaitIndex,
    Done,
}

enum HelperPhase {
    Running,
    WaitReveal,
    SendIndex(BigUint),
    Done,
}

/// Owner-side finale: blind the position ciphertext for decryption.
fn reveal_message(
    paillier: &Paillier,
    position: &AddCiphertext,
    idx_width: u64,
    lambda: u32,
    rng: &mut ChaCha20Rng,
) -> (BigUint, ArgmaxMsg) {
    let u = number::rand_bits(idx_width + lambda as u64, rng);
    let ct = paillier.rerand(&paillier.add_plain(position, &u), rng);
    (u, ArgmaxMsg::Reveal { ct })
}

/// Owner-side finale: strip the blind and map through the permutation.
fn position_from_blinded(
    blinded: &WireInt,
    u: &BigUint,
    perm: &[usize],
) -> Result<usize, Error> {
    let w = blinded.to_biguint()?;
    if &w < u {
        return Err(Error::OutOfBounds);
    }
    let pos = w - u;
    let pos = usize::try_from(u64::try_from(&pos).map_err(|_| Error::OutOfBounds)?)
        .map_err(|_| Error::OutOfBounds)?;
    perm.get(pos).copied().ok_or(Error::OutOfBounds)
}

/// Helper-side finale: decrypt the blinded position after a bound check.
fn reveal_response(
    paillier_sk: &PaillierPriv,
    ct: &AddCiphertext,
    bound: &BigUint,
) -> Result<BigUint, Error> {
    let w = paillier_sk.decrypt(ct);
    if &w >= bound {
        return Err(Error::OutOfBounds);
    }
    Ok(w)
}

/// Owner side of the linear argmax: holds the encrypted vector, shuffles it,
/// and walks it against a running encrypted maximum and position.
pub struct LinearArgmaxOwner {
    params: CompareParams,
    idx_width: u64,
    paillier: Paillier,
    gm_sk: GmPriv,
    rng: ChaCha20Rng,
    perm: Vec<usize>,
    items: Vec<AddCiphertext>,
    max: Entry,
    i: usize,
    select: Option<SelectOwner>,
    blind: BigUint,
    result: Option<usize>,
    phase: OwnerPhase,
}

impl LinearArgmaxOwner {
    /// Shuffles and re-randomizes `v`, then prepares the first comparison.
    pub fn new(
        v: Vec<AddCiphertext>,
        params: CompareParams,
        paillier: Paillier,
        gm_sk: GmPriv,
        mut rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        if v.is_empty() {
            return Err(Error::InvalidParameters("empty argmax vector"));
        }
        check_index_space(paillier.modulus(), v.len(), params.lambda)?;
        tracing::debug!(k = v.len(), l = params.l, "starting linear argmax");
        let mut perm: Vec<usize> = (0..v.len()).collect();
        perm.shuffle(&mut rng);
        let items: Vec<AddCiphertext> = perm
            .iter()
            .map(|&j| paillier.rerand(&v[j], &mut rng))
            .collect();
        let max = Entry {
            value: items[0].clone(),
            index: paillier.encrypt(&BigUint::from(0u8), &mut rng),
        };
        let phase = if items.len() == 1 {
            OwnerPhase::SendReveal
        } else {
            OwnerPhase::Running
        };
        let mut owner = Self {
            params,
            idx_width: index_width(v.len()),
            paillier,
            gm_sk,
            rng,
            perm,
            items,
            max,
            i: 1,
            select: None,
            blind: BigUint::from(0u8),
            result: None,
            phase,
        };
        if matches!(owner.phase, OwnerPhase::Running) {
            owner.start_select()?;
        }
        Ok(owner)
    }

    fn start_select(&mut self) -> Result<(), Error> {
        let candidate = Entry {
            value: self.items[self.i].clone(),
            index: self
                .paillier
                .encrypt(&BigUint::from(self.i as u64), &mut self.rng),
        };
        let rng = child_rng(&mut self.rng);
        self.select = Some(SelectOwner::new(
            self.max.clone(),
            candidate,
            self.params,
            self.idx_width,
            self.paillier.clone(),
            self.gm_sk.clone(),
            rng,
        )?);
        Ok(())
    }

    /// Folds completed select units into the running maximum.
    fn advance(&mut self) -> Result<(), Error> {
        while matches!(self.phase, OwnerPhase::Running) {
            match self.select.as_ref() {
                Some(sel) if sel.is_done() => {
                    self.max = sel.winner()?;
                    self.i += 1;
                    if self.i < self.items.len() {
                        self.start_select()?;
                        break;
                    }
                    self.select = None;
                    self.phase = OwnerPhase::SendReveal;
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// The original index of the maximum, terminal only.
    pub fn output(&self) -> Result<usize, Error> {
        self.result.ok_or(Error::ProtocolStillInProgress)
    }
}

impl Session for LinearArgmaxOwner {
    type Msg = ArgmaxMsg;

    fn next_msg(&mut self) -> Result<Option<ArgmaxMsg>, Error> {
        self.advance()?;
        if let Some(sel) = self.select.as_mut() {
            if let Some(m) = sel.next()? {
                return Ok(Some(m));
            }
            if sel.is_done() {
                self.advance()?;
                return self.next_msg();
            }
            return Ok(None);
        }
        if matches!(self.phase, OwnerPhase::SendReveal) {
            let (u, msg) = reveal_message(
                &self.paillier,
                &self.max.index,
                self.idx_width,
                self.params.lambda,
                &mut self.rng,
            );
            self.blind = u;
            self.phase = OwnerPhase::WaitIndex;
            return Ok(Some(msg));
        }
        Ok(None)
    }

    fn accept_msg(&mut self, msg: &ArgmaxMsg) -> Result<(), Error> {
        self.advance()?;
        match msg {
            ArgmaxMsg::Index { blinded } => {
                if !matches!(self.phase, OwnerPhase::WaitIndex) {
                    return Err(Error::UnexpectedMessage);
                }
                self.result = Some(position_from_blinded(blinded, &self.blind, &self.perm)?);
                self.phase = OwnerPhase::Done;
                Ok(())
            }
            other => match self.select.as_mut() {
                Some(sel) => sel.accept(other),
                None => Err(Error::UnexpectedMessage),
            },
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.phase, OwnerPhase::Done)
    }
}

/// Helper side of the linear argmax: executes the comparisons blindly and
/// decrypts only the blinded final position.
pub struct LinearArgmaxHelper {
    params: CompareParams,
    idx_width: u64,
    paillier_sk: PaillierPriv,
    gm: Gm,
    rng: ChaCha20Rng,
    k: usize,
    i: usize,
    select: Option<SelectHelper>,
    phase: HelperPhase,
}

impl LinearArgmaxHelper {
    /// Prepares the helper for a `k`-element argmax.
    pub fn new(
        k: usize,
        params: CompareParams,
        paillier_sk: PaillierPriv,
        gm: Gm,
        mut rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        if k == 0 {
            return Err(Error::InvalidParameters("empty argmax vector"));
        }
        check_index_space(paillier_sk.public().modulus(), k, params.lambda)?;
        let idx_width = index_width(k);
        let select = if k > 1 {
            Some(SelectHelper::new(
                params,
                idx_width,
                paillier_sk.clone(),
                gm.clone(),
                child_rng(&mut rng),
            )?)
        } else {
            None
        };
        Ok(Self {
            params,
            idx_width,
            paillier_sk,
            gm,
            rng,
            k,
            i: 1,
            select,
            phase: if k > 1 {
                HelperPhase::Running
            } else {
                HelperPhase::WaitReveal
            },
        })
    }

    fn advance(&mut self) -> Result<(), Error> {
        while matches!(self.phase, HelperPhase::Running) {
            match self.select.as_ref() {
                Some(sel) if sel.is_done() => {
                    self.i += 1;
                    if self.i < self.k {
                        self.select = Some(SelectHelper::new(
                            self.params,
                            self.idx_width,
                            self.paillier_sk.clone(),
                            self.gm.clone(),
                            child_rng(&mut self.rng),
                        )?);
                        break;
                    }
                    self.select = None;
                    self.phase = HelperPhase::WaitReveal;
                }
                _ => break,
            }
        }
        Ok(())
    }
}

impl Session for LinearArgmaxHelper {
    type Msg = ArgmaxMsg;

    fn next_msg(&mut self) -> Result<Option<ArgmaxMsg>, Error> {
        self.advance()?;
        if let Some(sel) = self.select.as_mut() {
            if let Some(m) = sel.next()? {
                return Ok(Some(m));
            }
            if sel.is_done() {
                self.advance()?;
                return self.next_msg();
            }
            return Ok(None);
        }
        match std::mem::replace(&mut self.phase, HelperPhase::Done) {
            HelperPhase::SendIndex(w) => Ok(Some(ArgmaxMsg::Index {
                blinded: WireInt::from_biguint(&w),
            })),
            other => {
                self.phase = other;
                Ok(None)
            }
        }
    }

    fn accept_msg(&mut self, msg: &ArgmaxMsg) -> Result<(), Error> {
        self.advance()?;
        match msg {
            ArgmaxMsg::Reveal { ct } => {
                if !matches!(self.phase, HelperPhase::WaitReveal) {
                    return Err(Error::UnexpectedMessage);
                }
                let bound = BigUint::from(1u8) << (self.idx_width + self.params.lambda as u64 + 1);
                let w = reveal_response(&self.paillier_sk, ct, &bound)?;
                self.phase = HelperPhase::SendIndex(w);
                Ok(())
            }
            other => match self.select.as_mut() {
                Some(sel) => sel.accept(other),
                None => Err(Error::UnexpectedMessage),
            },
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.phase, HelperPhase::Done)
    }
}

/// Owner side of the tournament argmax.
pub struct TreeArgmaxOwner {
    params: CompareParams,
    idx_width: u64,
    paillier: Paillier,
    gm_sk: GmPriv,
    rng: ChaCha20Rng,
    perm: Vec<usize>,
    layer: Vec<Entry>,
    next_layer: Vec<Entry>,
    pos: usize,
    select: Option<SelectOwner>,
    blind: BigUint,
    result: Option<usize>,
    phase: OwnerPhase,
}

impl TreeArgmaxOwner {
    /// Shuffles and re-randomizes `v`, then prepares the first round.
    pub fn new(
        v: Vec<AddCiphertext>,
        params: CompareParams,
        paillier: Paillier,
        gm_sk: GmPriv,
        mut rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        if v.is_empty() {
            return Err(Error::InvalidParameters("empty argmax vector"));
        }
        check_index_space(paillier.modulus(), v.len(), params.lambda)?;
        tracing::debug!(k = v.len(), l = params.l, "starting tree argmax");
        let mut perm: Vec<usize> = (0..v.len()).collect();
        perm.shuffle(&mut rng);
        let layer: Vec<Entry> = perm
            .iter()
            .enumerate()
            .map(|(j, &orig)| Entry {
                value: paillier.rerand(&v[orig], &mut rng),
                index: paillier.encrypt(&BigUint::from(j as u64), &mut rng),
            })
            .collect();
        let phase = if layer.len() == 1 {
            OwnerPhase::SendReveal
        } else {
            OwnerPhase::Running
        };
        let mut owner = Self {
            params,
            idx_width: index_width(v.len()),
            paillier,
            gm_sk,
            rng,
            perm,
            layer,
            next_layer: Vec::new(),
            pos: 0,
            select: None,
            blind: BigUint::from(0u8),
            result: None,
            phase,
        };
        owner.advance()?;
        Ok(owner)
    }

    /// Folds completed pairs, starts the next pair, and rolls layers over.
    fn advance(&mut self) -> Result<(), Error> {
        while matches!(self.phase, OwnerPhase::Running) {
            if let Some(sel) = self.select.as_ref() {
                if !sel.is_done() {
                    break;
                }
                self.next_layer.push(sel.winner()?);
                self.pos += 2;
                self.select = None;
            }
            if self.pos + 1 < self.layer.len() {
                let rng = child_rng(&mut self.rng);
                self.select = Some(SelectOwner::new(
                    self.layer[self.pos].clone(),
                    self.layer[self.pos + 1].clone(),
                    self.params,
                    self.idx_width,
                    self.paillier.clone(),
                    self.gm_sk.clone(),
                    rng,
                )?);
                break;
            }
            // round over: carry an odd leftover and roll the layer
            if self.pos < self.layer.len() {
                let carry = self.layer[self.pos].clone();
                self.next_layer.push(carry);
            }
            self.layer = std::mem::take(&mut self.next_layer);
            self.pos = 0;
            if self.layer.len() == 1 {
                self.phase = OwnerPhase::SendReveal;
            }
        }
        Ok(())
    }

    /// The original index of the maximum, terminal only.
    pub fn output(&self) -> Result<usize, Error> {
        self.result.ok_or(Error::ProtocolStillInProgress)
    }
}

impl Session for TreeArgmaxOwner {
    type Msg = ArgmaxMsg;

    fn next_msg(&mut self) -> Result<Option<ArgmaxMsg>, Error> {
        self.advance()?;
        if let Some(sel) = self.select.as_mut() {
            if let Some(m) = sel.next()? {
                return Ok(Some(m));
            }
            if sel.is_done() {
                self.advance()?;
                return self.next_msg();
            }
            return Ok(None);
        }
        if matches!(self.phase, OwnerPhase::SendReveal) {
            let final_entry = self
                .layer
                .first()
                .ok_or(Error::InvariantViolation("tournament folded to no winner"))?;
            let (u, msg) = reveal_message(
                &self.paillier,
                &final_entry.index,
                self.idx_width,
                self.params.lambda,
                &mut self.rng,
            );
            self.blind = u;
            self.phase = OwnerPhase::WaitIndex;
            return Ok(Some(msg));
        }
        Ok(None)
    }

    fn accept_msg(&mut self, msg: &ArgmaxMsg) -> Result<(), Error> {
        self.advance()?;
        match msg {
            ArgmaxMsg::Index { blinded } => {
                if !matches!(self.phase, OwnerPhase::WaitIndex) {
                    return Err(Error::UnexpectedMessage);
                }
                self.result = Some(position_from_blinded(blinded, &self.blind, &self.perm)?);
                self.phase = OwnerPhase::Done;
                Ok(())
            }
            other => match self.select.as_mut() {
                Some(sel) => sel.accept(other),
                None => Err(Error::UnexpectedMessage),
            },
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.phase, OwnerPhase::Done)
    }
}

/// Helper side of the tournament argmax.
///
/// Tracks only the tournament shape, never any outcome: all positions stay
/// encrypted on the owner side.
pub struct TreeArgmaxHelper {
    params: CompareParams,
    idx_width: u64,
    paillier_sk: PaillierPriv,
    gm: Gm,
    rng: ChaCha20Rng,
    layer_len: usize,
    pair: usize,
    select: Option<SelectHelper>,
    phase: HelperPhase,
}

impl TreeArgmaxHelper {
    /// Prepares the helper for a `k`-element tournament.
    pub fn new(
        k: usize,
        params: CompareParams,
        paillier_sk: PaillierPriv,
        gm: Gm,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        if k == 0 {
            return Err(Error::InvalidParameters("empty argmax vector"));
        }
        check_index_space(paillier_sk.public().modulus(), k, params.lambda)?;
        let phase = if k == 1 {
            HelperPhase::WaitReveal
        } else {
            HelperPhase::Running
        };
        let mut helper = Self {
            params,
            idx_width: index_width(k),
            paillier_sk,
            gm,
            rng,
            layer_len: k,
            pair: 0,
            select: None,
            phase,
        };
        helper.advance()?;
        Ok(helper)
    }

    fn advance(&mut self) -> Result<(), Error> {
        while matches!(self.phase, HelperPhase::Running) {
            if let Some(sel) = self.select.as_ref() {
                if !sel.is_done() {
                    break;
                }
                self.pair += 1;
                self.select = None;
            }
            if self.pair < self.layer_len / 2 {
                self.select = Some(SelectHelper::new(
                    self.params,
                    self.idx_width,
                    self.paillier_sk.clone(),
                    self.gm.clone(),
                    child_rng(&mut self.rng),
                )?);
                break;
            }
            self.layer_len = self.layer_len / 2 + self.layer_len % 2;
            self.pair = 0;
            if self.layer_len == 1 {
                self.phase = HelperPhase::WaitReveal;
            }
        }
        Ok(())
    }
}

impl Session for TreeArgmaxHelper {
    type Msg = ArgmaxMsg;

    fn next_msg(&mut self) -> Result<Option<ArgmaxMsg>, Error> {
        self.advance()?;
        if let Some(sel) = self.select.as_mut() {
            if let Some(m) = sel.next()? {
                return Ok(Some(m));
            }
            if sel.is_done() {
                self.advance()?;
                return self.next_msg();
            }
            return Ok(None);
        }
        match std::mem::replace(&mut self.phase, HelperPhase::Done) {
            HelperPhase::SendIndex(w) => Ok(Some(ArgmaxMsg::Index {
                blinded: WireInt::from_biguint(&w),
            })),
            other => {
                self.phase = other;
                Ok(None)
            }
        }
    }

    fn accept_msg(&mut self, msg: &ArgmaxMsg) -> Result<(), Error> {
        self.advance()?;
        match msg {
            ArgmaxMsg::Reveal { ct } => {
                if !matches!(self.phase, HelperPhase::WaitReveal) {
                    return Err(Error::UnexpectedMessage);
                }
                let bound = BigUint::from(1u8) << (self.idx_width + self.params.lambda as u64 + 1);
                let w = reveal_response(&self.paillier_sk, ct, &bound)?;
                self.phase = HelperPhase::SendIndex(w);
                Ok(())
            }
            other => match self.select.as_mut() {
                Some(sel) => sel.accept(other),
                None => Err(Error::UnexpectedMessage),
            },
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.phase, HelperPhase::Done)
    }
}

/// Runs a tournament argmax locally, dispatching the independent comparisons
/// of each round onto a worker pool of `num_threads` threads.
///
/// Both parties must be freshly constructed. With one thread this is the
/// plain message pump; with more, each round's pairs are played by parallel
/// compare-and-select sessions and the final blinded reveal is pumped once
/// the layers have folded.
pub fn run_tree_argmax(
    owner: &mut TreeArgmaxOwner,
    helper: &mut TreeArgmaxHelper,
    num_threads: usize,
) -> Result<(), Error> {
    if num_threads <= 1 {
        return pump(owner, helper);
    }

    while owner.layer.len() > 1 {
        let pairs = owner.layer.len() / 2;
        let mut tasks = Vec::with_capacity(pairs);
        for j in 0..pairs {
            let sel_owner = SelectOwner::new(
                owner.layer[2 * j].clone(),
                owner.layer[2 * j + 1].clone(),
                owner.params,
                owner.idx_width,
                owner.paillier.clone(),
                owner.gm_sk.clone(),
                child_rng(&mut owner.rng),
            )?;
            let sel_helper = SelectHelper::new(
                helper.params,
                helper.idx_width,
                helper.paillier_sk.clone(),
                helper.gm.clone(),
                child_rng(&mut helper.rng),
            )?;
            tasks.push((sel_owner, sel_helper));
        }

        let workers = num_threads.min(tasks.len()).max(1);
        let chunk_size = (tasks.len() + workers - 1) / workers;
        let mut chunks: Vec<Vec<(SelectOwner, SelectHelper)>> = Vec::new();
        while !tasks.is_empty() {
            let rest = tasks.split_off(tasks.len().min(chunk_size));
            chunks.push(std::mem::replace(&mut tasks, rest));
        }

        let outcomes: Vec<Result<Vec<Entry>, Error>> = std::thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|chunk| {
                    scope.spawn(move || {
                        let mut results = Vec::with_capacity(chunk.len());
                        for (mut o, mut h) in chunk {
                            pump(&mut o, &mut h)?;
                            results.push(o.winner()?);
                        }
                        Ok(results)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or(Err(Error::InvariantViolation("argmax worker panicked")))
                })
                .collect()
        });

        let mut winners = Vec::with_capacity(pairs);
        for outcome in outcomes {
            winners.extend(outcome?);
        }
        owner.next_layer = winners;
        if owner.layer.len() % 2 == 1 {
            let carry = owner.layer[owner.layer.len() - 1].clone();
            owner.next_layer.push(carry);
        }
        owner.layer = std::mem::take(&mut owner.next_layer);
        owner.pos = 0;
        owner.select = None;

        helper.layer_len = helper.layer_len / 2 + helper.layer_len % 2;
        helper.pair = 0;
        helper.select = None;
    }

    // fold complete on both sides: pump the blinded position reveal
    owner.phase = OwnerPhase::SendReveal;
    helper.phase = HelperPhase::WaitReveal;
    pump(owner, helper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparison::Backend;

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

    fn encrypt_vec(keys: &Keys, v: &[u64], seed: u64) -> Vec<AddCiphertext> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        v.iter()
            .map(|&x| keys.paillier_sk.public().encrypt(&BigUint::from(x), &mut rng))
            .collect()
    }

    fn plain_argmax(v: &[u64]) -> usize {
        let mut best = 0;
        for (i, &x) in v.iter().enumerate() {
            if x > v[best] {
                best = i;
            }
        }
        best
    }

    fn linear_argmax(keys: &Keys, v: &[u64], backend: Backend, seed: u64) -> usize {
        let params = CompareParams::new(16, 40, backend);
        let mut owner = LinearArgmaxOwner::new(
            encrypt_vec(keys, v, seed),
            params,
            keys.paillier_sk.public().clone(),
            keys.gm_sk.clone(),
            ChaCha20Rng::seed_from_u64(seed + 1),
        )
        .unwrap();
        let mut helper = LinearArgmaxHelper::new(
            v.len(),
            params,
            keys.paillier_sk.clone(),
            keys.gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(seed + 2),
        )
        .unwrap();
        pump(&mut owner, &mut helper).unwrap();
        owner.output().unwrap()
    }

    fn tree_argmax(keys: &Keys, v: &[u64], backend: Backend, seed: u64, threads: usize) -> usize {
        let params = CompareParams::new(16, 40, backend);
        let mut owner = TreeArgmaxOwner::new(
            encrypt_vec(keys, v, seed),
            params,
            keys.paillier_sk.public().clone(),
            keys.gm_sk.clone(),
            ChaCha20Rng::seed_from_u64(seed + 3),
        )
        .unwrap();
        let mut helper = TreeArgmaxHelper::new(
            v.len(),
            params,
            keys.paillier_sk.clone(),
            keys.gm_sk.public().clone(),
            ChaCha20Rng::seed_from_u64(seed + 4),
        )
        .unwrap();
        run_tree_argmax(&mut owner, &mut helper, threads).unwrap();
        owner.output().unwrap()
    }

    #[test]
    fn linear_finds_the_maximum() {
        let keys = keys(1);
        let v = [10u64, 20, 15, 30, 25];
        assert_eq!(linear_argmax(&keys, &v, Backend::Lsic, 10), 3);
        assert_eq!(linear_argmax(&keys, &v, Backend::Dgk, 11), 3);
    }

    #[test]
    fn tree_finds_the_maximum() {
        let keys = keys(2);
        let v = [10u64, 20, 15, 30, 25];
        assert_eq!(tree_argmax(&keys, &v, Backend::Lsic, 20, 1), 3);
        assert_eq!(tree_argmax(&keys, &v, Backend::Dgk, 21, 1), 3);
    }

    #[test]
    fn tree_with_worker_pool_matches_sequential() {
        let keys = keys(3);
        let v = [3u64, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8];
        assert_eq!(tree_argmax(&keys, &v, Backend::Lsic, 30, 4), plain_argmax(&v));
    }

    #[test]
    fn variants_agree_on_random_vectors() {
        let keys = keys(4);
        let mut rng = ChaCha20Rng::seed_from_u64(40);
        for k in [1usize, 2, 3, 7, 8] {
            // distinct values so the argmax is unique
            let v: Vec<u64> = (0..k)
                .map(|i| ((rng.gen::<u64>() >> 54) << 4) | i as u64)
                .collect();
            let expected = plain_argmax(&v);
            assert_eq!(linear_argmax(&keys, &v, Backend::Lsic, 50 + k as u64), expected);
            assert_eq!(tree_argmax(&keys, &v, Backend::Lsic, 60 + k as u64, 2), expected);
        }
    }

    #[test]
    fn single_element_vector() {
        let keys = keys(5);
        assert_eq!(linear_argmax(&keys, &[42], Backend::Lsic, 70), 0);
        assert_eq!(tree_argmax(&keys, &[42], Backend::Lsic, 71, 3), 0);
    }
}
