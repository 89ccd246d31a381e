//! Switch from bitwise QR ciphertexts to one slot-packed GF(2) ciphertext.
//!
//! The owner XOR-blinds every bit with a fresh mask vector and ships the
//! blinded QR ciphertexts; the helper (holding both secret keys) decrypts
//! them and re-encrypts the bits into the slots of a fresh FHE ciphertext.
//! The owner removes the blind homomorphically by adding the FHE encryption
//! of its mask, computed with the public key only, so neither party sees the
//! other's view of the bits in the clear.

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::fhe::{Fhe, FheCiphertext, FhePriv};
use crate::gm::{Gm, GmPriv, QrCiphertext};
use crate::transport::Session;
use crate::Error;

/// Messages exchanged by the cryptosystem switch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchMsg {
    /// The owner's blinded bit vector.
    Blinded {
        /// `[x_j ^ m_j]` under the QR cipher, one per bit.
        cts: Vec<QrCiphertext>,
    },
    /// The helper's repacked ciphertext.
    Packed {
        /// Blinded bits, one per slot.
        ct: FheCiphertext,
    },
}

enum OwnerState {
    Init,
    SendBlinded(Vec<QrCiphertext>),
    WaitPacked,
    Done(FheCiphertext),
}

/// The party holding the QR bit vector; ends up with the packed ciphertext.
pub struct SwitchOwner {
    bits: Vec<QrCiphertext>,
    mask: Vec<bool>,
    gm: Gm,
    fhe: Fhe,
    rng: ChaCha20Rng,
    state: OwnerState,
}

impl SwitchOwner {
    /// Creates the owner side over the given bit ciphertexts.
    pub fn new(
        bits: Vec<QrCiphertext>,
        gm: Gm,
        fhe: Fhe,
        rng: ChaCha20Rng,
    ) -> Result<Self, Error> {
        if bits.len() > fhe.params().slots {
            return Err(Error::InvalidParameters("more bits than slots"));
        }
        Ok(Self {
            bits,
            mask: Vec::new(),
            gm,
            fhe,
            rng,
            state: OwnerState::Init,
        })
    }

    /// Samples the mask vector and blinds every bit.
    pub fn prepare(&mut self) -> Result<(), Error> {
        if !matches!(self.state, OwnerState::Init) {
            return Ok(());
        }
        let blinded = self
            .bits
            .iter()
            .map(|ct| {
                let m: bool = self.rng.gen();
                self.mask.push(m);
                let mixed = self.gm.xor(ct, &self.gm.encrypt(m, &mut self.rng));
                self.gm.rerand(&mixed, &mut self.rng)
            })
            .collect();
        self.state = OwnerState::SendBlinded(blinded);
        Ok(())
    }

    /// Produces the blinded vector, if it is due.
    pub fn next(&mut self) -> Result<Option<SwitchMsg>, Error> {
        self.prepare()?;
        match std::mem::replace(&mut self.state, OwnerState::WaitPacked) {
            OwnerState::SendBlinded(cts) => Ok(Some(SwitchMsg::Blinded { cts })),
            other => {
                self.state = other;
                Ok(None)
            }
        }
    }

    /// Ingests the repacked ciphertext and removes the blind.
    pub fn accept(&mut self, msg: &SwitchMsg) -> Result<(), Error> {
        let packed = match (msg, &self.state) {
            (SwitchMsg::Packed { ct }, OwnerState::WaitPacked) => ct,
            _ => return Err(Error::UnexpectedMessage),
        };
        let mask_ct = self.fhe.encrypt_slots(&self.mask, &mut self.rng)?;
        let clear = self.fhe.add(packed, &mask_ct)?;
        self.state = OwnerState::Done(clear);
        Ok(())
    }

    /// True once the unblinded ciphertext is available.
    pub fn is_done(&self) -> bool {
        matches!(self.state, OwnerState::Done(_))
    }

    /// The packed ciphertext with the input bits in its slots.
    pub fn output(&self) -> Result<FheCiphertext, Error> {
        match &self.state {
            OwnerState::Done(ct) => Ok(ct.clone()),
            _ => Err(Error::ProtocolStillInProgress),
        }
    }
}

/// The party holding both secret keys; decrypts and repacks.
pub struct SwitchHelper {
    gm_sk: GmPriv,
    fhe_sk: FhePriv,
    rng: ChaCha20Rng,
    pending: Option<SwitchMsg>,
    done: bool,
}

impl SwitchHelper {
    /// Creates the helper side.
    pub fn new(gm_sk: GmPriv, fhe_sk: FhePriv, rng: ChaCha20Rng) -> Self {
        Self {
            gm_sk,
            fhe_sk,
            rng,
            pending: None,
            done: false,
        }
    }

    /// Decrypts the blinded bits and queues the repacked ciphertext.
    pub fn accept(&mut self, msg: &SwitchMsg) -> Result<(), Error> {
        if self.done {
            return Err(Error::ProtocolEnded);
        }
        let cts = match msg {
            SwitchMsg::Blinded { cts } if self.pending.is_none() => cts,
            _ => return Err(Error::UnexpectedMessage),
        };
        let bits: Vec<bool> = cts.iter().map(|ct| self.gm_sk.decrypt(ct)).collect();
        let packed = self.fhe_sk.public().encrypt_slots(&bits, &mut self.rng)?;
        self.pending = Some(SwitchMsg::Packed { ct: packed });
        self.done = true;
        Ok(())
    }

    /// Produces the queued ciphertext, if any.
    pub fn next(&mut self) -> Result<Option<SwitchMsg>, Error> {
        Ok(self.pending.take())
    }

    /// True once the repacked ciphertext has been handed out.
    pub fn is_done(&self) -> bool {
        self.done && self.pending.is_none()
    }
}

impl Session for SwitchOwner {
    type Msg = SwitchMsg;

    fn prepare(&mut self) -> Result<(), Error> {
        SwitchOwner::prepare(self)
    }

    fn next_msg(&mut self) -> Result<Option<SwitchMsg>, Error> {
        self.next()
    }

    fn accept_msg(&mut self, msg: &SwitchMsg) -> Result<(), Error> {
        self.accept(msg)
    }

    fn is_done(&self) -> bool {
        SwitchOwner::is_done(self)
    }
}

impl Session for SwitchHelper {
    type Msg = SwitchMsg;

    fn next_msg(&mut self) -> Result<Option<SwitchMsg>, Error> {
        self.next()
    }

    fn accept_msg(&mut self, msg: &SwitchMsg) -> Result<(), Error> {
        self.accept(msg)
    }

    fn is_done(&self) -> bool {
        SwitchHelper::is_done(self)
    }
}
