//! Comparison via a garbled comparator circuit.
//!
//! B garbles the `l`-bit comparator with a random mask bit folded into the
//! output and transmits the tables, its own input labels and an encryption of
//! the mask; A obtains the labels for its bits through a batched oblivious
//! transfer, evaluates, and decodes `t XOR mask`. Lifting the decoded bit
//! against the encrypted mask leaves A with a QR ciphertext of `[a < b]`
//! while neither party has seen the bit in the clear.

use num_bigint::BigUint;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::circuit::{bits_le, comparator_circuit, Circuit};
use crate::garble::{evaluate, garble, GarbledCircuit, Garbling, WireLabel};
use crate::gm::{Gm, QrCiphertext};
use crate::ot::{OtChoices, OtParams, OtPayloads, OtReceiver, OtSender, OtSenderSetup};
use crate::Error;

/// Messages exchanged between [`GcCompareA`] and [`GcCompareB`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcMsg {
    /// The garbled comparator, B's input labels, the encrypted output mask
    /// and the OT batch setup.
    Garbled {
        /// Tables and output-decoding map.
        gc: GarbledCircuit,
        /// Labels for B's interleaved bits plus the mask wire.
        garbler_labels: Vec<WireLabel>,
        /// `[mask]` under the QR cipher.
        enc_mask: QrCiphertext,
        /// Opens the label transfer.
        ot_setup: OtSenderSetup,
    },
    /// A's OT choice elements, one per evaluator wire.
    Choices(OtChoices),
    /// The masked label pairs for A's wires.
    Labels(OtPayloads),
}

enum BState {
    Garble,
    SendGarbled(Box<GcMsg>),
    WaitChoices,
    SendLabels(OtPayloads),
    Done,
}

/// The garbling party, holding `b`.
pub struct GcCompareB {
    b_bits: Vec<bool>,
    l: usize,
    mask: bool,
    gm: Gm,
    ot_params: OtParams,
    rng: ChaCha20Rng,
    garbling: Option<Garbling>,
    ot: Option<OtSender>,
    state: BState,
}

impl GcCompareB {
    /// Creates the garbler for the low `l` bits of `b`.
    pub fn new(b: &BigUint, l: usize, gm: Gm, ot_params: OtParams, mut rng: ChaCha20Rng) -> Self {
        let mask = rand::Rng::gen(&mut rng);
        Self {
            b_bits: bits_le(b, l),
            l,
            mask,
            gm,
            ot_params,
            rng,
            garbling: None,
            ot: None,
            state: BState::Garble,
        }
    }

    /// Garbles the comparator and queues the transmission. Idempotent; called
    /// implicitly by [`GcCompareB::next`] if the caller skipped it.
    pub fn prepare(&mut self) -> Result<(), Error> {
        if !matches!(self.state, BState::Garble) {
            return Ok(());
        }
        let circuit = comparator_circuit(self.l);
        let (garbling, gc) = garble(&circuit, &mut self.rng)?;

        let mut garbler_labels = Vec::with_capacity(self.l + 1);
        for (i, &bit) in self.b_bits.iter().enumerate() {
            garbler_labels.push(garbling.label(2 * i as u32, bit));
        }
        garbler_labels.push(garbling.label(2 * self.l as u32, self.mask));

        let ot = OtSender::new(self.ot_params, &mut self.rng);
        let ot_setup = ot.setup();
        let enc_mask = self.gm.encrypt(self.mask, &mut self.rng);

        self.garbling = Some(garbling);
        self.ot = Some(ot);
        self.state = BState::SendGarbled(Box::new(GcMsg::Garbled {
            gc,
            garbler_labels,
            enc_mask,
            ot_setup,
        }));
        Ok(())
    }

    /// Produces the next message, if one is due.
    pub fn next(&mut self) -> Result<Option<GcMsg>, Error> {
        self.prepare()?;
        match std::mem::replace(&mut self.state, BState::Done) {
            BState::SendGarbled(msg) => {
                self.state = BState::WaitChoices;
                Ok(Some(*msg))
            }
            BState::SendLabels(payloads) => Ok(Some(GcMsg::Labels(payloads))),
            other => {
                self.state = other;
                Ok(None)
            }
        }
    }

    /// Ingests A's OT choices and queues the label payloads.
    pub fn accept(&mut self, msg: &GcMsg) -> Result<(), Error> {
        let choices = match (msg, &self.state) {
            (GcMsg::Choices(choices), BState::WaitChoices) => choices,
            _ => return Err(Error::UnexpectedMessage),
        };
        let garbling = self
            .garbling
            .as_ref()
            .ok_or(Error::InvariantViolation("no garbling before choices"))?;
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..self.l)
            .map(|i| {
                let (zero, one) = garbling.label_pair(2 * i as u32 + 1);
                (zero.to_bytes().to_vec(), one.to_bytes().to_vec())
            })
            .collect();
        let payloads = self
            .ot
            .as_ref()
            .ok_or(Error::InvariantViolation("no OT sender before choices"))?
            .send(choices, &pairs)?;
        self.state = BState::SendLabels(payloads);
        Ok(())
    }

    /// True once the labels have been handed out.
    pub fn is_done(&self) -> bool {
        matches!(self.state, BState::Done)
    }
}

enum AState {
    WaitGarbled,
    SendChoices(OtChoices),
    WaitLabels,
    Done(QrCiphertext),
}

struct ReceivedCircuit {
    gc: GarbledCircuit,
    garbler_labels: Vec<WireLabel>,
    enc_mask: QrCiphertext,
}

/// The evaluating party, holding `a`.
pub struct GcCompareA {
    a_bits: Vec<bool>,
    l: usize,
    gm: Gm,
    ot_params: OtParams,
    rng: ChaCha20Rng,
    circuit: Circuit,
    received: Option<ReceivedCircuit>,
    ot: Option<OtReceiver>,
    state: AState,
}

impl GcCompareA {
    /// Creates the evaluator for the low `l` bits of `a`.
    pub fn new(a: &BigUint, l: usize, gm: Gm, ot_params: OtParams, rng: ChaCha20Rng) -> Self {
        Self {
            a_bits: bits_le(a, l),
            l,
            gm,
            ot_params,
            rng,
            circuit: comparator_circuit(l),
            received: None,
            ot: None,
            state: AState::WaitGarbled,
        }
    }

    /// Ingests a message from B.
    pub fn accept(&mut self, msg: &GcMsg) -> Result<(), Error> {
        match (msg, &self.state) {
            (
                GcMsg::Garbled {
                    gc,
                    garbler_labels,
                    enc_mask,
                    ot_setup,
                },
                AState::WaitGarbled,
            ) => {
                if garbler_labels.len() != self.l + 1 {
                    return Err(Error::UnexpectedMessage);
                }
                let (ot, choices) =
                    OtReceiver::new(self.ot_params, ot_setup, &self.a_bits, &mut self.rng)?;
                self.received = Some(ReceivedCircuit {
                    gc: gc.clone(),
                    garbler_labels: garbler_labels.clone(),
                    enc_mask: enc_mask.clone(),
                });
                self.ot = Some(ot);
                self.state = AState::SendChoices(choices);
                Ok(())
            }
            (GcMsg::Labels(payloads), AState::WaitLabels) => {
                let ot = self
                    .ot
                    .take()
                    .ok_or(Error::InvariantViolation("no OT receiver before labels"))?;
                let blocks = ot.receive(payloads)?;
                let received = self
                    .received
                    .take()
                    .ok_or(Error::InvariantViolation("no circuit before labels"))?;

                let mut inputs = Vec::with_capacity(2 * self.l + 1);
                for i in 0..self.l {
                    inputs.push(received.garbler_labels[i]);
                    let bytes: [u8; 16] = blocks[i]
                        .get(..16)
                        .ok_or(Error::Decode)?
                        .try_into()
                        .map_err(|_| Error::Decode)?;
                    inputs.push(WireLabel::from_bytes(bytes));
                }
                inputs.push(received.garbler_labels[self.l]);

                let blinded = evaluate(&self.circuit, &received.gc, &inputs)?;
                let out = if blinded {
                    self.gm.neg(&received.enc_mask)
                } else {
                    received.enc_mask.clone()
                };
                let out = self.gm.rerand(&out, &mut self.rng);
                self.state = AState::Done(out);
                Ok(())
            }
            _ => Err(Error::UnexpectedMessage),
        }
    }

    /// Produces the queued OT choices, if any.
    pub fn next(&mut self) -> Result<Option<GcMsg>, Error> {
        match std::mem::replace(&mut self.state, AState::WaitLabels) {
            AState::SendChoices(choices) => Ok(Some(GcMsg::Choices(choices))),
            other => {
                self.state = other;
                Ok(None)
            }
        }
    }

    /// True once the circuit has been evaluated and the result unblinded.
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
