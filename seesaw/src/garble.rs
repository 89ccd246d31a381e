//! Garbling and evaluation of boolean circuits with free XOR and
//! point-and-permute AND tables over 128-bit wire labels.
//!
//! The garbler owns the [`Garbling`] (all zero-labels plus the global offset);
//! the [`GarbledCircuit`] is the transmissible part: one four-row table per
//! AND gate and the output-decoding map, which records the hash of each of the
//! two output labels. The global offset never leaves the garbler.

use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::circuit::{Circuit, Gate, GateIndex};
use crate::Error;

/// A single wire label held by the evaluator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLabel(pub(crate) u128);

impl WireLabel {
    /// Little-endian byte form, as carried inside OT payload blocks.
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    /// Parses the little-endian byte form.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }
}

/// The garbler-global free-XOR offset; its low bit is fixed to 1 so that the
/// two labels of any wire differ in their permute bit.
#[derive(Clone, Copy, Debug)]
struct Delta(u128);

impl Delta {
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen::<u128>() | 1)
    }
}

/// The four ciphertext rows of one garbled AND gate, indexed by the permute
/// bits of the incoming labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarbledGate {
    rows: [u128; 4],
}

/// Hashes of the two output-wire labels; the evaluator maps its computed
/// label through this table to recover the plaintext output bit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDecoding {
    zero: [u8; 32],
    one: [u8; 32],
}

/// The transmissible part of a garbling, owned by the generator and handed to
/// the evaluator by value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarbledCircuit {
    and_tables: Vec<GarbledGate>,
    output: OutputDecoding,
}

/// The garbler's secret view: one zero-label per wire plus the offset.
pub struct Garbling {
    delta: Delta,
    labels: Vec<u128>,
}

impl Garbling {
    /// The label of `gate` encoding `bit`.
    pub fn label(&self, gate: GateIndex, bit: bool) -> WireLabel {
        let zero = self.labels[gate as usize];
        WireLabel(if bit { zero ^ self.delta.0 } else { zero })
    }

    /// Both labels of `gate`, zero label first.
    pub fn label_pair(&self, gate: GateIndex) -> (WireLabel, WireLabel) {
        (self.label(gate, false), self.label(gate, true))
    }
}

/// Garbles `circuit`, producing the generator's secret view and the tables to
/// transmit.
pub fn garble<R: RngCore + CryptoRng>(
    circuit: &Circuit,
    rng: &mut R,
) -> Result<(Garbling, GarbledCircuit), Error> {
    circuit.validate()?;
    let delta = Delta::random(rng);
    let mut labels: Vec<u128> = Vec::with_capacity(circuit.gates().len());
    let mut and_tables = Vec::with_capacity(circuit.and_gates());

    for (g, gate) in circuit.gates().iter().enumerate() {
        let zero = match gate {
            Gate::InGarbler | Gate::InEval => rng.gen::<u128>(),
            &Gate::Xor(x, y) => labels[x as usize] ^ labels[y as usize],
            &Gate::Not(x) => labels[x as usize] ^ delta.0,
            &Gate::And(x, y) => {
                let z0 = rng.gen::<u128>();
                let mut rows = [0u128; 4];
                for i in 0..2u128 {
                    for j in 0..2u128 {
                        let lx = labels[x as usize] ^ (i * delta.0);
                        let ly = labels[y as usize] ^ (j * delta.0);
                        let pos = (((lx & 1) << 1) | (ly & 1)) as usize;
                        let out = z0 ^ ((i & j) * delta.0);
                        rows[pos] = row_hash(lx, ly, g as GateIndex) ^ out;
                    }
                }
                and_tables.push(GarbledGate { rows });
                z0
            }
        };
        labels.push(zero);
    }

    let out_zero = labels[circuit.output() as usize];
    let output = OutputDecoding {
        zero: output_hash(out_zero, circuit.output()),
        one: output_hash(out_zero ^ delta.0, circuit.output()),
    };
    Ok((Garbling { delta, labels }, GarbledCircuit { and_tables, output }))
}

/// Evaluates a garbled circuit given one label per input gate, in gate order,
/// and decodes the output bit.
pub fn evaluate(
    circuit: &Circuit,
    gc: &GarbledCircuit,
    inputs: &[WireLabel],
) -> Result<bool, Error> {
    circuit.validate()?;
    if inputs.len() != circuit.garbler_inputs() + circuit.eval_inputs() {
        return Err(Error::UnexpectedMessage);
    }
    if gc.and_tables.len() != circuit.and_gates() {
        return Err(Error::UnexpectedMessage);
    }

    let mut wires: Vec<u128> = Vec::with_capacity(circuit.gates().len());
    let mut next_input = inputs.iter();
    let mut next_table = gc.and_tables.iter();
    for (g, gate) in circuit.gates().iter().enumerate() {
        let label = match gate {
            Gate::InGarbler | Gate::InEval => {
                next_input
                    .next()
                    .ok_or(Error::InvariantViolation("ran out of input labels"))?
                    .0
            }
            &Gate::Xor(x, y) => wires[x as usize] ^ wires[y as usize],
            &Gate::Not(x) => wires[x as usize],
            &Gate::And(x, y) => {
                let lx = wires[x as usize];
                let ly = wires[y as usize];
                let pos = (((lx & 1) << 1) | (ly & 1)) as usize;
                let table = next_table
                    .next()
                    .ok_or(Error::InvariantViolation("ran out of garbled tables"))?;
                row_hash(lx, ly, g as GateIndex) ^ table.rows[pos]
            }
        };
        wires.push(label);
    }

    let h = output_hash(wires[circuit.output() as usize], circuit.output());
    if h == gc.output.zero {
        Ok(false)
    } else if h == gc.output.one {
        Ok(true)
    } else {
        Err(Error::InvariantViolation(
            "output decoding matched neither label's hash",
        ))
    }
}

fn row_hash(x: u128, y: u128, gate: GateIndex) -> u128 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&x.to_le_bytes());
    hasher.update(&y.to_le_bytes());
    hasher.update(&gate.to_le_bytes());
    let mut out = [0u8; 16];
    hasher.finalize_xof().fill(&mut out);
    u128::from_le_bytes(out)
}

fn output_hash(label: u128, gate: GateIndex) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"out");
    hasher.update(&label.to_le_bytes());
    hasher.update(&gate.to_le_bytes());
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{bits_le, comparator_circuit};
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn garbled_compare(a: u64, b: u64, l: usize, mask: bool) -> bool {
        let mut rng = ChaCha20Rng::seed_from_u64(17);
        let circuit = comparator_circuit(l);
        let (garbling, gc) = garble(&circuit, &mut rng).unwrap();

        let a_bits = bits_le(&BigUint::from(a), l);
        let b_bits = bits_le(&BigUint::from(b), l);
        let mut inputs = Vec::new();
        for i in 0..l {
            inputs.push(garbling.label(2 * i as u32, b_bits[i]));
            inputs.push(garbling.label(2 * i as u32 + 1, a_bits[i]));
        }
        inputs.push(garbling.label(2 * l as u32, mask));

        evaluate(&circuit, &gc, &inputs).unwrap()
    }

    #[test]
    fn garbled_output_matches_plain_circuit() {
        for (a, b) in [(0u64, 0u64), (3, 5), (5, 3), (255, 255), (254, 255)] {
            for mask in [false, true] {
                assert_eq!(garbled_compare(a, b, 8, mask), (a < b) ^ mask);
            }
        }
    }

    #[test]
    fn foreign_label_fails_decoding() {
        let mut rng = ChaCha20Rng::seed_from_u64(23);
        let circuit = comparator_circuit(2);
        let (garbling, gc) = garble(&circuit, &mut rng).unwrap();

        let mut inputs: Vec<WireLabel> = (0..5).map(|i| garbling.label(i, false)).collect();
        inputs[4] = WireLabel(rng.gen());
        let r = evaluate(&circuit, &gc, &inputs);
        assert!(matches!(r, Err(Error::InvariantViolation(_))));
    }
}
