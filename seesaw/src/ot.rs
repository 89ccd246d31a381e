//! 1-out-of-2 oblivious transfer over the Ristretto group, in batches.
//!
//! The sender reuses one ephemeral key pair for a whole batch: the receiver
//! answers with one choice-dependent group element per transfer and the sender
//! replies with `2n` masked payload blocks, of which the receiver can unmask
//! exactly one per transfer. Group elements travel as fixed-width 32-byte
//! compressed points.
//!
//! All parameters are carried by an explicit [`OtParams`] value passed into
//! each invocation; there is no process-global OT state. The key-derivation
//! hash is parameterized, defaulting to SHA-256; SHA-1 (with its 20-byte
//! blocks) is kept only for interoperability with legacy transcripts.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};
use sha1::Digest as _;

use crate::Error;

/// Serialized size of a group element in bytes.
pub const FIELD_SIZE: usize = 32;

/// The key-derivation hash used to mask payload blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OtHash {
    /// Default.
    Sha256,
    /// Legacy transcripts only.
    Sha1,
}

impl OtHash {
    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            OtHash::Sha256 => 32,
            OtHash::Sha1 => 20,
        }
    }

    fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            OtHash::Sha256 => {
                let mut h = sha2::Sha256::new();
                for p in parts {
                    h.update(p);
                }
                h.finalize().to_vec()
            }
            OtHash::Sha1 => {
                let mut h = sha1::Sha1::new();
                for p in parts {
                    h.update(p);
                }
                h.finalize().to_vec()
            }
        }
    }
}

/// Parameters of one OT batch, constructed once per process and passed into
/// each invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtParams {
    /// Key-derivation hash.
    pub hash: OtHash,
    /// Payload block size in bytes; every transferred message is zero-padded
    /// to this length before masking.
    pub block_size: usize,
}

impl Default for OtParams {
    fn default() -> Self {
        Self {
            hash: OtHash::Sha256,
            block_size: 32,
        }
    }
}

impl OtParams {
    /// SHA-1 with its native 20-byte blocks, for legacy transcripts.
    pub fn legacy() -> Self {
        Self {
            hash: OtHash::Sha1,
            block_size: 20,
        }
    }
}

/// The sender's batch setup message: its ephemeral public element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtSenderSetup {
    /// Compressed ephemeral public key.
    pub point: [u8; FIELD_SIZE],
}

/// The receiver's reply: one choice-dependent element per transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtChoices {
    /// Compressed choice elements, one per transfer.
    pub points: Vec<[u8; FIELD_SIZE]>,
}

/// The sender's payload message: `2n` masked blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtPayloads {
    /// Blocks `2i` and `2i + 1` hold the masked messages of transfer `i`.
    pub blocks: Vec<Vec<u8>>,
}

/// The party offering two messages per transfer.
#[derive(Clone)]
pub struct OtSender {
    params: OtParams,
    secret: Scalar,
    public: RistrettoPoint,
    public_sq: RistrettoPoint,
}

impl OtSender {
    /// Creates a fresh batch ephemeral.
    pub fn new<R>(params: OtParams, rng: &mut R) -> Self
    where
        R: rand::RngCore + rand::CryptoRng,
    {
        let secret = Scalar::random(rng);
        let public = RISTRETTO_BASEPOINT_TABLE * &secret;
        let public_sq = public * secret;
        Self {
            params,
            secret,
            public,
            public_sq,
        }
    }

    /// The setup message opening the batch.
    pub fn setup(&self) -> OtSenderSetup {
        OtSenderSetup {
            point: self.public.compress().to_bytes(),
        }
    }

    /// Masks each message pair under the keys derived from the receiver's
    /// choice elements. `pairs[i]` must both fit in one payload block.
    pub fn send(
        &self,
        choices: &OtChoices,
        pairs: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<OtPayloads, Error> {
        if choices.points.len() != pairs.len() {
            return Err(Error::UnexpectedMessage);
        }
        let my_bytes = self.public.compress().to_bytes();
        let mut blocks = Vec::with_capacity(2 * pairs.len());
        for (point, (m0, m1)) in choices.points.iter().zip(pairs) {
            let b = CompressedRistretto(*point).decompress().ok_or(Error::Decode)?;
            let yb = b * self.secret;

            // k_0 := H(A, yB), valid when the receiver chose 0;
            // k_1 := H(A, yB - yA), valid when it chose 1.
            let k0 = yb.compress().to_bytes();
            let k1 = (yb - self.public_sq).compress().to_bytes();
            blocks.push(self.mask_block(&my_bytes, &k0, m0)?);
            blocks.push(self.mask_block(&my_bytes, &k1, m1)?);
        }
        Ok(OtPayloads { blocks })
    }

    fn mask_block(&self, a: &[u8], key: &[u8], msg: &[u8]) -> Result<Vec<u8>, Error> {
        if msg.len() > self.params.block_size {
            return Err(Error::InvalidParameters("message longer than OT block"));
        }
        let mut block = keystream(self.params, a, key);
        for (b, m) in block.iter_mut().zip(msg) {
            *b ^= m;
        }
        Ok(block)
    }
}

/// The party recovering one message per transfer.
pub struct OtReceiver {
    params: OtParams,
    sender_pub: RistrettoPoint,
    secrets: Vec<Scalar>,
    choices: Vec<bool>,
}

impl OtReceiver {
    /// Answers a sender setup with one choice element per transfer.
    pub fn new<R>(
        params: OtParams,
        setup: &OtSenderSetup,
        choices: &[bool],
        rng: &mut R,
    ) -> Result<(Self, OtChoices), Error>
    where
        R: rand::RngCore + rand::CryptoRng,
    {
        let sender_pub = CompressedRistretto(setup.point)
            .decompress()
            .ok_or(Error::Decode)?;
        let mut secrets = Vec::with_capacity(choices.len());
        let mut points = Vec::with_capacity(choices.len());
        for &choice in choices {
            let secret = Scalar::random(rng);
            let mut point = RISTRETTO_BASEPOINT_TABLE * &secret;
            if choice {
                point += sender_pub;
            }
            secrets.push(secret);
            points.push(point.compress().to_bytes());
        }
        let receiver = Self {
            params,
            sender_pub,
            secrets,
            choices: choices.to_vec(),
        };
        Ok((receiver, OtChoices { points }))
    }

    /// Unmasks the chosen block of each transfer.
    pub fn receive(self, payloads: &OtPayloads) -> Result<Vec<Vec<u8>>, Error> {
        if payloads.blocks.len() != 2 * self.choices.len() {
            return Err(Error::UnexpectedMessage);
        }
        let a_bytes = self.sender_pub.compress().to_bytes();
        let mut out = Vec::with_capacity(self.choices.len());
        for (i, (secret, &choice)) in self.secrets.iter().zip(&self.choices).enumerate() {
            let key = (self.sender_pub * secret).compress().to_bytes();
            let mut block = payloads.blocks[2 * i + choice as usize].clone();
            if block.len() != self.params.block_size {
                return Err(Error::UnexpectedMessage);
            }
            let stream = keystream(self.params, &a_bytes, &key);
            for (b, s) in block.iter_mut().zip(&stream) {
                *b ^= s;
            }
            out.push(block);
        }
        Ok(out)
    }
}

/// Expands `H(a, key, counter)` blocks to one payload block length.
fn keystream(params: OtParams, a: &[u8], key: &[u8]) -> Vec<u8> {
    let mut stream = Vec::with_capacity(params.block_size);
    let mut counter = 0u32;
    while stream.len() < params.block_size {
        let block = params.hash.digest(&[a, key, &counter.to_be_bytes()]);
        stream.extend_from_slice(&block);
        counter += 1;
    }
    stream.truncate(params.block_size);
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn batch_roundtrip(params: OtParams) {
        let mut rng_send = ChaCha20Rng::seed_from_u64(1);
        let mut rng_recv = ChaCha20Rng::seed_from_u64(2);

        let choices = [false, true, true, false, true];
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..choices.len())
            .map(|i| (vec![i as u8; 16], vec![0xA0 | i as u8; 16]))
            .collect();

        let sender = OtSender::new(params, &mut rng_send);
        let (receiver, choice_msg) =
            OtReceiver::new(params, &sender.setup(), &choices, &mut rng_recv).unwrap();
        let payloads = sender.send(&choice_msg, &pairs).unwrap();
        let received = receiver.receive(&payloads).unwrap();

        for (i, &c) in choices.iter().enumerate() {
            let expected = if c { &pairs[i].1 } else { &pairs[i].0 };
            assert_eq!(&received[i][..expected.len()], &expected[..]);
            let other = if c { &pairs[i].0 } else { &pairs[i].1 };
            assert_ne!(&received[i][..other.len()], &other[..]);
        }
    }

    #[test]
    fn batch_roundtrip_sha256() {
        batch_roundtrip(OtParams::default());
    }

    #[test]
    fn batch_roundtrip_sha1_legacy() {
        batch_roundtrip(OtParams::legacy());
    }

    #[test]
    fn mismatched_batch_sizes_are_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let params = OtParams::default();
        let sender = OtSender::new(params, &mut rng);
        let (_, choice_msg) =
            OtReceiver::new(params, &sender.setup(), &[true], &mut rng).unwrap();
        let err = sender.send(&choice_msg, &[]);
        assert!(matches!(err, Err(Error::UnexpectedMessage)));
    }

    #[test]
    fn oversize_message_is_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let params = OtParams::legacy();
        let sender = OtSender::new(params, &mut rng);
        let (_, choice_msg) =
            OtReceiver::new(params, &sender.setup(), &[false], &mut rng).unwrap();
        let err = sender.send(&choice_msg, &[(vec![0u8; 21], vec![0u8; 21])]);
        assert!(matches!(err, Err(Error::InvalidParameters(_))));
    }
}
