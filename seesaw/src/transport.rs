//! Wire transport: length-prefixed frames, the message envelope, and drivers
//! for running sessions over any `Read + Write` stream.
//!
//! Every frame is a 4-byte big-endian body length followed by the bincode
//! encoding of one [`Envelope`]. The reader rejects frames above a configured
//! cap before allocating. Multi-precision integers inside messages travel in
//! sign-magnitude form ([`WireInt`]); group elements are fixed-width byte
//! strings.
//!
//! Protocol parties implement [`Session`]; [`pump`] runs two of them against
//! each other in process (the ideal-network simulation used by tests and
//! within-round argmax workers), while [`drive`] runs one of them against a
//! peer across a stream.

use std::io::{Read, Write};
use std::sync::mpsc::{channel, Receiver, Sender};

use serde::{Deserialize, Serialize};

use crate::argmax::ArgmaxMsg;
use crate::comparison::CompareMsg;
use crate::enc_compare::EncMsg;
use crate::fhe::{Fhe, FheParams};
use crate::gm::Gm;
use crate::number::WireInt;
use crate::paillier::Paillier;
use crate::switch::SwitchMsg;
use crate::Error;

/// Length-prefix header size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Default cap on a frame body.
pub const DEFAULT_FRAME_CAP: u32 = 1 << 24;

/// A communication-agnostic protocol party.
///
/// `prepare` produces any first-round material, `next_msg` hands out queued
/// messages for the peer, `accept_msg` ingests one peer message, and
/// `is_done` reports the terminal state. Outputs are read through
/// type-specific accessors once terminal.
pub trait Session {
    /// The message type this protocol exchanges.
    type Msg;

    /// Produces any first-round material. Default: nothing to precompute.
    fn prepare(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// The next message for the peer, `None` when the party is waiting or
    /// terminal.
    fn next_msg(&mut self) -> Result<Option<Self::Msg>, Error>;

    /// Ingests one peer message; out-of-order messages are fatal.
    fn accept_msg(&mut self, msg: &Self::Msg) -> Result<(), Error>;

    /// True once the party has nothing left to send or receive.
    fn is_done(&self) -> bool;
}

/// Runs two local parties against each other under ideal network conditions.
pub fn pump<P, Q>(left: &mut P, right: &mut Q) -> Result<(), Error>
where
    P: Session,
    Q: Session<Msg = P::Msg>,
{
    left.prepare()?;
    right.prepare()?;
    loop {
        let mut progressed = false;
        while let Some(m) = left.next_msg()? {
            right.accept_msg(&m)?;
            progressed = true;
        }
        while let Some(m) = right.next_msg()? {
            left.accept_msg(&m)?;
            progressed = true;
        }
        if left.is_done() && right.is_done() {
            return Ok(());
        }
        if !progressed {
            return Err(Error::InvariantViolation("protocol stalled"));
        }
    }
}

/// The envelope tagging every frame body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Envelope {
    /// QR public key announcement.
    QrKey {
        /// Modulus.
        n: WireInt,
        /// Pseudo-residue.
        y: WireInt,
    },
    /// Additive public key announcement.
    AddKey {
        /// Modulus.
        n: WireInt,
    },
    /// FHE parameter announcement.
    FheContext {
        /// Scheme sizes.
        params: FheParams,
    },
    /// FHE public key announcement, following its context.
    FheKey {
        /// Noise-free modulus.
        x0: WireInt,
        /// Encryptions of zero.
        xs: Vec<WireInt>,
    },
    /// A bit-comparison back-end message.
    Compare(CompareMsg),
    /// An encrypted-comparison wrapper message.
    Enc(EncMsg),
    /// An argmax control or sub-protocol message.
    Argmax(ArgmaxMsg),
    /// A cryptosystem-switch message.
    Switch(SwitchMsg),
}

macro_rules! envelope_variant {
    ($msg:ty, $variant:ident) => {
        impl From<$msg> for Envelope {
            fn from(m: $msg) -> Envelope {
                Envelope::$variant(m)
            }
        }

        impl TryFrom<Envelope> for $msg {
            type Error = Error;

            fn try_from(env: Envelope) -> Result<Self, Error> {
                match env {
                    Envelope::$variant(m) => Ok(m),
                    _ => Err(Error::UnexpectedMessage),
                }
            }
        }
    };
}

envelope_variant!(CompareMsg, Compare);
envelope_variant!(EncMsg, Enc);
envelope_variant!(ArgmaxMsg, Argmax);
envelope_variant!(SwitchMsg, Switch);

/// A framed view over a duplex stream.
pub struct Framed<S> {
    stream: S,
    cap: u32,
}

impl<S: Read + Write> Framed<S> {
    /// Frames `stream` with the default body cap.
    pub fn new(stream: S) -> Self {
        Self::with_cap(stream, DEFAULT_FRAME_CAP)
    }

    /// Frames `stream`, rejecting bodies above `cap` bytes.
    pub fn with_cap(stream: S, cap: u32) -> Self {
        Self { stream, cap }
    }

    /// Writes one envelope as a length-prefixed frame.
    pub fn send(&mut self, env: &Envelope) -> Result<(), Error> {
        let body = bincode::serialize(env)?;
        let len = u32::try_from(body.len()).map_err(|_| Error::OversizeFrame {
            len: u32::MAX,
            cap: self.cap,
        })?;
        if len > self.cap {
            return Err(Error::OversizeFrame { len, cap: self.cap });
        }
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(&body)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads one length-prefixed frame and decodes the envelope.
    pub fn recv(&mut self) -> Result<Envelope, Error> {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header)?;
        let len = u32::from_be_bytes(header);
        if len > self.cap {
            return Err(Error::OversizeFrame { len, cap: self.cap });
        }
        let mut body = vec![0u8; len as usize];
        self.stream.read_exact(&mut body)?;
        bincode::deserialize(&body).map_err(|_| Error::Decode)
    }
}

/// Runs one protocol party against a peer across a framed stream.
pub fn drive<S, P>(framed: &mut Framed<S>, session: &mut P) -> Result<(), Error>
where
    S: Read + Write,
    P: Session,
    P::Msg: Into<Envelope> + TryFrom<Envelope, Error = Error>,
{
    session.prepare()?;
    loop {
        while let Some(m) = session.next_msg()? {
            framed.send(&m.into())?;
        }
        if session.is_done() {
            return Ok(());
        }
        let msg = P::Msg::try_from(framed.recv()?)?;
        session.accept_msg(&msg)?;
    }
}

/// Announces a QR public key.
pub fn send_qr_key<S: Read + Write>(framed: &mut Framed<S>, gm: &Gm) -> Result<(), Error> {
    framed.send(&Envelope::QrKey {
        n: WireInt::from_biguint(gm.modulus()),
        y: WireInt::from_biguint(gm.nonresidue()),
    })
}

/// Receives a QR public key announcement.
pub fn recv_qr_key<S: Read + Write>(framed: &mut Framed<S>) -> Result<Gm, Error> {
    match framed.recv()? {
        Envelope::QrKey { n, y } => Ok(Gm::new(n.to_biguint()?, y.to_biguint()?)),
        _ => Err(Error::UnexpectedMessage),
    }
}

/// Announces an additive public key.
pub fn send_add_key<S: Read + Write>(
    framed: &mut Framed<S>,
    paillier: &Paillier,
) -> Result<(), Error> {
    framed.send(&Envelope::AddKey {
        n: WireInt::from_biguint(paillier.modulus()),
    })
}

/// Receives an additive public key announcement.
pub fn recv_add_key<S: Read + Write>(framed: &mut Framed<S>) -> Result<Paillier, Error> {
    match framed.recv()? {
        Envelope::AddKey { n } => Ok(Paillier::new(n.to_biguint()?)),
        _ => Err(Error::UnexpectedMessage),
    }
}

/// Announces an FHE context and public key as two frames.
pub fn send_fhe_key<S: Read + Write>(framed: &mut Framed<S>, fhe: &Fhe) -> Result<(), Error> {
    framed.send(&Envelope::FheContext {
        params: *fhe.params(),
    })?;
    let (x0, xs) = fhe.key_material();
    framed.send(&Envelope::FheKey {
        x0: WireInt::from_biguint(x0),
        xs: xs.iter().map(WireInt::from).collect(),
    })
}

/// Receives an FHE context and public key.
pub fn recv_fhe_key<S: Read + Write>(framed: &mut Framed<S>) -> Result<Fhe, Error> {
    let params = match framed.recv()? {
        Envelope::FheContext { params } => params,
        _ => return Err(Error::UnexpectedMessage),
    };
    match framed.recv()? {
        Envelope::FheKey { x0, xs } => {
            let xs = xs
                .iter()
                .map(|w| w.to_biguint())
                .collect::<Result<_, _>>()?;
            Ok(Fhe::new(params, x0.to_biguint()?, xs))
        }
        _ => Err(Error::UnexpectedMessage),
    }
}

/// One end of an in-memory duplex byte stream.
///
/// Used by tests and the driver binary to run the wire layer without a
/// socket; each end implements `Read + Write` against the other.
pub struct PipeStream {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    rest: Vec<u8>,
}

/// Creates a connected pair of in-memory duplex streams.
pub fn pipe() -> (PipeStream, PipeStream) {
    let (tx_a, rx_a) = channel();
    let (tx_b, rx_b) = channel();
    (
        PipeStream {
            tx: tx_a,
            rx: rx_b,
            rest: Vec::new(),
        },
        PipeStream {
            tx: tx_b,
            rx: rx_a,
            rest: Vec::new(),
        },
    )
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.rest.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.rest = chunk,
                Err(_) => return Ok(0), // peer hung up
            }
        }
        let n = buf.len().min(self.rest.len());
        buf[..n].copy_from_slice(&self.rest[..n]);
        self.rest.drain(..n);
        Ok(n)
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer hung up"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparison::{ComparerA, ComparerB};
    use crate::gm::GmPriv;
    use crate::lsic::{LsicA, LsicB};
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn frame_roundtrip_over_pipe() {
        let (a, b) = pipe();
        let mut fa = Framed::new(a);
        let mut fb = Framed::new(b);

        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let gm = GmPriv::keygen(64, &mut rng);
        send_qr_key(&mut fa, gm.public()).unwrap();
        let received = recv_qr_key(&mut fb).unwrap();
        assert_eq!(received.modulus(), gm.public().modulus());
    }

    #[test]
    fn oversize_frame_is_rejected_by_the_reader() {
        let (a, b) = pipe();
        let mut fa = Framed::new(a);
        let mut fb = Framed::with_cap(b, 16);

        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let gm = GmPriv::keygen(64, &mut rng);
        send_qr_key(&mut fa, gm.public()).unwrap();
        assert!(matches!(
            recv_qr_key(&mut fb),
            Err(Error::OversizeFrame { .. })
        ));
    }

    #[test]
    fn truncated_frame_is_an_io_error() {
        let (mut a, b) = pipe();
        let mut fb = Framed::new(b);

        // announce a 100-byte body but hang up after 3 bytes
        a.write_all(&100u32.to_be_bytes()).unwrap();
        a.write_all(&[1, 2, 3]).unwrap();
        drop(a);
        assert!(matches!(fb.recv(), Err(Error::Io(_))));
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let (mut a, b) = pipe();
        let mut fb = Framed::new(b);
        a.write_all(&4u32.to_be_bytes()).unwrap();
        a.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert!(matches!(fb.recv(), Err(Error::Decode)));
    }

    #[test]
    fn comparison_runs_over_the_wire() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let gm_sk = GmPriv::keygen(128, &mut rng);
        let gm = gm_sk.public().clone();

        let (sa, sb) = pipe();
        let sk_b = gm_sk.clone();
        let handle = std::thread::spawn(move || -> Result<(), Error> {
            let mut framed = Framed::new(sb);
            let mut party_b = ComparerB::from(LsicB::new(
                &BigUint::from(90u8),
                8,
                sk_b,
                ChaCha20Rng::seed_from_u64(5),
            ));
            drive(&mut framed, &mut party_b)
        });

        let mut framed = Framed::new(sa);
        let mut party_a = ComparerA::from(LsicA::new(
            &BigUint::from(60u8),
            8,
            gm,
            ChaCha20Rng::seed_from_u64(4),
        ));
        drive(&mut framed, &mut party_a).unwrap();
        handle.join().unwrap().unwrap();

        assert!(gm_sk.decrypt(&party_a.output().unwrap())); // 60 < 90
    }
}
