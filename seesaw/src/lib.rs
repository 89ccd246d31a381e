//! Two-party secure comparison and argmax over encrypted integers.
//!
//! This crate implements the protocol core for a pair of semi-honest parties,
//! an *owner* holding ciphertexts under an additively homomorphic scheme and a
//! *helper* holding the matching secret key, who want to evaluate order
//! relations over the underlying plaintexts without revealing them:
//!
//! - three interchangeable bit-comparison back-ends producing an encrypted
//!   `[a < b]` bit: [`lsic`] (bit-by-bit, XOR-homomorphic), [`dgk`]
//!   (blinded additive differences) and [`gc_compare`] (a garbled comparator
//!   evaluated after an oblivious label transfer);
//! - wrappers lifting those back-ends to ciphertext inputs by statistical
//!   blinding ([`enc_compare`]);
//! - linear and tournament argmax over an encrypted vector ([`argmax`]);
//! - a switch repacking XOR-homomorphic bit ciphertexts into the slots of a
//!   levelled GF(2) scheme ([`switch`]).
//!
//! Protocol parties are deliberately communication-agnostic state machines:
//! they hand out messages as values and never touch a socket, so they work
//! equally in sync and async environments. [`transport`] provides a framed
//! wire encoding plus drivers for running any session over a
//! `Read + Write` stream, and [`transport::pump`] runs two local parties
//! against each other under ideal network conditions.
//!
//! Sessions are single-use: construct with role, inputs, keys and an RNG,
//! exchange messages until [`transport::Session::is_done`], read the output
//! once, drop. Any out-of-order or malformed message aborts the session with
//! an [`Error`]; nothing is caught internally and there is no resumption.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod argmax;
pub mod circuit;
pub mod comparison;
pub mod dgk;
pub mod enc_compare;
pub mod fhe;
pub mod garble;
pub mod gc_compare;
pub mod gm;
pub mod lsic;
pub mod number;
pub mod ot;
pub mod paillier;
pub mod switch;
pub mod transport;

pub use circuit::{Circuit, Gate, GateIndex};
pub use comparison::{Backend, CompareMsg, ComparerA, ComparerB};

/// Errors occurring during the validation or the execution of a protocol
/// session.
///
/// Errors are always surfaced to the caller of the session; a failed session
/// is dead and must be dropped. Callers may start a fresh session.
#[derive(Debug)]
pub enum Error {
    /// The underlying stream failed or ended in the middle of a frame.
    Io(std::io::Error),
    /// A frame header announced a length above the configured cap.
    OversizeFrame {
        /// Announced body length.
        len: u32,
        /// Configured maximum body length.
        cap: u32,
    },
    /// A message body could not be decoded into the expected type.
    Decode,
    /// A message does not match the session's current state.
    UnexpectedMessage,
    /// A received value lies outside its statistical blinding bound.
    OutOfBounds,
    /// The protocol has already ended, no further messages can be processed.
    ProtocolEnded,
    /// The protocol is still in progress and does not yet have any output.
    ProtocolStillInProgress,
    /// A decryption or key operation failed.
    Crypto,
    /// The provided circuit contains invalid gate connections.
    InvalidCircuit,
    /// A parameter combination is unusable (e.g. plaintext space too small
    /// for the requested bit width).
    InvalidParameters(&'static str),
    /// An internal consistency check failed: either a bug or an adversarial
    /// peer.
    InvariantViolation(&'static str),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "Stream failed mid-session: {e}"),
            Error::OversizeFrame { len, cap } => {
                write!(f, "Frame of {len} bytes exceeds the configured cap of {cap}")
            }
            Error::Decode => f.write_str("Message bytes do not parse into the expected type"),
            Error::UnexpectedMessage => {
                f.write_str("A different message was expected from the other party at this point")
            }
            Error::OutOfBounds => {
                f.write_str("Received value lies outside its statistical blinding bound")
            }
            Error::ProtocolEnded => {
                f.write_str("The protocol has already ended, no further messages can be processed")
            }
            Error::ProtocolStillInProgress => {
                f.write_str("The protocol is still in progress and does not yet have any output")
            }
            Error::Crypto => f.write_str("Decryption or key operation failed"),
            Error::InvalidCircuit => {
                f.write_str("The provided circuit is invalid and cannot be executed")
            }
            Error::InvalidParameters(what) => write!(f, "Unusable parameters: {what}"),
            Error::InvariantViolation(what) => {
                write!(f, "Internal consistency check failed: {what}")
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<bincode::Error> for Error {
    fn from(_: bincode::Error) -> Self {
        Self::Decode
    }
}
