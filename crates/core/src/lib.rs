//! Core types for remote-TLS claims.
//!
//! This crate contains the transcript of a TLS session relayed through a
//! witness, and the redaction policy which decides what the witness gets to
//! see of it.

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod policy;
pub mod record;
pub mod reveal;
pub mod slice;
pub mod transcript;

pub use policy::{PolicyError, ResponseRedactor, WriteChunk, WriteMode};
pub use record::{ContentType, Plaintext, RawRecord, Sender, TlsRecord, TlsVersion};
pub use reveal::{Attestation, MarkedRecord, RevealBlock, RevealDecision, RevealKind};
pub use slice::{RedactedSlice, SliceError};
pub use transcript::{Transcript, TranscriptError};
