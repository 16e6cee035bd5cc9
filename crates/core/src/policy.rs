//! Redaction policy.
//!
//! Decides how client writes are split into records and which transcript
//! records are disclosed to the witness, and in what form.
//!
//! Client writes follow one of two [`WriteMode`]s, chosen once per session:
//!
//! - [`WriteMode::KeyUpdate`] splits a buffer at its secret slices. Disclosed
//!   spans are written as their own records and revealed in full. Each secret
//!   span is written between two traffic key rotations and never revealed, so
//!   the keys disclosed for the surrounding records say nothing about it.
//! - [`WriteMode::Zk`] writes the buffer as is and reveals it through a
//!   zero-knowledge proof over a copy with every secret slice blanked.
//!
//! Secret bytes are kept out of disclosed records by construction: a
//! [`WriteChunk::Disclosed`] never contains a byte of a secret slice.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{
    record::{Sender, TlsVersion},
    reveal::RevealDecision,
    slice::{self, RedactedSlice, SliceError, Span},
    transcript::Transcript,
};

/// How secret slices in client writes are kept from the witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// Secret spans are written under rotated traffic keys.
    KeyUpdate,
    /// Writes are disclosed through zero-knowledge proofs of a redacted view.
    Zk,
}

impl WriteMode {
    /// Selects the write mode for a session.
    ///
    /// Key updates are only used if preferred and supported by the negotiated
    /// version. Otherwise [`WriteMode::Zk`] is used.
    ///
    /// # Arguments
    ///
    /// * `version` - The negotiated TLS version.
    /// * `preferred` - The caller's preferred mode, if any.
    pub fn select(version: TlsVersion, preferred: Option<WriteMode>) -> WriteMode {
        match preferred {
            Some(WriteMode::KeyUpdate) if version.supports_key_update() => WriteMode::KeyUpdate,
            _ => WriteMode::Zk,
        }
    }
}

/// A step of a planned client write.
#[derive(Clone, PartialEq, Eq)]
pub enum WriteChunk {
    /// Bytes written as their own records, each revealed in full.
    Disclosed(Vec<u8>),
    /// Secret bytes written between two key rotations, never revealed.
    Secret(Vec<u8>),
    /// Bytes written as is and revealed as `redacted` through a
    /// zero-knowledge proof.
    Redacted {
        /// The bytes to write.
        plaintext: Vec<u8>,
        /// `plaintext` with every secret slice blanked.
        redacted: Vec<u8>,
    },
}

opaque_debug::implement!(WriteChunk);

/// Plans a client write.
///
/// Under [`WriteMode::KeyUpdate`] a buffer without secret slices is a single
/// [`WriteChunk::Disclosed`]. Under [`WriteMode::Zk`] the buffer is always a
/// single [`WriteChunk::Redacted`], even when nothing is blanked.
///
/// # Arguments
///
/// * `mode` - The session write mode.
/// * `data` - The buffer to write.
/// * `slices` - The secret slices inside `data`.
pub fn plan_write(
    mode: WriteMode,
    data: &[u8],
    slices: &[RedactedSlice],
) -> Result<Vec<WriteChunk>, PolicyError> {
    let slices = slice::normalize(slices);

    match mode {
        WriteMode::KeyUpdate if slices.is_empty() => {
            Ok(vec![WriteChunk::Disclosed(data.to_vec())])
        }
        WriteMode::KeyUpdate => Ok(slice::split(data, &slices)?
            .into_iter()
            .map(|span| match span {
                Span::Disclosed(bytes) => WriteChunk::Disclosed(bytes.to_vec()),
                Span::Secret(bytes) => WriteChunk::Secret(bytes.to_vec()),
            })
            .collect()),
        WriteMode::Zk => Ok(vec![WriteChunk::Redacted {
            plaintext: data.to_vec(),
            redacted: slice::redact(data, &slices)?,
        }]),
    }
}

/// Discloses the client handshake records.
///
/// Every client record preceding the first client application data record
/// without a decision is revealed, so the witness can verify the handshake.
/// Under [`WriteMode::Zk`] the whole record plaintext is revealed as a
/// zero-knowledge payload, otherwise in full. Returns the number of records
/// marked.
pub fn disclose_handshake(transcript: &mut Transcript, mode: WriteMode) -> usize {
    let mut marked = 0;

    for record in transcript.records_mut() {
        if record.sender() != Sender::Client {
            continue;
        }

        if record.is_application_data() {
            break;
        }

        if record.reveal().is_disclosed() {
            continue;
        }

        let decision = match (mode, record.plaintext()) {
            (WriteMode::Zk, Some(plaintext)) => RevealDecision::Zk(plaintext.data.clone()),
            _ => RevealDecision::Complete,
        };
        record.set_reveal(decision);
        marked += 1;
    }

    marked
}

/// Selects which parts of the server response may be disclosed.
///
/// Receives the concatenated application data received from the server and
/// returns the ranges of it which may be revealed.
pub trait ResponseRedactor: Send + Sync {
    /// Returns the ranges of `response` to reveal.
    fn reveal_ranges(&self, response: &[u8]) -> Vec<Range<usize>>;
}

impl<F> ResponseRedactor for F
where
    F: Fn(&[u8]) -> Vec<Range<usize>> + Send + Sync,
{
    fn reveal_ranges(&self, response: &[u8]) -> Vec<Range<usize>> {
        self(response)
    }
}

/// Discloses server application data records.
///
/// Without a redactor every server application data record is revealed in
/// full. With a redactor, only records overlapping a revealed range are
/// revealed, as a zero-knowledge payload with everything outside the revealed
/// ranges blanked. Other records stay undisclosed. Returns the number of
/// records marked.
pub fn redact_response(
    transcript: &mut Transcript,
    version: TlsVersion,
    redactor: Option<&dyn ResponseRedactor>,
) -> Result<usize, PolicyError> {
    let is_response = |record: &crate::record::TlsRecord| {
        record.sender() == Sender::Server && record.is_application_data()
    };

    let Some(redactor) = redactor else {
        let mut marked = 0;
        for record in transcript.records_mut().iter_mut().filter(|r| is_response(r)) {
            record.set_reveal(RevealDecision::Complete);
            marked += 1;
        }
        return Ok(marked);
    };

    let response: Vec<u8> = transcript
        .records()
        .iter()
        .filter(|r| is_response(r))
        .filter_map(|r| r.application_bytes(version))
        .flatten()
        .copied()
        .collect();

    let ranges = redactor.reveal_ranges(&response);
    if let Some(range) = ranges
        .iter()
        .find(|range| range.start > range.end || range.end > response.len())
    {
        return Err(PolicyError::new(format!(
            "response reveal range {range:?} is out of bounds for {} bytes",
            response.len()
        )));
    }

    let mut marked = 0;
    let mut offset = 0;
    for record in transcript.records_mut().iter_mut().filter(|r| is_response(r)) {
        let Some(bytes) = record.application_bytes(version) else {
            continue;
        };
        let block = offset..offset + bytes.len();
        offset = block.end;

        let local: Vec<Range<usize>> = ranges
            .iter()
            .filter_map(|range| {
                let start = range.start.max(block.start);
                let end = range.end.min(block.end);
                (start < end).then(|| start - block.start..end - block.start)
            })
            .collect();

        if local.is_empty() {
            continue;
        }

        let redacted = slice::reveal_only(bytes, &local)?;
        record.set_reveal(RevealDecision::Zk(redacted));
        marked += 1;
    }

    Ok(marked)
}

/// Error for the redaction policy.
#[derive(Debug, thiserror::Error)]
#[error("redaction policy error: {0}")]
pub struct PolicyError(String);

impl PolicyError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<SliceError> for PolicyError {
    fn from(err: SliceError) -> Self {
        Self(err.to_string())
    }
}
