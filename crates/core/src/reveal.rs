//! Reveal decisions and the material derived from them.

use serde::{Deserialize, Serialize};

use crate::record::{RawRecord, Sender, TlsRecord};

/// How a transcript record is disclosed to the witness.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "redacted", rename_all = "lowercase")]
pub enum RevealDecision {
    /// The record is never disclosed and never appears in a reveal request.
    #[default]
    NoReveal,
    /// The record is disclosed in full.
    Complete,
    /// The record is disclosed through a zero-knowledge proof that the
    /// contained, partially blanked, payload is a consistent redaction of the
    /// authenticated ciphertext.
    Zk(Vec<u8>),
}

impl RevealDecision {
    /// Returns `true` if the record is disclosed in any form.
    pub fn is_disclosed(&self) -> bool {
        !matches!(self, RevealDecision::NoReveal)
    }
}

impl std::fmt::Debug for RevealDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevealDecision::NoReveal => write!(f, "NoReveal"),
            RevealDecision::Complete => write!(f, "Complete"),
            RevealDecision::Zk(redacted) => write!(f, "Zk({} bytes)", redacted.len()),
        }
    }
}

/// A transcript record marked for disclosure, handed to the reveal preparer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkedRecord {
    /// The party which sent the record.
    pub sender: Sender,
    /// The relay-assigned index.
    pub index: u64,
    /// The record as relayed.
    pub raw: RawRecord,
    /// Decrypted record bytes as seen by the client.
    pub plaintext: Vec<u8>,
    /// The reveal decision; never [`RevealDecision::NoReveal`].
    pub reveal: RevealDecision,
}

impl MarkedRecord {
    /// Creates a marked record from a transcript record.
    ///
    /// Returns `None` if the record is not disclosed.
    pub fn from_record(record: &TlsRecord) -> Option<Self> {
        if !record.reveal().is_disclosed() {
            return None;
        }

        Some(Self {
            sender: record.sender(),
            index: record.index(),
            raw: record.raw().clone(),
            plaintext: record
                .plaintext()
                .map(|plaintext| plaintext.data.clone())
                .unwrap_or_default(),
            reveal: record.reveal().clone(),
        })
    }
}

/// Kind of reveal material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealKind {
    /// Key material which decrypts the whole record.
    Complete,
    /// A zero-knowledge proof of a redacted view of the record.
    Zk,
}

/// Cryptographic reveal material for a single transcript record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealBlock {
    /// Relay-assigned index of the record.
    pub index: u64,
    /// Sender of the record.
    pub sender: Sender,
    /// The kind of material.
    pub kind: RevealKind,
    /// Opaque material produced by the reveal preparer.
    pub material: Vec<u8>,
}

/// Signed statement about the disclosed data returned by the witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Session the attestation was issued for.
    pub session_id: String,
    /// Serialized claim data derived from the disclosed transcript.
    pub claim: Vec<u8>,
    /// Witness signature over the claim.
    pub signature: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ContentType, Plaintext};

    #[test]
    fn test_undisclosed_record_is_not_marked() {
        let record = TlsRecord::new(Sender::Client, 0, RawRecord::new(vec![22], vec![1]));
        assert!(MarkedRecord::from_record(&record).is_none());
    }

    #[test]
    fn test_marked_record_carries_decision() {
        let mut record = TlsRecord::with_plaintext(
            Sender::Server,
            4,
            RawRecord::new(vec![23], vec![9, 9]),
            Plaintext::new(ContentType::ApplicationData, b"ok".to_vec()),
        );
        record.set_reveal(RevealDecision::Zk(b"o*".to_vec()));

        let marked = MarkedRecord::from_record(&record).unwrap();
        assert_eq!(marked.index, 4);
        assert_eq!(marked.plaintext, b"ok");
        assert_eq!(marked.reveal, RevealDecision::Zk(b"o*".to_vec()));
    }

    #[test]
    fn test_decision_wire_format() {
        assert_eq!(
            serde_json::to_value(RevealDecision::Complete).unwrap(),
            serde_json::json!({ "type": "complete" })
        );
        assert_eq!(
            serde_json::to_value(RevealDecision::Zk(vec![42, 97])).unwrap(),
            serde_json::json!({ "type": "zk", "redacted": [42, 97] })
        );
    }
}
