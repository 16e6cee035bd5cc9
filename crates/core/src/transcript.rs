//! Session transcript.
//!
//! The [`Transcript`] is an append-only log of every record exchanged with the
//! server during a session, in the order the records were observed. Each record
//! carries the index assigned by the relay, which is strictly increasing per
//! sender, and a [`RevealDecision`](crate::RevealDecision) which is assigned at
//! write time for client records and at finalize time for everything else.
//!
//! The transcript is never persisted. It lives for the duration of a single
//! session and is discarded once the session has been finalized or cancelled.

use crate::{
    record::{Sender, TlsRecord},
    reveal::MarkedRecord,
};

/// Ordered log of the records of a session.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    records: Vec<TlsRecord>,
    /// Position of the most recent record per sender.
    last: [Option<usize>; 2],
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record index is not greater than the index of
    /// the previous record of the same sender.
    pub fn append(&mut self, record: TlsRecord) -> Result<&mut TlsRecord, TranscriptError> {
        let slot = record.sender().slot();

        if let Some(last) = self.last[slot].map(|pos| &self.records[pos]) {
            if record.index() <= last.index() {
                return Err(TranscriptError::out_of_order(
                    record.sender(),
                    last.index(),
                    record.index(),
                ));
            }
        }

        let pos = self.records.len();
        self.records.push(record);
        self.last[slot] = Some(pos);

        Ok(&mut self.records[pos])
    }

    /// Returns the most recently appended record of the sender.
    pub fn last_by_sender(&self, sender: Sender) -> Option<&TlsRecord> {
        self.last[sender.slot()].map(|pos| &self.records[pos])
    }

    /// Returns the most recently appended record of the sender, mutably.
    pub fn last_by_sender_mut(&mut self, sender: Sender) -> Option<&mut TlsRecord> {
        self.last[sender.slot()].map(|pos| &mut self.records[pos])
    }

    /// Returns all records in the order they were appended.
    pub fn records(&self) -> &[TlsRecord] {
        &self.records
    }

    /// Returns all records mutably.
    pub fn records_mut(&mut self) -> &mut [TlsRecord] {
        &mut self.records
    }

    /// Returns an iterator over the records of the sender.
    pub fn by_sender(&self, sender: Sender) -> impl Iterator<Item = &TlsRecord> {
        self.records.iter().filter(move |r| r.sender() == sender)
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the transcript is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the records which have been marked for disclosure, in
    /// transcript order.
    pub fn marked(&self) -> Vec<MarkedRecord> {
        self.records
            .iter()
            .filter_map(MarkedRecord::from_record)
            .collect()
    }
}

/// Error for [`Transcript`].
#[derive(Debug, thiserror::Error)]
#[error("transcript error: {kind}: {msg}")]
pub struct TranscriptError {
    kind: ErrorKind,
    msg: String,
}

impl TranscriptError {
    fn out_of_order(sender: Sender, last: u64, index: u64) -> Self {
        Self {
            kind: ErrorKind::OutOfOrder,
            msg: format!("{sender} record index {index} does not follow {last}"),
        }
    }
}

#[derive(Debug)]
enum ErrorKind {
    OutOfOrder,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::OutOfOrder => write!(f, "out of order"),
        }
    }
}
