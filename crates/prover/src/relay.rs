//! Witness relay capability.
//!
//! The relay is the witness's RPC surface. It forwards TLS records between the
//! prover and the target server, assigns every record an index, and finally
//! issues an attestation over the revealed records.

use std::fmt;

use async_trait::async_trait;
use claimtls_core::{Attestation, RawRecord, RevealBlock};
use futures::stream::BoxStream;
use semver::Version;
use serde::{Deserialize, Serialize};

/// Describes the session the relay should open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    /// Host of the target server.
    pub host: String,
    /// Port of the target server.
    pub port: u16,
    /// Country the relay should connect to the server from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_location: Option<String>,
}

/// A record received from the relay's pull stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledRecord {
    /// The record. A record with an empty header marks the session as ready.
    pub record: RawRecord,
    /// The relay-assigned index.
    pub index: u64,
}

/// Stream of records pulled from a session.
pub type PullStream = BoxStream<'static, Result<PulledRecord, RelayError>>;

/// RPC interface of the witness relay.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Opens a session, returning its id.
    async fn initialise_session(&self, descriptor: &SessionDescriptor)
        -> Result<String, RelayError>;

    /// Returns the stream of records the server sends in the session.
    ///
    /// The stream runs until the session is closed or cancelled.
    async fn pull_from_session(
        &self,
        session_id: &str,
        version: &Version,
    ) -> Result<PullStream, RelayError>;

    /// Pushes records to the server, returning the index assigned to the last
    /// record.
    async fn push_to_session(
        &self,
        session_id: &str,
        messages: Vec<RawRecord>,
    ) -> Result<u64, RelayError>;

    /// Cancels the session.
    async fn cancel_session(&self, session_id: &str) -> Result<(), RelayError>;

    /// Submits the reveal material and returns the signed attestation.
    async fn finalise_session(
        &self,
        session_id: &str,
        reveal_blocks: Vec<RevealBlock>,
    ) -> Result<Attestation, RelayError>;
}

/// Structured relay error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RelayErrorCode {
    /// The session was closed, e.g. because the server closed the connection.
    SessionClosed,
    /// The call was cancelled by the caller.
    Cancelled,
    /// The request was malformed.
    InvalidArgument,
    /// The relay could not be reached.
    Unavailable,
    /// The relay refused the request, e.g. rejected reveal material.
    Rejected,
    /// Any other failure.
    Internal,
}

impl fmt::Display for RelayErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayErrorCode::SessionClosed => write!(f, "session closed"),
            RelayErrorCode::Cancelled => write!(f, "cancelled"),
            RelayErrorCode::InvalidArgument => write!(f, "invalid argument"),
            RelayErrorCode::Unavailable => write!(f, "unavailable"),
            RelayErrorCode::Rejected => write!(f, "rejected"),
            RelayErrorCode::Internal => write!(f, "internal"),
        }
    }
}

/// Error returned by a [`Relay`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("relay error ({code}): {message}")]
pub struct RelayError {
    code: RelayErrorCode,
    message: String,
}

impl RelayError {
    /// Creates a new relay error.
    pub fn new(code: RelayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn code(&self) -> RelayErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if the session was closed by the relay.
    pub fn is_session_closed(&self) -> bool {
        self.code == RelayErrorCode::SessionClosed
    }

    /// Returns `true` if the call was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.code == RelayErrorCode::Cancelled
    }
}
