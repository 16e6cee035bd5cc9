//! TLS engine capability.
//!
//! The prover does not implement TLS itself. It drives a [`TlsEngine`] which
//! owns all cryptographic state, and is responsible for moving records between
//! the engine and the relay. Every engine call returns the records the engine
//! wants sent, which the prover pushes, in order, before making the next call.

use std::error::Error;

use async_trait::async_trait;
use claimtls_core::{Plaintext, RawRecord, TlsVersion};

use crate::ProverError;

/// Connection parameters negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsMetadata {
    /// The negotiated protocol version.
    pub version: TlsVersion,
    /// The negotiated cipher suite, as its IANA code point.
    pub cipher_suite: u16,
}

/// A preshared key for session resumption.
#[derive(Clone)]
pub struct Psk {
    /// Ticket identity presented to the server.
    pub identity: Vec<u8>,
    /// Resumption secret derived from the ticket.
    pub secret: Vec<u8>,
}

opaque_debug::implement!(Psk);

/// A record produced by the engine for sending.
#[derive(Debug, Clone)]
pub struct SealedRecord {
    /// The record as it goes on the wire.
    pub record: RawRecord,
    /// The plaintext sealed into the record.
    pub plaintext: Plaintext,
}

/// Result of handing a received record to the engine.
#[derive(Debug, Default)]
pub struct EngineOutput {
    /// Plaintext of the received record, if it could be decrypted.
    pub plaintext: Option<Plaintext>,
    /// Application data delivered by the record.
    pub application_data: Option<Vec<u8>>,
    /// Session ticket delivered by the record.
    pub session_ticket: Option<Vec<u8>>,
    /// Records to send in response, in order.
    pub outgoing: Vec<SealedRecord>,
}

/// TLS client state machine.
///
/// The engine is not re-entrant. Calls are made one at a time and the
/// records returned by a call are sent before the next call is made.
#[async_trait]
pub trait TlsEngine: Send {
    /// Starts the handshake, returning the records to send.
    async fn start_handshake(
        &mut self,
        psk: Option<Psk>,
    ) -> Result<Vec<SealedRecord>, TlsEngineError>;

    /// Processes a record received from the server.
    async fn handle_received(&mut self, record: &RawRecord) -> Result<EngineOutput, TlsEngineError>;

    /// Seals application data into records.
    async fn write(&mut self, data: &[u8]) -> Result<Vec<SealedRecord>, TlsEngineError>;

    /// Rotates the client traffic keys, returning the records announcing the
    /// update.
    async fn update_traffic_keys(&mut self) -> Result<Vec<SealedRecord>, TlsEngineError>;

    /// Returns the negotiated parameters once the server hello was processed.
    fn metadata(&self) -> Option<TlsMetadata>;

    /// Returns `true` once the handshake has completed.
    fn is_handshake_done(&self) -> bool;

    /// Derives a preshared key from a session ticket.
    fn psk_from_ticket(&self, ticket: &[u8]) -> Result<Psk, TlsEngineError>;

    /// Ends the session, releasing all resources.
    async fn end(&mut self, error: Option<&ProverError>);
}

/// Opens a direct connection to the server, bypassing the relay.
///
/// Used to obtain a session ticket for resumption before the relayed session
/// starts.
#[async_trait]
pub trait SideConnection: Send + Sync {
    /// Performs a handshake with the server and returns the first session
    /// ticket it issues.
    async fn fetch_session_ticket(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>>;
}

/// Error returned by a [`TlsEngine`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlsEngineError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("handshake failure: {0}")]
    Handshake(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("decryption error: {0}")]
    Decryption(String),
    #[error("received alert: {0}")]
    Alert(String),
    #[error("internal error: {0}")]
    Internal(String),
}
