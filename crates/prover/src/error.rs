use std::{error::Error, fmt};

use claimtls_core::{PolicyError, SliceError, TranscriptError};

use crate::{engine::TlsEngineError, relay::RelayError, response::ResponseError};

/// Error for [`Prover`](crate::Prover).
///
/// The [`kind`](Self::kind) identifies the stage or concern which failed, e.g.
/// [`ErrorKind::Handshake`]. The [`msg`](Self::msg) method returns additional
/// context if available.
#[derive(Debug, thiserror::Error)]
pub struct ProverError {
    kind: ErrorKind,
    msg: Option<String>,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

/// Kind of [`ProverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Pre-establishing the preshared key out of band failed.
    ConnectionSetup,
    /// The TLS handshake did not complete.
    Handshake,
    /// The relay responded in an unexpected way.
    RelayProtocol,
    /// The pull stream ended with an error not caused by cancellation.
    StreamAbnormalEnd,
    /// A write or response could not be redacted as requested.
    RedactionPolicy,
    /// Reveal material could not be produced or was rejected.
    Finalize,
    /// The TLS engine failed after the handshake.
    Tls,
    /// The server response could not be parsed.
    Response,
    /// An operation was called in the wrong session state.
    InvalidState,
    /// The session was cancelled by the caller.
    Cancelled,
    /// Invalid configuration.
    Config,
}

impl ProverError {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: None,
            source: None,
        }
    }

    pub(crate) fn connection_setup() -> Self {
        Self::new(ErrorKind::ConnectionSetup)
    }

    pub(crate) fn handshake() -> Self {
        Self::new(ErrorKind::Handshake)
    }

    pub(crate) fn relay_protocol() -> Self {
        Self::new(ErrorKind::RelayProtocol)
    }

    pub(crate) fn stream() -> Self {
        Self::new(ErrorKind::StreamAbnormalEnd)
    }

    pub(crate) fn redaction() -> Self {
        Self::new(ErrorKind::RedactionPolicy)
    }

    pub(crate) fn finalize() -> Self {
        Self::new(ErrorKind::Finalize)
    }

    pub(crate) fn tls() -> Self {
        Self::new(ErrorKind::Tls)
    }

    pub(crate) fn response() -> Self {
        Self::new(ErrorKind::Response)
    }

    pub(crate) fn state() -> Self {
        Self::new(ErrorKind::InvalidState)
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    pub(crate) fn config() -> Self {
        Self::new(ErrorKind::Config)
    }

    pub(crate) fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub(crate) fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        self.source = Some(source.into());
        self
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message if available.
    pub fn msg(&self) -> Option<&str> {
        self.msg.as_deref()
    }

    /// Returns `true` if the session was cancelled by the caller.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Returns `true` if the error was caused by the relay closing the session.
    pub(crate) fn is_session_closed(&self) -> bool {
        self.source
            .as_ref()
            .and_then(|source| source.downcast_ref::<RelayError>())
            .is_some_and(RelayError::is_session_closed)
    }
}

impl fmt::Display for ProverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("prover error: ")?;

        match self.kind {
            ErrorKind::ConnectionSetup => f.write_str("connection setup error")?,
            ErrorKind::Handshake => f.write_str("handshake error")?,
            ErrorKind::RelayProtocol => f.write_str("relay protocol error")?,
            ErrorKind::StreamAbnormalEnd => f.write_str("stream ended abnormally")?,
            ErrorKind::RedactionPolicy => f.write_str("redaction policy error")?,
            ErrorKind::Finalize => f.write_str("finalize error")?,
            ErrorKind::Tls => f.write_str("tls error")?,
            ErrorKind::Response => f.write_str("response error")?,
            ErrorKind::InvalidState => f.write_str("invalid state")?,
            ErrorKind::Cancelled => f.write_str("cancelled")?,
            ErrorKind::Config => f.write_str("config error")?,
        }

        if let Some(msg) = &self.msg {
            write!(f, ": {msg}")?;
        }

        if let Some(source) = &self.source {
            write!(f, " caused by: {source}")?;
        }

        Ok(())
    }
}

impl From<TranscriptError> for ProverError {
    fn from(e: TranscriptError) -> Self {
        Self::relay_protocol()
            .with_msg("relay assigned an out of order index")
            .with_source(e)
    }
}

impl From<PolicyError> for ProverError {
    fn from(e: PolicyError) -> Self {
        Self::redaction().with_source(e)
    }
}

impl From<SliceError> for ProverError {
    fn from(e: SliceError) -> Self {
        Self::redaction().with_source(e)
    }
}

impl From<TlsEngineError> for ProverError {
    fn from(e: TlsEngineError) -> Self {
        Self::tls().with_source(e)
    }
}

impl From<ResponseError> for ProverError {
    fn from(e: ResponseError) -> Self {
        Self::response().with_source(e)
    }
}

impl From<RelayError> for ProverError {
    fn from(e: RelayError) -> Self {
        Self::relay_protocol().with_source(e)
    }
}

impl From<crate::config::ProverConfigBuilderError> for ProverError {
    fn from(e: crate::config::ProverConfigBuilderError) -> Self {
        Self::config().with_source(e)
    }
}
