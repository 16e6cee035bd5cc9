//! Remote-TLS claim prover.
//!
//! The prover runs a TLS session with a target server through a witness which
//! relays the encrypted records. Once the server has responded, it decides
//! which records the witness gets to see, and how, and exchanges the resulting
//! reveal material for a signed attestation.
//!
//! TLS itself, the witness RPC and the production of reveal material are
//! capabilities supplied by the caller, see [`TlsEngine`], [`Relay`] and
//! [`RevealPreparer`].

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

mod channel;
mod config;
mod engine;
mod error;
mod progress;
mod prover;
mod relay;
mod response;
mod reveal;
mod session;
pub mod state;

pub use channel::{RemoteSessionChannel, SessionHandle};
pub use config::{ProverConfig, ProverConfigBuilder, ProverConfigBuilderError};
pub use engine::{
    EngineOutput, Psk, SealedRecord, SideConnection, TlsEngine, TlsEngineError, TlsMetadata,
};
pub use error::{ErrorKind, ProverError};
pub use progress::{Progress, ProgressCallback, ProofProgress};
pub use prover::{Prover, ProviderRequest};
pub use relay::{PullStream, PulledRecord, Relay, RelayError, RelayErrorCode, SessionDescriptor};
pub use response::{HttpResponseParser, ResponseError, ResponseParser};
pub use reveal::{PrepareContext, RevealPreparer};

pub use claimtls_core::{
    Attestation, MarkedRecord, RedactedSlice, RevealBlock, RevealDecision, TlsVersion, WriteMode,
};

use std::sync::LazyLock;

use semver::Version;

// Package version, sent to the relay when pulling a session.
pub(crate) static VERSION: LazyLock<Version> = LazyLock::new(|| {
    Version::parse(env!("CARGO_PKG_VERSION")).expect("cargo pkg version should be a valid semver")
});
