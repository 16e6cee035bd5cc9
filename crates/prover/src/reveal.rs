//! Reveal preparer capability.

use std::error::Error;

use async_trait::async_trait;
use claimtls_core::{MarkedRecord, RevealBlock, TlsVersion};

/// Session parameters the reveal material depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareContext {
    /// The negotiated protocol version.
    pub version: TlsVersion,
    /// The negotiated cipher suite, as its IANA code point.
    pub cipher_suite: u16,
}

/// Turns marked transcript records into reveal material.
///
/// Producing zero-knowledge proofs dominates the cost of finalizing a
/// session, so implementations report progress through `on_progress` with the
/// number of finished and total blocks.
#[async_trait]
pub trait RevealPreparer: Send + Sync {
    /// Prepares reveal blocks for `records`.
    async fn prepare(
        &self,
        records: &[MarkedRecord],
        ctx: &PrepareContext,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<Vec<RevealBlock>, Box<dyn Error + Send + Sync>>;
}
