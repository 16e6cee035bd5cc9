//! Progress reporting.

use std::{fmt, sync::Arc, time::Duration};

use serde::Serialize;
use web_time::Instant;

/// Progress of a session, reported at each stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Progress {
    /// Opening the relayed session.
    Connecting,
    /// Writing the request to the server.
    SendingRequestData,
    /// Waiting for the server to respond.
    WaitingForResponse,
    /// Producing reveal material.
    GeneratingZkProofs(ProofProgress),
    /// Waiting for the witness to verify the reveal material.
    WaitingForVerification,
}

impl Progress {
    /// Returns the name of the step.
    pub fn name(&self) -> &'static str {
        match self {
            Progress::Connecting => "connecting",
            Progress::SendingRequestData => "sending-request-data",
            Progress::WaitingForResponse => "waiting-for-response",
            Progress::GeneratingZkProofs(_) => "generating-zk-proofs",
            Progress::WaitingForVerification => "waiting-for-verification",
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::GeneratingZkProofs(proof) => {
                write!(f, "{} ({}/{})", self.name(), proof.done, proof.total)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Progress of reveal material generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofProgress {
    /// Number of finished blocks.
    pub done: usize,
    /// Total number of blocks.
    pub total: usize,
    /// Extrapolated time until all blocks are finished.
    pub time_left: Option<Duration>,
}

/// Callback receiving progress updates.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Tracks the time spent generating reveal material.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProofTimer {
    started: Instant,
}

impl ProofTimer {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub(crate) fn progress(&self, done: usize, total: usize) -> ProofProgress {
        ProofProgress {
            done,
            total,
            time_left: extrapolate(self.started.elapsed(), done, total),
        }
    }
}

// Assumes the remaining blocks take as long as the finished ones did.
fn extrapolate(elapsed: Duration, done: usize, total: usize) -> Option<Duration> {
    if done == 0 {
        return None;
    }

    let remaining = u32::try_from(total.saturating_sub(done)).unwrap_or(u32::MAX);
    let done = u32::try_from(done).unwrap_or(u32::MAX);
    Some(elapsed.checked_div(done)?.saturating_mul(remaining))
}
