//! Channel to a relayed session.

use std::sync::{Arc, OnceLock};

use claimtls_core::{Attestation, RawRecord, RevealBlock};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    relay::{PullStream, Relay, SessionDescriptor},
    ProverError, VERSION,
};

/// Handle to a session.
///
/// Carries the session id once the session has been initialised and can be
/// used from any task to cancel the session.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    id: Arc<OnceLock<String>>,
    token: CancellationToken,
}

impl SessionHandle {
    /// Creates a new handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session id, if the session has been initialised.
    pub fn session_id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    /// Requests cancellation of the session.
    ///
    /// This ends the pull stream. The prover notices the cancellation, asks
    /// the relay to cancel the session and tears down the TLS session. Writes
    /// already in flight are completed, no new writes are started.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Bidirectional channel to the witness relay for a single session.
pub struct RemoteSessionChannel {
    relay: Arc<dyn Relay>,
    handle: SessionHandle,
    session_id: Option<String>,
    cancelled: bool,
}

opaque_debug::implement!(RemoteSessionChannel);

impl RemoteSessionChannel {
    /// Creates a new channel.
    ///
    /// # Arguments
    ///
    /// * `relay` - The relay to talk to.
    /// * `handle` - The handle controlling the session.
    pub fn new(relay: Arc<dyn Relay>, handle: SessionHandle) -> Self {
        Self {
            relay,
            handle,
            session_id: None,
            cancelled: false,
        }
    }

    /// Returns the session handle.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Returns `true` once the session has been initialised.
    pub fn is_initialised(&self) -> bool {
        self.session_id.is_some()
    }

    /// Opens the session, returning its id.
    pub async fn initialise(
        &mut self,
        descriptor: &SessionDescriptor,
    ) -> Result<String, ProverError> {
        if self.session_id.is_some() {
            return Err(ProverError::state().with_msg("session is already initialised"));
        }

        let id = self
            .relay
            .initialise_session(descriptor)
            .await
            .map_err(ProverError::from)?;

        debug!(session_id = %id, host = %descriptor.host, "initialised session");

        // A handle is only ever bound to one session.
        let _ = self.handle.id.set(id.clone());
        self.session_id = Some(id.clone());

        Ok(id)
    }

    /// Returns the live stream of records sent by the server.
    ///
    /// The stream ends once the session is cancelled through the handle.
    pub async fn pull(&self) -> Result<PullStream, ProverError> {
        let id = self.session_id()?;

        let stream = self
            .relay
            .pull_from_session(id, &VERSION)
            .await
            .map_err(ProverError::from)?;

        Ok(stream
            .take_until(self.handle.token.clone().cancelled_owned())
            .boxed())
    }

    /// Pushes a record to the server, returning the relay-assigned index.
    pub async fn push(&self, record: RawRecord) -> Result<u64, ProverError> {
        let id = self.session_id()?;
        if self.cancelled {
            return Err(ProverError::state().with_msg("session was cancelled"));
        }
        if self.handle.is_cancelled() {
            return Err(ProverError::cancelled());
        }

        let len = record.content.len();
        let index = self
            .relay
            .push_to_session(id, vec![record])
            .await
            .map_err(ProverError::from)?;

        trace!(index, len, "pushed record");

        Ok(index)
    }

    /// Cancels the session.
    ///
    /// Cancelling an already cancelled session does nothing.
    pub async fn cancel(&mut self) -> Result<(), ProverError> {
        let id = self.session_id()?.to_string();
        if self.cancelled {
            return Ok(());
        }

        self.cancelled = true;
        self.handle.cancel();

        self.relay
            .cancel_session(&id)
            .await
            .map_err(ProverError::from)?;

        debug!(session_id = %id, "cancelled session");

        Ok(())
    }

    /// Submits the reveal material and returns the attestation.
    pub async fn finalize(
        &self,
        reveal_blocks: Vec<RevealBlock>,
    ) -> Result<Attestation, ProverError> {
        let id = self.session_id()?;
        if self.cancelled {
            return Err(ProverError::state().with_msg("session was cancelled"));
        }

        self.relay
            .finalise_session(id, reveal_blocks)
            .await
            .map_err(|e| {
                ProverError::finalize()
                    .with_msg("relay rejected finalization")
                    .with_source(e)
            })
    }

    fn session_id(&self) -> Result<&str, ProverError> {
        self.session_id
            .as_deref()
            .ok_or_else(|| ProverError::state().with_msg("session is not initialised"))
    }
}
