//! Session orchestrator.

use std::sync::Arc;

use claimtls_core::{policy, Attestation, RedactedSlice, ResponseRedactor, WriteMode};
use tracing::{debug, info_span, instrument, warn, Span};

use crate::{
    channel::{RemoteSessionChannel, SessionHandle},
    config::ProverConfig,
    engine::{Psk, SideConnection, TlsEngine, TlsMetadata},
    progress::{ProgressCallback, ProofProgress, ProofTimer},
    relay::Relay,
    response::{HttpResponseParser, ResponseParser},
    reveal::{PrepareContext, RevealPreparer},
    session::Session,
    state::SessionState,
    Progress, ProverError,
};

/// A request built by a provider.
#[derive(Clone, Default)]
pub struct ProviderRequest {
    /// The raw request bytes.
    pub data: Vec<u8>,
    /// Secret slices inside `data`, which must never reach the witness.
    pub redactions: Vec<RedactedSlice>,
}

opaque_debug::implement!(ProviderRequest);

impl ProviderRequest {
    /// Creates a new request without secret slices.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            redactions: Vec::new(),
        }
    }

    /// Marks `slice` of the request as secret.
    pub fn redact(mut self, slice: RedactedSlice) -> Self {
        self.redactions.push(slice);
        self
    }
}

/// Drives a single remote-TLS session and obtains an attestation for it.
///
/// A prover runs exactly one session. The session goes through the states of
/// [`SessionState`], reporting [`Progress`] along the way, and can be cancelled
/// from any task through its [`SessionHandle`] until it starts finalizing.
pub struct Prover {
    config: ProverConfig,
    span: Span,
    state: SessionState,
    handle: SessionHandle,
    relay: Arc<dyn Relay>,
    engine: Option<Box<dyn TlsEngine>>,
    preparer: Box<dyn RevealPreparer>,
    parser: Option<Box<dyn ResponseParser>>,
    redactor: Option<Box<dyn ResponseRedactor>>,
    side_connection: Option<Box<dyn SideConnection>>,
    progress: Option<ProgressCallback>,
}

opaque_debug::implement!(Prover);

impl Prover {
    /// Creates a new prover.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the prover.
    /// * `relay` - The witness relay.
    /// * `engine` - The TLS engine for the session.
    /// * `preparer` - Produces reveal material at finalization.
    pub fn new(
        config: ProverConfig,
        relay: Arc<dyn Relay>,
        engine: Box<dyn TlsEngine>,
        preparer: Box<dyn RevealPreparer>,
    ) -> Self {
        let span = info_span!("prover", host = %config.host());
        Self {
            config,
            span,
            state: SessionState::Idle,
            handle: SessionHandle::new(),
            relay,
            engine: Some(engine),
            preparer,
            parser: None,
            redactor: None,
            side_connection: None,
            progress: None,
        }
    }

    /// Sets the progress callback.
    pub fn with_progress(mut self, callback: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Sets the function selecting which parts of the response are disclosed.
    ///
    /// Without a redactor the whole response is disclosed.
    pub fn with_response_redactor(mut self, redactor: impl ResponseRedactor + 'static) -> Self {
        self.redactor = Some(Box::new(redactor));
        self
    }

    /// Sets the parser detecting when the response is complete.
    ///
    /// Defaults to [`HttpResponseParser`].
    pub fn with_response_parser(mut self, parser: impl ResponseParser + 'static) -> Self {
        self.parser = Some(Box::new(parser));
        self
    }

    /// Sets the direct connection used to establish a preshared key out of
    /// band.
    pub fn with_side_connection(mut self, side_connection: impl SideConnection + 'static) -> Self {
        self.side_connection = Some(Box::new(side_connection));
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ProverConfig {
        &self.config
    }

    /// Returns a handle to the session.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Returns the state of the session.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session and returns the attestation.
    ///
    /// # Arguments
    ///
    /// * `request` - The request to send to the server.
    #[instrument(parent = &self.span, level = "debug", skip_all, err)]
    pub async fn prove(&mut self, request: ProviderRequest) -> Result<Attestation, ProverError> {
        if self.state != SessionState::Idle {
            return Err(ProverError::state().with_msg(format!(
                "prover can only run one session, current state is {}",
                self.state
            )));
        }

        let engine = self
            .engine
            .take()
            .ok_or_else(|| ProverError::state().with_msg("engine was already consumed"))?;
        let parser = self
            .parser
            .take()
            .unwrap_or_else(|| Box::new(HttpResponseParser::new()));
        let channel = RemoteSessionChannel::new(self.relay.clone(), self.handle.clone());

        let mut session = Session::new(engine, channel, parser);

        match self.run(&mut session, &request).await {
            Ok(attestation) => {
                session.end(None).await;
                self.set_state(SessionState::Done);

                Ok(attestation)
            }
            Err(err) => {
                self.teardown(&mut session, &err).await;

                Err(err)
            }
        }
    }

    async fn run(
        &mut self,
        session: &mut Session,
        request: &ProviderRequest,
    ) -> Result<Attestation, ProverError> {
        self.set_state(SessionState::Connecting);
        self.report(Progress::Connecting);

        if self.handle.is_cancelled() {
            return Err(ProverError::cancelled());
        }

        let psk = if self.config.psk_out_of_band() {
            Some(self.establish_psk(session).await?)
        } else {
            None
        };

        session
            .channel_mut()
            .initialise(&self.config.descriptor())
            .await?;
        session.open_stream().await?;

        self.set_state(SessionState::Handshaking);
        let metadata = session
            .handshake(psk, self.config.handshake_timeout())
            .await?;
        let mode = WriteMode::select(metadata.version, self.config.write_mode());

        self.set_state(SessionState::SendingRequest);
        self.report(Progress::SendingRequestData);
        session
            .write_request(mode, metadata.version, &request.data, &request.redactions)
            .await?;

        self.set_state(SessionState::AwaitingResponse);
        self.report(Progress::WaitingForResponse);
        session.await_response(self.config.response_grace()).await?;

        self.set_state(SessionState::Finalizing);
        session.close_stream();

        self.finalize(session, metadata, mode).await
    }

    async fn establish_psk(&mut self, session: &Session) -> Result<Psk, ProverError> {
        let side_connection = self.side_connection.as_ref().ok_or_else(|| {
            ProverError::connection_setup()
                .with_msg("out of band preshared key requested without a side connection")
        })?;

        let ticket = side_connection
            .fetch_session_ticket(self.config.host(), self.config.port())
            .await
            .map_err(|e| {
                ProverError::connection_setup()
                    .with_msg("failed to obtain a session ticket")
                    .with_source(e)
            })?;

        debug!(len = ticket.len(), "obtained session ticket out of band");

        session
            .engine()
            .psk_from_ticket(&ticket)
            .map_err(|e| ProverError::connection_setup().with_source(e))
    }

    async fn finalize(
        &mut self,
        session: &mut Session,
        metadata: TlsMetadata,
        mode: WriteMode,
    ) -> Result<Attestation, ProverError> {
        let version = metadata.version;

        let handshake = policy::disclose_handshake(session.transcript_mut(), mode);
        let response =
            policy::redact_response(session.transcript_mut(), version, self.redactor.as_deref())?;
        let records = session.transcript().marked();

        debug!(
            handshake,
            response,
            marked = records.len(),
            total = session.transcript().len(),
            tickets = session.tickets().len(),
            "marked transcript for disclosure"
        );

        let progress = self.progress.as_ref();
        report(
            progress,
            Progress::GeneratingZkProofs(ProofProgress {
                done: 0,
                total: records.len(),
                time_left: None,
            }),
        );

        let timer = ProofTimer::start();
        let on_progress = |done: usize, total: usize| {
            report(progress, Progress::GeneratingZkProofs(timer.progress(done, total)));
        };

        let ctx = PrepareContext {
            version,
            cipher_suite: metadata.cipher_suite,
        };
        let blocks = self
            .preparer
            .prepare(&records, &ctx, &on_progress)
            .await
            .map_err(|e| {
                ProverError::finalize()
                    .with_msg("failed to prepare reveal material")
                    .with_source(e)
            })?;

        debug!(blocks = blocks.len(), "prepared reveal material");

        report(progress, Progress::WaitingForVerification);

        session.channel().finalize(blocks).await
    }

    async fn teardown(&mut self, session: &mut Session, err: &ProverError) {
        let cancel = err.is_cancelled() || self.state.is_cancellable();

        if cancel && session.channel().is_initialised() {
            if let Err(e) = session.channel_mut().cancel().await {
                warn!(error = %e, "failed to cancel session");
            }
        }

        if err.is_cancelled() {
            session.end(None).await;
            self.set_state(SessionState::Cancelled);
        } else {
            session.end(Some(err)).await;
            self.set_state(SessionState::Failed);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        debug!(from = %self.state, to = %state, "session state changed");
        self.state = state;
    }

    fn report(&self, progress: Progress) {
        report(self.progress.as_ref(), progress);
    }
}

fn report(callback: Option<&ProgressCallback>, progress: Progress) {
    if let Some(callback) = callback {
        callback(&progress);
    }
}
