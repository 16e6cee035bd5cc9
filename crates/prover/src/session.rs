//! Session context.
//!
//! Owns everything a single session touches: the TLS engine, the channel to the
//! relay, the live pull stream and the transcript. Server records are only
//! pulled while the session is not writing, so engine calls never interleave.

use std::time::Duration;

use claimtls_core::{
    policy, RedactedSlice, RevealDecision, Sender, TlsRecord, TlsVersion, Transcript, WriteChunk,
    WriteMode,
};
use futures::{FutureExt, StreamExt};
use tracing::{debug, trace, warn};

use crate::{
    channel::RemoteSessionChannel,
    engine::{Psk, SealedRecord, TlsEngine, TlsMetadata},
    relay::{PullStream, PulledRecord, RelayError},
    response::ResponseParser,
    ProverError,
};

/// How the pull stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    /// The relay closed the stream.
    Closed,
    /// The session was cancelled through its handle.
    Cancelled,
    /// The stream failed.
    Error(RelayError),
}

pub(crate) struct Session {
    engine: Box<dyn TlsEngine>,
    channel: RemoteSessionChannel,
    parser: Box<dyn ResponseParser>,
    transcript: Transcript,
    stream: Option<PullStream>,
    stream_end: Option<StreamEnd>,
    ready: bool,
    tickets: Vec<Vec<u8>>,
}

opaque_debug::implement!(Session);

impl Session {
    pub(crate) fn new(
        engine: Box<dyn TlsEngine>,
        channel: RemoteSessionChannel,
        parser: Box<dyn ResponseParser>,
    ) -> Self {
        Self {
            engine,
            channel,
            parser,
            transcript: Transcript::new(),
            stream: None,
            stream_end: None,
            ready: false,
            tickets: Vec::new(),
        }
    }

    pub(crate) fn channel(&self) -> &RemoteSessionChannel {
        &self.channel
    }

    pub(crate) fn channel_mut(&mut self) -> &mut RemoteSessionChannel {
        &mut self.channel
    }

    pub(crate) fn engine(&self) -> &dyn TlsEngine {
        self.engine.as_ref()
    }

    pub(crate) fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub(crate) fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub(crate) fn tickets(&self) -> &[Vec<u8>] {
        &self.tickets
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.channel.handle().is_cancelled() || self.stream_end == Some(StreamEnd::Cancelled)
    }

    /// Attaches the pull stream.
    pub(crate) async fn open_stream(&mut self) -> Result<(), ProverError> {
        self.stream = Some(self.channel.pull().await?);
        Ok(())
    }

    /// Waits for the session to become ready, then performs the handshake.
    ///
    /// Fails if the handshake does not complete within `timeout`.
    pub(crate) async fn handshake(
        &mut self,
        psk: Option<Psk>,
        timeout: Duration,
    ) -> Result<TlsMetadata, ProverError> {
        match tokio::time::timeout(timeout, self.handshake_inner(psk)).await {
            Ok(res) => res,
            Err(_) => Err(ProverError::handshake()
                .with_msg(format!("handshake did not complete within {timeout:?}"))),
        }
    }

    async fn handshake_inner(&mut self, psk: Option<Psk>) -> Result<TlsMetadata, ProverError> {
        while !self.ready {
            if !self.pump().await? {
                return Err(self.end_error(
                    ProverError::handshake().with_msg("stream ended before the session was ready"),
                ));
            }
        }

        let records = self
            .engine
            .start_handshake(psk)
            .await
            .map_err(|e| ProverError::handshake().with_source(e))?;
        self.send_all(records).await?;

        while !self.engine.is_handshake_done() {
            if !self.pump().await? {
                return Err(self.end_error(
                    ProverError::handshake()
                        .with_msg("stream ended before the handshake completed"),
                ));
            }
        }

        let metadata = self.engine.metadata().ok_or_else(|| {
            ProverError::handshake().with_msg("engine did not report the negotiated parameters")
        })?;

        debug!(
            version = %metadata.version,
            cipher_suite = metadata.cipher_suite,
            "handshake complete"
        );

        Ok(metadata)
    }

    /// Writes a request, keeping `slices` from the witness.
    ///
    /// If the relay reports the session closed mid-write, waits for the pull
    /// stream to end instead of failing. The server may have closed the
    /// connection deliberately.
    pub(crate) async fn write_request(
        &mut self,
        mode: WriteMode,
        version: TlsVersion,
        data: &[u8],
        slices: &[RedactedSlice],
    ) -> Result<(), ProverError> {
        let plan = policy::plan_write(mode, data, slices)?;

        debug!(mode = ?mode, chunks = plan.len(), len = data.len(), "writing request");

        for chunk in plan {
            if self.is_cancelled() {
                return Err(ProverError::cancelled());
            }

            match self.write_chunk(chunk, version).await {
                Ok(()) => {}
                Err(e) if e.is_session_closed() => {
                    warn!("relay closed the session mid-write, waiting for the stream to end");
                    self.await_stream_end().await?;
                    return match self.stream_end.clone() {
                        Some(StreamEnd::Error(e)) => Err(ProverError::stream().with_source(e)),
                        Some(StreamEnd::Cancelled) => Err(ProverError::cancelled()),
                        _ => Ok(()),
                    };
                }
                Err(e) => return Err(e),
            }

            self.pump_ready().await?;
        }

        Ok(())
    }

    async fn write_chunk(
        &mut self,
        chunk: WriteChunk,
        version: TlsVersion,
    ) -> Result<(), ProverError> {
        match chunk {
            WriteChunk::Disclosed(data) => {
                let records = self.engine.write(&data).await?;
                for record in records {
                    self.send(record).await?;
                    self.mark_last(RevealDecision::Complete);
                }
            }
            WriteChunk::Secret(data) => {
                let rotate = self.engine.update_traffic_keys().await?;
                self.send_all(rotate).await?;

                let records = self.engine.write(&data).await?;
                self.send_all(records).await?;

                let rotate = self.engine.update_traffic_keys().await?;
                self.send_all(rotate).await?;
            }
            WriteChunk::Redacted { plaintext, redacted } => {
                let records = self.engine.write(&plaintext).await?;

                let written: usize = records
                    .iter()
                    .map(|r| version.application_bytes(&r.plaintext.data).len())
                    .sum();
                if written != redacted.len() {
                    return Err(ProverError::redaction().with_msg(format!(
                        "engine sealed {written} bytes but {} were planned",
                        redacted.len()
                    )));
                }

                let mut offset = 0;
                for record in records {
                    let len = version.application_bytes(&record.plaintext.data).len();
                    let window = redacted[offset..offset + len].to_vec();
                    offset += len;

                    self.send(record).await?;
                    self.mark_last(RevealDecision::Zk(window));
                }
            }
        }

        Ok(())
    }

    /// Processes server records until the response is complete, then keeps
    /// processing for `grace` so in-flight records settle.
    pub(crate) async fn await_response(&mut self, grace: Duration) -> Result<(), ProverError> {
        while !self.parser.is_complete() {
            if !self.pump().await? {
                self.parser.on_close();
                if self.parser.is_complete() {
                    break;
                }

                return Err(self.end_error(
                    ProverError::stream().with_msg("stream ended before the response completed"),
                ));
            }
        }

        debug!("response complete");

        let deadline = tokio::time::Instant::now() + grace;
        while let Some(stream) = self.stream.as_mut() {
            let Ok(item) = tokio::time::timeout_at(deadline, stream.next()).await else {
                break;
            };

            if !self.handle_item(item).await? {
                break;
            }
        }

        match &self.stream_end {
            Some(StreamEnd::Cancelled) => Err(ProverError::cancelled()),
            Some(StreamEnd::Error(e)) => Err(ProverError::stream().with_source(e.clone())),
            _ => Ok(()),
        }
    }

    /// Processes server records until the pull stream ends.
    pub(crate) async fn await_stream_end(&mut self) -> Result<(), ProverError> {
        while self.pump().await? {}
        Ok(())
    }

    /// Stops pulling server records.
    pub(crate) fn close_stream(&mut self) {
        self.stream = None;
    }

    /// Ends the TLS session.
    pub(crate) async fn end(&mut self, error: Option<&ProverError>) {
        self.stream = None;
        self.engine.end(error).await;
    }

    /// Processes the next server record.
    ///
    /// Returns `false` once the pull stream has ended.
    async fn pump(&mut self) -> Result<bool, ProverError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };

        let item = stream.next().await;
        self.handle_item(item).await
    }

    /// Processes the server records which are available without waiting.
    async fn pump_ready(&mut self) -> Result<(), ProverError> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(());
            };

            let Some(item) = stream.next().now_or_never() else {
                return Ok(());
            };

            if !self.handle_item(item).await? {
                return Ok(());
            }
        }
    }

    async fn handle_item(
        &mut self,
        item: Option<Result<PulledRecord, RelayError>>,
    ) -> Result<bool, ProverError> {
        match item {
            Some(Ok(pulled)) => {
                self.handle_record(pulled).await?;
                Ok(true)
            }
            Some(Err(e)) => {
                let end = if e.is_cancelled() && self.channel.handle().is_cancelled() {
                    StreamEnd::Cancelled
                } else {
                    StreamEnd::Error(e)
                };
                self.set_end(end);
                Ok(false)
            }
            None => {
                let end = if self.channel.handle().is_cancelled() {
                    StreamEnd::Cancelled
                } else {
                    StreamEnd::Closed
                };
                self.set_end(end);
                Ok(false)
            }
        }
    }

    fn set_end(&mut self, end: StreamEnd) {
        match &end {
            StreamEnd::Error(e) => warn!(error = %e, "pull stream failed"),
            end => debug!(?end, "pull stream ended"),
        }

        self.stream = None;
        self.stream_end = Some(end);
    }

    async fn handle_record(&mut self, pulled: PulledRecord) -> Result<(), ProverError> {
        let PulledRecord { record, index } = pulled;

        if record.is_marker() {
            if !self.ready {
                debug!(index, "session ready");
                self.ready = true;
            }
            return Ok(());
        }

        trace!(index, len = record.content.len(), "received record");

        let output = self.engine.handle_received(&record).await.map_err(|e| {
            if self.engine.is_handshake_done() {
                ProverError::from(e)
            } else {
                ProverError::handshake().with_source(e)
            }
        })?;

        let mut server_record = TlsRecord::new(Sender::Server, index, record);
        if let Some(plaintext) = output.plaintext {
            server_record.set_plaintext(plaintext);
        }
        self.transcript.append(server_record)?;

        if let Some(data) = output.application_data {
            self.parser.on_data(&data)?;
        }

        if let Some(ticket) = output.session_ticket {
            self.tickets.push(ticket);
            debug!(count = self.tickets.len(), "captured session ticket");
        }

        match self.send_all(output.outgoing).await {
            // The relay ends the stream after closing the session.
            Err(e) if e.is_session_closed() => {
                warn!("relay closed the session, dropping outgoing records");
                Ok(())
            }
            res => res,
        }
    }

    /// Sends a record and appends it to the transcript, returning the
    /// relay-assigned index.
    async fn send(&mut self, sealed: SealedRecord) -> Result<u64, ProverError> {
        let SealedRecord { record, plaintext } = sealed;

        let index = self.channel.push(record.clone()).await?;
        self.transcript
            .append(TlsRecord::with_plaintext(Sender::Client, index, record, plaintext))?;

        Ok(index)
    }

    async fn send_all(&mut self, records: Vec<SealedRecord>) -> Result<(), ProverError> {
        for record in records {
            self.send(record).await?;
        }
        Ok(())
    }

    fn mark_last(&mut self, decision: RevealDecision) {
        if let Some(record) = self.transcript.last_by_sender_mut(Sender::Client) {
            record.set_reveal(decision);
        }
    }

    /// Replaces `fallback` with the reason the stream ended, if it was not
    /// closed cleanly.
    fn end_error(&self, fallback: ProverError) -> ProverError {
        match &self.stream_end {
            Some(StreamEnd::Cancelled) => ProverError::cancelled(),
            Some(StreamEnd::Error(e)) => ProverError::stream().with_source(e.clone()),
            _ => fallback,
        }
    }
}
