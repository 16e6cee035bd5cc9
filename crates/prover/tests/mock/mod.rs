//! In-memory relay, TLS engine and reveal preparer.
//!
//! Records are "encrypted" by xoring every byte with a constant. The server
//! lives inside the relay and answers the client hello with a server hello and
//! finished message, and the first application data record with the
//! configured response.

#![allow(dead_code)]

use std::{
    error::Error,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use claimtls_core::{
    Attestation, ContentType, MarkedRecord, Plaintext, RawRecord, RevealBlock, RevealDecision,
    RevealKind, TlsVersion,
};
use claimtls_prover::{
    EngineOutput, ErrorKind, PrepareContext, Prover, ProverConfig, ProverError, Psk, PulledRecord,
    Relay, RelayError, RelayErrorCode, RevealPreparer, SealedRecord, SessionDescriptor,
    SideConnection, TlsEngine, TlsEngineError, TlsMetadata,
};
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    StreamExt,
};
use semver::Version;

pub const SESSION_ID: &str = "session-1";
pub const REQUEST: &[u8] = b"GET /x HTTP/1.1\r\nAuthorization: secret123\r\n\r\n";
pub const SECRET: &[u8] = b"secret123";
pub const RESPONSE: &[&[u8]] = &[
    b"HTTP/1.1 200 OK\r\nContent-Length: 15\r\n\r\n",
    b"{\"balance\":100}",
];

const KEY: u8 = 0x5a;
const HANDSHAKE: u8 = 22;
const APPLICATION_DATA: u8 = 23;

pub fn seal(content_type: u8, data: &[u8]) -> RawRecord {
    let content: Vec<u8> = data.iter().map(|b| b ^ KEY).collect();
    let len = content.len() as u16;
    RawRecord::new(
        vec![content_type, 3, 3, (len >> 8) as u8, len as u8],
        content,
    )
}

pub fn open(record: &RawRecord) -> Vec<u8> {
    record.content.iter().map(|b| b ^ KEY).collect()
}

fn inner(version: TlsVersion, data: &[u8]) -> Vec<u8> {
    let mut inner = data.to_vec();
    if version == TlsVersion::V1_3 {
        inner.push(APPLICATION_DATA);
    }
    inner
}

/// Scripted relay behaviour.
#[derive(Debug, Clone)]
pub struct Behaviour {
    /// Send the ready marker as soon as the stream is pulled.
    pub send_marker: bool,
    /// Respond to the first application data record.
    pub respond: bool,
    /// Send a session ticket after the server finished message.
    pub ticket: bool,
    /// Fail the n-th push (1-based) with a closed session, then end the
    /// stream, with the given error if any.
    pub close_on_push: Option<(usize, Option<RelayError>)>,
    /// Fail the stream instead of answering the client hello.
    pub handshake_stream_error: Option<RelayError>,
    /// Reject the reveal blocks.
    pub reject_finalize: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            send_marker: true,
            respond: true,
            ticket: false,
            close_on_push: None,
            handshake_stream_error: None,
            reject_finalize: false,
        }
    }
}

type Item = Result<PulledRecord, RelayError>;

struct RelayState {
    version: TlsVersion,
    behaviour: Behaviour,
    next_index: u64,
    tx: Option<UnboundedSender<Item>>,
    rx: Option<UnboundedReceiver<Item>>,
    session: Option<String>,
    pull_version: Option<Version>,
    marker_index: Option<u64>,
    pushes: usize,
    pushed: Vec<(u64, RawRecord)>,
    responded: bool,
    cancelled: usize,
    finalized: Option<Vec<RevealBlock>>,
}

impl RelayState {
    fn next_index(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn emit(&mut self, item: Item) {
        if let Some(tx) = &self.tx {
            let _ = tx.unbounded_send(item);
        }
    }

    fn emit_record(&mut self, record: RawRecord) {
        let index = self.next_index();
        self.emit(Ok(PulledRecord { record, index }));
    }

    fn send_marker(&mut self) {
        let index = self.next_index();
        self.marker_index = Some(index);
        self.emit(Ok(PulledRecord {
            record: RawRecord::new(Vec::new(), Vec::new()),
            index,
        }));
    }

    fn serve(&mut self, record: &RawRecord) {
        let data = open(record);

        match record.header[0] {
            HANDSHAKE if data == b"client-hello" => {
                if let Some(err) = self.behaviour.handshake_stream_error.clone() {
                    self.emit(Err(err));
                    self.tx = None;
                    return;
                }

                self.emit_record(seal(HANDSHAKE, b"server-hello"));
                self.emit_record(seal(HANDSHAKE, b"server-finished"));
                if self.behaviour.ticket {
                    self.emit_record(seal(HANDSHAKE, b"ticket:resume-me"));
                }
            }
            APPLICATION_DATA if self.behaviour.respond && !self.responded => {
                self.responded = true;
                for part in RESPONSE {
                    let record = seal(APPLICATION_DATA, &inner(self.version, part));
                    self.emit_record(record);
                }
            }
            _ => {}
        }
    }
}

pub struct MockRelay {
    state: Mutex<RelayState>,
}

impl MockRelay {
    pub fn new(version: TlsVersion, behaviour: Behaviour) -> Self {
        let (tx, rx) = mpsc::unbounded();
        Self {
            state: Mutex::new(RelayState {
                version,
                behaviour,
                next_index: 0,
                tx: Some(tx),
                rx: Some(rx),
                session: None,
                pull_version: None,
                marker_index: None,
                pushes: 0,
                pushed: Vec::new(),
                responded: false,
                cancelled: 0,
                finalized: None,
            }),
        }
    }

    pub fn send_marker(&self) {
        self.state.lock().unwrap().send_marker();
    }

    pub fn session(&self) -> Option<String> {
        self.state.lock().unwrap().session.clone()
    }

    pub fn pull_version(&self) -> Option<Version> {
        self.state.lock().unwrap().pull_version.clone()
    }

    pub fn marker_index(&self) -> Option<u64> {
        self.state.lock().unwrap().marker_index
    }

    pub fn pushed(&self) -> Vec<(u64, RawRecord)> {
        self.state.lock().unwrap().pushed.clone()
    }

    /// Plaintext of the pushed application data records.
    pub fn pushed_application_data(&self) -> Vec<Vec<u8>> {
        self.pushed()
            .iter()
            .filter(|(_, record)| record.header[0] == APPLICATION_DATA)
            .map(|(_, record)| open(record))
            .collect()
    }

    pub fn cancelled(&self) -> usize {
        self.state.lock().unwrap().cancelled
    }

    pub fn finalized(&self) -> Option<Vec<RevealBlock>> {
        self.state.lock().unwrap().finalized.clone()
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn initialise_session(
        &self,
        descriptor: &SessionDescriptor,
    ) -> Result<String, RelayError> {
        if descriptor.host.is_empty() {
            return Err(RelayError::new(RelayErrorCode::InvalidArgument, "missing host"));
        }

        let mut state = self.state.lock().unwrap();
        state.session = Some(SESSION_ID.to_string());

        Ok(SESSION_ID.to_string())
    }

    async fn pull_from_session(
        &self,
        session_id: &str,
        version: &Version,
    ) -> Result<claimtls_prover::PullStream, RelayError> {
        let mut state = self.state.lock().unwrap();
        if state.session.as_deref() != Some(session_id) {
            return Err(RelayError::new(RelayErrorCode::InvalidArgument, "unknown session"));
        }

        let rx = state
            .rx
            .take()
            .ok_or_else(|| RelayError::new(RelayErrorCode::Internal, "already pulled"))?;
        state.pull_version = Some(version.clone());

        if state.behaviour.send_marker {
            state.send_marker();
        }

        Ok(rx.boxed())
    }

    async fn push_to_session(
        &self,
        session_id: &str,
        messages: Vec<RawRecord>,
    ) -> Result<u64, RelayError> {
        let mut state = self.state.lock().unwrap();
        if state.session.as_deref() != Some(session_id) {
            return Err(RelayError::new(RelayErrorCode::InvalidArgument, "unknown session"));
        }

        state.pushes += 1;
        if let Some((n, err)) = state.behaviour.close_on_push.clone() {
            if state.pushes == n {
                if let Some(err) = err {
                    state.emit(Err(err));
                }
                state.tx = None;
                return Err(RelayError::new(RelayErrorCode::SessionClosed, "session is closed"));
            }
        }

        let mut last = 0;
        for record in messages {
            last = state.next_index();
            state.pushed.push((last, record.clone()));
            state.serve(&record);
        }

        Ok(last)
    }

    async fn cancel_session(&self, _session_id: &str) -> Result<(), RelayError> {
        let mut state = self.state.lock().unwrap();
        state.cancelled += 1;
        state.tx = None;
        Ok(())
    }

    async fn finalise_session(
        &self,
        session_id: &str,
        reveal_blocks: Vec<RevealBlock>,
    ) -> Result<Attestation, RelayError> {
        let mut state = self.state.lock().unwrap();
        if state.behaviour.reject_finalize {
            return Err(RelayError::new(RelayErrorCode::Rejected, "invalid proof"));
        }

        let claim = reveal_blocks
            .iter()
            .filter(|block| block.kind == RevealKind::Complete)
            .flat_map(|block| block.material.clone())
            .collect();
        state.finalized = Some(reveal_blocks);

        Ok(Attestation {
            session_id: session_id.to_string(),
            claim,
            signature: vec![0xde, 0xad],
        })
    }
}

#[derive(Debug, Default)]
pub struct EngineLog {
    pub psk_identity: Option<Vec<u8>>,
    pub key_updates: usize,
    pub tickets: usize,
    pub ended: Option<Option<ErrorKind>>,
}

pub struct MockEngine {
    version: TlsVersion,
    fragment: usize,
    metadata: Option<TlsMetadata>,
    handshake_done: bool,
    log: Arc<Mutex<EngineLog>>,
}

impl MockEngine {
    pub fn new(version: TlsVersion) -> (Self, Arc<Mutex<EngineLog>>) {
        let log = Arc::new(Mutex::new(EngineLog::default()));
        (
            Self {
                version,
                fragment: usize::MAX,
                metadata: None,
                handshake_done: false,
                log: log.clone(),
            },
            log,
        )
    }

    /// Splits writes into records of at most `fragment` bytes.
    pub fn with_fragment(mut self, fragment: usize) -> Self {
        self.fragment = fragment;
        self
    }

    fn cipher_suite(&self) -> u16 {
        match self.version {
            TlsVersion::V1_2 => 0xc02f,
            TlsVersion::V1_3 => 0x1301,
        }
    }
}

fn handshake_record(data: &[u8]) -> SealedRecord {
    SealedRecord {
        record: seal(HANDSHAKE, data),
        plaintext: Plaintext::new(ContentType::Handshake, data),
    }
}

#[async_trait]
impl TlsEngine for MockEngine {
    async fn start_handshake(
        &mut self,
        psk: Option<Psk>,
    ) -> Result<Vec<SealedRecord>, TlsEngineError> {
        self.log.lock().unwrap().psk_identity = psk.map(|psk| psk.identity);
        Ok(vec![handshake_record(b"client-hello")])
    }

    async fn handle_received(
        &mut self,
        record: &RawRecord,
    ) -> Result<EngineOutput, TlsEngineError> {
        let data = open(record);

        match record.content_type() {
            Some(ContentType::Handshake) => {
                let mut output = EngineOutput {
                    plaintext: Some(Plaintext::new(ContentType::Handshake, data.clone())),
                    ..Default::default()
                };

                if data == b"server-hello" {
                    self.metadata = Some(TlsMetadata {
                        version: self.version,
                        cipher_suite: self.cipher_suite(),
                    });
                } else if data == b"server-finished" {
                    self.handshake_done = true;
                    output.outgoing.push(handshake_record(b"client-finished"));
                } else if let Some(ticket) = data.strip_prefix(b"ticket:") {
                    self.log.lock().unwrap().tickets += 1;
                    output.session_ticket = Some(ticket.to_vec());
                }

                Ok(output)
            }
            Some(ContentType::ApplicationData) => Ok(EngineOutput {
                application_data: Some(self.version.application_bytes(&data).to_vec()),
                plaintext: Some(Plaintext::new(ContentType::ApplicationData, data)),
                ..Default::default()
            }),
            _ => Err(TlsEngineError::Decode("unexpected record".to_string())),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<Vec<SealedRecord>, TlsEngineError> {
        if !self.handshake_done {
            return Err(TlsEngineError::InvalidState("handshake not done".to_string()));
        }

        Ok(data
            .chunks(self.fragment)
            .map(|chunk| {
                let inner = inner(self.version, chunk);
                SealedRecord {
                    record: seal(APPLICATION_DATA, &inner),
                    plaintext: Plaintext::new(ContentType::ApplicationData, inner),
                }
            })
            .collect())
    }

    async fn update_traffic_keys(&mut self) -> Result<Vec<SealedRecord>, TlsEngineError> {
        if self.version != TlsVersion::V1_3 {
            return Err(TlsEngineError::UnsupportedVersion);
        }

        self.log.lock().unwrap().key_updates += 1;
        Ok(vec![handshake_record(b"key-update")])
    }

    fn metadata(&self) -> Option<TlsMetadata> {
        self.metadata
    }

    fn is_handshake_done(&self) -> bool {
        self.handshake_done
    }

    fn psk_from_ticket(&self, ticket: &[u8]) -> Result<Psk, TlsEngineError> {
        Ok(Psk {
            identity: ticket.to_vec(),
            secret: vec![7; 32],
        })
    }

    async fn end(&mut self, error: Option<&ProverError>) {
        self.log.lock().unwrap().ended = Some(error.map(ProverError::kind));
    }
}

pub struct MockPreparer {
    fail: bool,
    records: Arc<Mutex<Vec<MarkedRecord>>>,
}

impl MockPreparer {
    pub fn new(fail: bool) -> (Self, Arc<Mutex<Vec<MarkedRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                fail,
                records: records.clone(),
            },
            records,
        )
    }
}

#[async_trait]
impl RevealPreparer for MockPreparer {
    async fn prepare(
        &self,
        records: &[MarkedRecord],
        _ctx: &PrepareContext,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<Vec<RevealBlock>, Box<dyn Error + Send + Sync>> {
        *self.records.lock().unwrap() = records.to_vec();

        if self.fail {
            return Err("proof generation failed".into());
        }

        let total = records.len();
        let mut blocks = Vec::with_capacity(total);
        for (i, record) in records.iter().enumerate() {
            let (kind, material) = match &record.reveal {
                RevealDecision::Zk(redacted) => (RevealKind::Zk, redacted.clone()),
                _ => (RevealKind::Complete, record.plaintext.clone()),
            };
            blocks.push(RevealBlock {
                index: record.index,
                sender: record.sender,
                kind,
                material,
            });
            on_progress(i + 1, total);
        }

        Ok(blocks)
    }
}

pub struct MockSideConnection {
    pub fail: bool,
}

#[async_trait]
impl SideConnection for MockSideConnection {
    async fn fetch_session_ticket(
        &self,
        _host: &str,
        _port: u16,
    ) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        if self.fail {
            return Err("connection refused".into());
        }

        Ok(b"side-ticket".to_vec())
    }
}

/// Everything a test inspects after the session.
pub struct Harness {
    pub relay: Arc<MockRelay>,
    pub engine: Arc<Mutex<EngineLog>>,
    pub marked: Arc<Mutex<Vec<MarkedRecord>>>,
}

impl Harness {
    pub fn marked(&self) -> Vec<MarkedRecord> {
        self.marked.lock().unwrap().clone()
    }

    pub fn ended(&self) -> Option<Option<ErrorKind>> {
        self.engine.lock().unwrap().ended
    }
}

pub struct Setup {
    pub version: TlsVersion,
    pub behaviour: Behaviour,
    pub config: ProverConfig,
    pub fragment: usize,
    pub fail_prepare: bool,
}

impl Setup {
    pub fn new(version: TlsVersion) -> Self {
        Self {
            version,
            behaviour: Behaviour::default(),
            config: config().build().unwrap(),
            fragment: usize::MAX,
            fail_prepare: false,
        }
    }

    pub fn build(self) -> (Prover, Harness) {
        let relay = Arc::new(MockRelay::new(self.version, self.behaviour));
        let (engine, engine_log) = MockEngine::new(self.version);
        let engine = engine.with_fragment(self.fragment);
        let (preparer, marked) = MockPreparer::new(self.fail_prepare);

        let prover = Prover::new(
            self.config,
            relay.clone(),
            Box::new(engine),
            Box::new(preparer),
        );

        (
            prover,
            Harness {
                relay,
                engine: engine_log,
                marked,
            },
        )
    }
}

pub fn config() -> claimtls_prover::ProverConfigBuilder {
    let mut builder = ProverConfig::builder();
    builder.host("example.com");
    builder
}
