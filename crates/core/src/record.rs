//! TLS record types.
//!
//! A [`TlsRecord`] is a single record exchanged with the server through the
//! witness relay. The relay only ever sees the [`RawRecord`] wire form, while
//! the client additionally learns the decrypted [`Plaintext`] once the TLS
//! engine has processed the record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::reveal::RevealDecision;

/// The party which sent a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The client, i.e. this prover.
    Client,
    /// The TLS server.
    Server,
}

impl Sender {
    pub(crate) fn slot(&self) -> usize {
        match self {
            Sender::Client => 0,
            Sender::Server => 1,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Client => write!(f, "client"),
            Sender::Server => write!(f, "server"),
        }
    }
}

/// TLS record content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    /// change_cipher_spec(20)
    ChangeCipherSpec,
    /// alert(21)
    Alert,
    /// handshake(22)
    Handshake,
    /// application_data(23)
    ApplicationData,
    /// Any other content type.
    Unknown(u8),
}

impl From<u8> for ContentType {
    fn from(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            other => ContentType::Unknown(other),
        }
    }
}

impl From<ContentType> for u8 {
    fn from(value: ContentType) -> Self {
        match value {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(other) => other,
        }
    }
}

/// Negotiated TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsVersion {
    /// TLS 1.2
    #[serde(rename = "TLS1_2")]
    V1_2,
    /// TLS 1.3
    #[serde(rename = "TLS1_3")]
    V1_3,
}

impl TlsVersion {
    /// Returns `true` if traffic keys can be rotated mid-session.
    pub fn supports_key_update(&self) -> bool {
        matches!(self, TlsVersion::V1_3)
    }

    /// Returns the application bytes of a decrypted record.
    ///
    /// TLS 1.3 appends the real content type to the inner plaintext, which is
    /// stripped here. TLS 1.2 plaintext is returned as is.
    pub fn application_bytes<'a>(&self, plaintext: &'a [u8]) -> &'a [u8] {
        match self {
            TlsVersion::V1_2 => plaintext,
            TlsVersion::V1_3 => match plaintext.split_last() {
                Some((_, data)) => data,
                None => plaintext,
            },
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::V1_2 => write!(f, "TLS1.2"),
            TlsVersion::V1_3 => write!(f, "TLS1.3"),
        }
    }
}

/// A record in the form relayed by the witness.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Record header bytes.
    pub header: Vec<u8>,
    /// Record content, encrypted once the handshake keys are in place.
    pub content: Vec<u8>,
}

impl RawRecord {
    /// Creates a new raw record.
    pub fn new(header: impl Into<Vec<u8>>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            header: header.into(),
            content: content.into(),
        }
    }

    /// Returns the outer content type from the record header, if any.
    pub fn content_type(&self) -> Option<ContentType> {
        self.header.first().copied().map(ContentType::from)
    }

    /// Returns `true` if the header is empty.
    ///
    /// The relay uses such a record to signal that the session is ready.
    pub fn is_marker(&self) -> bool {
        self.header.is_empty()
    }
}

impl fmt::Debug for RawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRecord")
            .field("header", &hex::encode(&self.header))
            .field("content_len", &self.content.len())
            .finish()
    }
}

/// Decrypted contents of a record.
#[derive(Clone, PartialEq, Eq)]
pub struct Plaintext {
    /// The real content type of the record.
    pub content_type: ContentType,
    /// Decrypted bytes. For TLS 1.3 this includes the trailing content type
    /// byte of the inner plaintext.
    pub data: Vec<u8>,
}

opaque_debug::implement!(Plaintext);

impl Plaintext {
    /// Creates a new plaintext.
    pub fn new(content_type: ContentType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type,
            data: data.into(),
        }
    }
}

/// A record in the session transcript.
#[derive(Debug, Clone)]
pub struct TlsRecord {
    sender: Sender,
    index: u64,
    raw: RawRecord,
    plaintext: Option<Plaintext>,
    reveal: RevealDecision,
}

impl TlsRecord {
    /// Creates a new record without plaintext.
    ///
    /// # Arguments
    ///
    /// * `sender` - The party which sent the record.
    /// * `index` - The relay-assigned index of the record.
    /// * `raw` - The record as relayed.
    pub fn new(sender: Sender, index: u64, raw: RawRecord) -> Self {
        Self {
            sender,
            index,
            raw,
            plaintext: None,
            reveal: RevealDecision::NoReveal,
        }
    }

    /// Creates a new record whose plaintext is already known.
    pub fn with_plaintext(
        sender: Sender,
        index: u64,
        raw: RawRecord,
        plaintext: Plaintext,
    ) -> Self {
        Self {
            plaintext: Some(plaintext),
            ..Self::new(sender, index, raw)
        }
    }

    /// Returns the sender.
    pub fn sender(&self) -> Sender {
        self.sender
    }

    /// Returns the relay-assigned index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the record as relayed.
    pub fn raw(&self) -> &RawRecord {
        &self.raw
    }

    /// Returns the plaintext, if the record has been decrypted.
    pub fn plaintext(&self) -> Option<&Plaintext> {
        self.plaintext.as_ref()
    }

    /// Sets the plaintext after the engine has processed the record.
    pub fn set_plaintext(&mut self, plaintext: Plaintext) {
        self.plaintext = Some(plaintext);
    }

    /// Returns the reveal decision.
    pub fn reveal(&self) -> &RevealDecision {
        &self.reveal
    }

    /// Sets the reveal decision.
    pub fn set_reveal(&mut self, reveal: RevealDecision) {
        self.reveal = reveal;
    }

    /// Returns `true` once the record has been classified as application data.
    pub fn is_application_data(&self) -> bool {
        matches!(
            self.plaintext,
            Some(Plaintext {
                content_type: ContentType::ApplicationData,
                ..
            })
        )
    }

    /// Returns the application bytes of the plaintext for the given version.
    pub fn application_bytes(&self, version: TlsVersion) -> Option<&[u8]> {
        self.plaintext
            .as_ref()
            .map(|plaintext| version.application_bytes(&plaintext.data))
    }
}
