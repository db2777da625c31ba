use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Unique, caller-authenticated principal identifier.
pub type PrincipalName = String;

/// Generation number of a pair's shared key; increases on every supersession.
pub type KeyEpoch = u64;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// Arrival order of a stored message, unique across the server.
pub type MessageSeq = u64;

/// Maximum principal name length in bytes.
pub const MAX_PRINCIPAL_NAME_LEN: usize = 64;

/// Reject empty, oversized, or control-character principal names.
pub fn validate_principal_name(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::InvalidPrincipalName("empty".into()));
    }
    if name.len() > MAX_PRINCIPAL_NAME_LEN {
        return Err(ProtocolError::InvalidPrincipalName(format!(
            "longer than {MAX_PRINCIPAL_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(char::is_control) || name.trim() != name {
        return Err(ProtocolError::InvalidPrincipalName(
            "contains control characters or surrounding whitespace".into(),
        ));
    }
    Ok(())
}

pub fn unix_millis(at: SystemTime) -> TimestampMs {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// An unordered pair of principals in canonical (sorted) order.
///
/// `PairKey::new(a, b) == PairKey::new(b, a)` by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    low: PrincipalName,
    high: PrincipalName,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn members(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.low == name || self.high == name
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.low, self.high)
    }
}

/// A DH public value as exchanged on the wire: an arbitrary-precision
/// non-negative integer in canonical decimal form (digits only, no sign,
/// no leading zeros).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DhPublicValue(String);

impl DhPublicValue {
    pub fn from_biguint(value: &BigUint) -> Self {
        Self(value.to_str_radix(10))
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let canonical = !text.is_empty()
            && text.bytes().all(|b| b.is_ascii_digit())
            && (text == "0" || !text.starts_with('0'));
        if !canonical {
            return Err(ProtocolError::InvalidDhValue);
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Re-validates, since deserialized values bypass [`Self::parse`].
    pub fn to_biguint(&self) -> Result<BigUint, ProtocolError> {
        let checked = Self::parse(&self.0)?;
        BigUint::parse_bytes(checked.0.as_bytes(), 10).ok_or(ProtocolError::InvalidDhValue)
    }
}

impl std::fmt::Display for DhPublicValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a stored envelope's bytes are represented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeEncoding {
    /// `IV || ciphertext` as raw bytes.
    #[default]
    Raw,
    /// Standard base64 text of `IV || ciphertext`.
    Base64,
}

/// An envelope at rest, tagged with its encoding so readers never have to
/// guess the representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEnvelope {
    pub encoding: EnvelopeEncoding,
    pub data: Vec<u8>,
}

impl StoredEnvelope {
    pub fn encode(envelope: &[u8], encoding: EnvelopeEncoding) -> Self {
        let data = match encoding {
            EnvelopeEncoding::Raw => envelope.to_vec(),
            EnvelopeEncoding::Base64 => BASE64.encode(envelope).into_bytes(),
        };
        Self { encoding, data }
    }

    /// Recover the raw `IV || ciphertext` bytes according to the tag.
    pub fn to_raw(&self) -> Result<Vec<u8>, ProtocolError> {
        match self.encoding {
            EnvelopeEncoding::Raw => Ok(self.data.clone()),
            EnvelopeEncoding::Base64 => BASE64
                .decode(&self.data)
                .map_err(|_| ProtocolError::InvalidEnvelopeEncoding("base64")),
        }
    }
}

/// Decode a base64(PEM) certificate export back to PEM text.
pub fn decode_certificate_export(export: &str) -> Result<String, ProtocolError> {
    let bytes = BASE64
        .decode(export.trim())
        .map_err(|_| ProtocolError::InvalidCertificateExport)?;
    let pem = String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidCertificateExport)?;
    if !pem.starts_with("-----BEGIN CERTIFICATE-----") {
        return Err(ProtocolError::InvalidCertificateExport);
    }
    Ok(pem)
}

/// Stable wire codes for the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    KeyGeneration,
    HandshakeNotInitialized,
    InvalidPeerValue,
    InvalidSignature,
    Padding,
    Decoding,
    SharedKeyNotFound,
    UnknownPrincipal,
    PrincipalExists,
    InvalidPrincipalName,
    MalformedRequest,
    Internal,
}

/// Content of one fetched message: either the plaintext or why it could not
/// be decrypted. One bad message never hides the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    Text(String),
    Undecryptable { code: ErrorCode, reason: String },
}

/// A message as returned to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub seq: MessageSeq,
    pub from: PrincipalName,
    pub to: PrincipalName,
    pub timestamp_ms: TimestampMs,
    pub body: MessageBody,
}

/// Public summary of an established shared key. Never carries key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedKeyInfo {
    pub users: [PrincipalName; 2],
    pub epoch: KeyEpoch,
    pub established_at_ms: TimestampMs,
}
