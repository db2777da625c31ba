use securechat_crypto::CryptoError;
use securechat_protocol::types::ErrorCode;
use securechat_protocol::ProtocolError;
use thiserror::Error;

/// Failures surfaced by the chat service. Each maps to a stable [`ErrorCode`].
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no pending handshake from {initiator} to {peer}")]
    HandshakeNotInitialized { initiator: String, peer: String },

    #[error("no shared key between {0} and {1}")]
    SharedKeyNotFound(String, String),

    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    #[error("principal already registered: {0}")]
    PrincipalExists(String),

    #[error("handshake offer from {0} is unsigned")]
    MissingSignature(String),

    #[error("certificate of {principal} rejected: {reason}")]
    CertificateRejected { principal: String, reason: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::HandshakeNotInitialized { .. } => ErrorCode::HandshakeNotInitialized,
            ChatError::SharedKeyNotFound(..) => ErrorCode::SharedKeyNotFound,
            ChatError::UnknownPrincipal(_) => ErrorCode::UnknownPrincipal,
            ChatError::PrincipalExists(_) => ErrorCode::PrincipalExists,
            ChatError::MissingSignature(_) | ChatError::CertificateRejected { .. } => {
                ErrorCode::InvalidSignature
            }
            ChatError::Crypto(e) => crypto_code(e),
            ChatError::Protocol(e) => match e {
                ProtocolError::InvalidPrincipalName(_) => ErrorCode::InvalidPrincipalName,
                ProtocolError::InvalidDhValue => ErrorCode::InvalidPeerValue,
                ProtocolError::InvalidEnvelopeEncoding(_) => ErrorCode::Decoding,
                _ => ErrorCode::MalformedRequest,
            },
        }
    }
}

/// Wire code for a crypto-layer failure.
pub fn crypto_code(e: &CryptoError) -> ErrorCode {
    match e {
        CryptoError::KeyGeneration(_) | CryptoError::Certificate(_) | CryptoError::Rng => {
            ErrorCode::KeyGeneration
        }
        CryptoError::InvalidParameters(_) => ErrorCode::Internal,
        CryptoError::InvalidPeerValue => ErrorCode::InvalidPeerValue,
        CryptoError::InvalidSignature => ErrorCode::InvalidSignature,
        CryptoError::Padding => ErrorCode::Padding,
        CryptoError::Decoding(_) => ErrorCode::Decoding,
    }
}
