use thiserror::Error;

/// Failures raised by the cryptographic core.
///
/// Messages never include key material, exponents or plaintext.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("invalid DH parameters: {0}")]
    InvalidParameters(String),

    #[error("peer DH public value is outside [2, p-2]")]
    InvalidPeerValue,

    #[error("handshake offer signature verification failed")]
    InvalidSignature,

    #[error("envelope padding is malformed (truncated, wrong key or corrupted)")]
    Padding,

    #[error("decrypted message is not valid UTF-8")]
    Decoding(#[from] std::str::Utf8Error),

    #[error("random number generator failed")]
    Rng,
}
