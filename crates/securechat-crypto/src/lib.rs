//! SecureChat cryptographic core.
//!
//! This crate provides:
//! - Identity issuance (RSA-2048 keypairs, self-signed X.509 certificates)
//! - AES-256-CBC message envelopes (`IV || ciphertext`, PKCS#7 padding)
//! - Finite-field Diffie-Hellman over a fixed group with HKDF-SHA256 key derivation
//! - Signed handshake offers behind a pluggable key-custody trait

pub mod dh;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod signing;

// Re-export key types for convenience
pub use dh::{derive_symmetric_key, DhParams, DhPrivateExponent, HKDF_INFO};
pub use envelope::{decrypt, encrypt, SymmetricKey};
pub use error::CryptoError;
pub use identity::{issue_identity, IdentityCertificate, IdentityKeyPair, IssuedIdentity};
pub use signing::{sign_offer, verify_offer, IdentitySigner, LocalSigner};
