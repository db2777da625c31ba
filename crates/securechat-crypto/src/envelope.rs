//! Symmetric AES-256-CBC envelopes for chat messages.
//!
//! An envelope is `IV (16 bytes) || ciphertext`, where the ciphertext is the
//! PKCS#7-padded UTF-8 plaintext encrypted under the pair's shared key.
//! There is no authentication tag: a successful decrypt does not prove the
//! envelope was produced by the key holder.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size, also the IV length.
pub const BLOCK_LEN: usize = 16;

/// IV prepended to every envelope.
pub const IV_LEN: usize = BLOCK_LEN;

/// Shared symmetric key length (AES-256).
pub const KEY_LEN: usize = 32;

/// Smallest well-formed envelope: IV plus one padded block.
pub const MIN_ENVELOPE_LEN: usize = IV_LEN + BLOCK_LEN;

/// A 256-bit symmetric key shared by a pair of principals. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| CryptoError::Rng)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SymmetricKey {}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Encrypt a UTF-8 message into a fresh `IV || ciphertext` envelope.
///
/// A new random IV is drawn on every call, so encrypting the same plaintext
/// twice yields different envelopes.
pub fn encrypt(key: &SymmetricKey, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    SystemRandom::new()
        .fill(&mut iv)
        .map_err(|_| CryptoError::Rng)?;

    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut envelope = Vec::with_capacity(IV_LEN + ciphertext.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt an envelope produced by [`encrypt`].
///
/// Returns [`CryptoError::Padding`] for truncated or misaligned envelopes and
/// for padding that does not verify (wrong key or corruption), and
/// [`CryptoError::Decoding`] when the recovered bytes are not UTF-8. Neither is
/// a reliable tamper signal.
pub fn decrypt(key: &SymmetricKey, envelope: &[u8]) -> Result<String, CryptoError> {
    if envelope.len() < MIN_ENVELOPE_LEN || (envelope.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(CryptoError::Padding);
    }

    let (iv, ciphertext) = envelope.split_at(IV_LEN);
    let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| CryptoError::Padding)?;

    let plaintext = Zeroizing::new(
        Aes256CbcDec::new(key.as_bytes().into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Padding)?,
    );

    // Validate inside the zeroized buffer so a failure never copies the bytes out.
    Ok(std::str::from_utf8(&plaintext)?.to_owned())
}
