//! Finite-field Diffie-Hellman over a fixed safe-prime group, plus the HKDF
//! step that turns the shared secret into a [`SymmetricKey`].
//!
//! One [`DhParams`] is built at process start and shared by every handshake;
//! two principals can only agree on a key when both sides use the same group.

use hkdf::Hkdf;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::envelope::{SymmetricKey, KEY_LEN};
use crate::error::CryptoError;

/// HKDF `info` string binding derived keys to this application.
pub const HKDF_INFO: &[u8] = b"secure chat";

/// Smallest modulus accepted for a custom group.
pub const MIN_PRIME_BITS: u64 = 2048;

/// Generator of the RFC 3526 groups.
pub const RFC3526_GENERATOR: u32 = 2;

/// RFC 3526 group 14: 2048-bit MODP safe prime.
const RFC3526_2048_PRIME: [u8; 256] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2, 0x21, 0x68, 0xc2, 0x34,
    0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1, 0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74,
    0x02, 0x0b, 0xbe, 0xa6, 0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d, 0xf2, 0x5f, 0x14, 0x37,
    0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45, 0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6,
    0xf4, 0x4c, 0x42, 0xe9, 0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11, 0x7c, 0x4b, 0x1f, 0xe6,
    0x49, 0x28, 0x66, 0x51, 0xec, 0xe4, 0x5b, 0x3d, 0xc2, 0x00, 0x7c, 0xb8, 0xa1, 0x63, 0xbf, 0x05,
    0x98, 0xda, 0x48, 0x36, 0x1c, 0x55, 0xd3, 0x9a, 0x69, 0x16, 0x3f, 0xa8, 0xfd, 0x24, 0xcf, 0x5f,
    0x83, 0x65, 0x5d, 0x23, 0xdc, 0xa3, 0xad, 0x96, 0x1c, 0x62, 0xf3, 0x56, 0x20, 0x85, 0x52, 0xbb,
    0x9e, 0xd5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6d, 0x67, 0x0c, 0x35, 0x4e, 0x4a, 0xbc, 0x98, 0x04,
    0xf1, 0x74, 0x6c, 0x08, 0xca, 0x18, 0x21, 0x7c, 0x32, 0x90, 0x5e, 0x46, 0x2e, 0x36, 0xce, 0x3b,
    0xe3, 0x9e, 0x77, 0x2c, 0x18, 0x0e, 0x86, 0x03, 0x9b, 0x27, 0x83, 0xa2, 0xec, 0x07, 0xa2, 0x8f,
    0xb5, 0xc5, 0x5d, 0xf0, 0x6f, 0x4c, 0x52, 0xc9, 0xde, 0x2b, 0xcb, 0xf6, 0x95, 0x58, 0x17, 0x18,
    0x39, 0x95, 0x49, 0x7c, 0xea, 0x95, 0x6a, 0xe5, 0x15, 0xd2, 0x26, 0x18, 0x98, 0xfa, 0x05, 0x10,
    0x15, 0x72, 0x8e, 0x5a, 0x8a, 0xac, 0xaa, 0x68, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

/// Process-wide DH group `(g, p)`.
#[derive(Clone, PartialEq, Eq)]
pub struct DhParams {
    generator: BigUint,
    prime: BigUint,
    /// Byte length of `p`; shared secrets are left-padded to this width.
    prime_len: usize,
}

impl DhParams {
    /// The RFC 3526 2048-bit MODP group with generator 2.
    pub fn rfc3526_2048() -> Self {
        let prime = BigUint::from_bytes_be(&RFC3526_2048_PRIME);
        Self {
            generator: BigUint::from(RFC3526_GENERATOR),
            prime_len: RFC3526_2048_PRIME.len(),
            prime,
        }
    }

    /// Build a custom group.
    ///
    /// Only structural checks are made (odd modulus of at least 2048 bits,
    /// generator in `[2, p-2]`); primality of `p` is the operator's
    /// responsibility.
    pub fn new(generator: BigUint, prime: BigUint) -> Result<Self, CryptoError> {
        if prime.bits() < MIN_PRIME_BITS {
            return Err(CryptoError::InvalidParameters(format!(
                "prime is {} bits, need at least {MIN_PRIME_BITS}",
                prime.bits()
            )));
        }
        if !prime.bit(0) {
            return Err(CryptoError::InvalidParameters("prime is even".into()));
        }
        let two = BigUint::from(2u32);
        if generator < two || generator > &prime - &two {
            return Err(CryptoError::InvalidParameters(
                "generator outside [2, p-2]".into(),
            ));
        }
        let prime_len = prime.bits().div_ceil(8) as usize;
        Ok(Self {
            generator,
            prime,
            prime_len,
        })
    }

    /// Parse a custom group from a hex-encoded prime.
    pub fn from_hex(generator: u32, prime_hex: &str) -> Result<Self, CryptoError> {
        let cleaned: String = prime_hex.chars().filter(|c| !c.is_whitespace()).collect();
        let prime = BigUint::parse_bytes(cleaned.as_bytes(), 16)
            .ok_or_else(|| CryptoError::InvalidParameters("prime is not valid hex".into()))?;
        Self::new(BigUint::from(generator), prime)
    }

    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    pub fn bits(&self) -> u64 {
        self.prime.bits()
    }

    /// Width in bytes of encoded shared secrets.
    pub fn prime_len(&self) -> usize {
        self.prime_len
    }

    /// Short SHA-256 fingerprint of `(p, g)`, for logs and operator display.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prime.to_bytes_be());
        hasher.update(self.generator.to_bytes_be());
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Draw a fresh private exponent uniformly from `[2, p-2]`.
    pub fn generate_private_exponent(&self) -> DhPrivateExponent {
        let low = BigUint::from(2u32);
        let high = &self.prime - 1u32;
        DhPrivateExponent(OsRng.gen_biguint_range(&low, &high))
    }

    /// `g^x mod p`.
    pub fn public_value(&self, exponent: &DhPrivateExponent) -> BigUint {
        self.generator.modpow(&exponent.0, &self.prime)
    }

    /// Reject peer values outside `[2, p-2]` (0, 1 and p-1 force trivial secrets).
    pub fn validate_public_value(&self, value: &BigUint) -> Result<(), CryptoError> {
        let two = BigUint::from(2u32);
        if value < &two || value > &(&self.prime - &two) {
            return Err(CryptoError::InvalidPeerValue);
        }
        Ok(())
    }

    /// `Z = peer^x mod p`, big-endian and left-padded to the byte length of `p`.
    pub fn shared_secret(
        &self,
        exponent: &DhPrivateExponent,
        peer_value: &BigUint,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.validate_public_value(peer_value)?;
        let z = Zeroizing::new(peer_value.modpow(&exponent.0, &self.prime).to_bytes_be());
        let mut padded = Zeroizing::new(vec![0u8; self.prime_len]);
        padded[self.prime_len - z.len()..].copy_from_slice(&z);
        Ok(padded)
    }

    /// Full agreement: shared secret followed by [`derive_symmetric_key`].
    pub fn agree(
        &self,
        exponent: &DhPrivateExponent,
        peer_value: &BigUint,
    ) -> Result<SymmetricKey, CryptoError> {
        let z = self.shared_secret(exponent, peer_value)?;
        derive_symmetric_key(&z)
    }
}

impl std::fmt::Debug for DhParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhParams")
            .field("bits", &self.bits())
            .field("generator", &self.generator)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// A handshake's private exponent `x`. Only valid until the handshake completes.
#[derive(Clone)]
pub struct DhPrivateExponent(BigUint);

impl std::fmt::Debug for DhPrivateExponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DhPrivateExponent(<redacted>)")
    }
}

/// HKDF-SHA256 with no salt and [`HKDF_INFO`], producing a 32-byte key.
pub fn derive_symmetric_key(shared_secret: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(HKDF_INFO, &mut okm[..])
        .map_err(|e| CryptoError::KeyGeneration(format!("HKDF expand failed: {e}")))?;
    Ok(SymmetricKey::from_bytes(*okm))
}
