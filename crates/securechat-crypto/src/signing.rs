//! Signed handshake offers.
//!
//! A DH public value is bound to its sender by an RSA PKCS#1 v1.5 / SHA-256
//! signature over a transcript naming the sender, the intended peer and the
//! decimal value. The receiver verifies it against the sender's certificate
//! before completing the handshake.
//!
//! Who holds the private key is abstracted by [`IdentitySigner`]: a client
//! signing locally, a server holding keys on the principal's behalf, or an
//! external HSM can all sit behind it.

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::CryptoError;
use crate::identity::{IdentityCertificate, IdentityKeyPair};

const OFFER_DOMAIN: &[u8] = b"securechat/dh-offer/v1";

/// Something that can sign on behalf of one principal.
pub trait IdentitySigner: Send + Sync {
    fn principal(&self) -> &str;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Signer backed by an in-process [`IdentityKeyPair`].
pub struct LocalSigner {
    principal: String,
    key: SigningKey<Sha256>,
}

impl LocalSigner {
    pub fn new(principal: impl Into<String>, keypair: &IdentityKeyPair) -> Self {
        Self {
            principal: principal.into(),
            key: SigningKey::<Sha256>::new(keypair.private_key().clone()),
        }
    }
}

impl IdentitySigner for LocalSigner {
    fn principal(&self) -> &str {
        &self.principal
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature = self
            .key
            .try_sign(message)
            .map_err(|e| CryptoError::KeyGeneration(format!("signing failed: {e}")))?;
        Ok(signature.to_vec())
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// Domain-separated, length-prefixed transcript of one offer.
pub fn offer_transcript(sender: &str, recipient: &str, public_value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        OFFER_DOMAIN.len() + 12 + sender.len() + recipient.len() + public_value.len(),
    );
    out.extend_from_slice(OFFER_DOMAIN);
    for field in [sender, recipient, public_value] {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field.as_bytes());
    }
    out
}

/// Sign an offer of `public_value` from the signer's principal to `recipient`.
pub fn sign_offer(
    signer: &dyn IdentitySigner,
    recipient: &str,
    public_value: &str,
) -> Result<Vec<u8>, CryptoError> {
    signer.sign(&offer_transcript(signer.principal(), recipient, public_value))
}

/// Verify an offer sent by the owner of `sender_certificate` to `recipient`.
///
/// Fails with [`CryptoError::Certificate`] when the certificate is outside
/// its validity window and [`CryptoError::InvalidSignature`] otherwise.
pub fn verify_offer(
    sender_certificate: &IdentityCertificate,
    recipient: &str,
    public_value: &str,
    signature: &[u8],
) -> Result<(), CryptoError> {
    if !sender_certificate.is_valid_at(OffsetDateTime::now_utc()) {
        return Err(CryptoError::Certificate(format!(
            "certificate for {} is not currently valid",
            sender_certificate.principal_name
        )));
    }

    let verifying_key = VerifyingKey::<Sha256>::new(sender_certificate.public_key()?);
    let signature = Signature::try_from(signature).map_err(|_| CryptoError::InvalidSignature)?;
    let transcript = offer_transcript(
        &sender_certificate.principal_name,
        recipient,
        public_value,
    );
    verifying_key
        .verify(&transcript, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use time::Duration;

    use super::*;
    use crate::identity::{issue_identity, IssuedIdentity};

    fn bob() -> &'static IssuedIdentity {
        static BOB: OnceLock<IssuedIdentity> = OnceLock::new();
        BOB.get_or_init(|| issue_identity("bob").unwrap())
    }

    fn bob_signer() -> LocalSigner {
        LocalSigner::new("bob", &bob().keypair)
    }

    #[test]
    fn transcript_is_unambiguous() {
        assert_ne!(
            offer_transcript("ab", "c", "1"),
            offer_transcript("a", "bc", "1")
        );
    }

    #[test]
    fn signed_offer_verifies() {
        let sig = sign_offer(&bob_signer(), "alice", "12345").unwrap();
        verify_offer(&bob().certificate, "alice", "12345", &sig).unwrap();
    }

    #[test]
    fn altered_value_rejected() {
        let sig = sign_offer(&bob_signer(), "alice", "12345").unwrap();
        assert!(matches!(
            verify_offer(&bob().certificate, "alice", "12346", &sig),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn offer_for_other_recipient_rejected() {
        let sig = sign_offer(&bob_signer(), "carol", "12345").unwrap();
        assert!(matches!(
            verify_offer(&bob().certificate, "alice", "12345", &sig),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_signature_rejected() {
        assert!(matches!(
            verify_offer(&bob().certificate, "alice", "12345", &[0u8; 7]),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn expired_certificate_rejected() {
        let sig = sign_offer(&bob_signer(), "alice", "12345").unwrap();
        let mut expired = bob().certificate.clone();
        expired.not_after = OffsetDateTime::now_utc() - Duration::days(1);
        assert!(matches!(
            verify_offer(&expired, "alice", "12345", &sig),
            Err(CryptoError::Certificate(_))
        ));
    }

    #[test]
    fn signer_reports_principal() {
        let signer = bob_signer();
        assert_eq!(signer.principal(), "bob");
        assert!(!format!("{signer:?}").contains("key"));
    }
}
