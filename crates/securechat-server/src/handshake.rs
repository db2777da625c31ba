//! Two-phase Diffie-Hellman key exchange between registered principals.
//!
//! `initiate_handshake(a, b)` stores a fresh exponent for the ordered pair
//! `(a, b)` and returns `g^x mod p`. Once `a` has `b`'s public value,
//! `complete_handshake(a, b, y_b)` consumes that exponent, derives the pair
//! key and writes it to the [`SharedKeyStore`]. Both sides run both phases;
//! the second completion derives the same key and leaves the store as is.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use num_bigint::BigUint;
use tracing::{debug, info, warn};

use securechat_crypto::{CryptoError, DhParams, DhPrivateExponent};
use securechat_protocol::types::{DhPublicValue, PrincipalName};

use crate::config::RekeyPolicy;
use crate::error::ChatError;
use crate::keystore::{PutOutcome, SharedKey, SharedKeyStore};
use crate::mailbox::MessageStore;

/// Only the exponent is kept; the public value is recomputed when needed.
struct HandshakeState {
    exponent: DhPrivateExponent,
    created_at: Instant,
}

/// What a successful completion did to the pair's key.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub shared: Arc<SharedKey>,
    pub put: PutOutcome,
}

impl HandshakeOutcome {
    pub fn superseded(&self) -> bool {
        matches!(self.put, PutOutcome::Superseded { .. })
    }
}

pub struct KeyExchangeCoordinator {
    params: Arc<DhParams>,
    /// Keyed by `(initiator, peer)`; ordered, unlike shared keys.
    pending: DashMap<(PrincipalName, PrincipalName), HandshakeState>,
    ttl: Duration,
    keys: Arc<SharedKeyStore>,
    mailbox: Arc<MessageStore>,
    rekey_policy: RekeyPolicy,
}

impl KeyExchangeCoordinator {
    pub fn new(
        params: Arc<DhParams>,
        keys: Arc<SharedKeyStore>,
        mailbox: Arc<MessageStore>,
        ttl: Duration,
        rekey_policy: RekeyPolicy,
    ) -> Self {
        Self {
            params,
            pending: DashMap::new(),
            ttl,
            keys,
            mailbox,
            rekey_policy,
        }
    }

    pub fn params(&self) -> &DhParams {
        &self.params
    }

    /// Start (or restart) a handshake from `initiator` towards `peer`.
    ///
    /// A pending state for the same ordered pair is replaced.
    pub fn initiate_handshake(&self, initiator: &str, peer: &str) -> DhPublicValue {
        self.evict_stale();

        let exponent = self.params.generate_private_exponent();
        let public = self.params.public_value(&exponent);
        let replaced = self
            .pending
            .insert(
                (initiator.to_string(), peer.to_string()),
                HandshakeState {
                    exponent,
                    created_at: Instant::now(),
                },
            )
            .is_some();

        info!(initiator, peer, replaced, "handshake initiated");
        DhPublicValue::from_biguint(&public)
    }

    /// Parse a wire value and check it lies in `[2, p-2]`.
    ///
    /// Runs before any pending state is touched, so a bad value can be
    /// corrected and resubmitted.
    pub fn validate_peer_value(&self, value: &DhPublicValue) -> Result<BigUint, ChatError> {
        let parsed = value.to_biguint()?;
        self.params.validate_public_value(&parsed)?;
        Ok(parsed)
    }

    /// Finish `responder`'s pending handshake with `peer`.
    pub fn complete_handshake(
        &self,
        responder: &str,
        peer: &str,
        peer_value: &BigUint,
    ) -> Result<HandshakeOutcome, ChatError> {
        self.params.validate_public_value(peer_value)?;

        let not_initialized = || ChatError::HandshakeNotInitialized {
            initiator: responder.to_string(),
            peer: peer.to_string(),
        };

        let (_, state) = self
            .pending
            .remove(&(responder.to_string(), peer.to_string()))
            .ok_or_else(not_initialized)?;

        if state.created_at.elapsed() >= self.ttl {
            warn!(responder, peer, "pending handshake expired");
            return Err(not_initialized());
        }

        // A reflected offer would make Z = g^(x*x), known to whoever reflected it.
        if self.params.public_value(&state.exponent) == *peer_value {
            warn!(responder, peer, "peer offered our own public value");
            return Err(CryptoError::InvalidPeerValue.into());
        }

        let key = self.params.agree(&state.exponent, peer_value)?;
        let (shared, put) = self.keys.put(responder, peer, key);

        let purged_messages = match (put, self.rekey_policy) {
            (PutOutcome::Superseded { .. }, RekeyPolicy::Purge) => {
                self.mailbox.purge_pair(responder, peer, shared.epoch)
            }
            _ => 0,
        };

        info!(
            responder,
            peer,
            epoch = shared.epoch,
            outcome = ?put,
            purged_messages,
            "handshake completed"
        );

        Ok(HandshakeOutcome { shared, put })
    }

    /// Drop pending handshakes older than the TTL.
    pub fn evict_stale(&self) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, state| state.created_at.elapsed() < self.ttl);
        let evicted = before.saturating_sub(self.pending.len());
        if evicted > 0 {
            debug!(evicted, "evicted stale handshakes");
        }
        evicted
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
