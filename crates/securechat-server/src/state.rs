use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use securechat_crypto::{DhParams, IdentityCertificate, IdentitySigner};
use securechat_protocol::types::{EnvelopeEncoding, PrincipalName};

use crate::config::{KeyCustody, RekeyPolicy, ServerConfig};
use crate::error::ChatError;
use crate::handshake::KeyExchangeCoordinator;
use crate::keystore::SharedKeyStore;
use crate::mailbox::MessageStore;

/// A registered principal as the directory knows it.
pub struct RegisteredIdentity {
    pub certificate: IdentityCertificate,
    /// Present only under server-side key custody.
    pub signer: Option<Arc<dyn IdentitySigner>>,
}

/// Shared server state, accessed concurrently by request handlers.
pub struct ServerState {
    pub identities: DashMap<PrincipalName, RegisteredIdentity>,
    pub keys: Arc<SharedKeyStore>,
    pub mailbox: Arc<MessageStore>,
    pub coordinator: KeyExchangeCoordinator,
    pub key_custody: KeyCustody,
    pub require_signed_handshake: bool,
    pub envelope_encoding: EnvelopeEncoding,
}

impl ServerState {
    /// `params` is built once by the caller and shared by every handshake.
    pub fn new(config: &ServerConfig, params: Arc<DhParams>) -> Self {
        let keys = Arc::new(SharedKeyStore::new(
            config.rekey_policy == RekeyPolicy::Retain,
        ));
        let mailbox = Arc::new(MessageStore::new());
        let coordinator = KeyExchangeCoordinator::new(
            params,
            Arc::clone(&keys),
            Arc::clone(&mailbox),
            config.handshake_ttl(),
            config.rekey_policy,
        );
        Self {
            identities: DashMap::new(),
            keys,
            mailbox,
            coordinator,
            key_custody: config.key_custody,
            require_signed_handshake: config.require_signed_handshake,
            envelope_encoding: config.envelope_encoding,
        }
    }

    pub fn user_count(&self) -> usize {
        self.identities.len()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.identities.contains_key(name)
    }

    /// Fail with [`ChatError::UnknownPrincipal`] for each name not registered.
    pub fn require_registered(&self, names: &[&str]) -> Result<(), ChatError> {
        match names.iter().find(|name| !self.is_registered(name)) {
            Some(missing) => Err(ChatError::UnknownPrincipal(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Add a principal; the first registration of a name wins.
    pub fn insert_identity(
        &self,
        name: &str,
        identity: RegisteredIdentity,
    ) -> Result<(), ChatError> {
        match self.identities.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ChatError::PrincipalExists(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(identity);
                Ok(())
            }
        }
    }

    pub fn certificate(&self, name: &str) -> Option<IdentityCertificate> {
        self.identities.get(name).map(|r| r.certificate.clone())
    }

    pub fn signer(&self, name: &str) -> Option<Arc<dyn IdentitySigner>> {
        self.identities.get(name).and_then(|r| r.signer.clone())
    }

    /// Every registered principal except `name`, sorted.
    pub fn other_principals(&self, name: &str) -> Vec<PrincipalName> {
        let mut names: Vec<_> = self
            .identities
            .iter()
            .filter(|entry| entry.key() != name)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}
