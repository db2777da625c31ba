//! Request handling: the operations a chat client can invoke, each taking
//! the authenticated caller as its first argument.

use std::sync::Arc;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use securechat_crypto::{
    decrypt, encrypt, issue_identity, sign_offer, verify_offer, CryptoError, IdentityCertificate,
    IdentitySigner, LocalSigner,
};
use securechat_protocol::codec::{
    decode_request, encode_response, payload_len, MAX_TEXT_LEN, PAGE_BUDGET,
};
use securechat_protocol::messages::{ClientRequest, ServerResponse};
use securechat_protocol::types::*;
use securechat_protocol::ProtocolError;

use crate::config::KeyCustody;
use crate::error::ChatError;
use crate::handshake::HandshakeOutcome;
use crate::mailbox::StoredMessage;
use crate::state::{RegisteredIdentity, ServerState};

/// Result of registering a principal.
pub struct Registration {
    pub certificate: IdentityCertificate,
    /// Handed back under client custody; the server keeps no copy.
    pub private_key_pem: Option<Zeroizing<String>>,
}

/// One frame-sized slice of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<DeliveredMessage>,
    /// Cursor to pass as `after` for the following page.
    pub next: Option<MessageSeq>,
}

/// A DH offer ready to pass to the peer.
#[derive(Debug, Clone)]
pub struct HandshakeOffer {
    pub dh_public: DhPublicValue,
    pub signature: Option<Vec<u8>>,
}

pub struct ChatService {
    state: Arc<ServerState>,
}

fn require_distinct(caller: &str, other: &str) -> Result<(), ChatError> {
    if caller == other {
        return Err(ProtocolError::InvalidPrincipalName(format!(
            "{caller} cannot address itself"
        ))
        .into());
    }
    Ok(())
}

impl ChatService {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn register(&self, username: &str) -> Result<Registration, ChatError> {
        validate_principal_name(username)?;
        // Checked up front to skip key generation; insert_identity decides races.
        if self.state.is_registered(username) {
            return Err(ChatError::PrincipalExists(username.to_string()));
        }

        let issued = issue_identity(username)?;
        let (signer, private_key_pem) = match self.state.key_custody {
            KeyCustody::Server => {
                let signer: Arc<dyn IdentitySigner> =
                    Arc::new(LocalSigner::new(username, &issued.keypair));
                (Some(signer), None)
            }
            KeyCustody::Client => (None, Some(issued.keypair.to_pkcs8_pem()?)),
        };

        self.state.insert_identity(
            username,
            RegisteredIdentity {
                certificate: issued.certificate.clone(),
                signer,
            },
        )?;

        info!(
            principal = username,
            fingerprint = %issued.certificate.fingerprint(),
            custody = ?self.state.key_custody,
            total = self.state.user_count(),
            "principal registered"
        );

        Ok(Registration {
            certificate: issued.certificate,
            private_key_pem,
        })
    }

    pub fn list_users(&self, caller: &str) -> Result<Vec<PrincipalName>, ChatError> {
        self.state.require_registered(&[caller])?;
        Ok(self.state.other_principals(caller))
    }

    pub fn start_handshake(&self, caller: &str, to: &str) -> Result<HandshakeOffer, ChatError> {
        self.state.require_registered(&[caller, to])?;
        require_distinct(caller, to)?;

        let dh_public = self.state.coordinator.initiate_handshake(caller, to);
        let signature = match self.state.signer(caller) {
            Some(signer) => Some(sign_offer(&*signer, to, dh_public.as_str())?),
            None => None,
        };
        Ok(HandshakeOffer {
            dh_public,
            signature,
        })
    }

    /// Complete `caller`'s handshake with `to`, given `to`'s offer.
    pub fn complete_handshake(
        &self,
        caller: &str,
        to: &str,
        peer_public: &DhPublicValue,
        signature: Option<&[u8]>,
    ) -> Result<HandshakeOutcome, ChatError> {
        self.state.require_registered(&[caller, to])?;
        require_distinct(caller, to)?;

        let peer_value = self.state.coordinator.validate_peer_value(peer_public)?;
        match signature {
            Some(signature) => self.verify_peer_offer(to, caller, peer_public, signature)?,
            None if self.state.require_signed_handshake => {
                warn!(responder = caller, peer = to, "unsigned offer rejected");
                return Err(ChatError::MissingSignature(to.to_string()));
            }
            None => debug!(responder = caller, peer = to, "accepting unsigned offer"),
        }

        self.state
            .coordinator
            .complete_handshake(caller, to, &peer_value)
    }

    fn verify_peer_offer(
        &self,
        sender: &str,
        recipient: &str,
        value: &DhPublicValue,
        signature: &[u8],
    ) -> Result<(), ChatError> {
        let certificate = self
            .state
            .certificate(sender)
            .ok_or_else(|| ChatError::UnknownPrincipal(sender.to_string()))?;
        verify_offer(&certificate, recipient, value.as_str(), signature).map_err(|e| match e {
            CryptoError::Certificate(reason) => ChatError::CertificateRejected {
                principal: sender.to_string(),
                reason,
            },
            other => {
                warn!(sender, recipient, "offer signature rejected");
                other.into()
            }
        })
    }

    pub fn send_message(&self, caller: &str, to: &str, text: &str) -> Result<TimestampMs, ChatError> {
        self.state.require_registered(&[caller, to])?;
        require_distinct(caller, to)?;
        if text.len() > MAX_TEXT_LEN {
            return Err(ProtocolError::TextTooLong(text.len()).into());
        }

        let shared = self
            .state
            .keys
            .get(caller, to)
            .ok_or_else(|| ChatError::SharedKeyNotFound(caller.to_string(), to.to_string()))?;
        let envelope = encrypt(&shared.key, text)?;
        let envelope_len = envelope.len();

        let (seq, timestamp) = self.state.mailbox.append(
            caller,
            to,
            StoredEnvelope::encode(&envelope, self.state.envelope_encoding),
            shared.epoch,
        );
        debug!(
            from = caller,
            to,
            seq,
            epoch = shared.epoch,
            envelope_len,
            "message stored"
        );
        Ok(unix_millis(timestamp))
    }

    /// Decrypt the conversation between `caller` and `with`, oldest first,
    /// starting after the `after` cursor.
    ///
    /// A page holds at most `limit` messages and never outgrows one response
    /// frame; it always holds at least one message when any remain. A message
    /// that fails to decrypt is reported in place and never hides the rest of
    /// the batch.
    pub fn get_messages(
        &self,
        caller: &str,
        with: &str,
        after: Option<MessageSeq>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ChatError> {
        self.state.require_registered(&[caller, with])?;
        require_distinct(caller, with)?;
        if self.state.keys.get(caller, with).is_none() {
            return Err(ChatError::SharedKeyNotFound(
                caller.to_string(),
                with.to_string(),
            ));
        }

        let stored = self.state.mailbox.conversation(caller, with, after);
        let available = stored.len();
        let limit = limit.map_or(usize::MAX, |limit| limit.max(1) as usize);

        let mut messages = Vec::new();
        let mut used = 0;
        for message in stored {
            if messages.len() == limit {
                break;
            }
            let delivered = self.open(message);
            let size = payload_len(&delivered)?;
            if !messages.is_empty() && used + size > PAGE_BUDGET {
                break;
            }
            used += size;
            messages.push(delivered);
        }

        let next = if messages.len() < available {
            messages.last().map(|m| m.seq)
        } else {
            None
        };
        debug!(
            caller,
            with,
            returned = messages.len(),
            remaining = available - messages.len(),
            page_bytes = used,
            "conversation page"
        );
        Ok(MessagePage { messages, next })
    }

    fn open(&self, message: StoredMessage) -> DeliveredMessage {
        let body = match self.try_open(&message) {
            Ok(text) => MessageBody::Text(text),
            Err(e) => {
                warn!(
                    from = %message.sender,
                    to = %message.recipient,
                    epoch = message.key_epoch,
                    code = ?e.code(),
                    "message could not be decrypted"
                );
                MessageBody::Undecryptable {
                    code: e.code(),
                    reason: e.to_string(),
                }
            }
        };
        DeliveredMessage {
            seq: message.seq,
            from: message.sender,
            to: message.recipient,
            timestamp_ms: unix_millis(message.timestamp),
            body,
        }
    }

    fn try_open(&self, message: &StoredMessage) -> Result<String, ChatError> {
        let shared = self
            .state
            .keys
            .get_epoch(&message.sender, &message.recipient, message.key_epoch)
            .ok_or_else(|| {
                ChatError::SharedKeyNotFound(message.sender.clone(), message.recipient.clone())
            })?;
        let envelope = message.envelope.to_raw()?;
        Ok(decrypt(&shared.key, &envelope)?)
    }

    pub fn list_shared_keys(&self, caller: &str) -> Result<Vec<SharedKeyInfo>, ChatError> {
        self.state.require_registered(&[caller])?;
        Ok(self
            .state
            .keys
            .pairs_for(caller)
            .iter()
            .map(|shared| shared.info())
            .collect())
    }

    /// Dispatch one request. `caller` is `None` before the session layer
    /// has authenticated anyone, which only `Register` allows.
    pub fn handle(&self, caller: Option<&str>, request: ClientRequest) -> ServerResponse {
        let result = match (caller, request) {
            (Some(caller), request) => self.dispatch(caller, request),
            (None, ClientRequest::Register { username }) => self.register_response(&username),
            (None, _) => Err(ChatError::UnknownPrincipal("<unauthenticated>".into())),
        };

        result.unwrap_or_else(|e| ServerResponse::Error {
            code: e.code(),
            reason: e.to_string(),
        })
    }

    fn register_response(&self, username: &str) -> Result<ServerResponse, ChatError> {
        let registration = self.register(username)?;
        Ok(ServerResponse::Registered {
            certificate: registration.certificate.to_base64(),
            fingerprint: registration.certificate.fingerprint(),
            private_key_pem: registration
                .private_key_pem
                .map(|pem| pem.as_str().to_owned()),
        })
    }

    fn dispatch(&self, caller: &str, request: ClientRequest) -> Result<ServerResponse, ChatError> {
        match request {
            ClientRequest::Register { username } => self.register_response(&username),
            ClientRequest::ListUsers => Ok(ServerResponse::Users {
                users: self.list_users(caller)?,
            }),
            ClientRequest::StartHandshake { to } => {
                let offer = self.start_handshake(caller, &to)?;
                Ok(ServerResponse::HandshakeStarted {
                    dh_public: offer.dh_public,
                    signature: offer.signature,
                })
            }
            ClientRequest::CompleteHandshake {
                to,
                peer_public,
                signature,
            } => {
                let outcome =
                    self.complete_handshake(caller, &to, &peer_public, signature.as_deref())?;
                Ok(ServerResponse::HandshakeCompleted {
                    epoch: outcome.shared.epoch,
                    superseded: outcome.superseded(),
                })
            }
            ClientRequest::SendMessage { to, message } => Ok(ServerResponse::MessageSent {
                timestamp_ms: self.send_message(caller, &to, &message)?,
            }),
            ClientRequest::GetMessages { with, after, limit } => {
                let page = self.get_messages(caller, &with, after, limit)?;
                Ok(ServerResponse::Messages {
                    messages: page.messages,
                    next: page.next,
                })
            }
            ClientRequest::ListSharedKeys => Ok(ServerResponse::SharedKeys {
                keys: self.list_shared_keys(caller)?,
            }),
        }
    }

    /// Decode a framed payload, handle it, and encode the framed response.
    ///
    /// A response that cannot be framed is replaced by an `Internal` error
    /// frame, so every request gets an answer.
    pub fn handle_frame(&self, caller: Option<&str>, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let response = match decode_request(payload) {
            Ok(request) => self.handle(caller, request),
            Err(e) => {
                warn!(error = %e, "malformed request");
                ServerResponse::Error {
                    code: ErrorCode::MalformedRequest,
                    reason: e.to_string(),
                }
            }
        };
        frame_response(caller, &response)
    }
}

fn frame_response(caller: Option<&str>, response: &ServerResponse) -> Result<Vec<u8>, ProtocolError> {
    encode_response(response).or_else(|e| {
        warn!(caller = ?caller, error = %e, "response could not be framed");
        encode_response(&ServerResponse::Error {
            code: ErrorCode::Internal,
            reason: e.to_string(),
        })
    })
}
