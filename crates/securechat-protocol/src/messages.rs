use serde::{Deserialize, Serialize};

use crate::types::*;

/// Requests from an authenticated client. The calling principal is resolved
/// by the session layer and passed alongside, never inside, the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Register a new principal; issues its keypair and certificate.
    Register { username: PrincipalName },

    /// List every other registered principal.
    ListUsers,

    /// Begin a DH handshake towards `to`.
    StartHandshake { to: PrincipalName },

    /// Finish the caller's pending handshake with `to` using `to`'s public value.
    CompleteHandshake {
        to: PrincipalName,
        peer_public: DhPublicValue,
        /// `to`'s signature over the offer, required when signed handshakes are enforced.
        signature: Option<Vec<u8>>,
    },

    /// Encrypt and store a message for `to`.
    SendMessage { to: PrincipalName, message: String },

    /// Fetch and decrypt the conversation with `with`, oldest first, one
    /// frame-sized page at a time.
    GetMessages {
        with: PrincipalName,
        /// Only messages with a sequence number above this cursor.
        after: Option<MessageSeq>,
        /// Upper bound on the number of messages in the page.
        limit: Option<u32>,
    },

    /// List the pairs the caller currently shares a key with.
    ListSharedKeys,
}

/// Responses to [`ClientRequest`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerResponse {
    Registered {
        /// base64(PEM) of the self-signed certificate.
        certificate: String,
        fingerprint: String,
        /// PKCS#8 PEM, present only when the client holds its own key.
        private_key_pem: Option<String>,
    },

    Users { users: Vec<PrincipalName> },

    HandshakeStarted {
        dh_public: DhPublicValue,
        /// Offer signature made on the caller's behalf under server custody.
        signature: Option<Vec<u8>>,
    },

    HandshakeCompleted {
        epoch: KeyEpoch,
        /// False when the key matched the one already established for the pair.
        superseded: bool,
    },

    MessageSent { timestamp_ms: TimestampMs },

    Messages {
        messages: Vec<DeliveredMessage>,
        /// Cursor for the following page; `None` once the conversation is exhausted.
        next: Option<MessageSeq>,
    },

    SharedKeys { keys: Vec<SharedKeyInfo> },

    Error { code: ErrorCode, reason: String },
}
