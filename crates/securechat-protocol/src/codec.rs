use bytes::{Buf, BytesMut};
use serde::Serialize;

use crate::error::ProtocolError;
use crate::messages::{ClientRequest, ServerResponse};

/// Maximum frame size: 64 KiB.
pub const MAX_MSG_SIZE: u32 = 65_536;

/// Payload budget for one page of fetched messages. The remainder of a frame
/// covers the response tag, the vector length and the `next` cursor.
pub const PAGE_BUDGET: usize = MAX_MSG_SIZE as usize - 256;

/// Longest plaintext accepted for sending, in bytes. A single message of this
/// size, with both principal names at their maximum, still fits in one page.
pub const MAX_TEXT_LEN: usize = MAX_MSG_SIZE as usize - 1024;

/// Current protocol version.
/// v1: DH handshake, CBC envelopes, tagged envelope encoding, signed offers
/// v2: paged message fetch with a sequence cursor
pub const PROTOCOL_VERSION: u32 = 2;

/// Application version, read from Cargo.toml at compile time.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

fn frame(payload: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_MSG_SIZE as usize {
        return Err(ProtocolError::MessageTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encode a `ClientRequest` into a length-prefixed frame.
pub fn encode_request(req: &ClientRequest) -> Result<Vec<u8>, ProtocolError> {
    frame(postcard::to_allocvec(req)?)
}

/// Decode a `ClientRequest` from a postcard payload (without length prefix).
pub fn decode_request(payload: &[u8]) -> Result<ClientRequest, ProtocolError> {
    Ok(postcard::from_bytes(payload)?)
}

/// Encode a `ServerResponse` into a length-prefixed frame.
pub fn encode_response(resp: &ServerResponse) -> Result<Vec<u8>, ProtocolError> {
    frame(postcard::to_allocvec(resp)?)
}

/// Decode a `ServerResponse` from a postcard payload (without length prefix).
pub fn decode_response(payload: &[u8]) -> Result<ServerResponse, ProtocolError> {
    Ok(postcard::from_bytes(payload)?)
}

/// Size in bytes of `value` once postcard-encoded, without the length prefix.
pub fn payload_len<T: Serialize + ?Sized>(value: &T) -> Result<usize, ProtocolError> {
    Ok(postcard::to_allocvec(value)?.len())
}

/// Attempt to extract one complete length-prefixed frame from a byte buffer.
///
/// Returns `Ok(Some(payload))` if a complete message is available,
/// `Ok(None)` if more data is needed, or `Err` if the message is too large.
///
/// Advances the buffer past the consumed frame.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_MSG_SIZE as usize {
        tracing::warn!(length, "rejecting oversized frame");
        return Err(ProtocolError::MessageTooLarge(length));
    }

    if buf.len() < 4 + length {
        return Ok(None);
    }

    buf.advance(4);
    let payload = buf.split_to(length).to_vec();
    Ok(Some(payload))
}
