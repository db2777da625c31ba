//! Boundary contracts for SecureChat: wire types, request/response
//! messages and length-prefixed framing.

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use error::ProtocolError;
