use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {0} bytes (max 65536)")]
    MessageTooLarge(usize),

    #[error("message text too long: {0} bytes (max {max})", max = crate::codec::MAX_TEXT_LEN)]
    TextTooLong(usize),

    #[error("invalid principal name: {0}")]
    InvalidPrincipalName(String),

    #[error("DH public value is not a canonical decimal integer")]
    InvalidDhValue,

    #[error("envelope is not valid {0}")]
    InvalidEnvelopeEncoding(&'static str),

    #[error("certificate export is not base64-encoded PEM")]
    InvalidCertificateExport,

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_too_large_display() {
        let e = ProtocolError::MessageTooLarge(100000);
        let msg = e.to_string();
        assert!(msg.contains("100000"));
    }

    #[test]
    fn text_too_long_display() {
        let e = ProtocolError::TextTooLong(70000);
        assert_eq!(
            e.to_string(),
            "message text too long: 70000 bytes (max 64512)"
        );
    }

    #[test]
    fn invalid_principal_name_display() {
        let e = ProtocolError::InvalidPrincipalName("empty".into());
        assert!(e.to_string().contains("empty"));
    }

    #[test]
    fn invalid_encoding_display() {
        let e = ProtocolError::InvalidEnvelopeEncoding("base64");
        assert_eq!(e.to_string(), "envelope is not valid base64");
    }

    #[test]
    fn from_postcard_error() {
        let err = postcard::from_bytes::<u32>(&[]).unwrap_err();
        let proto_err: ProtocolError = err.into();
        assert!(matches!(proto_err, ProtocolError::Serialization(_)));
    }
}
