use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use securechat_crypto::dh::RFC3526_GENERATOR;
use securechat_crypto::{CryptoError, DhParams};
use securechat_protocol::types::EnvelopeEncoding;

/// Which DH group every handshake in this process uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum DhGroup {
    #[default]
    #[serde(rename = "rfc3526-2048")]
    Rfc3526_2048,
    #[serde(rename = "custom")]
    Custom,
}

/// Who holds each principal's RSA private key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KeyCustody {
    /// The key is handed to the client at registration and not kept.
    #[default]
    Client,
    /// The server keeps the key and signs offers on the principal's behalf.
    Server,
}

/// What happens to a pair's messages when its key is superseded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RekeyPolicy {
    /// Delete the pair's stored messages.
    #[default]
    Purge,
    /// Keep old keys by epoch so earlier messages stay readable.
    Retain,
}

/// Server configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub dh_group: DhGroup,

    /// Hex modulus, required when `dh_group = "custom"`.
    #[serde(default)]
    pub dh_prime_hex: Option<String>,

    #[serde(default = "default_dh_generator")]
    pub dh_generator: u32,

    /// Pending handshakes older than this are discarded.
    #[serde(default = "default_handshake_ttl_secs")]
    pub handshake_ttl_secs: u64,

    /// Reject `complete_handshake` unless the peer's offer is signed.
    #[serde(default = "default_require_signed_handshake")]
    pub require_signed_handshake: bool,

    #[serde(default)]
    pub key_custody: KeyCustody,

    #[serde(default)]
    pub rekey_policy: RekeyPolicy,

    /// Representation used for newly stored envelopes.
    #[serde(default)]
    pub envelope_encoding: EnvelopeEncoding,
}

fn default_dh_generator() -> u32 {
    RFC3526_GENERATOR
}

fn default_handshake_ttl_secs() -> u64 {
    300
}

fn default_require_signed_handshake() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dh_group: DhGroup::default(),
            dh_prime_hex: None,
            dh_generator: default_dh_generator(),
            handshake_ttl_secs: default_handshake_ttl_secs(),
            require_signed_handshake: default_require_signed_handshake(),
            key_custody: KeyCustody::default(),
            rekey_policy: RekeyPolicy::default(),
            envelope_encoding: EnvelopeEncoding::default(),
        }
    }
}

impl ServerConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    pub fn handshake_ttl(&self) -> Duration {
        Duration::from_secs(self.handshake_ttl_secs)
    }

    /// Build the process-wide DH group described by this config.
    pub fn dh_params(&self) -> Result<DhParams, CryptoError> {
        match self.dh_group {
            DhGroup::Rfc3526_2048 => Ok(DhParams::rfc3526_2048()),
            DhGroup::Custom => {
                let hex = self.dh_prime_hex.as_deref().ok_or_else(|| {
                    CryptoError::InvalidParameters("dh_group = \"custom\" needs dh_prime_hex".into())
                })?;
                DhParams::from_hex(self.dh_generator, hex)
            }
        }
    }
}
