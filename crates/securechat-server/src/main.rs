use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::BytesMut;
use clap::{Parser, Subcommand};
use tracing::info;
use zeroize::Zeroizing;

use securechat_crypto::{issue_identity, sign_offer, DhParams, IdentityKeyPair, LocalSigner};
use securechat_protocol::codec::{
    decode_response, encode_request, try_decode_frame, APP_VERSION, PROTOCOL_VERSION,
};
use securechat_protocol::messages::{ClientRequest, ServerResponse};
use securechat_protocol::types::{
    decode_certificate_export, validate_principal_name, DhPublicValue, EnvelopeEncoding,
};

mod config;
mod error;
mod handshake;
mod keystore;
mod mailbox;
mod service;
mod state;

use config::{KeyCustody, RekeyPolicy, ServerConfig};
use service::ChatService;
use state::ServerState;

#[derive(Parser)]
#[command(
    name = "securechat-server",
    version,
    about = "SecureChat identity, key exchange and message server"
)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Who holds principals' private keys, overrides config
    #[arg(long, value_enum)]
    key_custody: Option<KeyCustody>,

    /// What happens to old messages on rekey, overrides config
    #[arg(long, value_enum)]
    rekey_policy: Option<RekeyPolicy>,

    /// Stored envelope encoding ("raw" or "base64"), overrides config
    #[arg(long, value_parser = parse_encoding)]
    envelope_encoding: Option<EnvelopeEncoding>,

    /// Pending handshake lifetime in seconds, overrides config
    #[arg(long)]
    handshake_ttl_secs: Option<u64>,

    /// Accept handshake offers without a signature
    #[arg(long)]
    allow_unsigned_handshakes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Issue an identity and write <NAME>.crt.pem / <NAME>.key.pem
    Issue {
        name: String,

        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// Print the configured DH group
    Params,

    /// Register two principals, run a handshake, send one message and fetch it
    Demo {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        message: String,
    },
}

fn parse_encoding(s: &str) -> Result<EnvelopeEncoding, String> {
    match s {
        "raw" => Ok(EnvelopeEncoding::Raw),
        "base64" => Ok(EnvelopeEncoding::Base64),
        other => Err(format!("unknown envelope encoding: {other}")),
    }
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "securechat_server=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load_from_file(path)?,
        None => ServerConfig::default(),
    };

    // CLI overrides
    if let Some(custody) = args.key_custody {
        config.key_custody = custody;
    }
    if let Some(policy) = args.rekey_policy {
        config.rekey_policy = policy;
    }
    if let Some(encoding) = args.envelope_encoding {
        config.envelope_encoding = encoding;
    }
    if let Some(ttl) = args.handshake_ttl_secs {
        config.handshake_ttl_secs = ttl;
    }
    if args.allow_unsigned_handshakes {
        config.require_signed_handshake = false;
    }

    match args.command {
        Command::Issue { name, out } => issue(&name, &out),
        Command::Params => {
            let params = config.dh_params().context("invalid DH group")?;
            print_params(&params);
            Ok(())
        }
        Command::Demo { from, to, message } => {
            let params = Arc::new(config.dh_params().context("invalid DH group")?);
            info!(
                version = APP_VERSION,
                protocol = PROTOCOL_VERSION,
                "SecureChat server starting"
            );
            info!(
                dh_bits = params.bits(),
                dh_fingerprint = %params.fingerprint(),
                custody = ?config.key_custody,
                rekey_policy = ?config.rekey_policy,
                envelope_encoding = ?config.envelope_encoding,
                signed_handshakes = config.require_signed_handshake,
                handshake_ttl_secs = config.handshake_ttl_secs,
            );

            let service = ChatService::new(Arc::new(ServerState::new(&config, params)));
            run_demo(&service, &from, &to, &message)
        }
    }
}

fn issue(name: &str, out: &Path) -> Result<()> {
    validate_principal_name(name)?;
    let issued = issue_identity(name).context("identity issuance failed")?;

    fs::create_dir_all(out)
        .with_context(|| format!("failed to create output directory: {}", out.display()))?;
    let cert_path = out.join(format!("{name}.crt.pem"));
    let key_path = out.join(format!("{name}.key.pem"));

    fs::write(&cert_path, &issued.certificate.certificate_pem)
        .with_context(|| format!("failed to write {}", cert_path.display()))?;
    write_private(&key_path, &issued.keypair.to_pkcs8_pem()?)?;

    println!("certificate: {}", cert_path.display());
    println!("private key: {}", key_path.display());
    println!("fingerprint: {}", issued.certificate.fingerprint());
    println!("not before:  {}", issued.certificate.not_before);
    println!("not after:   {}", issued.certificate.not_after);
    Ok(())
}

/// Write a file readable only by its owner where the platform allows it.
fn write_private(path: &Path, contents: &str) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn print_params(params: &DhParams) {
    println!("bits:        {}", params.bits());
    println!("generator:   {}", params.generator());
    println!("prime bytes: {}", params.prime_len());
    println!("fingerprint: {}", params.fingerprint());
    println!("protocol:    v{PROTOCOL_VERSION}");
}

/// Send one request through the framing layer and print the response as JSON.
fn roundtrip(
    service: &ChatService,
    caller: Option<&str>,
    request: &ClientRequest,
) -> Result<ServerResponse> {
    let mut inbound = BytesMut::from(&encode_request(request)?[..]);
    let payload = try_decode_frame(&mut inbound)?.context("incomplete request frame")?;

    let mut outbound = BytesMut::from(&service.handle_frame(caller, &payload)?[..]);
    let payload = try_decode_frame(&mut outbound)?.context("incomplete response frame")?;
    let response = decode_response(&payload)?;

    let mut shown = response.clone();
    if let ServerResponse::Registered {
        private_key_pem: Some(pem),
        ..
    } = &mut shown
    {
        *pem = "<redacted>".into();
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);

    if let ServerResponse::Error { code, reason } = &response {
        bail!("{code:?}: {reason}");
    }
    Ok(response)
}

/// Register `name`, returning a signer when the client holds its own key.
fn demo_register(service: &ChatService, name: &str) -> Result<Option<LocalSigner>> {
    let request = ClientRequest::Register {
        username: name.into(),
    };
    let ServerResponse::Registered {
        certificate,
        private_key_pem,
        ..
    } = roundtrip(service, None, &request)?
    else {
        bail!("unexpected response to Register");
    };

    let certificate_pem = decode_certificate_export(&certificate)?;
    info!(
        principal = name,
        certificate_bytes = certificate_pem.len(),
        "certificate export decoded"
    );

    match private_key_pem.map(Zeroizing::new) {
        Some(pem) => {
            let keypair = IdentityKeyPair::from_pkcs8_pem(&pem)?;
            Ok(Some(LocalSigner::new(name, &keypair)))
        }
        None => Ok(None),
    }
}

/// Fetch the whole conversation, following the page cursor.
fn demo_fetch(service: &ChatService, caller: &str, with: &str) -> Result<usize> {
    let mut after = None;
    let mut fetched = 0;
    loop {
        let request = ClientRequest::GetMessages {
            with: with.into(),
            after,
            limit: None,
        };
        match roundtrip(service, Some(caller), &request)? {
            ServerResponse::Messages { messages, next } => {
                fetched += messages.len();
                match next {
                    Some(cursor) => after = Some(cursor),
                    None => return Ok(fetched),
                }
            }
            other => bail!("unexpected response to GetMessages: {other:?}"),
        }
    }
}

fn demo_offer(
    service: &ChatService,
    from: &str,
    to: &str,
    signer: Option<&LocalSigner>,
) -> Result<(DhPublicValue, Option<Vec<u8>>)> {
    let request = ClientRequest::StartHandshake { to: to.into() };
    match roundtrip(service, Some(from), &request)? {
        ServerResponse::HandshakeStarted {
            dh_public,
            signature,
        } => {
            let signature = match signer {
                Some(signer) => Some(sign_offer(signer, to, dh_public.as_str())?),
                None => signature,
            };
            Ok((dh_public, signature))
        }
        other => bail!("unexpected response to StartHandshake: {other:?}"),
    }
}

fn run_demo(service: &ChatService, from: &str, to: &str, message: &str) -> Result<()> {
    let from_signer = demo_register(service, from)?;
    let to_signer = demo_register(service, to)?;

    let (from_public, from_signature) = demo_offer(service, from, to, from_signer.as_ref())?;
    let (to_public, to_signature) = demo_offer(service, to, from, to_signer.as_ref())?;

    roundtrip(
        service,
        Some(from),
        &ClientRequest::CompleteHandshake {
            to: to.into(),
            peer_public: to_public,
            signature: to_signature,
        },
    )?;
    roundtrip(
        service,
        Some(to),
        &ClientRequest::CompleteHandshake {
            to: from.into(),
            peer_public: from_public,
            signature: from_signature,
        },
    )?;

    roundtrip(
        service,
        Some(from),
        &ClientRequest::SendMessage {
            to: to.into(),
            message: message.into(),
        },
    )?;
    let fetched = demo_fetch(service, to, from)?;
    roundtrip(service, Some(from), &ClientRequest::ListSharedKeys)?;

    let state = service.state();
    info!(
        users = state.user_count(),
        shared_keys = state.keys.len(),
        pending_handshakes = state.coordinator.pending_count(),
        stored_messages = state.mailbox.count(from, to),
        fetched,
        dh_bits = state.coordinator.params().bits(),
        "demo finished"
    );
    Ok(())
}
