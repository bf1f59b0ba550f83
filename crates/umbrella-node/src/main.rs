//! Umbrella node.
//!
//! Owns the node's RSA identity, serves it to peers over HTTP, and carries
//! the operator commands for issuing and checking certificates.

mod api;
mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use umbrella_core::certificate::unix_now;
use umbrella_core::encoding::{parse_user_id, public_key_from_pem, user_id_hex};
use umbrella_core::{
    Certificate, CertificateAuthority, CertificateStore, Fingerprint, IdentityService, KeyStore,
    Signature, Verifier,
};

use api::NodeState;
use config::NodeConfig;

/// Build identifier stamped by `build.rs`.
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

#[derive(Debug, Parser)]
#[command(name = "umbrella-node", version = BUILD_VERSION, about = "Umbrella peer identity node")]
struct Cli {
    /// TOML config file. Missing file means defaults.
    #[arg(long, short, env = "UMBRELLA_CONFIG", default_value = "umbrella.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize keys and serve this node's identity over HTTP (default).
    Serve,
    /// Issue a certificate for a subject key, signed with this node's key.
    Sign {
        /// Subject public key file (PKCS#1 PEM, as served at `GET /`).
        #[arg(long)]
        subject: PathBuf,
        /// User id to bind, hex.
        #[arg(long)]
        user_id: String,
    },
    /// Verify a certificate and detached signature.
    Verify {
        /// Certificate JSON file.
        #[arg(long)]
        cert: PathBuf,
        /// Signature file (base64).
        #[arg(long)]
        sig: PathBuf,
        /// Trusted public key file. Defaults to the root key.
        #[arg(long)]
        key: Option<PathBuf>,
    },
    /// Replace this node's keypair with a new one.
    ResetKeys,
    /// Record this node's user id in `<data>/id`.
    SetId {
        /// User id, hex.
        user_id: String,
    },
    /// Show this node's id, key fingerprint and certificate status.
    Whoami,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = NodeConfig::load(&cli.config)?;
    config.apply_process_env()?;

    let keys = Arc::new(KeyStore::new(&config.data_dir, &config.root_dir));
    let identity = IdentityService::new(Arc::clone(&keys), CertificateStore::new(&config.data_dir));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, &keys, identity).await,
        Command::Sign { subject, user_id } => sign(&keys, &identity, &subject, &user_id).await,
        Command::Verify { cert, sig, key } => verify(&keys, &cert, &sig, key.as_deref()),
        Command::ResetKeys => reset_keys(&keys).await,
        Command::SetId { user_id } => {
            let id = parse_user_id(&user_id)?;
            identity.store_node_id(id)?;
            println!("node id set to {}", user_id_hex(id));
            Ok(ExitCode::SUCCESS)
        }
        Command::Whoami => whoami(&config, &identity).await,
    }
}

/// Generate the node keypair if needed, off the async workers.
async fn ensure_keys(keys: &Arc<KeyStore>) -> anyhow::Result<()> {
    let keys = Arc::clone(keys);
    let generated = tokio::task::spawn_blocking(move || keys.ensure_initialized())
        .await
        .context("key initialization task failed")??;
    if generated {
        info!("created new node keypair");
    }
    Ok(())
}

fn resolve_node_id(config: &NodeConfig, identity: &IdentityService) -> anyhow::Result<Option<u64>> {
    match config.user_id()? {
        Some(id) => Ok(Some(id)),
        None => Ok(identity.load_node_id()?),
    }
}

async fn serve(
    config: &NodeConfig,
    keys: &Arc<KeyStore>,
    identity: IdentityService,
) -> anyhow::Result<ExitCode> {
    ensure_keys(keys).await?;
    keys.load_or_init_data_blob()?;

    let fingerprint = Fingerprint::of_public_key(&identity.own_public_key()?)?;
    let node_id = resolve_node_id(config, &identity)?;
    match node_id {
        Some(id) => info!(user_id = %user_id_hex(id), key = %fingerprint.short(), "node identity loaded"),
        None => warn!(key = %fingerprint.short(), "no user id configured; /cert and /sig will return 404"),
    }

    if config.check_own_certificate {
        if let Some(id) = node_id.filter(|id| identity.certificates().contains(*id)) {
            check_own_certificate(&identity, id)?;
        }
    }

    let state = Arc::new(NodeState::new(identity, node_id));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    let addr = listener.local_addr()?;
    info!("Umbrella node {BUILD_VERSION} listening on {addr}");
    info!("Public key:  http://{addr}/");
    info!("Certificate: http://{addr}/cert");
    info!("Signature:   http://{addr}/sig");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(ExitCode::SUCCESS)
}

/// Check the stored certificate for this node against the root key.
///
/// A missing root key is fatal. A certificate that does not verify, or
/// that names a different key, is only reported: the node still serves it,
/// and peers will reach the same verdict.
fn check_own_certificate(identity: &IdentityService, id: u64) -> anyhow::Result<()> {
    let root = identity
        .key_store()
        .load_root_key()
        .context("cannot check own certificate")?;
    let (cert, sig) = identity.own_credentials(id)?;

    match Verifier::verify(&cert, &sig, &root) {
        Ok(certified) if certified.public_key == identity.own_public_key()? => {
            info!(user_id = %user_id_hex(id), "own certificate verified against root key");
        }
        Ok(_) => warn!(
            user_id = %user_id_hex(id),
            "own certificate names a different key; was the keypair reset?"
        ),
        Err(e) => warn!(user_id = %user_id_hex(id), "own certificate rejected: {e}"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn sign(
    keys: &Arc<KeyStore>,
    identity: &IdentityService,
    subject: &Path,
    user_id: &str,
) -> anyhow::Result<ExitCode> {
    let user_id = parse_user_id(user_id)?;
    let subject_pem = std::fs::read_to_string(subject)
        .with_context(|| format!("failed to read subject key {}", subject.display()))?;

    ensure_keys(keys).await?;
    let issuer = keys.load_keypair()?;

    let ca = CertificateAuthority::new(identity.certificates().clone());
    ca.issue_from_pem(&subject_pem, user_id, &issuer)?;

    println!("{}", ca.store().certificate_path(user_id).display());
    println!("{}", ca.store().signature_path(user_id).display());
    Ok(ExitCode::SUCCESS)
}

fn verify(keys: &KeyStore, cert: &Path, sig: &Path, key: Option<&Path>) -> anyhow::Result<ExitCode> {
    let trusted = match key {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read key {}", path.display()))?;
            public_key_from_pem(&pem)?
        }
        None => keys.load_root_key()?,
    };

    let certificate = Certificate::from_bytes(
        std::fs::read(cert).with_context(|| format!("failed to read {}", cert.display()))?,
    );
    let sig_text = std::fs::read_to_string(sig)
        .with_context(|| format!("failed to read {}", sig.display()))?;
    let signature = match Signature::from_text(&sig_text) {
        Ok(signature) => signature,
        Err(e) => bail!("signature file {} is not base64: {e}", sig.display()),
    };

    match Verifier::verify(&certificate, &signature, &trusted) {
        Ok(identity) => {
            println!("valid");
            println!("user_id:   {} ({})", user_id_hex(identity.user_id), identity.user_id);
            println!("issued_at: {}", identity.issued_at);
            println!("age:       {}s", identity.age_at(unix_now()));
            println!("key:       {}", identity.fingerprint()?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("untrusted: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn reset_keys(keys: &Arc<KeyStore>) -> anyhow::Result<ExitCode> {
    let keys = Arc::clone(keys);
    let keypair = tokio::task::spawn_blocking(move || keys.reset_keypair())
        .await
        .context("key reset task failed")??;
    println!("new key: {}", keypair.fingerprint()?);
    warn!("certificates issued for the previous key no longer match this node");
    Ok(ExitCode::SUCCESS)
}

async fn whoami(config: &NodeConfig, identity: &IdentityService) -> anyhow::Result<ExitCode> {
    let Some(id) = resolve_node_id(config, identity)? else {
        let fingerprint = Fingerprint::of_public_key(&identity.own_public_key()?)?;
        println!("user_id:     (not set)");
        println!("fingerprint: {fingerprint}");
        return Ok(ExitCode::SUCCESS);
    };
    let me = identity.whoami(id)?;
    println!("user_id:     {} ({})", me.user_id_hex, me.user_id);
    println!("fingerprint: {}", me.fingerprint);
    println!("certificate: {}", if me.has_certificate { "issued" } else { "none" });
    Ok(ExitCode::SUCCESS)
}
