//! relaybox CLI
//!
//! Thin wrapper around relaybox-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Create a principal and their keypair
//! relaybox keygen alice --private-key alice.pem
//! relaybox keygen bob --private-key bob.pem
//!
//! # Send a file (sealed for bob, mirrored into alice's outbox)
//! relaybox send --from alice --to bob --meta subject=minutes report.pdf
//!
//! # Send to a principal on a configured remote host
//! relaybox --config relay.json send --from alice --to carol --host far.example report.pdf
//!
//! # List and open envelopes
//! relaybox list bob
//! relaybox open bob 0 --private-key bob.pem --out report.pdf
//! relaybox list alice --outbox --private-key alice.pem
//!
//! # Securely erase a file
//! relaybox erase old-upload.bin
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relaybox_core::crypto::{
    fingerprint, generate_keypair, private_key_from_pem, private_key_to_pem, MIN_RSA_BITS,
};
use relaybox_core::envelope::{list, open};
use relaybox_core::{
    validate_username, DeliveryRequest, EnvelopeNotifier, EraseOutcome, FsPrincipalDirectory,
    JobEvent, JobOutcome, Metadata, PrincipalDirectory, Relay, RelayConfig, RsaPrivateKey,
    RsaPublicKey, ShutdownPolicy,
};
use tokio_util::sync::CancellationToken;

/// relaybox - encrypted store-and-forward file relay
#[derive(Parser)]
#[command(name = "relaybox")]
#[command(version = "0.1.0")]
#[command(about = "relaybox - encrypted store-and-forward file relay")]
#[command(
    long_about = "Seals files into per-recipient RSA/AES envelopes, mirrors a copy to the sender's outbox and securely erases the upload afterwards."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.relaybox)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file (overrides --data-dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a keypair and register the public half for a principal
    Keygen {
        /// Username to register
        user: String,

        /// Where to write the PKCS#8 private key
        #[arg(long)]
        private_key: PathBuf,

        /// RSA modulus size (default from config)
        #[arg(long)]
        bits: Option<usize>,
    },

    /// Relay a file to a principal
    Send {
        /// Sending principal
        #[arg(long)]
        from: String,

        /// Receiving principal
        #[arg(long)]
        to: String,

        /// Remote host of the receiving principal
        #[arg(long)]
        host: Option<String>,

        /// Extra metadata as key=value (repeatable)
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,

        /// File to send
        file: PathBuf,
    },

    /// List envelopes in a principal's inbox (or outbox)
    List {
        user: String,

        /// List the outbox instead of the inbox
        #[arg(long)]
        outbox: bool,

        /// Decrypt and show metadata with this private key
        #[arg(long)]
        private_key: Option<PathBuf>,
    },

    /// Decrypt an envelope
    Open {
        user: String,

        /// Envelope ordinal as shown by `list`
        ordinal: u64,

        /// Recipient's private key
        #[arg(long)]
        private_key: PathBuf,

        /// Open from the outbox instead of the inbox
        #[arg(long)]
        outbox: bool,

        /// Where to write the decrypted payload
        #[arg(long)]
        out: PathBuf,
    },

    /// Overwrite a file three times and delete it
    Erase {
        file: PathBuf,

        /// Overwrite only, do not delete
        #[arg(long)]
        keep: bool,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.relaybox)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relaybox")
}

/// Parse a `key=value` metadata pair
fn parse_meta(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => anyhow::bail!("Invalid metadata '{}': expected key=value", s),
    }
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let config = match &cli.config {
        Some(path) => RelayConfig::load(path)?,
        None => {
            let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
            RelayConfig::for_data_dir(data_dir)
        }
    };
    config.validate()?;
    Ok(config)
}

fn read_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read private key {}: {}", path.display(), e))?;
    Ok(private_key_from_pem(&pem)?)
}

fn mailbox(directory: &FsPrincipalDirectory, user: &str, outbox: bool) -> Result<PathBuf> {
    let principal = directory.resolve(user)?;
    Ok(if outbox {
        principal.outbox
    } else {
        principal.inbox
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(&cli)?;
    let directory = Arc::new(config.principal_directory());

    match cli.command {
        Commands::Keygen {
            user,
            private_key,
            bits,
        } => {
            validate_username(&user)?;
            let bits = bits.unwrap_or(config.rsa_bits);
            if bits < MIN_RSA_BITS {
                anyhow::bail!("Key size must be at least {} bits (got {})", MIN_RSA_BITS, bits);
            }

            println!("Generating {}-bit RSA key for {}...", bits, user);
            let secret = tokio::task::spawn_blocking(move || generate_keypair(bits)).await??;
            let public = RsaPublicKey::from(&secret);

            let pem = private_key_to_pem(&secret)?;
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&private_key)
                .map_err(|e| {
                    anyhow::anyhow!("Cannot create {}: {}", private_key.display(), e)
                })?;
            file.write_all(pem.as_bytes())?;
            file.sync_all()?;

            let principal = directory.register(&user, &public)?;

            println!("Registered principal:");
            println!("  User: {}", principal.username);
            println!("  Fingerprint: {}", fingerprint(&public)?);
            println!("  Inbox: {}", principal.inbox.display());
            println!("  Private key: {}", private_key.display());
        }

        Commands::Send {
            from,
            to,
            host,
            meta,
            file,
        } => {
            let mut metadata = Metadata::new();
            if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
                metadata.insert("filename", name);
            }
            metadata.insert("sent_at", chrono::Utc::now().to_rfc3339());
            for (key, value) in meta {
                metadata.insert(key, value);
            }

            let notifier = Arc::new(EnvelopeNotifier::new(directory.clone()));
            let relay = Relay::start(config, directory, notifier)?;
            let mut events = relay.subscribe();

            let source = BufReader::new(File::open(&file).map_err(|e| {
                anyhow::anyhow!("Cannot open {}: {}", file.display(), e)
            })?);
            let payload = relay.spool().stage(source)?;
            let request = DeliveryRequest::new(payload, &from, &to, metadata);

            let job_id = match &host {
                Some(host) => relay.forward(host.clone(), request)?,
                None => relay.deliver(request)?,
            };
            tracing::info!(%job_id, "Relay job queued");

            // The job was just queued; a discarding shutdown would drop it
            relay.shutdown_with(ShutdownPolicy::Drain).await;

            let mut failures = Vec::new();
            let mut mirrored = false;
            while let Ok(event) = events.try_recv() {
                match event {
                    JobEvent::Finished {
                        kind,
                        outcome: JobOutcome::Failed(reason),
                        ..
                    } => failures.push(format!("{}: {}", kind, reason)),
                    JobEvent::Finished {
                        kind: "mirror",
                        outcome: JobOutcome::Completed,
                        ..
                    } => mirrored = true,
                    JobEvent::Discarded { kind, .. } => failures.push(format!("{}: discarded", kind)),
                    JobEvent::Finished { .. } => {}
                }
            }
            if !failures.is_empty() {
                anyhow::bail!("Relay failed:\n  {}", failures.join("\n  "));
            }
            if !mirrored {
                match &host {
                    Some(host) => anyhow::bail!(
                        "Relay failed: {}@{} is unknown; a failure notice was sealed into {}'s inbox",
                        to,
                        host,
                        from
                    ),
                    None => anyhow::bail!("Relay failed: {} was not delivered to {}", file.display(), to),
                }
            }

            match host {
                Some(host) => println!("Relayed {} from {} to {}@{}", file.display(), from, to, host),
                None => println!("Relayed {} from {} to {}", file.display(), from, to),
            }
        }

        Commands::List {
            user,
            outbox,
            private_key,
        } => {
            let dir = mailbox(&directory, &user, outbox)?;
            let secret = private_key.as_deref().map(read_private_key).transpose()?;
            let envelopes = list(&dir)?;

            if envelopes.is_empty() {
                println!("No envelopes in {}.", dir.display());
                return Ok(());
            }

            println!("Envelopes ({}):", envelopes.len());
            for names in envelopes {
                match &secret {
                    Some(secret) => {
                        let opened = open(&dir, names.ordinal, secret)?;
                        println!(
                            "  {}  {}",
                            names.ordinal,
                            serde_json::to_string(opened.metadata())?
                        );
                    }
                    None => println!("  {}", names.ordinal),
                }
            }
        }

        Commands::Open {
            user,
            ordinal,
            private_key,
            outbox,
            out,
        } => {
            let dir = mailbox(&directory, &user, outbox)?;
            let secret = read_private_key(&private_key)?;
            let opened = open(&dir, ordinal, &secret)?;

            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&out)
                .map_err(|e| anyhow::anyhow!("Cannot create {}: {}", out.display(), e))?;
            let mut writer = BufWriter::new(file);
            let written = opened.decrypt_to(&mut writer)?;
            writer.flush()?;

            println!("{}", serde_json::to_string_pretty(opened.metadata())?);
            println!("Wrote {} bytes to {}", written, out.display());
        }

        Commands::Erase { file, keep } => {
            let eraser = config.eraser()?;
            let cancel = CancellationToken::new();

            let watcher = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                })
            };

            let target = file.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                if keep {
                    eraser.erase(&target, &cancel)
                } else {
                    eraser.destroy(&target, &cancel)
                }
            })
            .await??;
            watcher.abort();

            match outcome {
                EraseOutcome::Missing => println!("{} does not exist.", file.display()),
                EraseOutcome::Completed { len } => {
                    println!("Erased {} ({} bytes)", file.display(), len)
                }
                EraseOutcome::Cancelled { pass } => {
                    anyhow::bail!("Erase of {} cancelled during pass {}", file.display(), pass)
                }
            }
        }
    }

    Ok(())
}
