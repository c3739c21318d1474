//! Snoozebot Agent setup tool.
//!
//! First-run bootstrap for the Agent's crypto material: CA, per-plugin leaf
//! certificates, a trusted signing key, and initial API keys. A
//! `clap::Parser`/`Subcommand` front end over the library's own setup
//! operations, so the logic stays testable independent of argument parsing.

use clap::{Parser, Subcommand};
use snoozebot_agent::setup::{self, exit_code, Layout};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "snoozebot-setup")]
#[command(about = "Bootstrap CA, plugin certs, signing keys, and API keys for the Snoozebot Agent")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base directory for generated crypto material.
    #[arg(long, default_value = "/etc/snoozebot")]
    base_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the CA, one leaf cert per plugin, a signing key, and an API key per plugin.
    Init {
        /// Plugin names to provision (e.g. --plugin aws --plugin gcp).
        #[arg(long = "plugin", required = true)]
        plugins: Vec<String>,
    },

    /// Generate only the CA and per-plugin leaf certificates.
    GenCerts {
        #[arg(long = "plugin", required = true)]
        plugins: Vec<String>,
    },

    /// Generate a new trusted signing key.
    GenSigningKey {
        /// Human-readable name recorded alongside the key.
        #[arg(long, default_value = "snoozebot-setup")]
        name: String,
        /// Key lifetime in seconds.
        #[arg(long, default_value_t = 365 * 24 * 3600)]
        ttl_seconds: i64,
    },

    /// Issue an API key for a single plugin without touching certs or signing keys.
    IssueApiKey {
        /// Plugin name the key is bound to.
        plugin: String,
    },

    /// Generate a fresh signing key and sign a built plugin binary with it in one step.
    ///
    /// The signing private key is never persisted; `init`/`gen-signing-key`
    /// only write the public half, so signing happens in the same process
    /// that generated the key.
    SignPlugin {
        /// Plugin name as recorded in the manifest.
        plugin_name: String,
        /// Plugin version as recorded in the manifest.
        plugin_version: String,
        /// Path to the plugin binary to hash and sign.
        #[arg(long)]
        binary: PathBuf,
        /// Signature lifetime in seconds.
        #[arg(long, default_value_t = 365 * 24 * 3600)]
        ttl_seconds: i64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("snoozebot-setup: {e}");
            ExitCode::from(exit_code::GENERIC_FAILURE as u8)
        }
    }
}

fn run(cli: Cli) -> Result<i32, snoozebot_agent::AgentError> {
    let layout = Layout::new(cli.base_dir.clone());

    match cli.command {
        Commands::Init { plugins } => {
            let summary = setup::run(&cli.base_dir, &plugins)?;
            println!("Initialized Snoozebot crypto material under {}", summary.base_dir.display());
            println!("Signing key id: {}", summary.signing_key_id);
            for (plugin, key) in &summary.api_keys {
                println!("API key for {plugin}: {key}");
            }
            println!("Store each API key in the corresponding plugin's environment; it is not persisted in plaintext.");
            Ok(exit_code::SUCCESS)
        }

        Commands::GenCerts { plugins } => {
            setup::generate_ca_and_certs(&layout, &plugins)?;
            println!("Generated CA and {} leaf certificate(s) under {}", plugins.len(), layout.ca_dir().display());
            Ok(exit_code::SUCCESS)
        }

        Commands::GenSigningKey { name, ttl_seconds } => {
            let (_key, key_id) = setup::generate_signing_key(&layout, &name, ttl_seconds)?;
            println!("Generated signing key: {key_id}");
            Ok(exit_code::SUCCESS)
        }

        Commands::IssueApiKey { plugin } => {
            let issued = setup::issue_initial_api_keys(&layout, &[plugin.clone()])?;
            let (_, key) = issued.into_iter().next().expect("issue_initial_api_keys returns one entry per input name");
            println!("API key for {plugin}: {key}");
            Ok(exit_code::SUCCESS)
        }

        Commands::SignPlugin { plugin_name, plugin_version, binary, ttl_seconds } => {
            if !binary.exists() {
                return Ok(exit_code::CRYPTO_MATERIAL_MISSING);
            }
            let (signing_key, key_id) = setup::generate_signing_key(&layout, &format!("{plugin_name}-signer"), ttl_seconds)?;
            setup::sign_plugin_binary(&layout, &signing_key, &key_id, &plugin_name, &plugin_version, &binary, ttl_seconds)?;
            println!("Signed {plugin_name} v{plugin_version} with key {key_id}");
            Ok(exit_code::SUCCESS)
        }
    }
}
