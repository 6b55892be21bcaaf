//! Latch CLI - Manage passcodes in a file-backed latch store
//!
//! Drives the same headless flows an app UI would, feeding them codes
//! from the command line. Biometrics are never available here, so the
//! biometric commands only manage the persisted preference.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use latch_core::{
    run_flow, BiometricGate, CancelToken, ChangeFlow, CreateFlow, CredentialStore,
    Flow, FlowStep, HashAlgorithm, LatchConfig, PasscodeController, PasscodePrompter, RemoveFlow,
    UnavailableAuthenticator, MISMATCH_MESSAGE,
};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "latch")]
#[command(about = "Manage app passcodes stored by latch", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Passcode key
    #[arg(short, long, global = true, default_value = "app")]
    key: String,

    /// Hash algorithm for new credentials (sha256, argon2id)
    #[arg(long, global = true)]
    algorithm: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether a passcode is set
    Status,

    /// Create a passcode
    Create {
        /// New passcode
        #[arg(long)]
        code: String,

        /// Confirmation (defaults to the passcode)
        #[arg(long)]
        verify: Option<String>,
    },

    /// Change the passcode
    Change {
        /// Current passcode
        #[arg(long)]
        code: String,

        /// New passcode
        #[arg(long)]
        new: String,

        /// Confirmation (defaults to the new passcode)
        #[arg(long)]
        verify: Option<String>,
    },

    /// Remove the passcode
    Remove {
        /// Current passcode
        #[arg(long)]
        code: String,
    },

    /// Check a passcode; exits non-zero on mismatch
    Verify {
        /// Passcode to check
        #[arg(long)]
        code: String,
    },

    /// Biometric unlock preference
    #[command(subcommand)]
    Biometrics(BiometricCommands),
}

#[derive(Subcommand)]
enum BiometricCommands {
    /// Opt in (requires a successful challenge)
    Enable,
    /// Opt out
    Disable,
    /// Show availability and preference
    Status,
}

/// Answers prompts from a fixed list of entries
struct ArgPrompter {
    entries: Mutex<VecDeque<String>>,
}

impl ArgPrompter {
    fn new<I: IntoIterator<Item = String>>(entries: I) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
        }
    }
}

#[async_trait]
impl PasscodePrompter for ArgPrompter {
    async fn prompt(&self, step: &FlowStep) -> Option<String> {
        if step.mismatch {
            eprintln!("{}", MISMATCH_MESSAGE);
            return None;
        }
        debug!("{}", step.prompt.message());
        self.entries.lock().ok()?.pop_front()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "latch=info,latch_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(LatchConfig::default_path);
    let mut config = LatchConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    if let Some(name) = &cli.algorithm {
        config.hash_algorithm = name.parse::<HashAlgorithm>()?;
    }
    config.validate()?;

    let (credentials, gate) = latch_core::open(&config, Arc::new(UnavailableAuthenticator))
        .with_context(|| format!("Failed to open store at {:?}", config.storage_path))?;
    let controller = Arc::new(latch_core::configured_controller(
        &config,
        &cli.key,
        credentials.clone(),
        gate.clone(),
    ));

    match cli.command {
        Commands::Status => print_status(&controller, &credentials)?,
        Commands::Create { code, verify } => {
            let verify = verify.unwrap_or_else(|| code.clone());
            let mut flow = CreateFlow::new(controller.clone());
            drive(&mut flow, [code, verify]).await?;
            println!("Passcode created for {}", cli.key);
        }
        Commands::Change { code, new, verify } => {
            if !controller.is_set() {
                bail!("No passcode set for {}", cli.key);
            }
            let verify = verify.unwrap_or_else(|| new.clone());
            let mut flow = ChangeFlow::new(controller.clone());
            drive(&mut flow, [code, new, verify]).await?;
            println!("Passcode changed for {}", cli.key);
        }
        Commands::Remove { code } => {
            if !controller.is_set() {
                println!("No passcode set for {}", cli.key);
                return Ok(());
            }
            let mut flow = RemoveFlow::new(controller.clone());
            drive(&mut flow, [code]).await?;
            println!("Passcode removed for {}", cli.key);
        }
        Commands::Verify { code } => {
            let Some(mut flow) = controller.lock_screen() else {
                bail!("No passcode set for {}", cli.key);
            };
            drive(&mut flow, [code]).await?;
            println!("Passcode accepted");
        }
        Commands::Biometrics(command) => biometrics(command, &gate).await?,
    }

    Ok(())
}

/// Run a flow with the given entries; fails when it does not complete
async fn drive<F, const N: usize>(flow: &mut F, entries: [String; N]) -> Result<()>
where
    F: Flow,
{
    let prompter = ArgPrompter::new(entries);
    let outcome = run_flow(flow, &prompter, &CancelToken::new()).await?;
    if !outcome.confirmed {
        bail!("Passcode not accepted");
    }
    Ok(())
}

fn print_status(controller: &PasscodeController, credentials: &CredentialStore) -> Result<()> {
    let key = controller.key();
    match credentials.get(key)? {
        Some(credential) => {
            println!("{}: set ({}, {})", key, credential.format, credential.algorithm);
            if let Some(updated_at) = credential.updated_at {
                println!("  updated: {}", updated_at.to_rfc3339());
            }
            if let Some(secs) = controller.lockout_remaining_seconds() {
                println!("  locked out for {} seconds", secs);
            }
        }
        None => println!("{}: not set", key),
    }
    Ok(())
}

async fn biometrics(command: BiometricCommands, gate: &BiometricGate) -> Result<()> {
    match command {
        BiometricCommands::Enable => match gate.set_enabled(true).await {
            Ok(true) => println!("Biometric unlock enabled"),
            Ok(false) => bail!("Biometric unlock not enabled"),
            Err(e) => {
                if e.suggests_settings() {
                    eprintln!("Check biometric access in the system settings");
                }
                return Err(e).context("Biometric challenge failed");
            }
        },
        BiometricCommands::Disable => {
            gate.set_enabled(false).await?;
            info!("Biometric preference cleared");
            println!("Biometric unlock disabled");
        }
        BiometricCommands::Status => {
            let kind = gate.kind().display_name().unwrap_or("none");
            let status = serde_json::json!({
                "available": gate.is_available(),
                "enabled": gate.is_enabled(),
                "kind": kind,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
