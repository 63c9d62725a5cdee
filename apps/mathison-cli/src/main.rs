//! # mathison-cli
//!
//! Command-line interface for the Mathison governance substrate.
//!
//! - `mathison init` - create `.mathison/` with a config and fresh keys
//! - `mathison receipts verify/tail/query` - inspect the receipt chain
//! - `mathison capsule status/check` - policy capsule state and degradation
//! - `mathison decide` - run one action through the governed gate
//! - `mathison job status/list` - inspect job checkpoints
//! - `mathison keygen` - write a random signing key

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mathison_gateway::{GovernanceConfig, LogFormat};
use tracing_subscriber::EnvFilter;

// Used when RUST_LOG is not set.
const DEFAULT_LOG_DIRECTIVES: &str = "warn,mathison_gateway=info,mathison_policy=info,\
mathison_governance=info,mathison_receipts=info,mathison_jobs=info,mathison_token=info";

/// Mathison CLI: inspect and exercise the governance substrate.
#[derive(Parser)]
#[command(name = "mathison", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".", global = true)]
    project_root: PathBuf,

    /// Config file (defaults to <project-root>/.mathison/mathison.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create `.mathison/` with a default config and signing keys.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Inspect the receipt chain.
    Receipts {
        #[command(subcommand)]
        command: commands::receipts::ReceiptCommands,
    },
    /// Inspect the policy capsule.
    Capsule {
        #[command(subcommand)]
        command: commands::capsule::CapsuleCommands,
    },
    /// Run one action request through the governed gate.
    Decide(commands::decide::DecideArgs),
    /// Inspect job checkpoints.
    Job {
        #[command(subcommand)]
        command: commands::job::JobCommands,
    },
    /// Write a random 32-byte base64 signing key.
    Keygen {
        /// Where to write the key.
        path: PathBuf,
        /// Overwrite an existing key file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let project_root = cli
        .project_root
        .canonicalize()
        .unwrap_or_else(|_| cli.project_root.clone());

    let config = match &cli.config {
        Some(path) => GovernanceConfig::load_file(&project_root, path)?,
        None => GovernanceConfig::load(&project_root)?,
    };
    init_logging(cli.log_json || config.log_format == LogFormat::Json)?;
    tracing::debug!(
        project_root = %project_root.display(),
        receipts = %config.receipts_path.display(),
        posture = %config.posture,
        "config loaded"
    );

    match &cli.command {
        Commands::Init { force } => commands::init::execute(&config, *force),
        Commands::Receipts { command } => commands::receipts::execute(command, &config),
        Commands::Capsule { command } => commands::capsule::execute(command, &config),
        Commands::Decide(args) => commands::decide::execute(args, &config),
        Commands::Job { command } => commands::job::execute(command, &config),
        Commands::Keygen { path, force } => commands::keygen::execute(path, *force),
    }
}

// Logs go to stderr so command output on stdout stays machine-readable.
fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
