// capsule.rs - Capsule subcommands: status, check.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use mathison_gateway::GovernanceConfig;
use mathison_policy::{CapsuleLoader, LoaderStatus};
use mathison_token::RiskTier;

const TIERS: [RiskTier; 4] = [
    RiskTier::ReadOnly,
    RiskTier::LowRisk,
    RiskTier::MediumRisk,
    RiskTier::HighRisk,
];

#[derive(Subcommand)]
pub enum CapsuleCommands {
    /// Load the configured capsule and show loader state and degradation.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Verify a capsule file without installing it.
    Check {
        /// Capsule to check.
        path: PathBuf,
    },
}

pub fn execute(cmd: &CapsuleCommands, config: &GovernanceConfig) -> anyhow::Result<()> {
    let loader = CapsuleLoader::new(config.loader_config())?;

    match cmd {
        CapsuleCommands::Status { json } => {
            let Some(path) = config.capsule_path.as_deref() else {
                anyhow::bail!("capsule_path is not configured");
            };
            loader.load_capsule(path);
            let status = loader.status();
            if *json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
                println!();
                print_tiers(&loader);
            }
        }

        CapsuleCommands::Check { path } => check(&loader, path)?,
    }

    Ok(())
}

fn check(loader: &CapsuleLoader, path: &Path) -> anyhow::Result<()> {
    let result = loader.load_capsule(path);
    if result.valid {
        let status = loader.status();
        println!("Capsule OK: {}", path.display());
        println!("  Capsule: {}", status.capsule_id.as_deref().unwrap_or("-"));
        println!(
            "  Genome:  {} v{}",
            status.genome_id.as_deref().unwrap_or("-"),
            status.genome_version.as_deref().unwrap_or("-")
        );
        println!("  Hash:    {}", status.capsule_hash.as_deref().unwrap_or("-"));
        if let Some(expires) = status.expires_at {
            println!("  Expires: {}", expires.to_rfc3339());
        }
        Ok(())
    } else {
        println!("Capsule REJECTED: {}", path.display());
        println!("  Reason:      {}", result.error.as_deref().unwrap_or("unknown"));
        println!("  Degradation: {}", result.degradation_level);
        anyhow::bail!("capsule check failed")
    }
}

fn print_status(status: &LoaderStatus) {
    println!("State:       {}", status.state);
    println!("Degradation: {}", status.degradation_level);
    if let Some(path) = &status.path {
        println!("Path:        {}", path.display());
    }
    if let Some(id) = &status.capsule_id {
        println!("Capsule:     {}", id);
    }
    if let Some(genome) = &status.genome_id {
        println!(
            "Genome:      {} v{}",
            genome,
            status.genome_version.as_deref().unwrap_or("-")
        );
    }
    if let Some(posture) = &status.posture {
        println!("Posture:     {}", posture);
    }
    if let Some(age) = status.age_secs {
        println!("Age:         {}s{}", age, if status.stale { " (stale)" } else { "" });
    }
    if let Some(expires) = status.expires_at {
        println!("Expires:     {}", expires.to_rfc3339());
    }
    if let Some(error) = &status.error {
        println!("Error:       {}", error);
    }
}

fn print_tiers(loader: &CapsuleLoader) {
    println!("{:<12} {:<8} REASON", "TIER", "ALLOWED");
    println!("{}", "-".repeat(70));
    for tier in TIERS {
        let decision = loader.is_action_allowed(tier);
        println!(
            "{:<12} {:<8} {}",
            tier.to_string(),
            if decision.allowed { "yes" } else { "no" },
            decision.reason
        );
    }
}
