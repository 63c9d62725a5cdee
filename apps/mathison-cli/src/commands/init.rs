// init.rs - Create the `.mathison/` layout for a project.

use mathison_gateway::config::CONFIG_FILE;
use mathison_gateway::GovernanceConfig;

use super::keygen;

pub fn execute(config: &GovernanceConfig, force: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.checkpoints_dir)?;

    let config_path = config.data_dir.join(CONFIG_FILE);
    if config_path.exists() && !force {
        println!("Config exists: {}", config_path.display());
    } else {
        std::fs::write(&config_path, config.to_toml()?)?;
        println!("Wrote config:  {}", config_path.display());
    }

    for (label, path) in [
        ("Token key", config.token_key_path.as_deref()),
        ("Chain key", config.chain_key_path.as_deref()),
    ] {
        let Some(path) = path else { continue };
        if path.exists() {
            println!("{} exists: {}", label, path.display());
        } else {
            let key = keygen::write_key(path, false)?;
            println!("{} written: {} (id {})", label, path.display(), key.key_id());
        }
    }

    if let Some(capsule) = &config.capsule_path {
        if !capsule.exists() {
            println!();
            println!("No policy capsule at {}.", capsule.display());
            println!("Until one is installed the substrate runs in full degradation (read-only actions only).");
        }
    }
    Ok(())
}
