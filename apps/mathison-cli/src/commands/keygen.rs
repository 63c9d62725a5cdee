// keygen.rs - Write a random signing key.

use std::path::Path;

use mathison_crypto::signing::encode_b64;
use mathison_crypto::{generate_secret, SigningKey};

pub fn execute(path: &Path, force: bool) -> anyhow::Result<()> {
    let key = write_key(path, force)?;
    println!("Wrote signing key to {}", path.display());
    println!("  Key id: {}", key.key_id());
    Ok(())
}

/// Generate a 32-byte secret, write it base64-encoded to `path`, and return the key.
pub fn write_key(path: &Path, force: bool) -> anyhow::Result<SigningKey> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite; outstanding tokens or chain signatures will stop verifying)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let secret = generate_secret()?;
    std::fs::write(path, encode_b64(&secret))?;
    restrict_permissions(path)?;
    Ok(SigningKey::from_secret(&secret)?)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn written_key_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys/token.key");
        let key = write_key(&path, false).unwrap();
        let loaded = SigningKey::load(&path).unwrap();
        assert_eq!(key.key_id(), loaded.key_id());
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.key");
        let first = write_key(&path, false).unwrap();
        assert!(write_key(&path, false).is_err());
        let second = write_key(&path, true).unwrap();
        assert_ne!(first.key_id(), second.key_id());
    }
}
