// config.rs - Substrate configuration.
//
// GovernanceConfig says where the substrate keeps its state (receipt ledger,
// job checkpoints, policy capsule, signing keys) and how strict it is.
// `for_project()` lays out defaults under `.mathison/` in the project root;
// `load()` overlays `.mathison/mathison.toml` when one exists.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use mathison_policy::{loader, LoaderConfig, Posture, VerifyPolicy};
use mathison_token::{ActionDefinition, DEFAULT_TOKEN_TTL_MS};

use crate::error::GatewayError;

/// Directory (relative to the project root) holding all substrate state.
pub const DATA_DIR: &str = ".mathison";

/// Config file name inside [`DATA_DIR`].
pub const CONFIG_FILE: &str = "mathison.toml";

/// Log output format for the binaries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Configuration for one governance substrate.
///
/// Relative paths are resolved against the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Base directory for substrate state.
    pub data_dir: PathBuf,

    /// Append-only receipt ledger (JSON Lines).
    pub receipts_path: PathBuf,

    /// Job checkpoints, one JSON file per job.
    pub checkpoints_dir: PathBuf,

    /// Signed policy capsule. Required; a missing *file* only degrades.
    pub capsule_path: Option<PathBuf>,

    /// Base64 secret for capability tokens.
    pub token_key_path: Option<PathBuf>,

    /// Base64 secret for receipt chain signatures. Always required: a
    /// chain signed by a throwaway key cannot be verified after restart.
    pub chain_key_path: Option<PathBuf>,

    /// Generate a fresh token key at boot instead of reading one. Every
    /// token from a previous run becomes invalid.
    pub ephemeral_token_key: bool,

    pub posture: Posture,

    /// Accept `alg = "dev"` capsules. Ignored in production.
    pub allow_dev_signatures: bool,

    /// Deny instead of returning UNCERTAIN.
    pub strict_mode: bool,

    /// Actors whose STOP halts everyone.
    pub anchor_actors: Vec<String>,

    pub capsule_stale_after_secs: i64,

    /// Zero disables periodic reload.
    pub capsule_reload_interval_secs: i64,

    pub default_token_ttl_ms: i64,

    /// Glob patterns still served under full degradation (read_only tier only).
    pub read_only_allowlist: Vec<String>,

    pub log_format: LogFormat,

    /// Issuer key id to base64 Ed25519 public key.
    pub trusted_issuer_keys: BTreeMap<String, String>,

    /// Actions registered in addition to the built-in set.
    pub actions: Vec<ActionDefinition>,
}

impl Default for GovernanceConfig {
    /// Defaults with paths relative to an unspecified project root.
    fn default() -> Self {
        let data_dir = PathBuf::from(DATA_DIR);
        Self {
            receipts_path: data_dir.join("receipts.jsonl"),
            checkpoints_dir: data_dir.join("checkpoints"),
            capsule_path: Some(data_dir.join("capsule.json")),
            token_key_path: Some(data_dir.join("token.key")),
            chain_key_path: Some(data_dir.join("chain.key")),
            data_dir,
            ephemeral_token_key: false,
            posture: Posture::Production,
            allow_dev_signatures: false,
            strict_mode: false,
            anchor_actors: Vec::new(),
            capsule_stale_after_secs: loader::DEFAULT_STALE_AFTER_SECS,
            capsule_reload_interval_secs: loader::DEFAULT_RELOAD_INTERVAL_SECS,
            default_token_ttl_ms: DEFAULT_TOKEN_TTL_MS,
            read_only_allowlist: LoaderConfig::default().read_only_allowlist,
            log_format: LogFormat::Text,
            trusted_issuer_keys: BTreeMap::new(),
            actions: Vec::new(),
        }
    }
}

impl GovernanceConfig {
    /// Create a config with the standard `.mathison/` layout for a project.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        Self::default().resolved(project_root.as_ref())
    }

    /// Load `<root>/.mathison/mathison.toml`, or the defaults if it does not exist.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let root = project_root.as_ref();
        let path = root.join(DATA_DIR).join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::for_project(root));
        }
        Self::load_file(root, &path)
    }

    /// Load an explicit config file; relative paths inside resolve against `project_root`.
    pub fn load_file(project_root: impl AsRef<Path>, path: &Path) -> Result<Self, GatewayError> {
        let text = std::fs::read_to_string(path).map_err(|source| GatewayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| GatewayError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config.resolved(project_root.as_ref()))
    }

    /// Serialize to TOML, paths as resolved.
    pub fn to_toml(&self) -> Result<String, GatewayError> {
        toml::to_string_pretty(self).map_err(|e| GatewayError::config(e.to_string()))
    }

    /// Check everything that must hold before boot.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.capsule_path.is_none() {
            return Err(GatewayError::config("capsule_path is not configured"));
        }
        if self.chain_key_path.is_none() {
            return Err(GatewayError::config("chain_key_path is not configured"));
        }
        if self.token_key_path.is_none() && !self.ephemeral_token_key {
            return Err(GatewayError::config(
                "token_key_path is not configured and ephemeral_token_key is off",
            ));
        }
        if self.capsule_stale_after_secs <= 0 {
            return Err(GatewayError::config(format!(
                "capsule_stale_after_secs must be positive, got {}",
                self.capsule_stale_after_secs
            )));
        }
        if self.capsule_reload_interval_secs < 0 {
            return Err(GatewayError::config(format!(
                "capsule_reload_interval_secs must not be negative, got {}",
                self.capsule_reload_interval_secs
            )));
        }
        if self.default_token_ttl_ms <= 0 {
            return Err(GatewayError::config(format!(
                "default_token_ttl_ms must be positive, got {}",
                self.default_token_ttl_ms
            )));
        }
        if self.allow_dev_signatures && self.posture.is_production() {
            tracing::warn!("allow_dev_signatures is ignored in production posture");
        }
        Ok(())
    }

    /// Loader settings derived from this config.
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            verify: VerifyPolicy {
                trusted_issuer_keys: self.trusted_issuer_keys.clone(),
                posture: self.posture,
                allow_dev_signatures: self.allow_dev_signatures,
            },
            stale_after: Duration::seconds(self.capsule_stale_after_secs),
            reload_interval: (self.capsule_reload_interval_secs > 0)
                .then(|| Duration::seconds(self.capsule_reload_interval_secs)),
            read_only_allowlist: self.read_only_allowlist.clone(),
        }
    }

    fn resolved(mut self, root: &Path) -> Self {
        let join = |p: &Path| -> PathBuf {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        };
        self.data_dir = join(&self.data_dir);
        self.receipts_path = join(&self.receipts_path);
        self.checkpoints_dir = join(&self.checkpoints_dir);
        self.capsule_path = self.capsule_path.as_deref().map(join);
        self.token_key_path = self.token_key_path.as_deref().map(join);
        self.chain_key_path = self.chain_key_path.as_deref().map(join);
        self
    }
}
