// loader.rs - The policy capsule loader and degraded-mode enforcement.
//
// The loader holds the current capsule behind `RwLock<Arc<CapsuleSnapshot>>`.
// A load builds a complete new snapshot off to the side and then swaps the
// `Arc` in one write; readers clone the `Arc` and never see a half-updated
// capsule. Every failure installs a snapshot with no capsule, so enforcement
// always narrows:
//
//   state        degradation  allowed tiers
//   ----------   -----------  ---------------------------------------
//   Valid        None         all (the genome ceiling still applies)
//   Stale        Partial      everything except high_risk
//   NotLoaded    Full         read_only only
//   Loading      Full         read_only only
//   Invalid      Full         read_only only

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use mathison_crypto::hasher;
use mathison_token::RiskTier;

use crate::capsule::PolicyCapsule;
use crate::error::PolicyError;
use crate::verify::{self, Verification, VerifyPolicy};

/// Default age after which a loaded capsule is considered stale.
pub const DEFAULT_STALE_AFTER_SECS: i64 = 3600;
/// Default interval between automatic reload attempts.
pub const DEFAULT_RELOAD_INTERVAL_SECS: i64 = 300;

/// Lifecycle state of the loaded capsule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotLoaded,
    Loading,
    Valid,
    Invalid,
    Stale,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::NotLoaded => write!(f, "not_loaded"),
            LoadState::Loading => write!(f, "loading"),
            LoadState::Valid => write!(f, "valid"),
            LoadState::Invalid => write!(f, "invalid"),
            LoadState::Stale => write!(f, "stale"),
        }
    }
}

/// How much enforcement has been narrowed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    None,
    Partial,
    Full,
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradationLevel::None => write!(f, "none"),
            DegradationLevel::Partial => write!(f, "partial"),
            DegradationLevel::Full => write!(f, "full"),
        }
    }
}

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub verify: VerifyPolicy,
    pub stale_after: Duration,
    /// `None` disables automatic reload.
    pub reload_interval: Option<Duration>,
    /// Glob patterns for actions still permitted under full degradation.
    /// Only actions whose registered tier is `read_only` can match.
    pub read_only_allowlist: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            verify: VerifyPolicy::default(),
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECS),
            reload_interval: Some(Duration::seconds(DEFAULT_RELOAD_INTERVAL_SECS)),
            read_only_allowlist: vec!["memory_read_*".to_string(), "memory_search".to_string()],
        }
    }
}

/// A capsule that passed every check, plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedCapsule {
    pub capsule: PolicyCapsule,
    /// SHA-256 of the canonical capsule document.
    pub capsule_hash: String,
    pub loaded_at: DateTime<Utc>,
    pub verification: Verification,
}

/// One immutable view of the loader's state.
#[derive(Debug, Clone)]
pub struct CapsuleSnapshot {
    /// Base state as of the last load. `Valid` becomes `Stale` by age; see
    /// `CapsuleLoader::state_at`.
    state: LoadState,
    capsule: Option<Arc<LoadedCapsule>>,
    error: Option<String>,
    path: Option<PathBuf>,
    last_attempt: Option<DateTime<Utc>>,
}

impl CapsuleSnapshot {
    fn not_loaded() -> Self {
        Self {
            state: LoadState::NotLoaded,
            capsule: None,
            error: None,
            path: None,
            last_attempt: None,
        }
    }

    pub fn capsule(&self) -> Option<&LoadedCapsule> {
        self.capsule.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Result of a `load_capsule` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadStatus {
    pub valid: bool,
    pub error: Option<String>,
    pub degradation_level: DegradationLevel,
}

/// Answer to "may an action of this tier run right now?".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierDecision {
    pub allowed: bool,
    pub reason: String,
}

/// Point-in-time status for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderStatus {
    pub state: LoadState,
    pub valid: bool,
    pub stale: bool,
    pub degradation_level: DegradationLevel,
    pub path: Option<PathBuf>,
    pub capsule_id: Option<String>,
    pub genome_id: Option<String>,
    pub genome_version: Option<String>,
    pub capsule_hash: Option<String>,
    pub posture: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub error: Option<String>,
}

/// Loads and serves the current policy capsule.
#[derive(Debug)]
pub struct CapsuleLoader {
    config: LoaderConfig,
    allowlist: Vec<Pattern>,
    current: RwLock<Arc<CapsuleSnapshot>>,
    // Serializes loads so there is a single writer.
    reload_lock: Mutex<()>,
}

impl CapsuleLoader {
    /// Create a loader in the `NotLoaded` state.
    ///
    /// Fails if an allowlist entry is not a valid glob pattern.
    pub fn new(config: LoaderConfig) -> Result<Self, PolicyError> {
        let allowlist = config
            .read_only_allowlist
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| PolicyError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            allowlist,
            current: RwLock::new(Arc::new(CapsuleSnapshot::not_loaded())),
            reload_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<CapsuleSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn install(&self, snapshot: CapsuleSnapshot) {
        let next = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Load, validate, and install the capsule at `path`.
    pub fn load_capsule(&self, path: &Path) -> LoadStatus {
        self.load_capsule_at(path, Utc::now())
    }

    pub fn load_capsule_at(&self, path: &Path, now: DateTime<Utc>) -> LoadStatus {
        let _writer = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = self.snapshot();
        if previous.capsule.is_none() {
            self.install(CapsuleSnapshot {
                state: LoadState::Loading,
                path: Some(path.to_path_buf()),
                last_attempt: Some(now),
                ..CapsuleSnapshot::not_loaded()
            });
        }

        match read_and_verify(path, &self.config.verify, now) {
            Ok(loaded) => {
                tracing::info!(
                    path = %path.display(),
                    capsule_id = %loaded.capsule.capsule_id,
                    genome_id = %loaded.capsule.genome.genome_id,
                    genome_version = %loaded.capsule.genome.version,
                    capsule_hash = %loaded.capsule_hash,
                    "policy capsule loaded"
                );
                self.install(CapsuleSnapshot {
                    state: LoadState::Valid,
                    capsule: Some(Arc::new(loaded)),
                    error: None,
                    path: Some(path.to_path_buf()),
                    last_attempt: Some(now),
                });
                LoadStatus {
                    valid: true,
                    error: None,
                    degradation_level: DegradationLevel::None,
                }
            }
            Err(err) => {
                let state = match err {
                    PolicyError::NotFound { .. } => LoadState::NotLoaded,
                    _ => LoadState::Invalid,
                };
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    state = %state,
                    "policy capsule rejected; enforcement fully degraded"
                );
                self.install(CapsuleSnapshot {
                    state,
                    capsule: None,
                    error: Some(err.to_string()),
                    path: Some(path.to_path_buf()),
                    last_attempt: Some(now),
                });
                LoadStatus {
                    valid: false,
                    error: Some(err.to_string()),
                    degradation_level: DegradationLevel::Full,
                }
            }
        }
    }

    /// Reload from the last path if the reload interval has elapsed.
    ///
    /// Returns `None` when no reload was due, or when another load is
    /// already running.
    pub fn maybe_reload_at(&self, now: DateTime<Utc>) -> Option<LoadStatus> {
        let interval = self.config.reload_interval?;
        let snapshot = self.snapshot();
        let path = snapshot.path.clone()?;
        let due = match snapshot.last_attempt {
            Some(last) => now - last >= interval,
            None => true,
        };
        if !due {
            return None;
        }
        // Skip rather than queue behind an in-flight load.
        if self.reload_lock.try_lock().is_err() {
            return None;
        }
        tracing::debug!(path = %path.display(), "reloading policy capsule");
        Some(self.load_capsule_at(&path, now))
    }

    /// The effective state at `now` (a valid capsule may have gone stale).
    pub fn state_at(&self, now: DateTime<Utc>) -> LoadState {
        effective_state(&self.snapshot(), &self.config, now)
    }

    pub fn degradation_at(&self, now: DateTime<Utc>) -> DegradationLevel {
        degradation_for(self.state_at(now))
    }

    /// May an action of `tier` run? Uses the current time.
    pub fn is_action_allowed(&self, tier: RiskTier) -> TierDecision {
        self.is_action_allowed_at(tier, Utc::now())
    }

    pub fn is_action_allowed_at(&self, tier: RiskTier, now: DateTime<Utc>) -> TierDecision {
        let snapshot = self.snapshot();
        let state = effective_state(&snapshot, &self.config, now);
        match state {
            LoadState::Valid => TierDecision {
                allowed: true,
                reason: "policy capsule valid".to_string(),
            },
            LoadState::Stale if tier == RiskTier::HighRisk => TierDecision {
                allowed: false,
                reason: format!(
                    "policy capsule is stale ({}); {} actions denied until it is reloaded",
                    stale_detail(&snapshot, &self.config, now),
                    tier
                ),
            },
            LoadState::Stale => TierDecision {
                allowed: true,
                reason: format!(
                    "policy capsule is stale ({}); {} permitted under partial degradation",
                    stale_detail(&snapshot, &self.config, now),
                    tier
                ),
            },
            _ if tier == RiskTier::ReadOnly => TierDecision {
                allowed: true,
                reason: format!(
                    "no valid policy capsule ({}); read_only permitted under full degradation",
                    invalid_detail(&snapshot, state, now)
                ),
            },
            _ => TierDecision {
                allowed: false,
                reason: format!(
                    "no valid policy capsule ({}); {} actions denied under full degradation",
                    invalid_detail(&snapshot, state, now),
                    tier
                ),
            },
        }
    }

    /// Whether `action` is on the degraded-mode read-only allowlist.
    pub fn is_allowlisted(&self, action: &str) -> bool {
        self.allowlist.iter().any(|p| p.matches(action))
    }

    pub fn status(&self) -> LoaderStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> LoaderStatus {
        let snapshot = self.snapshot();
        let state = effective_state(&snapshot, &self.config, now);
        let loaded = snapshot.capsule();
        LoaderStatus {
            state,
            valid: matches!(state, LoadState::Valid | LoadState::Stale),
            stale: state == LoadState::Stale,
            degradation_level: degradation_for(state),
            path: snapshot.path.clone(),
            capsule_id: loaded.map(|l| l.capsule.capsule_id.clone()),
            genome_id: loaded.map(|l| l.capsule.genome.genome_id.clone()),
            genome_version: loaded.map(|l| l.capsule.genome.version.clone()),
            capsule_hash: loaded.map(|l| l.capsule_hash.clone()),
            posture: loaded.map(|l| l.capsule.posture.to_string()),
            loaded_at: loaded.map(|l| l.loaded_at),
            expires_at: loaded.map(|l| l.capsule.expires_at),
            age_secs: loaded.map(|l| (now - l.loaded_at).num_seconds()),
            error: match loaded {
                Some(l) if l.capsule.is_expired_at(now) => Some(format!(
                    "capsule expired at {}",
                    l.capsule.expires_at.to_rfc3339()
                )),
                _ => snapshot.error.clone(),
            },
        }
    }
}

fn read_and_verify(
    path: &Path,
    policy: &VerifyPolicy,
    now: DateTime<Utc>,
) -> Result<LoadedCapsule, PolicyError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            PolicyError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            PolicyError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let (raw, capsule) = verify::parse_capsule(path, &text)?;
    let verification = verify::verify_capsule(&raw, &capsule, policy, now)?;
    let capsule_hash = hasher::hash_canonical(&raw)?;
    Ok(LoadedCapsule {
        capsule,
        capsule_hash,
        loaded_at: now,
        verification,
    })
}

fn effective_state(snapshot: &CapsuleSnapshot, config: &LoaderConfig, now: DateTime<Utc>) -> LoadState {
    match (snapshot.state, snapshot.capsule()) {
        // Expiry fails closed exactly like loading an expired file would.
        (LoadState::Valid, Some(loaded)) if loaded.capsule.is_expired_at(now) => LoadState::Invalid,
        (LoadState::Valid, Some(loaded)) => {
            if now - loaded.loaded_at > config.stale_after {
                LoadState::Stale
            } else {
                LoadState::Valid
            }
        }
        (LoadState::Valid, None) => LoadState::Invalid,
        (state, _) => state,
    }
}

fn invalid_detail(snapshot: &CapsuleSnapshot, state: LoadState, now: DateTime<Utc>) -> String {
    match snapshot.capsule() {
        Some(loaded) if loaded.capsule.is_expired_at(now) => format!(
            "{}: capsule expired at {}",
            state,
            loaded.capsule.expires_at.to_rfc3339()
        ),
        _ => state.to_string(),
    }
}

fn degradation_for(state: LoadState) -> DegradationLevel {
    match state {
        LoadState::Valid => DegradationLevel::None,
        LoadState::Stale => DegradationLevel::Partial,
        LoadState::NotLoaded | LoadState::Loading | LoadState::Invalid => DegradationLevel::Full,
    }
}

fn stale_detail(snapshot: &CapsuleSnapshot, config: &LoaderConfig, now: DateTime<Utc>) -> String {
    match snapshot.capsule() {
        Some(loaded) => format!(
            "loaded {}s ago, stale after {}s",
            (now - loaded.loaded_at).num_seconds(),
            config.stale_after.num_seconds()
        ),
        None => "no capsule".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::Posture;
    use serde_json::json;

    fn dev_config() -> LoaderConfig {
        LoaderConfig {
            verify: VerifyPolicy {
                posture: Posture::Development,
                allow_dev_signatures: true,
                ..Default::default()
            },
            stale_after: Duration::seconds(60),
            reload_interval: Some(Duration::seconds(30)),
            ..Default::default()
        }
    }

    fn write_dev_capsule(dir: &Path, allow: &[&str]) -> PathBuf {
        write_dev_capsule_expiring(dir, allow, Utc::now() + Duration::days(1))
    }

    fn write_dev_capsule_expiring(dir: &Path, allow: &[&str], expires_at: DateTime<Utc>) -> PathBuf {
        let path = dir.join("capsule.json");
        let capsule = json!({
            "version": "1.0",
            "capsule_id": "cap-dev",
            "issued_at": (Utc::now() - Duration::minutes(1)).to_rfc3339(),
            "expires_at": expires_at.to_rfc3339(),
            "issuer": "local",
            "treaty": {"treaty_id": "t-1"},
            "genome": {
                "genome_id": "g-dev",
                "version": "0.1.0",
                "capabilities": [{"cap_id": "CAP-ALL", "allow_actions": allow}],
                "authority": {"signers": [], "threshold": 1}
            },
            "posture": "development",
            "signature": {"alg": "dev", "key_id": "dev"}
        });
        std::fs::write(&path, serde_json::to_string_pretty(&capsule).unwrap()).unwrap();
        path
    }

    #[test]
    fn no_capsule_allows_only_read_only() {
        let loader = CapsuleLoader::new(LoaderConfig::default()).unwrap();
        let now = Utc::now();
        assert_eq!(loader.state_at(now), LoadState::NotLoaded);
        assert!(loader.is_action_allowed_at(RiskTier::ReadOnly, now).allowed);
        for tier in [RiskTier::LowRisk, RiskTier::MediumRisk, RiskTier::HighRisk] {
            let d = loader.is_action_allowed_at(tier, now);
            assert!(!d.allowed);
            assert!(d.reason.contains("full degradation"));
        }
    }

    #[test]
    fn missing_file_is_full_degradation() {
        let dir = tempfile::tempdir().unwrap();
        let loader = CapsuleLoader::new(LoaderConfig::default()).unwrap();
        let status = loader.load_capsule(&dir.path().join("absent.json"));
        assert!(!status.valid);
        assert_eq!(status.degradation_level, DegradationLevel::Full);
        assert!(status.error.unwrap().contains("not found"));
        assert_eq!(loader.status().state, LoadState::NotLoaded);
    }

    #[test]
    fn malformed_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capsule.json");
        std::fs::write(&path, "{ nope").unwrap();
        let loader = CapsuleLoader::new(dev_config()).unwrap();
        let status = loader.load_capsule(&path);
        assert!(!status.valid);
        assert_eq!(loader.status().state, LoadState::Invalid);
    }

    #[test]
    fn valid_then_stale_narrows_high_risk() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dev_capsule(dir.path(), &["memory_write_node"]);
        let loader = CapsuleLoader::new(dev_config()).unwrap();
        let t0 = Utc::now();
        let status = loader.load_capsule_at(&path, t0);
        assert!(status.valid, "{:?}", status.error);
        assert_eq!(status.degradation_level, DegradationLevel::None);
        assert!(loader.is_action_allowed_at(RiskTier::HighRisk, t0).allowed);

        let later = t0 + Duration::seconds(61);
        assert_eq!(loader.state_at(later), LoadState::Stale);
        assert_eq!(loader.degradation_at(later), DegradationLevel::Partial);
        let d = loader.is_action_allowed_at(RiskTier::HighRisk, later);
        assert!(!d.allowed);
        assert!(d.reason.contains("stale"));
        assert!(loader.is_action_allowed_at(RiskTier::MediumRisk, later).allowed);
    }

    #[test]
    fn expiry_while_loaded_is_full_degradation() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Utc::now();
        let path = write_dev_capsule_expiring(
            dir.path(),
            &["memory_write_node"],
            t0 + Duration::seconds(10),
        );
        let config = LoaderConfig {
            stale_after: Duration::seconds(3600),
            reload_interval: None,
            ..dev_config()
        };
        let running = CapsuleLoader::new(config.clone()).unwrap();
        assert!(running.load_capsule_at(&path, t0).valid);
        assert_eq!(running.state_at(t0), LoadState::Valid);

        let later = t0 + Duration::seconds(20);
        assert_eq!(running.state_at(later), LoadState::Invalid);
        assert_eq!(running.degradation_at(later), DegradationLevel::Full);
        let d = running.is_action_allowed_at(RiskTier::MediumRisk, later);
        assert!(!d.allowed);
        assert!(d.reason.contains("expired"), "{}", d.reason);
        assert!(running.is_action_allowed_at(RiskTier::ReadOnly, later).allowed);
        let status = running.status_at(later);
        assert!(!status.valid);
        assert!(status.error.unwrap().contains("expired"));

        // A process started after expiry sees the same thing.
        let fresh = CapsuleLoader::new(config).unwrap();
        assert!(!fresh.load_capsule_at(&path, later).valid);
        assert_eq!(fresh.state_at(later), LoadState::Invalid);
        assert!(!fresh.is_action_allowed_at(RiskTier::MediumRisk, later).allowed);
    }

    #[test]
    fn failed_reload_drops_previous_capsule() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dev_capsule(dir.path(), &["memory_write_node"]);
        let loader = CapsuleLoader::new(dev_config()).unwrap();
        assert!(loader.load_capsule(&path).valid);

        std::fs::write(&path, "garbage").unwrap();
        let status = loader.load_capsule(&path);
        assert!(!status.valid);
        assert!(loader.snapshot().capsule().is_none());
        assert!(!loader.is_action_allowed(RiskTier::MediumRisk).allowed);
    }

    #[test]
    fn reload_respects_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dev_capsule(dir.path(), &["memory_write_node"]);
        let loader = CapsuleLoader::new(dev_config()).unwrap();
        let t0 = Utc::now();
        loader.load_capsule_at(&path, t0);

        assert!(loader.maybe_reload_at(t0 + Duration::seconds(10)).is_none());
        let status = loader.maybe_reload_at(t0 + Duration::seconds(31)).unwrap();
        assert!(status.valid);
        // A reload resets staleness.
        assert_eq!(
            loader.state_at(t0 + Duration::seconds(61)),
            LoadState::Valid
        );
    }

    #[test]
    fn status_reports_genome() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dev_capsule(dir.path(), &["memory_write_node"]);
        let loader = CapsuleLoader::new(dev_config()).unwrap();
        loader.load_capsule(&path);
        let status = loader.status();
        assert!(status.valid);
        assert_eq!(status.genome_id.as_deref(), Some("g-dev"));
        assert_eq!(status.capsule_hash.as_ref().map(|h| h.len()), Some(64));
    }

    #[test]
    fn allowlist_globs() {
        let loader = CapsuleLoader::new(LoaderConfig::default()).unwrap();
        assert!(loader.is_allowlisted("memory_read_node"));
        assert!(loader.is_allowlisted("memory_search"));
        assert!(!loader.is_allowlisted("memory_write_node"));

        let bad = LoaderConfig {
            read_only_allowlist: vec!["[".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            CapsuleLoader::new(bad),
            Err(PolicyError::InvalidPattern { .. })
        ));
    }
}
