//! The `.skein/config.yaml` file.
//!
//! All fields carry serde defaults so a partially-specified file loads
//! cleanly; a missing or empty file yields the default configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors from configuration load/save.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Identifier generation mode
// ---------------------------------------------------------------------------

/// How new issue ids are minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdMode {
    /// Short base-36 hash suffixes. Concurrently minted ids do not collide
    /// on merge, so this is the default for multi-agent projects.
    #[default]
    Hash,
    /// Monotonic integer suffixes (`sk-1`, `sk-2`, ...).
    Sequential,
}

// ---------------------------------------------------------------------------
// Orphan policy
// ---------------------------------------------------------------------------

/// What an import does with an edge whose far end is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Abort the import.
    #[default]
    Strict,
    /// Try to resurrect the missing issue from the mirror's git history,
    /// else behave like `Strict`.
    Resurrect,
    /// Drop the edge with a warning.
    Skip,
    /// Keep the edge, flagging the missing end as cross-store.
    Allow,
}

// ---------------------------------------------------------------------------
// Sub-sections
// ---------------------------------------------------------------------------

/// Identifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdConfig {
    #[serde(default)]
    pub mode: IdMode,

    /// Hash suffix length to start from (3..=8).
    #[serde(default = "default_hash_length", rename = "hash-length")]
    pub hash_length: usize,

    /// Project salt mixed into hash ids so distinct projects sharing titles
    /// do not mint identical ids.
    #[serde(default)]
    pub salt: String,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            mode: IdMode::default(),
            hash_length: default_hash_length(),
            salt: String::new(),
        }
    }
}

fn default_hash_length() -> usize {
    3
}

/// Sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Default orphan policy for imports.
    #[serde(default, rename = "orphan-policy")]
    pub orphan_policy: OrphanPolicy,

    /// Tombstone share (0.0..=1.0) above which a full sync compacts the
    /// mirror.
    #[serde(default = "default_tombstone_ratio", rename = "compact-tombstone-ratio")]
    pub compact_tombstone_ratio: f64,

    /// Whether sync commits the mirror to the host VCS.
    #[serde(default, rename = "commit-mirror")]
    pub commit_mirror: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            orphan_policy: OrphanPolicy::default(),
            compact_tombstone_ratio: default_tombstone_ratio(),
            commit_mirror: false,
        }
    }
}

fn default_tombstone_ratio() -> f64 {
    0.5
}

/// Custom extension values declared by the project.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtensionsConfig {
    /// Comma-separated extra statuses.
    #[serde(default)]
    pub statuses: String,

    /// Comma-separated extra issue types.
    #[serde(default)]
    pub types: String,
}

// ---------------------------------------------------------------------------
// Main config
// ---------------------------------------------------------------------------

/// Full project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Issue id prefix (`sk` mints `sk-9f2`).
    #[serde(default = "default_prefix", rename = "issue-prefix")]
    pub prefix: String,

    #[serde(default)]
    pub ids: IdConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub extensions: ExtensionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            ids: IdConfig::default(),
            sync: SyncConfig::default(),
            extensions: ExtensionsConfig::default(),
        }
    }
}

fn default_prefix() -> String {
    "sk".to_string()
}

impl Config {
    /// Custom statuses as trimmed, non-empty strings.
    pub fn custom_statuses(&self) -> Vec<String> {
        parse_comma_list(&self.extensions.statuses)
    }

    /// Custom issue types as trimmed, non-empty strings.
    pub fn custom_types(&self) -> Vec<String> {
        parse_comma_list(&self.extensions.types)
    }
}

fn parse_comma_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Loads `config.yaml` from the given `.skein/` directory. Missing or empty
/// files yield the defaults.
pub fn load_config(store_dir: &Path) -> Result<Config> {
    let path = store_dir.join("config.yaml");
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(&path)?;
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(&content)?)
}

/// Saves `config.yaml` into the given `.skein/` directory, creating it if
/// needed.
pub fn save_config(store_dir: &Path, config: &Config) -> Result<()> {
    std::fs::create_dir_all(store_dir)?;
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(store_dir.join("config.yaml"), yaml)?;
    Ok(())
}
