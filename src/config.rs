//! Configuration file parser for ~/.config/feedstage/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`, which has no sources. Unknown keys are ignored by serde
//! but logged as warnings since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{DedupStrategy, SyncOptions, DEFAULT_CONCURRENCY, DEFAULT_MAX_FEED_BYTES};
use crate::launcher::LaunchTarget;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// No home directory to resolve default paths against.
    #[error("HOME is not set; pass --config or set data_dir explicitly")]
    NoHome,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registered feed sources, in sync order.
    pub urls: Vec<String>,

    /// Base directory for the database and staging area.
    /// Defaults to `$HOME/.local/share/feedstage`.
    pub data_dir: Option<PathBuf>,

    /// Database file, relative paths resolve against `data_dir`.
    pub db_file: Option<PathBuf>,

    /// Staging directory, relative paths resolve against `data_dir`.
    pub staging_dir: Option<PathBuf>,

    /// Program used to open entry links. `BROWSER` overrides.
    pub browser: String,

    /// Program used to open media links. `PLAYER` overrides.
    pub player: String,

    pub sync: SyncConfig,
}

/// The `[sync]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of sources staged at once.
    pub concurrency: usize,
    /// Per-source staging timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// Body size cap for one staged source.
    pub max_feed_bytes: u64,
    /// How entries are told apart. Recorded in the database on the first
    /// sync; a database built with one strategy refuses to sync with another.
    pub dedup: DedupStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            data_dir: None,
            db_file: None,
            staging_dir: None,
            browser: "firefox".to_string(),
            player: "mpv".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout_secs: 30,
            max_feed_bytes: DEFAULT_MAX_FEED_BYTES,
            dedup: DedupStrategy::default(),
        }
    }
}

/// Fully resolved on-disk locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub db_file: PathBuf,
    pub staging_dir: PathBuf,
}

/// Default config file location for a given home directory.
pub fn default_config_path(home: &Path) -> PathBuf {
    home.join(".config").join("feedstage").join("config.toml")
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "urls",
        "data_dir",
        "db_file",
        "staging_dir",
        "browser",
        "player",
        "sync",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
            .inspect(|config| {
                tracing::info!(path = %path.display(), sources = config.urls.len(), "Loaded configuration");
            })
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }

    /// Apply `BROWSER` / `PLAYER` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `BROWSER` / `PLAYER` from `lookup`. Empty values are ignored.
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(browser) = non_empty("BROWSER") {
            tracing::debug!(browser = %browser, "Browser overridden by environment");
            self.browser = browser;
        }
        if let Some(player) = non_empty("PLAYER") {
            tracing::debug!(player = %player, "Player overridden by environment");
            self.player = player;
        }
    }

    /// Registered sources with blank entries dropped.
    pub fn sources(&self) -> Vec<String> {
        self.urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Resolve the data directory, database file and staging directory.
    ///
    /// `home` is only consulted when `data_dir` is unset or starts with `~`.
    pub fn paths(&self, home: Option<&Path>) -> Result<Paths, ConfigError> {
        let data_dir = match &self.data_dir {
            Some(dir) => expand_home(dir, home)?,
            None => home
                .ok_or(ConfigError::NoHome)?
                .join(".local")
                .join("share")
                .join("feedstage"),
        };

        let resolve = |configured: &Option<PathBuf>, default: &str| -> Result<PathBuf, ConfigError> {
            match configured {
                Some(p) => {
                    let p = expand_home(p, home)?;
                    Ok(if p.is_absolute() { p } else { data_dir.join(p) })
                }
                None => Ok(data_dir.join(default)),
            }
        };

        let db_file = resolve(&self.db_file, "feedstage.db")?;
        let staging_dir = resolve(&self.staging_dir, "staging")?;

        Ok(Paths {
            data_dir,
            db_file,
            staging_dir,
        })
    }

    /// Program name configured for a launch target.
    pub fn program_for(&self, target: LaunchTarget) -> &str {
        match target {
            LaunchTarget::Browser => &self.browser,
            LaunchTarget::Player => &self.player,
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            concurrency: self.sync.concurrency.max(1),
            fetch_timeout: Duration::from_secs(self.sync.fetch_timeout_secs.max(1)),
            dedup: self.sync.dedup,
        }
    }
}

fn expand_home(path: &Path, home: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(home.ok_or(ConfigError::NoHome)?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

// ============================================================================
// Tests
// ============================================================================
