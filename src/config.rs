//! Application configuration management.
//!
//! Configuration is layered with figment, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config PATH`, or `config.toml` in the platform config directory)
//! 3. `BIDSTAGE_*` environment variables; nested keys use `__`
//!    (`BIDSTAGE_DOWNLOAD__TIMEOUT_SECS=300`)
//! 4. CLI flags, applied by the caller after loading
//!
//! # Example
//!
//! ```toml
//! run_root = "D:/bids"
//! lookback_days = 3
//! protected_names = ["summary.xlsx"]
//!
//! [download]
//! timeout_secs = 180
//! partial_suffixes = [".crdownload", ".tmp"]
//!
//! [relocate]
//! collision = "fail"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{MissingDatePolicy, RETENTION_DAYS};
use crate::download::{PartialMarkers, WatchConfig, DEFAULT_PARTIAL_SUFFIXES};
use crate::relocate::{CollisionPolicy, Relocator};
use crate::retry::RetryPolicy;

/// Prefix of environment variables read by [`Config::load`].
pub const ENV_PREFIX: &str = "BIDSTAGE_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer could not be parsed or extracted.
    #[error("invalid configuration: {0}")]
    Figment(#[from] figment::Error),

    /// A value is out of range.
    #[error("invalid configuration value for `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Download watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Hard timeout of one wait, in seconds.
    pub timeout_secs: u64,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Non-converging polls before a download is stalled.
    pub stall_threshold: u32,
    /// Suffixes of in-flight files.
    pub partial_suffixes: Vec<String>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 1000,
            stall_threshold: 30,
            partial_suffixes: DEFAULT_PARTIAL_SUFFIXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

/// Relocator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocateSettings {
    /// Total move attempts on lock errors.
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds.
    pub backoff_ms: u64,
    /// Name collision handling.
    pub collision: CollisionPolicy,
}

impl Default for RelocateSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 1000,
            collision: CollisionPolicy::Rename,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Parent of the per-day run directories.
    pub run_root: PathBuf,
    /// Cache directory; defaults to `<run_root>/cache`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Days a cache entry is kept after its discovery date.
    pub retention_days: u32,
    /// Default lookback window for new items, in days.
    pub lookback_days: u32,
    /// Eviction of cache entries without a discovery date.
    pub missing_dates: MissingDatePolicy,
    /// Days subtracted from today to name the run's date directory.
    pub run_date_offset_days: u32,
    /// Save the cache after this many processed items.
    pub save_every: usize,
    /// File names the relocator must never move.
    pub protected_names: Vec<String>,
    pub download: DownloadSettings,
    pub relocate: RelocateSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_root: PathBuf::from("runs"),
            cache_dir: None,
            retention_days: RETENTION_DAYS,
            lookback_days: 2,
            missing_dates: MissingDatePolicy::Evict,
            run_date_offset_days: 1,
            save_every: 1,
            protected_names: Vec::new(),
            download: DownloadSettings::default(),
            relocate: RelocateSettings::default(),
        }
    }
}

/// Keys accepted at the top level of the TOML file.
const TOP_LEVEL_KEYS: &[&str] = &[
    "run_root",
    "cache_dir",
    "retention_days",
    "lookback_days",
    "missing_dates",
    "run_date_offset_days",
    "save_every",
    "protected_names",
    "download",
    "relocate",
];
const DOWNLOAD_KEYS: &[&str] = &[
    "timeout_secs",
    "poll_interval_ms",
    "stall_threshold",
    "partial_suffixes",
];
const RELOCATE_KEYS: &[&str] = &["max_attempts", "backoff_ms", "collision"];

impl Config {
    /// Load the layered configuration.
    ///
    /// With `path == None` the platform default file is used when present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a layer is malformed or a value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.map(Path::to_path_buf).or_else(Self::default_path);
        Self::load_from(file.as_deref())
    }

    /// Load from an explicit file (or none) plus the environment.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            for warning in unknown_keys(file) {
                log::warn!("{}", warning);
            }
            figment = figment.merge(Toml::file(file));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        log::debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    /// Default platform-specific configuration file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "bidstage", "bidstage")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject values that would make the engine spin or never finish.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    key,
                    message: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("download.timeout_secs", self.download.timeout_secs)?;
        positive("download.poll_interval_ms", self.download.poll_interval_ms)?;
        positive("download.stall_threshold", u64::from(self.download.stall_threshold))?;
        positive("relocate.max_attempts", u64::from(self.relocate.max_attempts))?;
        positive("save_every", self.save_every as u64)?;
        if self.download.poll_interval_ms > self.download.timeout_secs.saturating_mul(1000) {
            return Err(ConfigError::Invalid {
                key: "download.poll_interval_ms",
                message: "must not exceed the download timeout".to_string(),
            });
        }
        Ok(())
    }

    /// Effective cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.run_root.join("cache"))
    }

    /// Watcher parameters.
    #[must_use]
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig::default()
            .with_timeout(Duration::from_secs(self.download.timeout_secs))
            .with_poll_interval(Duration::from_millis(self.download.poll_interval_ms))
            .with_stall_threshold(self.download.stall_threshold)
            .with_markers(PartialMarkers::new(&self.download.partial_suffixes))
    }

    /// Retry policy for relocation.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.relocate.max_attempts,
            Duration::from_millis(self.relocate.backoff_ms),
        )
    }

    /// Relocator with the configured protected names.
    #[must_use]
    pub fn relocator(&self) -> Relocator {
        Relocator::new(self.retry_policy(), self.relocate.collision)
            .protect_all(self.protected_names.iter().cloned())
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; not expected for valid configurations.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Warnings for keys in `file` that the configuration does not know.
///
/// Each warning suggests the closest known key when one is similar enough.
/// Unreadable files produce no warnings; figment reports those.
#[must_use]
pub fn unknown_keys(file: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(file) else {
        return Vec::new();
    };
    let Ok(table) = content.parse::<toml::Table>() else {
        return Vec::new();
    };

    let mut warnings = Vec::new();
    check_table(&table, "", TOP_LEVEL_KEYS, &mut warnings);
    if let Some(toml::Value::Table(t)) = table.get("download") {
        check_table(t, "download.", DOWNLOAD_KEYS, &mut warnings);
    }
    if let Some(toml::Value::Table(t)) = table.get("relocate") {
        check_table(t, "relocate.", RELOCATE_KEYS, &mut warnings);
    }
    warnings
}

fn check_table(table: &toml::Table, prefix: &str, known: &[&str], out: &mut Vec<String>) {
    for key in table.keys() {
        if known.contains(&key.as_str()) {
            continue;
        }
        let suggestion = known
            .iter()
            .map(|k| (strsim::jaro_winkler(key, k), *k))
            .filter(|(score, _)| *score > 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0));
        out.push(match suggestion {
            Some((_, k)) => format!("Unknown config key `{prefix}{key}` (did you mean `{prefix}{k}`?)"),
            None => format!("Unknown config key `{prefix}{key}`"),
        });
    }
}
