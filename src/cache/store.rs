//! JSON-backed item cache with time-based eviction.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use super::entry::CacheEntry;
use super::window::{days_before, DateWindow, Decision, MissingDatePolicy};

/// Error type for cache persistence.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache document could not be read.
    #[error("failed to read cache {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The cache document is not valid JSON of the expected shape.
    #[error("malformed cache document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The cache document could not be written.
    #[error("failed to write cache {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Serialization failed.
    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Mapping from item key to [`CacheEntry`], persisted as one JSON object.
///
/// The store is always written in full; a save either replaces the previous
/// document entirely or leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheStore {
    entries: BTreeMap<String, CacheEntry>,
}

impl CacheStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store, treating any problem as "nothing seen yet".
    ///
    /// A missing file is normal on the first run of a job. An unreadable or
    /// malformed file is logged and replaced by an empty store; the next save
    /// overwrites it.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            log::debug!("No cache at {}, starting empty", path.display());
            return Self::new();
        }
        match Self::try_load(path) {
            Ok(store) => {
                log::debug!("Loaded {} cache entries from {}", store.len(), path.display());
                store
            }
            Err(e) => {
                log::warn!("Ignoring unusable cache, starting empty: {}", e);
                Self::new()
            }
        }
    }

    /// Load the store, reporting failures.
    ///
    /// A missing file still yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Read`] or [`CacheError::Malformed`].
    pub fn try_load(path: &Path) -> CacheResult<Self> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(source) => {
                return Err(CacheError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str(&content).map_err(|source| CacheError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the full store atomically.
    ///
    /// The document is written to a temporary file beside `path` and then
    /// renamed over it, so a concurrent reader sees either the old or the new
    /// document.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Write`] if the directory cannot be created or the
    /// file cannot be written or renamed.
    pub fn save(&self, path: &Path) -> CacheResult<()> {
        let write_err = |source: io::Error| CacheError::Write {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(write_err)?;

        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        log::debug!("Saved {} cache entries to {}", self.len(), path.display());
        Ok(())
    }

    /// Drop entries discovered more than `retention_days` before `today`.
    ///
    /// An entry discovered exactly `retention_days` ago is kept. Returns the
    /// number of evicted entries.
    pub fn evict(
        &mut self,
        today: NaiveDate,
        retention_days: u32,
        missing: MissingDatePolicy,
    ) -> usize {
        let cutoff = days_before(today, retention_days);
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry.discovered_date {
            Some(date) => date >= cutoff,
            None => missing == MissingDatePolicy::Keep,
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::info!(
                "Evicted {} cache entries discovered before {}",
                evicted,
                cutoff
            );
        }
        evicted
    }

    /// Classify a discovered item.
    ///
    /// Presence in the store is final: a cached item is never reconsidered
    /// against the window, because caching it already implied that decision.
    #[must_use]
    pub fn decide(&self, key: &str, posted: Option<NaiveDate>, window: &DateWindow) -> Decision {
        if self.entries.contains_key(key) {
            return Decision::AlreadySeen;
        }
        match posted {
            None => Decision::MissingDate,
            Some(date) if window.contains(date) => Decision::Process,
            Some(_) => Decision::OutsideWindow,
        }
    }

    /// Whether a discovered item should be processed.
    #[must_use]
    pub fn should_process(&self, key: &str, posted: Option<NaiveDate>, window: &DateWindow) -> bool {
        self.decide(key, posted, window).should_process()
    }

    /// Insert or refresh the entry for `key`.
    pub fn record(&mut self, key: &str, posted: Option<NaiveDate>, today: NaiveDate) {
        match self.entries.get_mut(key) {
            Some(entry) => entry.touch(posted, today),
            None => {
                self.entries
                    .insert(key.to_string(), CacheEntry::new(posted, today));
            }
        }
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Whether `key` is cached.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an entry, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
