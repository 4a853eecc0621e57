//! Per-run context.
//!
//! A [`RunContext`] carries everything that identifies one run of one job:
//! where run folders live, where the job's cache file lives, which date the
//! run is filed under and which clock answers "today".

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::cache::days_before;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::lifecycle::DATE_DIR_FORMAT;

/// Identity and locations of a single run.
#[derive(Clone)]
pub struct RunContext {
    job_name: String,
    run_root: PathBuf,
    cache_dir: PathBuf,
    run_date_offset_days: u32,
    clock: Arc<dyn Clock>,
}

impl RunContext {
    /// Context with the default layout: cache under `<run_root>/cache`,
    /// run date one day before today, system clock.
    #[must_use]
    pub fn new(job_name: impl Into<String>, run_root: impl Into<PathBuf>) -> Self {
        let run_root = run_root.into();
        Self {
            job_name: job_name.into(),
            cache_dir: run_root.join("cache"),
            run_root,
            run_date_offset_days: 1,
            clock: Arc::new(SystemClock),
        }
    }

    /// Context built from the loaded configuration.
    #[must_use]
    pub fn from_config(job_name: impl Into<String>, config: &Config) -> Self {
        Self::new(job_name, config.run_root.clone())
            .with_cache_dir(config.cache_dir())
            .with_run_date_offset(config.run_date_offset_days)
    }

    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    #[must_use]
    pub fn with_run_date_offset(mut self, days: u32) -> Self {
        self.run_date_offset_days = days;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    #[must_use]
    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Date the run is filed under.
    #[must_use]
    pub fn run_date(&self) -> NaiveDate {
        days_before(self.today(), self.run_date_offset_days)
    }

    /// `<run_root>/<YYYY-MM-DD>` for the run date.
    #[must_use]
    pub fn date_dir(&self) -> PathBuf {
        self.run_root
            .join(self.run_date().format(DATE_DIR_FORMAT).to_string())
    }

    /// `<cache_dir>/<job>_cache.json`.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}_cache.json", self.job_name))
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("job_name", &self.job_name)
            .field("run_root", &self.run_root)
            .field("cache_dir", &self.cache_dir)
            .field("run_date", &self.run_date())
            .finish()
    }
}
