//! Staging directory watcher.
//!
//! # Overview
//!
//! A browser writes a download under a reserved partial name and renames it
//! once finished. The watcher polls the staging directory and decides between
//! three outcomes:
//!
//! - **Completed**: no partial markers remain and the first finished file kept
//!   the same size across two consecutive polls.
//! - **Stalled**: a partial file did not grow for `stall_threshold`
//!   consecutive polls, or a finished file kept changing size for that many
//!   polls without settling.
//! - **TimedOut**: the hard timeout elapsed first.
//!
//! File contents are never read; completion is a size-stability heuristic.
//!
//! # Concurrency
//!
//! One watcher serves one staging directory. It cannot tell which request a
//! finished file belongs to, so callers serialize downloads per directory.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use bytesize::ByteSize;

use super::markers::PartialMarkers;

/// Polling parameters for [`DownloadWatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Hard upper bound on a single wait.
    pub timeout: Duration,
    /// Delay between two directory scans.
    pub poll_interval: Duration,
    /// Consecutive non-converging polls before a download counts as stalled.
    pub stall_threshold: u32,
    /// Suffixes that mark in-flight files.
    pub markers: PartialMarkers,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            stall_threshold: 30,
            markers: PartialMarkers::default(),
        }
    }
}

impl WatchConfig {
    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the stall threshold (at least one poll).
    #[must_use]
    pub fn with_stall_threshold(mut self, stall_threshold: u32) -> Self {
        self.stall_threshold = stall_threshold.max(1);
        self
    }

    /// Set the partial-file markers.
    #[must_use]
    pub fn with_markers(mut self, markers: PartialMarkers) -> Self {
        self.markers = markers;
        self
    }
}

/// Outcome of waiting on a staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadResult {
    /// A finished file; its size was stable across two polls.
    Completed(PathBuf),
    /// The download stopped converging. Carries the offending file, which the
    /// caller should discard with [`discard_partial`].
    Stalled(PathBuf),
    /// Nothing finished before the timeout.
    TimedOut,
}

impl DownloadResult {
    /// The completed file, if any.
    #[must_use]
    pub fn completed(&self) -> Option<&Path> {
        match self {
            Self::Completed(p) => Some(p),
            _ => None,
        }
    }
}

/// One file seen during a poll.
#[derive(Debug, Clone)]
struct Observed {
    name: String,
    path: PathBuf,
    size: u64,
    partial: bool,
}

/// Finished file awaiting a second matching size reading.
#[derive(Debug)]
struct Candidate {
    name: String,
    size: u64,
    changes: u32,
}

/// Polls a staging directory until a browser download finishes.
#[derive(Debug)]
pub struct DownloadWatcher {
    staging: PathBuf,
    config: WatchConfig,
    baseline: HashSet<OsString>,
}

impl DownloadWatcher {
    /// Create a watcher for `staging`.
    #[must_use]
    pub fn new(staging: &Path, config: WatchConfig) -> Self {
        Self {
            staging: staging.to_path_buf(),
            config,
            baseline: HashSet::new(),
        }
    }

    /// The watched directory.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// The polling parameters.
    #[must_use]
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Record the files currently present so later waits ignore them.
    ///
    /// Call this right before triggering a download when the staging directory
    /// may hold leftovers. Returns the number of files in the baseline.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory cannot be listed.
    pub fn snapshot(&mut self) -> io::Result<usize> {
        self.baseline = fs::read_dir(&self.staging)?
            .filter_map(Result::ok)
            .map(|e| e.file_name())
            .collect();
        Ok(self.baseline.len())
    }

    /// Add one file to the baseline so later waits stop returning it.
    ///
    /// Used for a completed file that could not be relocated and would
    /// otherwise be reported again by every following wait.
    pub fn ignore(&mut self, path: &Path) {
        if let Some(name) = path.file_name() {
            self.baseline.insert(name.to_os_string());
        }
    }

    /// Forget the baseline; every file is considered again.
    pub fn clear_snapshot(&mut self) {
        self.baseline.clear();
    }

    /// Block until a download completes, stalls, or the timeout elapses.
    #[must_use]
    pub fn wait_for_completion(&self) -> DownloadResult {
        let started = Instant::now();
        let threshold = self.config.stall_threshold.max(1);
        let mut partial_history: HashMap<String, (u64, u32)> = HashMap::new();
        let mut candidate: Option<Candidate> = None;

        loop {
            let observed = self.observe();
            let (partials, finished): (Vec<_>, Vec<_>) =
                observed.into_iter().partition(|o| o.partial);

            if !partials.is_empty() {
                candidate = None;
                let mut next = HashMap::with_capacity(partials.len());
                let mut stalled = None;
                for file in partials {
                    let unchanged = match partial_history.get(&file.name) {
                        Some(&(size, count)) if size == file.size => count + 1,
                        _ => 0,
                    };
                    log::trace!(
                        "In flight: {} ({}, unchanged for {} poll(s))",
                        file.name,
                        ByteSize::b(file.size),
                        unchanged
                    );
                    if unchanged >= threshold && stalled.is_none() {
                        stalled = Some(file.path.clone());
                    }
                    next.insert(file.name, (file.size, unchanged));
                }
                partial_history = next;
                if let Some(path) = stalled {
                    log::warn!(
                        "Download stalled after {} unchanged poll(s): {}",
                        threshold,
                        path.display()
                    );
                    return DownloadResult::Stalled(path);
                }
            } else if let Some(first) = finished.into_iter().next() {
                partial_history.clear();
                match candidate.as_mut() {
                    Some(c) if c.name == first.name => {
                        if c.size == first.size {
                            log::debug!(
                                "Download complete: {} ({})",
                                first.name,
                                ByteSize::b(first.size)
                            );
                            return DownloadResult::Completed(first.path);
                        }
                        c.size = first.size;
                        c.changes += 1;
                        if c.changes >= threshold {
                            log::warn!(
                                "Download never settled after {} poll(s): {}",
                                c.changes,
                                first.path.display()
                            );
                            return DownloadResult::Stalled(first.path);
                        }
                    }
                    _ => {
                        candidate = Some(Candidate {
                            name: first.name,
                            size: first.size,
                            changes: 0,
                        });
                    }
                }
            } else {
                partial_history.clear();
                candidate = None;
            }

            let elapsed = started.elapsed();
            if elapsed >= self.config.timeout {
                log::warn!(
                    "No completed download in {} after {:?}",
                    self.staging.display(),
                    self.config.timeout
                );
                return DownloadResult::TimedOut;
            }
            thread::sleep(self.config.poll_interval.min(self.config.timeout - elapsed));
        }
    }

    /// List regular files outside the baseline, sorted by name.
    fn observe(&self) -> Vec<Observed> {
        let entries = match fs::read_dir(&self.staging) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Cannot list {}: {}", self.staging.display(), e);
                return Vec::new();
            }
        };

        let mut files: Vec<Observed> = entries
            .filter_map(Result::ok)
            .filter(|e| !self.baseline.contains(&e.file_name()))
            .filter_map(|e| {
                // The file may vanish between listing and stat; skip it.
                let meta = e.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let name = e.file_name().to_string_lossy().into_owned();
                Some(Observed {
                    partial: self.config.markers.is_partial(&name),
                    name,
                    path: e.path(),
                    size: meta.len(),
                })
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }
}

/// Wait on `staging` with explicit parameters and the default markers.
#[must_use]
pub fn wait_for_completion(
    staging: &Path,
    timeout: Duration,
    poll_interval: Duration,
    stall_threshold: u32,
) -> DownloadResult {
    let config = WatchConfig::default()
        .with_timeout(timeout)
        .with_poll_interval(poll_interval)
        .with_stall_threshold(stall_threshold);
    DownloadWatcher::new(staging, config).wait_for_completion()
}

/// Delete a stalled artifact. A file that is already gone is not an error.
///
/// # Errors
///
/// Returns any I/O error other than `NotFound`.
pub fn discard_partial(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::info!("Discarded stalled download {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
