//! Moving finished downloads into item folders.
//!
//! # Overview
//!
//! The [`Relocator`] moves a completed download out of the staging directory:
//! - Protected names (the run's sink artifact) are never moved
//! - Transient lock errors are retried through a [`RetryPolicy`]
//! - Name collisions never overwrite; they are renamed or rejected per [`CollisionPolicy`]
//! - A source that no longer exists reports [`RelocationError::SourceMissing`],
//!   which reconciliation treats as "already moved"
//!
//! # Example
//!
//! ```no_run
//! use bidstage::relocate::{MoveOutcome, Relocator};
//! use std::path::Path;
//!
//! let relocator = Relocator::default().protect("portal.csv");
//! match relocator.move_into(Path::new("staging/report.pdf"), Path::new("run/BID-1")) {
//!     Ok(MoveOutcome::Moved(dest)) => println!("moved to {}", dest.display()),
//!     Ok(MoveOutcome::Skipped) => println!("protected"),
//!     Err(e) => eprintln!("failed: {}", e),
//! }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::download::PartialMarkers;
use crate::retry::{is_transient_io, RetryError, RetryPolicy};

/// Error type for relocation.
#[derive(Debug, Error)]
pub enum RelocationError {
    /// The source is gone, usually because it was already moved.
    #[error("source not found: {0}")]
    SourceMissing(PathBuf),

    /// A file already exists at the destination and the policy forbids renaming.
    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    /// Every attempt failed, or a non-transient error occurred.
    #[error("failed to move {source_path} to {destination} after {attempts} attempt(s): {cause}")]
    RelocationFailed {
        source_path: PathBuf,
        destination: PathBuf,
        attempts: u32,
        #[source]
        cause: io::Error,
    },

    /// The destination directory could not be created.
    #[error("cannot create destination directory {path}: {source}")]
    DestinationDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RelocationError {
    /// Whether the error means the file was already relocated.
    #[must_use]
    pub fn is_already_moved(&self) -> bool {
        matches!(self, Self::SourceMissing(_))
    }
}

/// Successful relocation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The file now lives at this path.
    Moved(PathBuf),
    /// The file carries a protected name and was left in place.
    Skipped,
}

/// Behaviour when the destination name is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Append ` (n)` before the extension.
    #[default]
    Rename,
    /// Report [`RelocationError::DestinationExists`].
    Fail,
}

/// Result of reconciling leftover files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files moved into an item folder.
    pub moved: Vec<PathBuf>,
    /// Files with no matching item folder, left in place.
    pub orphaned: Vec<PathBuf>,
    /// Protected or in-flight files that were not touched.
    pub skipped: Vec<PathBuf>,
    /// Files that could not be moved, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Moves finished downloads, honouring protected names and lock retries.
#[derive(Debug, Clone)]
pub struct Relocator {
    protected: BTreeSet<String>,
    retry: RetryPolicy,
    collision: CollisionPolicy,
}

impl Default for Relocator {
    fn default() -> Self {
        Self {
            protected: BTreeSet::new(),
            retry: RetryPolicy::default(),
            collision: CollisionPolicy::default(),
        }
    }
}

impl Relocator {
    /// Create a relocator with explicit policies.
    #[must_use]
    pub fn new(retry: RetryPolicy, collision: CollisionPolicy) -> Self {
        Self {
            protected: BTreeSet::new(),
            retry,
            collision,
        }
    }

    /// Add a protected file name.
    #[must_use]
    pub fn protect(mut self, name: impl Into<String>) -> Self {
        self.protected.insert(name.into());
        self
    }

    /// Add several protected file names.
    #[must_use]
    pub fn protect_all<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected.extend(names.into_iter().map(Into::into));
        self
    }

    /// Whether `path`'s file name is protected.
    #[must_use]
    pub fn is_protected(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.protected.contains(n))
    }

    /// The retry policy in use.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Move `source` into `dir`, keeping its file name.
    ///
    /// # Errors
    ///
    /// See [`Relocator::move_file`].
    pub fn move_into(&self, source: &Path, dir: &Path) -> Result<MoveOutcome, RelocationError> {
        let name = source
            .file_name()
            .ok_or_else(|| RelocationError::SourceMissing(source.to_path_buf()))?;
        self.move_file(source, &dir.join(name))
    }

    /// Move `source` to `destination`.
    ///
    /// Protected names are skipped whatever the destination. The parent of
    /// `destination` is created if needed.
    ///
    /// # Errors
    ///
    /// - [`RelocationError::SourceMissing`] if `source` does not exist
    /// - [`RelocationError::DestinationExists`] on collision under [`CollisionPolicy::Fail`]
    /// - [`RelocationError::RelocationFailed`] when retries are exhausted
    pub fn move_file(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<MoveOutcome, RelocationError> {
        if self.is_protected(source) {
            log::info!("Skipping protected file {}", source.display());
            return Ok(MoveOutcome::Skipped);
        }
        if fs::symlink_metadata(source).is_err() {
            return Err(RelocationError::SourceMissing(source.to_path_buf()));
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| RelocationError::DestinationDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let target = self.resolve_collision(destination)?;
        let result = self
            .retry
            .run(|_| rename_or_copy(source, &target), is_transient_io);

        match result {
            Ok(()) => {
                log::debug!("Moved {} -> {}", source.display(), target.display());
                Ok(MoveOutcome::Moved(target))
            }
            Err(err) => {
                let attempts = match &err {
                    RetryError::Exhausted { attempts, .. } => *attempts,
                    RetryError::Permanent(_) => 1,
                };
                let cause = err.into_inner();
                if cause.kind() == io::ErrorKind::NotFound && !source.exists() {
                    return Err(RelocationError::SourceMissing(source.to_path_buf()));
                }
                Err(RelocationError::RelocationFailed {
                    source_path: source.to_path_buf(),
                    destination: target,
                    attempts,
                    cause,
                })
            }
        }
    }

    /// Reconcile leftover files in `dir` at the end of a run.
    ///
    /// A file whose name starts with an item folder's name, followed by a
    /// non-alphanumeric character or nothing, is moved into that folder; the
    /// longest such folder name wins. Protected names and in-flight partials
    /// are left alone, and anything else is reported as orphaned.
    pub fn sweep(&self, dir: &Path, item_folders: &[PathBuf], markers: &PartialMarkers) -> SweepReport {
        let mut report = SweepReport::default();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Nothing to sweep in {}: {}", dir.display(), e);
                return report;
            }
        };

        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_protected(&path) || markers.is_partial(&name) {
                report.skipped.push(path);
                continue;
            }

            match folder_for(&name, item_folders) {
                Some(folder) => match self.move_into(&path, folder) {
                    Ok(MoveOutcome::Moved(dest)) => report.moved.push(dest),
                    Ok(MoveOutcome::Skipped) => report.skipped.push(path),
                    Err(e) if e.is_already_moved() => {}
                    Err(e) => report.failed.push((path, e.to_string())),
                },
                None => {
                    log::warn!("Found unmoved file: {}", path.display());
                    report.orphaned.push(path);
                }
            }
        }
        report
    }

    /// Pick a free destination path according to the collision policy.
    fn resolve_collision(&self, destination: &Path) -> Result<PathBuf, RelocationError> {
        if fs::symlink_metadata(destination).is_err() {
            return Ok(destination.to_path_buf());
        }
        match self.collision {
            CollisionPolicy::Fail => Err(RelocationError::DestinationExists(
                destination.to_path_buf(),
            )),
            CollisionPolicy::Rename => {
                let candidate = (1..)
                    .map(|n| numbered(destination, n))
                    .find(|p| fs::symlink_metadata(p).is_err())
                    .unwrap_or_else(|| destination.to_path_buf());
                log::info!(
                    "{} exists, using {}",
                    destination.display(),
                    candidate.display()
                );
                Ok(candidate)
            }
        }
    }
}

/// Item folder whose name prefixes `file_name` at a word boundary.
///
/// `BID-10_addendum.pdf` belongs to `BID-10`, never to `BID-1`.
fn folder_for<'a>(file_name: &str, item_folders: &'a [PathBuf]) -> Option<&'a PathBuf> {
    item_folders
        .iter()
        .filter_map(|folder| {
            let prefix = folder.file_name()?.to_str()?;
            let rest = file_name.strip_prefix(prefix)?;
            let at_boundary = rest.chars().next().map_or(true, |c| !c.is_alphanumeric());
            (!prefix.is_empty() && at_boundary).then_some((prefix.len(), folder))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, folder)| folder)
}

/// `dir/stem (n).ext`
fn numbered(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem} ({n}).{}", ext.to_string_lossy()),
        None => format!("{stem} ({n})"),
    };
    path.with_file_name(name)
}

/// Rename, falling back to copy + remove when the rename cannot cross devices.
fn rename_or_copy(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if is_transient_io(&e) || e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(rename_err) => {
            log::debug!(
                "Rename failed ({}), copying {} instead",
                rename_err,
                source.display()
            );
            fs::copy(source, target)?;
            if let Err(e) = fs::remove_file(source) {
                // Leave a single copy: undo the copy so the retry starts clean.
                let _ = fs::remove_file(target);
                return Err(e);
            }
            Ok(())
        }
    }
}
