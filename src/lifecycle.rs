//! Run folder lifecycle.
//!
//! Every run works inside `<run_root>/<date>/<job>_IN_PROGRESS/`. On success
//! the staging subtree is deleted and the folder is renamed to
//! `<job>_COMPLETED`. A folder still marked `_IN_PROGRESS` after the process
//! exited is the crash marker of that run; nothing here resumes it.
//!
//! ```text
//! NotStarted --begin--> InProgress --complete--> Completed
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Suffix of a run folder that is being worked on (or crashed).
pub const IN_PROGRESS_SUFFIX: &str = "_IN_PROGRESS";
/// Suffix of a finished run folder.
pub const COMPLETED_SUFFIX: &str = "_COMPLETED";
/// Name of the staging subdirectory inside a run folder.
pub const STAGING_DIR_NAME: &str = "_downloads";
/// Date format of the per-day parent directory.
pub const DATE_DIR_FORMAT: &str = "%Y-%m-%d";

/// Error type for run folder transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A run or staging directory could not be created.
    #[error("cannot create directory {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The in-progress folder could not be renamed to its completed name.
    #[error("cannot rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The job name would produce an unusable folder name.
    #[error("invalid job name: {0:?}")]
    InvalidJobName(String),
}

/// Lifecycle state of a run folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    NotStarted,
    InProgress,
    Completed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::InProgress => write!(f, "in progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// What [`RunFolder::complete`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The folder was renamed to this path.
    Renamed(PathBuf),
    /// Nothing to do: the run was already completed or never started.
    AlreadyCompleted,
}

/// Per-run working directory.
#[derive(Debug, Clone)]
pub struct RunFolder {
    date_dir: PathBuf,
    job_name: String,
    state: RunState,
}

impl RunFolder {
    /// Describe the run folder of `job_name` under `date_dir` without touching disk.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidJobName`] for empty names or names
    /// containing path separators.
    pub fn new(date_dir: &Path, job_name: &str) -> Result<Self, LifecycleError> {
        validate_job_name(job_name)?;
        let mut folder = Self {
            date_dir: date_dir.to_path_buf(),
            job_name: job_name.to_string(),
            state: RunState::NotStarted,
        };
        if folder.in_progress_path().is_dir() {
            folder.state = RunState::InProgress;
        } else if folder.completed_path().is_dir() {
            folder.state = RunState::Completed;
        }
        Ok(folder)
    }

    /// Create `date_dir/<job>_IN_PROGRESS/` and its staging subdirectory.
    ///
    /// An existing in-progress folder from a crashed run is reused as is; a
    /// warning is logged so the operator knows the previous run never finished.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::DirectoryCreation`] if either directory cannot
    /// be created. This is fatal for the run.
    pub fn begin(date_dir: &Path, job_name: &str) -> Result<Self, LifecycleError> {
        let mut folder = Self::new(date_dir, job_name)?;
        let path = folder.in_progress_path();
        if folder.state == RunState::InProgress {
            log::warn!(
                "Previous run did not complete, reusing {}",
                path.display()
            );
        }

        create_dir(&path)?;
        create_dir(&folder.staging_dir())?;
        folder.state = RunState::InProgress;
        log::info!("Run folder ready: {}", path.display());
        Ok(folder)
    }

    /// Finish the run: delete staging, then rename to `_COMPLETED`.
    ///
    /// Staging cleanup is best effort. An existing completed folder with the
    /// same name (a re-run on the same day) is removed first. Calling this
    /// again, or when no in-progress folder exists, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Rename`] if the final rename fails; the
    /// folder then keeps its `_IN_PROGRESS` marker.
    pub fn complete(&mut self) -> Result<Completion, LifecycleError> {
        let from = self.in_progress_path();
        if !from.is_dir() {
            log::debug!("No in-progress folder at {}, nothing to complete", from.display());
            if self.completed_path().is_dir() {
                self.state = RunState::Completed;
            }
            return Ok(Completion::AlreadyCompleted);
        }

        let staging = self.staging_dir();
        if staging.exists() {
            match fs::remove_dir_all(&staging) {
                Ok(()) => log::debug!("Removed staging folder {}", staging.display()),
                Err(e) => log::warn!(
                    "Could not remove staging folder {}: {}",
                    staging.display(),
                    e
                ),
            }
        }

        let to = self.completed_path();
        if to.exists() {
            log::info!("Replacing earlier completed run at {}", to.display());
            if let Err(e) = fs::remove_dir_all(&to) {
                log::warn!("Could not remove {}: {}", to.display(), e);
            }
        }

        fs::rename(&from, &to).map_err(|source| LifecycleError::Rename {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;
        self.state = RunState::Completed;
        log::info!("Renamed folder to indicate completion: {}", to.display());
        Ok(Completion::Renamed(to))
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Job name.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// The per-day parent directory.
    #[must_use]
    pub fn date_dir(&self) -> &Path {
        &self.date_dir
    }

    /// `<date_dir>/<job>_IN_PROGRESS`
    #[must_use]
    pub fn in_progress_path(&self) -> PathBuf {
        self.date_dir
            .join(format!("{}{}", self.job_name, IN_PROGRESS_SUFFIX))
    }

    /// `<date_dir>/<job>_COMPLETED`
    #[must_use]
    pub fn completed_path(&self) -> PathBuf {
        self.date_dir
            .join(format!("{}{}", self.job_name, COMPLETED_SUFFIX))
    }

    /// Where the folder currently lives.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        match self.state {
            RunState::Completed => self.completed_path(),
            RunState::NotStarted | RunState::InProgress => self.in_progress_path(),
        }
    }

    /// Staging directory for in-flight downloads.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.in_progress_path().join(STAGING_DIR_NAME)
    }

    /// Path of the folder for `item_name` (not created).
    #[must_use]
    pub fn item_folder(&self, item_name: &str) -> PathBuf {
        self.in_progress_path().join(sanitize_folder_name(item_name))
    }

    /// Path of a file directly inside the run folder, such as the sink artifact.
    #[must_use]
    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.in_progress_path().join(file_name)
    }
}

/// A run folder found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunListing {
    /// The per-day directory name, when it parses as a date.
    pub date: Option<NaiveDate>,
    pub job_name: String,
    pub state: RunState,
    pub path: PathBuf,
}

/// List every run folder under `run_root`, oldest date first.
///
/// Folders still marked in progress belong to runs that are either active or
/// crashed.
///
/// # Errors
///
/// Returns the I/O error if `run_root` cannot be listed.
pub fn scan_runs(run_root: &Path) -> io::Result<Vec<RunListing>> {
    let mut runs = Vec::new();
    for day in fs::read_dir(run_root)?.filter_map(Result::ok) {
        let day_path = day.path();
        if !day_path.is_dir() {
            continue;
        }
        let day_name = day.file_name().to_string_lossy().into_owned();
        let date = NaiveDate::parse_from_str(&day_name, DATE_DIR_FORMAT).ok();

        let Ok(children) = fs::read_dir(&day_path) else {
            continue;
        };
        for child in children.filter_map(Result::ok) {
            if !child.path().is_dir() {
                continue;
            }
            let name = child.file_name().to_string_lossy().into_owned();
            let parsed = if let Some(job) = name.strip_suffix(IN_PROGRESS_SUFFIX) {
                Some((job.to_string(), RunState::InProgress))
            } else {
                name.strip_suffix(COMPLETED_SUFFIX)
                    .map(|job| (job.to_string(), RunState::Completed))
            };
            if let Some((job_name, state)) = parsed {
                runs.push(RunListing {
                    date,
                    job_name,
                    state,
                    path: child.path(),
                });
            }
        }
    }
    runs.sort_by(|a, b| (a.date, &a.job_name).cmp(&(b.date, &b.job_name)));
    Ok(runs)
}

/// Replace characters that are not valid in a folder name on any platform.
///
/// # Example
///
/// ```
/// use bidstage::lifecycle::sanitize_folder_name;
///
/// assert_eq!(sanitize_folder_name("RFQ/2024:17"), "RFQ_2024_17");
/// ```
#[must_use]
pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_end_matches(['.', ' ']).to_string();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

fn validate_job_name(job_name: &str) -> Result<(), LifecycleError> {
    if job_name.trim().is_empty() || sanitize_folder_name(job_name) != job_name {
        return Err(LifecycleError::InvalidJobName(job_name.to_string()));
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<(), LifecycleError> {
    fs::create_dir_all(path).map_err(|source| LifecycleError::DirectoryCreation {
        path: path.to_path_buf(),
        source,
    })
}
