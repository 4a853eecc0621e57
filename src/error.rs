//! Process exit codes and the `--json-errors` document.

use serde::Serialize;

/// How a bidstage invocation ended.
///
/// A run that finishes with failed items still completes its run folder and
/// exits with [`PartialSuccess`](Self::PartialSuccess), not an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitCode {
    Success = 0,
    /// Configuration problem or run-fatal failure; the run folder, if any,
    /// keeps its `_IN_PROGRESS` marker.
    GeneralError = 1,
    /// Run completed, but items failed or the cache could not be saved.
    PartialSuccess = 3,
    /// Stopped by Ctrl+C after closing the run.
    Interrupted = 130,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code, `BS` followed by the zero-padded exit code.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "BS000",
            Self::GeneralError => "BS001",
            Self::PartialSuccess => "BS003",
            Self::Interrupted => "BS130",
        }
    }

    /// One-line description for logs and summaries.
    #[must_use]
    pub fn meaning(self) -> &'static str {
        match self {
            Self::Success => "run completed",
            Self::GeneralError => "run failed",
            Self::PartialSuccess => "run completed with failures",
            Self::Interrupted => "run interrupted",
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        // All variants fit in a u8.
        std::process::ExitCode::from(code as u8)
    }
}

/// Error document printed on stderr with `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// Machine code, e.g. `BS001`
    pub code: String,
    pub exit_code: i32,
    /// Outermost context with its causes, `: `-joined
    pub message: String,
    /// Each layer of the error chain, outermost first
    pub causes: Vec<String>,
    pub interrupted: bool,
}

impl StructuredError {
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            causes: err.chain().map(ToString::to_string).collect(),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
