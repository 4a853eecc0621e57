//! Run reports.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;

use crate::cache::Decision;
use crate::error::ExitCode;

/// What happened to one discovered item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ItemOutcome {
    /// Not processed; the dedup check said no.
    Skipped { reason: Decision },
    /// Appended to the sink and recorded in the cache.
    Processed {
        /// Final names of the relocated attachments.
        attachments: Vec<String>,
        /// Downloads discarded as stalled.
        stalled: usize,
        /// Downloads that never arrived.
        timed_out: usize,
        /// Attachments that arrived but could not be relocated.
        relocation_errors: Vec<String>,
    },
    /// Trigger or sink failed; the item stays unrecorded.
    Failed { error: String },
}

impl ItemOutcome {
    /// Short label for progress output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped { reason } => reason.label(),
            Self::Processed {
                relocation_errors, ..
            } if !relocation_errors.is_empty() => "processed with errors",
            Self::Processed { .. } => "processed",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether the item counts against a clean exit.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        match self {
            Self::Failed { .. } => true,
            Self::Processed {
                relocation_errors, ..
            } => !relocation_errors.is_empty(),
            Self::Skipped { .. } => false,
        }
    }
}

/// One line of the per-item log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub key: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub job_name: String,
    pub run_date: Option<NaiveDate>,
    /// Final location of the run folder.
    pub folder: PathBuf,
    /// Whether the folder carries the completed marker.
    pub completed: bool,
    /// Cache entries dropped at load.
    pub evicted: usize,
    /// Items taken from discovery.
    pub discovered: usize,
    pub processed: usize,
    /// Skipped items per reason label.
    pub skipped: BTreeMap<String, usize>,
    pub failed: usize,
    pub attachments_moved: usize,
    pub stalled: usize,
    pub timed_out: usize,
    /// Leftovers moved into item folders at the end of the run.
    pub swept: usize,
    /// Leftovers that matched no item folder, as found in the final run folder.
    pub orphaned: Vec<PathBuf>,
    /// Whether the last cache save succeeded.
    pub cache_saved: bool,
    /// Whether the run stopped early on Ctrl+C.
    pub interrupted: bool,
    pub items: Vec<ItemReport>,
}

impl RunReport {
    /// Fold an item outcome into the totals.
    pub fn push(&mut self, key: &str, outcome: ItemOutcome) {
        match &outcome {
            ItemOutcome::Skipped { reason } => {
                *self.skipped.entry(reason.label().to_string()).or_default() += 1;
            }
            ItemOutcome::Processed {
                attachments,
                stalled,
                timed_out,
                relocation_errors,
            } => {
                self.processed += 1;
                self.attachments_moved += attachments.len();
                self.stalled += stalled;
                self.timed_out += timed_out;
                if !relocation_errors.is_empty() {
                    self.failed += 1;
                }
            }
            ItemOutcome::Failed { .. } => self.failed += 1,
        }
        self.items.push(ItemReport {
            key: key.to_string(),
            outcome,
        });
    }

    /// Total skipped items.
    #[must_use]
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    /// Items with errors, with their messages.
    pub fn failures(&self) -> impl Iterator<Item = (&str, String)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            ItemOutcome::Failed { error } => Some((item.key.as_str(), error.clone())),
            ItemOutcome::Processed {
                relocation_errors, ..
            } if !relocation_errors.is_empty() => {
                Some((item.key.as_str(), relocation_errors.join("; ")))
            }
            _ => None,
        })
    }

    /// Process exit code for this run.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.interrupted {
            ExitCode::Interrupted
        } else if self.failed > 0 || !self.cache_saved {
            ExitCode::PartialSuccess
        } else {
            ExitCode::Success
        }
    }
}
