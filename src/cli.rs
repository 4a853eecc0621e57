//! Command-line interface definitions for bidstage.
//!
//! Global options (verbosity, colour, config file) apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Ingest the items of a manifest for the "nyc" job
//! bidstage ingest --job nyc --manifest today.jsonl
//!
//! # List run folders; crashed runs show as in-progress
//! bidstage runs --crashed
//!
//! # Ask the cache whether an item would be processed
//! bidstage cache check --job nyc --key https://portal/bid/17 --posted 2024-01-10
//! ```

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::{parse_date, MissingDatePolicy};
use crate::relocate::CollisionPolicy;

/// Support engine for bid-portal crawlers.
///
/// Deduplicates discovered bids against a per-job cache, waits for browser
/// downloads to finish, files them into per-bid folders and marks each run
/// folder in progress or completed.
#[derive(Debug, Parser)]
#[command(name = "bidstage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH", env = "BIDSTAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run an ingestion from a JSON Lines manifest
    Ingest(IngestArgs),
    /// List run folders and their state
    Runs(RunsArgs),
    /// Mark a job's run folder completed by hand
    Finalize(FinalizeArgs),
    /// Inspect or maintain a job's cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Wait for a download to finish in a directory
    Watch(WatchArgs),
    /// Move a file into a directory with lock retries
    Relocate(RelocateArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

/// Options shared by commands that locate run folders and caches.
#[derive(Debug, Clone, Default, Args)]
pub struct LocationArgs {
    /// Parent of the per-day run directories
    #[arg(long, value_name = "DIR")]
    pub run_root: Option<PathBuf>,

    /// Directory holding `<job>_cache.json` files
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Arguments for the ingest subcommand.
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Job name; names the run folder and the cache file
    #[arg(short, long)]
    pub job: String,

    /// JSON Lines manifest of discovered items
    #[arg(short, long, value_name = "PATH")]
    pub manifest: PathBuf,

    #[command(flatten)]
    pub location: LocationArgs,

    /// Accept items posted up to N days before today
    #[arg(long, value_name = "N")]
    pub lookback_days: Option<u32>,

    /// First accepted posting date (overrides --lookback-days)
    #[arg(long, value_name = "DATE", value_parser = parse_date_arg, requires = "end")]
    pub start: Option<NaiveDate>,

    /// Last accepted posting date
    #[arg(long, value_name = "DATE", value_parser = parse_date_arg, requires = "start")]
    pub end: Option<NaiveDate>,

    /// Download timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Cache entries without a discovery date
    #[arg(long, value_enum)]
    pub missing_dates: Option<MissingDatesArg>,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Disable the progress spinner
    #[arg(long)]
    pub no_progress: bool,

    /// Plain progress output for screen readers
    #[arg(long)]
    pub accessible: bool,
}

/// Arguments for the runs subcommand.
#[derive(Debug, Args)]
pub struct RunsArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    /// Only show runs still marked in progress
    #[arg(long)]
    pub crashed: bool,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the finalize subcommand.
#[derive(Debug, Args)]
pub struct FinalizeArgs {
    /// Job name
    #[arg(short, long)]
    pub job: String,

    /// Run date (defaults to the current run date)
    #[arg(long, value_name = "DATE", value_parser = parse_date_arg)]
    pub date: Option<NaiveDate>,

    #[command(flatten)]
    pub location: LocationArgs,
}

/// Cache maintenance subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// List cached entries
    Show(CacheShowArgs),
    /// Evict expired entries and save
    Prune(CachePruneArgs),
    /// Show the dedup decision for one item
    Check(CacheCheckArgs),
}

/// Arguments for `cache show`.
#[derive(Debug, Args)]
pub struct CacheShowArgs {
    #[arg(short, long)]
    pub job: String,

    #[command(flatten)]
    pub location: LocationArgs,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `cache prune`.
#[derive(Debug, Args)]
pub struct CachePruneArgs {
    #[arg(short, long)]
    pub job: String,

    #[command(flatten)]
    pub location: LocationArgs,

    /// Report what would be evicted without saving
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `cache check`.
#[derive(Debug, Args)]
pub struct CacheCheckArgs {
    #[arg(short, long)]
    pub job: String,

    /// Item key
    #[arg(short, long)]
    pub key: String,

    /// Posting date of the item
    #[arg(long, value_name = "DATE")]
    pub posted: Option<String>,

    #[command(flatten)]
    pub location: LocationArgs,

    /// Lookback window in days
    #[arg(long, value_name = "N")]
    pub lookback_days: Option<u32>,
}

/// Arguments for the watch subcommand.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Staging directory to watch
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_ms: Option<u64>,

    /// Unchanged polls before a download counts as stalled
    #[arg(long, value_name = "N")]
    pub stall_threshold: Option<u32>,

    /// Ignore files already present
    #[arg(long)]
    pub new_only: bool,

    /// Delete a stalled partial file
    #[arg(long)]
    pub discard_stalled: bool,
}

/// Arguments for the relocate subcommand.
#[derive(Debug, Args)]
pub struct RelocateArgs {
    /// File to move
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Destination directory
    #[arg(value_name = "DIR")]
    pub dest_dir: PathBuf,

    /// Additional protected file names
    #[arg(long = "protect", value_name = "NAME")]
    pub protect: Vec<String>,

    /// Name collision handling
    #[arg(long, value_enum)]
    pub collision: Option<CollisionArg>,
}

/// Arguments for the config subcommand.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Print the default config file path instead
    #[arg(long)]
    pub path: bool,
}

/// CLI spelling of [`MissingDatePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MissingDatesArg {
    Evict,
    Keep,
}

impl From<MissingDatesArg> for MissingDatePolicy {
    fn from(arg: MissingDatesArg) -> Self {
        match arg {
            MissingDatesArg::Evict => Self::Evict,
            MissingDatesArg::Keep => Self::Keep,
        }
    }
}

/// CLI spelling of [`CollisionPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollisionArg {
    Rename,
    Fail,
}

impl From<CollisionArg> for CollisionPolicy {
    fn from(arg: CollisionArg) -> Self {
        match arg {
            CollisionArg::Rename => Self::Rename,
            CollisionArg::Fail => Self::Fail,
        }
    }
}

/// Parse a date argument in any format the cache accepts.
///
/// # Errors
///
/// Returns a message naming the accepted formats.
pub fn parse_date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("invalid date '{s}' (expected YYYY-MM-DD or MM/DD/YYYY)"))
}
