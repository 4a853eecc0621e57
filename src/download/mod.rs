//! Download completion detection.
//!
//! This module provides functionality for:
//! - Recognising in-flight browser downloads by their reserved suffixes
//! - Polling a staging directory until a download completes, stalls or times out
//! - Discarding stalled partial artifacts
//!
//! # Example
//!
//! ```no_run
//! use bidstage::download::{DownloadResult, DownloadWatcher, WatchConfig};
//! use std::path::Path;
//!
//! let watcher = DownloadWatcher::new(Path::new("run/_downloads"), WatchConfig::default());
//! match watcher.wait_for_completion() {
//!     DownloadResult::Completed(path) => println!("finished: {}", path.display()),
//!     DownloadResult::Stalled(path) => println!("stalled: {}", path.display()),
//!     DownloadResult::TimedOut => println!("nothing arrived"),
//! }
//! ```

pub mod markers;
pub mod watcher;

pub use markers::{PartialMarkers, DEFAULT_PARTIAL_SUFFIXES};
pub use watcher::{discard_partial, wait_for_completion, DownloadResult, DownloadWatcher, WatchConfig};
