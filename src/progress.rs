//! Progress reporting for ingestion runs.
//!
//! The engine reports through the [`IngestProgress`] trait; [`Progress`]
//! renders it as an indicatif spinner for the CLI. Discovery is a stream, so
//! the item total is unknown and the spinner counts items instead of
//! filling a bar.
//!
//! # Accessible Mode
//!
//! Accessible mode drops the spinner animation and Unicode glyphs and ticks
//! less often, for screen readers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress callback for the ingestion engine.
pub trait IngestProgress: Send + Sync {
    /// Called once before the first item.
    fn on_run_start(&self, _job_name: &str) {}

    /// Called when an item is taken from the discovery stream.
    ///
    /// # Arguments
    ///
    /// * `index` - 1-based position in the stream
    /// * `key` - The item's dedup key
    fn on_item_start(&self, index: usize, key: &str);

    /// Called after an attachment was relocated into its item folder.
    ///
    /// # Arguments
    ///
    /// * `name` - Final file name
    /// * `bytes` - File size
    fn on_attachment(&self, _name: &str, _bytes: u64) {}

    /// Called when the item is done; `outcome` is a short label such as
    /// `"processed"`, `"already-seen"` or `"failed"`.
    fn on_item_finish(&self, key: &str, outcome: &str);

    /// Called once after the run folder has been completed.
    fn on_run_end(&self, processed: usize, skipped: usize, failed: usize);
}

/// Terminal progress reporter using indicatif.
pub struct Progress {
    bar: Mutex<Option<ProgressBar>>,
    bytes: AtomicU64,
    quiet: bool,
    accessible: bool,
}

impl Progress {
    /// Create a new progress reporter; `quiet` suppresses all output.
    ///
    /// # Examples
    ///
    /// ```
    /// use bidstage::progress::Progress;
    ///
    /// let progress = Progress::new(false);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self::with_accessible(quiet, false)
    }

    /// Create a reporter with accessible mode.
    #[must_use]
    pub fn with_accessible(quiet: bool, accessible: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            bytes: AtomicU64::new(0),
            quiet,
            accessible,
        }
    }

    #[must_use]
    pub fn is_accessible(&self) -> bool {
        self.accessible
    }

    /// Bytes relocated so far.
    #[must_use]
    pub fn bytes_moved(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn style(&self) -> ProgressStyle {
        if self.accessible {
            ProgressStyle::with_template("[{elapsed_precise}] {pos} items {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
        } else {
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} items {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if self.quiet {
            return;
        }
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

impl IngestProgress for Progress {
    fn on_run_start(&self, job_name: &str) {
        if self.quiet {
            return;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(self.style());
        pb.set_message(format!("{job_name}: starting"));
        let tick = if self.accessible { 500 } else { 100 };
        pb.enable_steady_tick(Duration::from_millis(tick));
        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(pb);
        }
    }

    fn on_item_start(&self, index: usize, key: &str) {
        self.with_bar(|pb| {
            pb.set_position(index as u64);
            pb.set_message(truncate_key(key, 40));
        });
    }

    fn on_attachment(&self, name: &str, bytes: u64) {
        let total = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.with_bar(|pb| {
            pb.set_message(format!("{} ({} total)", truncate_key(name, 30), ByteSize(total)));
        });
    }

    fn on_item_finish(&self, key: &str, outcome: &str) {
        self.with_bar(|pb| pb.set_message(format!("{}: {outcome}", truncate_key(key, 30))));
    }

    fn on_run_end(&self, processed: usize, skipped: usize, failed: usize) {
        if self.quiet {
            return;
        }
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_with_message(format!(
                    "done: {processed} processed, {skipped} skipped, {failed} failed, {} moved",
                    ByteSize(self.bytes_moved())
                ));
            }
        }
    }
}

/// Shorten long keys (usually URLs) to their tail.
fn truncate_key(key: &str, max_len: usize) -> String {
    let count = key.chars().count();
    if count <= max_len {
        return key.to_string();
    }
    let tail: String = key.chars().skip(count - (max_len - 3)).collect();
    format!("...{tail}")
}
