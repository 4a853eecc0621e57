//! The ingestion loop.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use super::collaborator::{DownloadTrigger, RecordSink};
use super::item::DiscoveredItem;
use super::report::{ItemOutcome, RunReport};
use crate::cache::{CacheStore, DateWindow, Decision, MissingDatePolicy, RETENTION_DAYS};
use crate::config::Config;
use crate::context::RunContext;
use crate::download::{discard_partial, DownloadResult, DownloadWatcher, WatchConfig};
use crate::lifecycle::{LifecycleError, RunFolder};
use crate::progress::IngestProgress;
use crate::relocate::{MoveOutcome, Relocator};

/// Errors that end a run before its folder is completed.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The cache directory could not be created.
    #[error("cannot create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The run folder could not be created or completed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The sink could not be opened.
    #[error("record sink failed to open: {0:#}")]
    Sink(anyhow::Error),
}

/// Tunables of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub retention_days: u32,
    pub lookback_days: u32,
    /// Explicit window; overrides `lookback_days` when set.
    pub window: Option<DateWindow>,
    pub missing_dates: MissingDatePolicy,
    /// Save the cache after this many processed items.
    pub save_every: usize,
    pub watch: WatchConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retention_days: RETENTION_DAYS,
            lookback_days: 2,
            window: None,
            missing_dates: MissingDatePolicy::Evict,
            save_every: 1,
            watch: WatchConfig::default(),
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            retention_days: config.retention_days,
            lookback_days: config.lookback_days,
            window: None,
            missing_dates: config.missing_dates,
            save_every: config.save_every,
            watch: config.watch_config(),
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }
}

/// Drives discovery, dedup, downloads, relocation and the run folder.
///
/// # Example
///
/// ```no_run
/// use bidstage::context::RunContext;
/// use bidstage::engine::{DiscoveredItem, EngineOptions, IngestionEngine, MemorySink, NoDownloads};
///
/// let ctx = RunContext::new("portal", "runs");
/// let engine = IngestionEngine::new(ctx, EngineOptions::default());
/// let items = vec![DiscoveredItem::new("https://portal/bid/1", None, ())];
/// let report = engine.run(items, &mut NoDownloads, &mut MemorySink::default())?;
/// println!("{} processed", report.processed);
/// # Ok::<(), bidstage::engine::EngineError>(())
/// ```
pub struct IngestionEngine {
    ctx: RunContext,
    options: EngineOptions,
    relocator: Relocator,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: Option<Arc<dyn IngestProgress>>,
}

impl IngestionEngine {
    #[must_use]
    pub fn new(ctx: RunContext, options: EngineOptions) -> Self {
        Self {
            ctx,
            options,
            relocator: Relocator::default(),
            shutdown_flag: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_relocator(mut self, relocator: Relocator) -> Self {
        self.relocator = relocator;
        self
    }

    /// Stop taking new items once `flag` is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn IngestProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// The dedup window for today.
    #[must_use]
    pub fn window(&self) -> DateWindow {
        self.options
            .window
            .unwrap_or_else(|| DateWindow::lookback(self.ctx.today(), self.options.lookback_days))
    }

    /// Run one ingestion over `items`.
    ///
    /// Per-item failures are recorded in the report and never abort the run.
    /// After the last item (or an interrupt) leftovers in staging are swept,
    /// the cache is saved, the sink is closed and the run folder is renamed
    /// to its completed marker.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the cache directory or run folder cannot
    /// be created, the sink cannot be opened, or the final rename fails. The
    /// run folder then keeps its in-progress marker.
    pub fn run<P, I, T, S>(
        &self,
        items: I,
        trigger: &mut T,
        sink: &mut S,
    ) -> Result<RunReport, EngineError>
    where
        I: IntoIterator<Item = DiscoveredItem<P>>,
        T: DownloadTrigger<P>,
        S: RecordSink<P>,
    {
        let today = self.ctx.today();
        let cache_dir = self.ctx.cache_dir();
        fs::create_dir_all(cache_dir).map_err(|source| EngineError::CacheDir {
            path: cache_dir.to_path_buf(),
            source,
        })?;
        let cache_path = self.ctx.cache_path();
        let mut cache = CacheStore::load(&cache_path);
        let evicted = cache.evict(today, self.options.retention_days, self.options.missing_dates);

        let mut run = RunFolder::begin(&self.ctx.date_dir(), self.ctx.job_name())?;
        sink.open(&run).map_err(EngineError::Sink)?;

        let relocator = match sink.artifact_name() {
            Some(name) => self.relocator.clone().protect(name),
            None => self.relocator.clone(),
        };
        let window = self.window();
        log::info!(
            "Starting {} for {} (window {}, {} cached entries)",
            self.ctx.job_name(),
            self.ctx.run_date(),
            window,
            cache.len()
        );

        let mut report = RunReport {
            job_name: self.ctx.job_name().to_string(),
            run_date: Some(self.ctx.run_date()),
            evicted,
            cache_saved: true,
            ..RunReport::default()
        };
        let mut watcher = DownloadWatcher::new(&run.staging_dir(), self.options.watch.clone());
        let mut item_folders: Vec<PathBuf> = Vec::new();
        let mut unsaved = 0usize;
        let save_every = self.options.save_every.max(1);

        if let Some(p) = &self.progress {
            p.on_run_start(self.ctx.job_name());
        }

        for (index, item) in items.into_iter().enumerate() {
            if self.is_shutdown_requested() {
                log::warn!("Shutdown requested, not taking further items");
                report.interrupted = true;
                break;
            }
            report.discovered += 1;
            if let Some(p) = &self.progress {
                p.on_item_start(index + 1, &item.key);
            }

            let decision = cache.decide(&item.key, item.posted_date, &window);
            let outcome = if decision == Decision::Process {
                let folder = run.item_folder(item.folder_label());
                let outcome = self.process_item(&item, &folder, &mut watcher, &relocator, trigger, sink);
                if let ItemOutcome::Processed { .. } = &outcome {
                    if !item_folders.contains(&folder) {
                        item_folders.push(folder);
                    }
                    cache.record(&item.key, item.posted_date, today);
                    unsaved += 1;
                    if unsaved >= save_every {
                        report.cache_saved = save_cache(&cache, &cache_path);
                        unsaved = 0;
                    }
                }
                outcome
            } else {
                log::debug!("Skipping {} ({})", item.key, decision.label());
                ItemOutcome::Skipped { reason: decision }
            };

            if let Some(p) = &self.progress {
                p.on_item_finish(&item.key, outcome.label());
            }
            report.push(&item.key, outcome);
        }

        if !report.interrupted && self.is_shutdown_requested() {
            report.interrupted = true;
        }

        self.sweep_staging(&run, &relocator, &item_folders, &mut report);
        report.cache_saved = save_cache(&cache, &cache_path);
        if let Err(e) = sink.close() {
            log::error!("Record sink failed to close: {:#}", e);
        }

        let in_progress = run.in_progress_path();
        run.complete()?;
        report.folder = run.path();
        for orphan in &mut report.orphaned {
            if let Ok(rel) = orphan.strip_prefix(&in_progress) {
                *orphan = report.folder.join(rel);
            }
        }
        report.completed = true;

        log::info!(
            "Run finished: {} processed, {} skipped, {} failed, {} attachment(s) moved",
            report.processed,
            report.skipped_total(),
            report.failed,
            report.attachments_moved
        );
        if let Some(p) = &self.progress {
            p.on_run_end(report.processed, report.skipped_total(), report.failed);
        }
        Ok(report)
    }

    /// Download, relocate and append a single item.
    fn process_item<P, T, S>(
        &self,
        item: &DiscoveredItem<P>,
        folder: &Path,
        watcher: &mut DownloadWatcher,
        relocator: &Relocator,
        trigger: &mut T,
        sink: &mut S,
    ) -> ItemOutcome
    where
        T: DownloadTrigger<P>,
        S: RecordSink<P>,
    {
        if let Err(e) = watcher.snapshot() {
            log::debug!("Could not snapshot {}: {}", watcher.staging_dir().display(), e);
            watcher.clear_snapshot();
        }

        let expected = match trigger.trigger(item, watcher.staging_dir()) {
            Ok(n) => n,
            Err(e) => {
                log::error!("Download trigger failed for {}: {:#}", item.key, e);
                return ItemOutcome::Failed {
                    error: format!("{e:#}"),
                };
            }
        };

        let mut attachments = Vec::with_capacity(expected);
        let mut stalled = 0;
        let mut timed_out = 0;
        let mut relocation_errors = Vec::new();

        for n in 1..=expected {
            match watcher.wait_for_completion() {
                DownloadResult::Completed(path) => match relocator.move_into(&path, folder) {
                    Ok(MoveOutcome::Moved(dest)) => {
                        let name = dest
                            .file_name()
                            .map(|f| f.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        let size = fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
                        log::info!("Downloaded {} for {}", name, item.key);
                        if let Some(p) = &self.progress {
                            p.on_attachment(&name, size);
                        }
                        attachments.push(name);
                    }
                    Ok(MoveOutcome::Skipped) => {
                        log::warn!("Protected file {} appeared in staging", path.display());
                        watcher.ignore(&path);
                    }
                    Err(e) if e.is_already_moved() => {
                        log::debug!("{} was already moved", path.display());
                    }
                    Err(e) => {
                        log::error!("Could not relocate attachment for {}: {}", item.key, e);
                        relocation_errors.push(e.to_string());
                        watcher.ignore(&path);
                    }
                },
                DownloadResult::Stalled(path) => {
                    stalled += 1;
                    if let Err(e) = discard_partial(&path) {
                        log::warn!("Could not delete {}: {}", path.display(), e);
                    }
                }
                DownloadResult::TimedOut => {
                    timed_out += 1;
                    log::warn!(
                        "Attachment {}/{} for {} did not finish in time",
                        n,
                        expected,
                        item.key
                    );
                }
            }
        }

        if let Err(e) = sink.append(item, &attachments) {
            log::error!("Record sink rejected {}: {:#}", item.key, e);
            return ItemOutcome::Failed {
                error: format!("{e:#}"),
            };
        }

        ItemOutcome::Processed {
            attachments,
            stalled,
            timed_out,
            relocation_errors,
        }
    }

    /// Move staging leftovers into their item folders; keep orphans in the
    /// run folder so deleting staging does not lose them.
    fn sweep_staging(
        &self,
        run: &RunFolder,
        relocator: &Relocator,
        item_folders: &[PathBuf],
        report: &mut RunReport,
    ) {
        let sweep = relocator.sweep(
            &run.staging_dir(),
            item_folders,
            &self.options.watch.markers,
        );
        report.swept = sweep.moved.len();
        for (path, error) in &sweep.failed {
            log::error!("Could not move leftover {}: {}", path.display(), error);
        }
        for orphan in sweep.orphaned {
            match relocator.move_into(&orphan, &run.path()) {
                Ok(MoveOutcome::Moved(dest)) => report.orphaned.push(dest),
                Ok(MoveOutcome::Skipped) => report.orphaned.push(orphan),
                Err(e) => {
                    log::warn!("Leaving orphan {}: {}", orphan.display(), e);
                    report.orphaned.push(orphan);
                }
            }
        }
    }
}

/// Save the cache, logging instead of failing.
fn save_cache(cache: &CacheStore, path: &Path) -> bool {
    match cache.save(path) {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to save cache {}: {}", path.display(), e);
            false
        }
    }
}
