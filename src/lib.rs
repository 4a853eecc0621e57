//! bidstage - Bid Ingestion Support Engine
//!
//! Shared machinery for procurement-portal crawlers: a dated dedup cache with
//! retention, a download-completion watcher, a relocator with lock retries
//! and protected names, and an in-progress/completed run folder lifecycle,
//! composed by an ingestion engine.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod collab;
pub mod config;
pub mod context;
pub mod download;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod progress;
pub mod relocate;
pub mod retry;
pub mod signal;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use yansi::Paint;

use crate::cache::{parse_date, CacheStore, DateWindow};
use crate::cli::{
    CacheCheckArgs, CacheCommand, CachePruneArgs, CacheShowArgs, Cli, Commands, ConfigArgs,
    FinalizeArgs, IngestArgs, LocationArgs, RelocateArgs, RunsArgs, WatchArgs,
};
use crate::collab::{read_manifest, CopyTrigger, CsvSink};
use crate::config::Config;
use crate::context::RunContext;
use crate::download::{discard_partial, DownloadResult, DownloadWatcher};
use crate::engine::{EngineOptions, IngestionEngine, RunReport};
use crate::error::ExitCode;
use crate::lifecycle::{scan_runs, Completion, RunFolder, RunState, DATE_DIR_FORMAT};
use crate::progress::Progress;
use crate::relocate::{MoveOutcome, Relocator};
use crate::signal::ShutdownHandler;

/// Run the CLI command and return the process exit code.
///
/// # Errors
///
/// Returns an error for configuration problems and run-fatal failures; the
/// binary maps it to [`ExitCode::GeneralError`].
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    if cli.no_color {
        yansi::disable();
    }

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let handler = signal::install_handler().context("failed to set up Ctrl+C handling")?;

    match cli.command {
        Commands::Ingest(args) => run_ingest(args, config, &handler, cli.quiet),
        Commands::Runs(args) => run_runs(&args, config),
        Commands::Finalize(args) => run_finalize(&args, config),
        Commands::Cache(CacheCommand::Show(args)) => run_cache_show(&args, config),
        Commands::Cache(CacheCommand::Prune(args)) => run_cache_prune(&args, config),
        Commands::Cache(CacheCommand::Check(args)) => run_cache_check(&args, config),
        Commands::Watch(args) => run_watch(&args, config),
        Commands::Relocate(args) => run_relocate(&args, &config),
        Commands::Config(args) => run_config(&args, &config),
    }
}

/// Apply `--run-root`/`--cache-dir` over the loaded configuration.
fn apply_location(config: &mut Config, location: &LocationArgs) {
    if let Some(root) = &location.run_root {
        config.run_root.clone_from(root);
    }
    if let Some(dir) = &location.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
}

fn run_ingest(
    args: IngestArgs,
    mut config: Config,
    handler: &ShutdownHandler,
    quiet: bool,
) -> Result<ExitCode> {
    apply_location(&mut config, &args.location);
    if let Some(days) = args.lookback_days {
        config.lookback_days = days;
    }
    if let Some(secs) = args.timeout {
        config.download.timeout_secs = secs;
    }
    if let Some(policy) = args.missing_dates {
        config.missing_dates = policy.into();
    }
    config.validate()?;

    let items = read_manifest(&args.manifest)?;
    log::info!(
        "Loaded {} item(s) from {}",
        items.len(),
        args.manifest.display()
    );

    let mut options = EngineOptions::from_config(&config);
    if let (Some(start), Some(end)) = (args.start, args.end) {
        options = options.with_window(DateWindow::between(start, end));
    }

    let ctx = RunContext::from_config(args.job.as_str(), &config);
    let mut engine = IngestionEngine::new(ctx, options)
        .with_relocator(config.relocator())
        .with_shutdown_flag(handler.get_flag());
    if !(quiet || args.no_progress || args.json) {
        engine = engine.with_progress(Arc::new(Progress::with_accessible(false, args.accessible)));
    }

    let mut sink = CsvSink::for_items(&args.job, &items);
    let report = engine
        .run(items, &mut CopyTrigger, &mut sink)
        .with_context(|| format!("run of job '{}' failed", args.job))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_report(&report);
    }
    let code = report.exit_code();
    log::info!("Job '{}': {} [{}]", args.job, code.meaning(), code.code_prefix());
    Ok(code)
}

fn print_report(report: &RunReport) {
    println!(
        "{} {} ({})",
        "Run".bold(),
        report.job_name,
        report
            .run_date
            .map(|d| d.to_string())
            .unwrap_or_default()
    );
    println!("  folder:      {}", report.folder.display());
    println!("  processed:   {}", report.processed.green());
    for (reason, count) in &report.skipped {
        println!("  skipped:     {count} ({reason})");
    }
    println!("  attachments: {}", report.attachments_moved);
    if report.stalled + report.timed_out > 0 {
        println!(
            "  downloads:   {} stalled, {} timed out",
            report.stalled.yellow(),
            report.timed_out.yellow()
        );
    }
    if report.swept > 0 {
        println!("  swept:       {}", report.swept);
    }
    for orphan in &report.orphaned {
        println!("  {} {}", "orphan:".yellow(), orphan.display());
    }
    for (key, error) in report.failures() {
        println!("  {} {key}: {error}", "failed:".red());
    }
    if !report.cache_saved {
        println!("  {}", "cache could not be saved".red());
    }
    if report.interrupted {
        println!("  {}", "interrupted".yellow().bold());
    }
}

fn run_runs(args: &RunsArgs, mut config: Config) -> Result<ExitCode> {
    apply_location(&mut config, &args.location);
    let mut runs = scan_runs(&config.run_root)
        .with_context(|| format!("cannot list {}", config.run_root.display()))?;
    if args.crashed {
        runs.retain(|r| r.state == RunState::InProgress);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(ExitCode::Success);
    }
    if runs.is_empty() {
        println!("No run folders under {}", config.run_root.display());
    }
    for run in &runs {
        let date = run.date.map(|d| d.to_string()).unwrap_or_else(|| "?".into());
        let state = match run.state {
            RunState::InProgress => run.state.to_string().yellow().to_string(),
            RunState::Completed => run.state.to_string().green().to_string(),
            RunState::NotStarted => run.state.to_string(),
        };
        println!("{date}  {:<24} {state}", run.job_name);
    }
    Ok(ExitCode::Success)
}

fn run_finalize(args: &FinalizeArgs, mut config: Config) -> Result<ExitCode> {
    apply_location(&mut config, &args.location);
    let ctx = RunContext::from_config(args.job.as_str(), &config);
    let date = args.date.unwrap_or_else(|| ctx.run_date());
    let date_dir = config
        .run_root
        .join(date.format(DATE_DIR_FORMAT).to_string());

    let mut folder = RunFolder::new(&date_dir, &args.job)?;
    if folder.state() == RunState::NotStarted {
        bail!("no run folder for job '{}' on {}", args.job, date);
    }
    match folder.complete()? {
        Completion::Renamed(path) => println!("Completed {}", path.display()),
        Completion::AlreadyCompleted => println!("Already completed: {}", folder.path().display()),
    }
    Ok(ExitCode::Success)
}

fn load_cache_strict(path: &Path) -> Result<CacheStore> {
    CacheStore::try_load(path).with_context(|| format!("cannot use cache {}", path.display()))
}

fn run_cache_show(args: &CacheShowArgs, mut config: Config) -> Result<ExitCode> {
    apply_location(&mut config, &args.location);
    let ctx = RunContext::from_config(args.job.as_str(), &config);
    let store = load_cache_strict(&ctx.cache_path())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&store)?);
        return Ok(ExitCode::Success);
    }
    println!("{} entries in {}", store.len(), ctx.cache_path().display());
    for (key, entry) in store.iter() {
        let discovered = entry
            .discovered_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".into());
        println!("{discovered}  {}  {key}", entry.last_checked_date.dim());
    }
    Ok(ExitCode::Success)
}

fn run_cache_prune(args: &CachePruneArgs, mut config: Config) -> Result<ExitCode> {
    apply_location(&mut config, &args.location);
    let ctx = RunContext::from_config(args.job.as_str(), &config);
    let path = ctx.cache_path();
    let mut store = load_cache_strict(&path)?;

    let evicted = store.evict(ctx.today(), config.retention_days, config.missing_dates);
    if args.dry_run {
        println!("Would evict {evicted} entries; {} would remain", store.len());
    } else {
        if evicted > 0 {
            store.save(&path)?;
        }
        println!("Evicted {evicted} entries; {} remain", store.len());
    }
    Ok(ExitCode::Success)
}

fn run_cache_check(args: &CacheCheckArgs, mut config: Config) -> Result<ExitCode> {
    apply_location(&mut config, &args.location);
    let ctx = RunContext::from_config(args.job.as_str(), &config);
    let store = CacheStore::load(&ctx.cache_path());
    let window = DateWindow::lookback(
        ctx.today(),
        args.lookback_days.unwrap_or(config.lookback_days),
    );
    let posted = args.posted.as_deref().and_then(parse_date);

    let decision = store.decide(&args.key, posted, &window);
    if decision.should_process() {
        println!("{}", decision.label().green());
    } else {
        println!("{} (window {window})", decision.label().yellow());
    }
    Ok(ExitCode::Success)
}

fn run_watch(args: &WatchArgs, mut config: Config) -> Result<ExitCode> {
    if let Some(secs) = args.timeout {
        config.download.timeout_secs = secs;
    }
    if let Some(ms) = args.poll_ms {
        config.download.poll_interval_ms = ms;
    }
    if let Some(n) = args.stall_threshold {
        config.download.stall_threshold = n;
    }
    config.validate()?;

    let mut watcher = DownloadWatcher::new(&args.dir, config.watch_config());
    if args.new_only {
        let existing = watcher
            .snapshot()
            .with_context(|| format!("cannot list {}", args.dir.display()))?;
        log::debug!("Ignoring {existing} existing file(s)");
    }

    match watcher.wait_for_completion() {
        DownloadResult::Completed(path) => {
            println!("{}", path.display());
            Ok(ExitCode::Success)
        }
        DownloadResult::Stalled(path) => {
            if args.discard_stalled {
                discard_partial(&path)?;
            }
            bail!("download stalled: {}", path.display())
        }
        DownloadResult::TimedOut => bail!("no download finished in {}", args.dir.display()),
    }
}

fn run_relocate(args: &RelocateArgs, config: &Config) -> Result<ExitCode> {
    let collision = args
        .collision
        .map_or(config.relocate.collision, Into::into);
    let relocator = Relocator::new(config.retry_policy(), collision)
        .protect_all(config.protected_names.iter().cloned())
        .protect_all(args.protect.iter().cloned());

    match relocator.move_into(&args.source, &args.dest_dir) {
        Ok(MoveOutcome::Moved(dest)) => println!("{}", dest.display()),
        Ok(MoveOutcome::Skipped) => println!("Skipped protected file {}", args.source.display()),
        Err(e) if e.is_already_moved() => println!("Already moved: {}", args.source.display()),
        Err(e) => return Err(e.into()),
    }
    Ok(ExitCode::Success)
}

fn run_config(args: &ConfigArgs, config: &Config) -> Result<ExitCode> {
    if args.path {
        match Config::default_path() {
            Some(path) => println!("{}", path.display()),
            None => bail!("no configuration directory on this platform"),
        }
    } else {
        print!("{}", config.to_toml()?);
    }
    Ok(ExitCode::Success)
}
